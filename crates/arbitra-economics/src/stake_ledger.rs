/// VALIDATOR STAKE LEDGER
///
/// Stakes are keyed by `(service_admin, validator)`. A validator is
/// selectable for a service only while its stake there is strictly positive.
///
/// SAFETY INVARIANTS:
/// 1. A stake balance never goes below zero (all arithmetic is checked)
/// 2. Every `stake` call pushes `locked_until` to `now + locking_period`
/// 3. A slash never exceeds the current balance
/// 4. `total_staked` always equals the sum of all balances

use arbitra_core::{Address, Amount, Currency, ProtocolError, Role, Service, SlashPolicy};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::asset_bank::AssetBank;
use crate::treasury::Treasury;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stake {
    pub amount: Amount,
    /// Block height before which unstaking is refused
    pub locked_until: u64,
    /// Cumulative amount slashed from this stake
    pub total_slashed: Amount,
}

impl Stake {
    pub fn is_active(&self) -> bool {
        self.amount > 0
    }
}

/// Audit record of a slash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashRecord {
    pub service_admin: Address,
    pub validator: Address,
    pub amount: Amount,
    pub balance_after: Amount,
    pub height: u64,
    pub policy: SlashPolicy,
}

#[derive(Debug, Clone)]
pub struct StakeLedger {
    stake_token: Address,
    stakes: BTreeMap<(Address, Address), Stake>,
    total_staked: Amount,
    slash_history: Vec<SlashRecord>,
}

impl StakeLedger {
    pub fn new(stake_token: Address) -> Self {
        StakeLedger {
            stake_token,
            stakes: BTreeMap::new(),
            total_staked: 0,
            slash_history: Vec::new(),
        }
    }

    pub fn stake_token(&self) -> Address {
        self.stake_token
    }

    /// Pull `amount` of the stake token from `validator` into `custody` and
    /// credit it to the validator's stake for `service`.
    #[allow(clippy::too_many_arguments)]
    pub fn stake<B: AssetBank>(
        &mut self,
        bank: &mut B,
        custody: &Address,
        service: &Service,
        validator: &Address,
        amount: Amount,
        now: u64,
        locking_period: u64,
    ) -> Result<Stake, ProtocolError> {
        if amount == 0 {
            return Err(ProtocolError::InvalidAmount("stake amount must be > 0"));
        }
        if !service.is_validator(validator) {
            return Err(ProtocolError::unauthorized(validator, Role::Validator));
        }
        let key = (service.admin, *validator);
        let current = self.stakes.get(&key).copied().unwrap_or_default();
        let new_amount = current
            .amount
            .checked_add(amount)
            .ok_or(ProtocolError::InvalidAmount("stake overflows"))?;
        let new_total = self
            .total_staked
            .checked_add(amount)
            .ok_or(ProtocolError::InvalidAmount("total stake overflows"))?;

        bank.transfer_from(&self.stake_token, custody, validator, custody, amount)?;

        let updated = Stake {
            amount: new_amount,
            locked_until: now.saturating_add(locking_period),
            total_slashed: current.total_slashed,
        };
        self.stakes.insert(key, updated);
        self.total_staked = new_total;

        info!(
            "Validator {} staked {} on service {} (balance {}, locked until {})",
            validator, amount, service.admin, updated.amount, updated.locked_until
        );
        Ok(updated)
    }

    /// Return `amount` of stake to the validator once the lock has expired.
    pub fn unstake<B: AssetBank>(
        &mut self,
        bank: &mut B,
        custody: &Address,
        service_admin: &Address,
        validator: &Address,
        amount: Amount,
        now: u64,
    ) -> Result<Stake, ProtocolError> {
        if amount == 0 {
            return Err(ProtocolError::InvalidAmount("unstake amount must be > 0"));
        }
        let key = (*service_admin, *validator);
        let current = self.stakes.get(&key).copied().unwrap_or_default();
        if now < current.locked_until {
            return Err(ProtocolError::StakeLocked {
                locked_until: current.locked_until,
                now,
            });
        }
        if amount > current.amount {
            return Err(ProtocolError::InsufficientStake {
                requested: amount,
                available: current.amount,
            });
        }

        bank.transfer(&self.stake_token, custody, validator, amount)?;

        let updated = Stake {
            amount: current.amount - amount,
            ..current
        };
        self.stakes.insert(key, updated);
        self.total_staked -= amount;

        info!(
            "Validator {} unstaked {} from service {} (balance {})",
            validator, amount, service_admin, updated.amount
        );
        Ok(updated)
    }

    /// Slash `penalty_perc`% (floor) of the validator's stake and route the
    /// tokens per `policy`. Returns the slashed amount.
    #[allow(clippy::too_many_arguments)]
    pub fn slash<B: AssetBank>(
        &mut self,
        bank: &mut B,
        custody: &Address,
        treasury: &mut Treasury,
        service_admin: &Address,
        validator: &Address,
        penalty_perc: u32,
        policy: SlashPolicy,
        now: u64,
    ) -> Result<Amount, ProtocolError> {
        let key = (*service_admin, *validator);
        let current = self.stakes.get(&key).copied().unwrap_or_default();
        let penalty = (current.amount / 100) * penalty_perc as u128
            + (current.amount % 100) * penalty_perc as u128 / 100;
        let penalty = penalty.min(current.amount);
        if penalty == 0 {
            warn!(
                "Validator {} dissented on service {} but has nothing to slash",
                validator, service_admin
            );
            return Ok(0);
        }

        match policy {
            SlashPolicy::Treasury => treasury.credit(Currency::Token(self.stake_token), penalty),
            SlashPolicy::Burn => {
                bank.transfer(&self.stake_token, custody, &Address::BURN, penalty)?
            }
        }

        let updated = Stake {
            amount: current.amount - penalty,
            locked_until: current.locked_until,
            total_slashed: current.total_slashed.saturating_add(penalty),
        };
        self.stakes.insert(key, updated);
        self.total_staked -= penalty;
        self.slash_history.push(SlashRecord {
            service_admin: *service_admin,
            validator: *validator,
            amount: penalty,
            balance_after: updated.amount,
            height: now,
            policy,
        });

        info!(
            "Slashed validator {} on service {}: {} ({}%), remaining stake {}",
            validator, service_admin, penalty, penalty_perc, updated.amount
        );
        Ok(penalty)
    }

    /// Stake of `validator` on `service_admin`; zero if it never staked.
    pub fn stake_of(&self, service_admin: &Address, validator: &Address) -> Stake {
        self.stakes
            .get(&(*service_admin, *validator))
            .copied()
            .unwrap_or_default()
    }

    pub fn is_active(&self, service_admin: &Address, validator: &Address) -> bool {
        self.stake_of(service_admin, validator).is_active()
    }

    /// Panel members with positive stake, in service order.
    pub fn active_validators(&self, service: &Service) -> Vec<Address> {
        service
            .validators
            .iter()
            .filter(|v| self.is_active(&service.admin, v))
            .copied()
            .collect()
    }

    pub fn total_staked(&self) -> Amount {
        self.total_staked
    }

    pub fn slash_history(&self) -> &[SlashRecord] {
        &self.slash_history
    }
}
