/// FEE ROUTER
///
/// Deposit: `protocol_fee = amount * numerator / denominator` (floor) stays in
/// custody, the remainder is forwarded to the process's deposit address in
/// the same call.
///
/// Completion: the retained fee is split by the service's `FeeShares`.
/// Broker share goes to the service admin, validator share is divided
/// equally among honest participants, and the protocol share plus any
/// rounding dust is credited to the treasury. Distributions always sum to
/// the retained fee exactly.

use arbitra_core::{Address, Amount, Currency, FeeSchedule, FeeShares, ProtocolConfig, ProtocolError};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::asset_bank::AssetBank;
use crate::treasury::Treasury;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositSplit {
    /// Retained in custody until completion
    pub protocol_fee: Amount,
    /// Forwarded to the deposit address
    pub payout: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distribution {
    pub broker: Address,
    pub broker_amount: Amount,
    pub validators: Vec<(Address, Amount)>,
    pub treasury: Amount,
}

impl Distribution {
    pub fn total(&self) -> Amount {
        self.broker_amount
            + self.validators.iter().map(|(_, a)| *a).sum::<Amount>()
            + self.treasury
    }
}

/// `amount * numerator / denominator` without overflowing on large amounts.
/// Requires `numerator <= denominator <= MAX_FEE_DENOMINATOR`.
fn mul_div(amount: Amount, numerator: u128, denominator: u128) -> Amount {
    (amount / denominator) * numerator + (amount % denominator) * numerator / denominator
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeRouter {
    fee: FeeSchedule,
    share_denominator: u32,
}

impl FeeRouter {
    pub fn new(fee: FeeSchedule, share_denominator: u32) -> Self {
        FeeRouter {
            fee,
            share_denominator,
        }
    }

    pub fn from_config(config: &ProtocolConfig) -> Self {
        Self::new(config.fee, config.share_denominator)
    }

    pub fn split_deposit(&self, amount: Amount) -> DepositSplit {
        let protocol_fee = mul_div(amount, self.fee.numerator, self.fee.denominator);
        DepositSplit {
            protocol_fee,
            payout: amount - protocol_fee,
        }
    }

    /// Pull `amount` from `payer` into custody and forward the payout.
    ///
    /// Native value is carried by the call itself; tokens are pulled with
    /// `transfer_from`, custody acting as spender.
    pub fn route_deposit<B: AssetBank>(
        &self,
        bank: &mut B,
        currency: &Currency,
        payer: &Address,
        custody: &Address,
        deposit_addr: &Address,
        amount: Amount,
    ) -> Result<DepositSplit, ProtocolError> {
        let split = self.split_deposit(amount);
        match currency {
            Currency::Native => bank.transfer_native(payer, custody, amount)?,
            Currency::Token(token) => bank.transfer_from(token, custody, payer, custody, amount)?,
        }
        if split.payout > 0 {
            bank.pay(currency, custody, deposit_addr, split.payout)?;
        }
        debug!(
            "Routed deposit of {} in {}: {} to {}, {} retained",
            amount, currency, split.payout, deposit_addr, split.protocol_fee
        );
        Ok(split)
    }

    /// Plan the completion-time split of `pool` for a service.
    ///
    /// `honest` lists the distinct participating validators that were not
    /// slashed; with none, the validator share falls to the treasury.
    pub fn plan_distribution(
        &self,
        pool: Amount,
        shares: &FeeShares,
        broker: &Address,
        honest: &[Address],
    ) -> Distribution {
        let denominator = self.share_denominator as u128;
        let broker_amount = mul_div(pool, shares.broker as u128, denominator);
        let validator_pool = mul_div(pool, shares.validators as u128, denominator);

        let validators: Vec<(Address, Amount)> = if honest.is_empty() {
            Vec::new()
        } else {
            let each = validator_pool / honest.len() as u128;
            honest.iter().map(|v| (*v, each)).collect()
        };
        let paid: Amount = broker_amount + validators.iter().map(|(_, a)| *a).sum::<Amount>();

        Distribution {
            broker: *broker,
            broker_amount,
            validators,
            treasury: pool - paid,
        }
    }

    /// Pay out a planned distribution from custody.
    pub fn pay_distribution<B: AssetBank>(
        &self,
        bank: &mut B,
        currency: &Currency,
        custody: &Address,
        treasury: &mut Treasury,
        distribution: &Distribution,
    ) -> Result<(), ProtocolError> {
        if distribution.broker_amount > 0 {
            bank.pay(currency, custody, &distribution.broker, distribution.broker_amount)?;
        }
        for (validator, amount) in &distribution.validators {
            if *amount > 0 {
                bank.pay(currency, custody, validator, *amount)?;
            }
        }
        treasury.credit(*currency, distribution.treasury);
        info!(
            "Distributed {} in {}: broker {}, {} validators, treasury {}",
            distribution.total(),
            currency,
            distribution.broker_amount,
            distribution.validators.len(),
            distribution.treasury
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset_bank::InMemoryBank;
    use proptest::prelude::*;

    fn router() -> FeeRouter {
        FeeRouter::from_config(&ProtocolConfig::default())
    }

    #[test]
    fn test_split_deposit_default_fee() {
        let router = router();
        assert_eq!(
            router.split_deposit(1_000),
            DepositSplit { protocol_fee: 2, payout: 998 }
        );
        assert_eq!(
            router.split_deposit(1),
            DepositSplit { protocol_fee: 0, payout: 1 }
        );
        assert_eq!(router.split_deposit(0).payout, 0);
    }

    #[test]
    fn test_split_deposit_widest_fee_schedule() {
        let fee = FeeSchedule {
            numerator: arbitra_core::MAX_FEE_DENOMINATOR - 1,
            denominator: arbitra_core::MAX_FEE_DENOMINATOR,
        };
        let router = FeeRouter::new(fee, 100);
        assert_eq!(
            router.split_deposit(10u128.pow(10)),
            DepositSplit { protocol_fee: 10u128.pow(10) - 1, payout: 1 }
        );
        let split = router.split_deposit(u128::MAX);
        assert_eq!(split.protocol_fee + split.payout, u128::MAX);
        assert!(split.payout > 0);
    }

    #[test]
    fn test_route_token_deposit() {
        let token = Address::from_label("deposit-token");
        let customer = Address::from_label("customer");
        let custody = Address::from_label("protocol");
        let target = Address::from_label("deposit-addr");
        let mut bank = InMemoryBank::new();
        bank.register_token(token, "DEP");
        bank.mint(&token, &customer, 10_000).unwrap();
        bank.approve(&token, &customer, &custody, 5_000).unwrap();

        let split = router()
            .route_deposit(&mut bank, &Currency::Token(token), &customer, &custody, &target, 5_000)
            .unwrap();

        assert_eq!(split.protocol_fee, 10);
        assert_eq!(bank.token_balance(&token, &target).unwrap(), 4_990);
        assert_eq!(bank.token_balance(&token, &custody).unwrap(), 10);
        assert_eq!(bank.token_balance(&token, &customer).unwrap(), 5_000);
    }

    #[test]
    fn test_route_native_deposit_without_funds_fails() {
        let mut bank = InMemoryBank::new();
        let customer = Address::from_label("customer");
        let result = router().route_deposit(
            &mut bank,
            &Currency::Native,
            &customer,
            &Address::from_label("protocol"),
            &Address::from_label("deposit-addr"),
            100,
        );
        assert!(matches!(result, Err(ProtocolError::Asset(_))));
    }

    #[test]
    fn test_plan_distribution_default_shares() {
        let broker = Address::from_label("broker");
        let honest = vec![Address::from_label("v1"), Address::from_label("v2")];
        let plan = router().plan_distribution(1_000, &FeeShares::default(), &broker, &honest);

        assert_eq!(plan.broker_amount, 800);
        assert_eq!(plan.validators, vec![(honest[0], 75), (honest[1], 75)]);
        assert_eq!(plan.treasury, 50);
        assert_eq!(plan.total(), 1_000);
    }

    #[test]
    fn test_validator_share_without_honest_validators_goes_to_treasury() {
        let broker = Address::from_label("broker");
        let plan = router().plan_distribution(100, &FeeShares::default(), &broker, &[]);
        assert_eq!(plan.broker_amount, 80);
        assert!(plan.validators.is_empty());
        assert_eq!(plan.treasury, 20);
    }

    #[test]
    fn test_pay_distribution_credits_treasury() {
        let custody = Address::from_label("protocol");
        let broker = Address::from_label("broker");
        let v1 = Address::from_label("v1");
        let mut bank = InMemoryBank::new();
        bank.mint_native(&custody, 100);
        let mut treasury = Treasury::new();

        let router = router();
        let plan = router.plan_distribution(100, &FeeShares::default(), &broker, &[v1]);
        router
            .pay_distribution(&mut bank, &Currency::Native, &custody, &mut treasury, &plan)
            .unwrap();

        assert_eq!(bank.native_balance(&broker), 80);
        assert_eq!(bank.native_balance(&v1), 15);
        assert_eq!(bank.native_balance(&custody), 5);
        assert_eq!(treasury.balance(&Currency::Native), 5);
    }

    proptest! {
        #[test]
        fn prop_distribution_sums_to_pool(
            pool in 0u128..10_000_000,
            validators in 0u32..=100,
            broker in 0u32..=100,
            honest_count in 0usize..7,
        ) {
            prop_assume!(validators + broker <= 100);
            let shares = FeeShares { validators, broker, protocol: 100 - validators - broker };
            let honest: Vec<Address> = (0..honest_count)
                .map(|i| Address::from_label(&format!("v{}", i)))
                .collect();
            let plan = router().plan_distribution(pool, &shares, &Address::from_label("broker"), &honest);
            prop_assert_eq!(plan.total(), pool);
        }

        #[test]
        fn prop_split_deposit_matches_formula(amount in 0u128..u64::MAX as u128) {
            let split = router().split_deposit(amount);
            prop_assert_eq!(split.protocol_fee, amount * 2 / 1000);
            prop_assert_eq!(split.protocol_fee + split.payout, amount);
        }
    }
}
