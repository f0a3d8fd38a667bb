/// ASSET COLLABORATOR
///
/// The protocol does not own any currency. Native value and fungible tokens
/// (the stake token and any deposit token) live behind `AssetBank`, which
/// exposes the usual `balance_of` / `transfer` / `transfer_from` / `approve`
/// surface. Supply mechanics are out of scope; `InMemoryBank` offers
/// `mint` only so hosts and tests can fund accounts.

use arbitra_core::{Address, Amount, AssetError, Currency};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub trait AssetBank {
    fn native_balance(&self, owner: &Address) -> Amount;

    fn transfer_native(
        &mut self,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), AssetError>;

    fn token_balance(&self, token: &Address, owner: &Address) -> Result<Amount, AssetError>;

    fn allowance(
        &self,
        token: &Address,
        owner: &Address,
        spender: &Address,
    ) -> Result<Amount, AssetError>;

    fn approve(
        &mut self,
        token: &Address,
        owner: &Address,
        spender: &Address,
        amount: Amount,
    ) -> Result<(), AssetError>;

    fn transfer(
        &mut self,
        token: &Address,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), AssetError>;

    /// Move `amount` from `from` to `to` on behalf of `spender`, consuming allowance.
    fn transfer_from(
        &mut self,
        token: &Address,
        spender: &Address,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), AssetError>;

    /// Balance of `owner` on the given rail.
    fn balance_of(&self, currency: &Currency, owner: &Address) -> Result<Amount, AssetError> {
        match currency {
            Currency::Native => Ok(self.native_balance(owner)),
            Currency::Token(token) => self.token_balance(token, owner),
        }
    }

    /// Push transfer on the given rail.
    fn pay(
        &mut self,
        currency: &Currency,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), AssetError> {
        match currency {
            Currency::Native => self.transfer_native(from, to, amount),
            Currency::Token(token) => self.transfer(token, from, to, amount),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct TokenAccounts {
    symbol: String,
    balances: BTreeMap<Address, Amount>,
    allowances: BTreeMap<(Address, Address), Amount>,
}

impl TokenAccounts {
    fn debit(&mut self, owner: &Address, amount: Amount) -> Result<(), AssetError> {
        let available = self.balances.get(owner).copied().unwrap_or(0);
        if available < amount {
            return Err(AssetError::InsufficientBalance {
                owner: *owner,
                needed: amount,
                available,
            });
        }
        self.balances.insert(*owner, available - amount);
        Ok(())
    }

    fn credit(&mut self, owner: &Address, amount: Amount) {
        let entry = self.balances.entry(*owner).or_insert(0);
        *entry = entry.saturating_add(amount);
    }
}

/// Ledger-backed bank used by simulations and tests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InMemoryBank {
    native: BTreeMap<Address, Amount>,
    tokens: BTreeMap<Address, TokenAccounts>,
}

impl InMemoryBank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_token(&mut self, token: Address, symbol: &str) {
        self.tokens.entry(token).or_insert_with(|| TokenAccounts {
            symbol: symbol.to_string(),
            ..TokenAccounts::default()
        });
    }

    pub fn token_symbol(&self, token: &Address) -> Option<&str> {
        self.tokens.get(token).map(|t| t.symbol.as_str())
    }

    pub fn mint_native(&mut self, to: &Address, amount: Amount) {
        let entry = self.native.entry(*to).or_insert(0);
        *entry = entry.saturating_add(amount);
    }

    pub fn mint(&mut self, token: &Address, to: &Address, amount: Amount) -> Result<(), AssetError> {
        self.accounts_mut(token)?.credit(to, amount);
        Ok(())
    }

    fn accounts(&self, token: &Address) -> Result<&TokenAccounts, AssetError> {
        self.tokens.get(token).ok_or(AssetError::UnknownToken(*token))
    }

    fn accounts_mut(&mut self, token: &Address) -> Result<&mut TokenAccounts, AssetError> {
        self.tokens
            .get_mut(token)
            .ok_or(AssetError::UnknownToken(*token))
    }
}

impl AssetBank for InMemoryBank {
    fn native_balance(&self, owner: &Address) -> Amount {
        self.native.get(owner).copied().unwrap_or(0)
    }

    fn transfer_native(
        &mut self,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), AssetError> {
        let available = self.native_balance(from);
        if available < amount {
            return Err(AssetError::InsufficientBalance {
                owner: *from,
                needed: amount,
                available,
            });
        }
        self.native.insert(*from, available - amount);
        self.mint_native(to, amount);
        Ok(())
    }

    fn token_balance(&self, token: &Address, owner: &Address) -> Result<Amount, AssetError> {
        Ok(self
            .accounts(token)?
            .balances
            .get(owner)
            .copied()
            .unwrap_or(0))
    }

    fn allowance(
        &self,
        token: &Address,
        owner: &Address,
        spender: &Address,
    ) -> Result<Amount, AssetError> {
        Ok(self
            .accounts(token)?
            .allowances
            .get(&(*owner, *spender))
            .copied()
            .unwrap_or(0))
    }

    fn approve(
        &mut self,
        token: &Address,
        owner: &Address,
        spender: &Address,
        amount: Amount,
    ) -> Result<(), AssetError> {
        self.accounts_mut(token)?
            .allowances
            .insert((*owner, *spender), amount);
        Ok(())
    }

    fn transfer(
        &mut self,
        token: &Address,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), AssetError> {
        let accounts = self.accounts_mut(token)?;
        accounts.debit(from, amount)?;
        accounts.credit(to, amount);
        Ok(())
    }

    fn transfer_from(
        &mut self,
        token: &Address,
        spender: &Address,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), AssetError> {
        let accounts = self.accounts_mut(token)?;
        let approved = accounts
            .allowances
            .get(&(*from, *spender))
            .copied()
            .unwrap_or(0);
        if approved < amount {
            return Err(AssetError::InsufficientAllowance {
                owner: *from,
                spender: *spender,
                needed: amount,
                approved,
            });
        }
        accounts.debit(from, amount)?;
        accounts.credit(to, amount);
        accounts
            .allowances
            .insert((*from, *spender), approved - amount);
        Ok(())
    }
}
