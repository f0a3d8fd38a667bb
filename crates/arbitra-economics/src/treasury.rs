/// PROTOCOL TREASURY
///
/// Bookkeeping of protocol-owned value per currency. The tokens themselves
/// stay in the protocol custody account; this ledger records which part of
/// custody belongs to the protocol (fee dust, protocol shares, slashed stake).

use arbitra_core::{Amount, Currency, ProtocolError};
use log::debug;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Serialize)]
pub struct Treasury {
    balances: BTreeMap<Currency, Amount>,
}

impl Treasury {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn credit(&mut self, currency: Currency, amount: Amount) {
        if amount == 0 {
            return;
        }
        let entry = self.balances.entry(currency).or_insert(0);
        *entry = entry.saturating_add(amount);
        debug!("Treasury credited {} in {} (balance {})", amount, currency, entry);
    }

    pub fn debit(&mut self, currency: Currency, amount: Amount) -> Result<(), ProtocolError> {
        let available = self.balance(&currency);
        if available < amount {
            return Err(ProtocolError::InsufficientTreasury {
                currency,
                requested: amount,
                available,
            });
        }
        self.balances.insert(currency, available - amount);
        Ok(())
    }

    pub fn balance(&self, currency: &Currency) -> Amount {
        self.balances.get(currency).copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Currency, &Amount)> {
        self.balances.iter()
    }
}
