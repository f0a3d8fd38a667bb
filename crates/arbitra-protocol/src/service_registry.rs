/// SERVICE REGISTRY
///
/// Services are keyed by their admin (the broker). They are never deleted;
/// the validator panel is replaced wholesale.

use arbitra_core::{Address, FeeShares, ProtocolError, Service};
use log::info;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    services: BTreeMap<Address, Service>,
}

/// Panel must be non-empty, duplicate-free, and exclude the admin and the zero address.
pub fn validate_panel(admin: &Address, validators: &[Address]) -> Result<(), ProtocolError> {
    if validators.is_empty() {
        return Err(ProtocolError::InvalidValidatorSet(
            "validator set must not be empty".to_string(),
        ));
    }
    let mut seen = BTreeSet::new();
    for v in validators {
        if v == admin {
            return Err(ProtocolError::InvalidValidatorSet(format!(
                "service admin {} cannot validate its own service",
                admin
            )));
        }
        if v.is_zero() {
            return Err(ProtocolError::InvalidValidatorSet(
                "zero address cannot be a validator".to_string(),
            ));
        }
        if !seen.insert(*v) {
            return Err(ProtocolError::InvalidValidatorSet(format!(
                "duplicate validator {}",
                v
            )));
        }
    }
    Ok(())
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        admin: Address,
        validators: Vec<Address>,
        shares: FeeShares,
    ) -> Result<&Service, ProtocolError> {
        if admin.is_zero() {
            return Err(ProtocolError::InvalidValidatorSet(
                "service admin cannot be the zero address".to_string(),
            ));
        }
        if self.services.contains_key(&admin) {
            return Err(ProtocolError::ServiceExists(admin));
        }
        validate_panel(&admin, &validators)?;

        info!("Registered service {} with {} validators", admin, validators.len());
        Ok(&*self.services.entry(admin).or_insert(Service {
            admin,
            validators,
            shares,
        }))
    }

    pub fn get(&self, admin: &Address) -> Result<&Service, ProtocolError> {
        self.services
            .get(admin)
            .ok_or(ProtocolError::UnknownService(*admin))
    }

    pub fn set_validators(
        &mut self,
        admin: &Address,
        validators: Vec<Address>,
    ) -> Result<(), ProtocolError> {
        validate_panel(admin, &validators)?;
        let service = self
            .services
            .get_mut(admin)
            .ok_or(ProtocolError::UnknownService(*admin))?;
        info!(
            "Service {} validator panel replaced ({} -> {} members)",
            admin,
            service.validators.len(),
            validators.len()
        );
        service.validators = validators;
        Ok(())
    }

    pub fn set_shares(&mut self, admin: &Address, shares: FeeShares) -> Result<(), ProtocolError> {
        let service = self
            .services
            .get_mut(admin)
            .ok_or(ProtocolError::UnknownService(*admin))?;
        service.shares = shares;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Service> {
        self.services.values()
    }
}
