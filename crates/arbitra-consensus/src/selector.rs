/// VALIDATOR SELECTOR
///
/// eligible = { v in service.validators : stake(v) > 0 } \ excluded
///
/// The eligible list (service order) is shuffled with a Fisher-Yates pass
/// driven by a `StdRng` seeded from the injected `RandomSource`. The head of
/// the shuffled list is the assigned validator; the whole list is published
/// with the request event so anyone can audit the draw.

use arbitra_core::{Address, ProtocolError, Service};
use arbitra_economics::StakeLedger;
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::randomness::{ChainEntropy, EntropyGrade, RandomSource, SeedInput};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub validator: Address,
    /// Shuffled eligible pool; `candidates[0] == validator`
    pub candidates: Vec<Address>,
}

#[derive(Debug, Clone)]
pub struct ValidatorSelector {
    source: Arc<dyn RandomSource>,
}

impl Default for ValidatorSelector {
    fn default() -> Self {
        Self::new(Arc::new(ChainEntropy))
    }
}

impl ValidatorSelector {
    pub fn new(source: Arc<dyn RandomSource>) -> Self {
        ValidatorSelector { source }
    }

    pub fn grade(&self) -> EntropyGrade {
        self.source.grade()
    }

    /// Panel members with positive stake that are not excluded, in service order.
    pub fn eligible(
        service: &Service,
        ledger: &StakeLedger,
        excluded: &BTreeSet<Address>,
    ) -> Vec<Address> {
        ledger
            .active_validators(service)
            .into_iter()
            .filter(|v| !excluded.contains(v))
            .collect()
    }

    pub fn select(
        &self,
        service: &Service,
        ledger: &StakeLedger,
        excluded: &BTreeSet<Address>,
        input: &SeedInput,
    ) -> Result<Selection, ProtocolError> {
        let mut candidates = Self::eligible(service, ledger, excluded);
        if candidates.is_empty() {
            return Err(ProtocolError::NoEligibleValidator(service.admin));
        }

        let mut rng = StdRng::from_seed(self.source.seed(input));
        for i in (1..candidates.len()).rev() {
            let j = rng.gen_range(0..=i);
            candidates.swap(i, j);
        }

        let validator = candidates[0];
        debug!(
            "Selected validator {} for {} {} round {} from {} candidates",
            validator,
            input.process_id,
            input.phase.as_str(),
            input.round,
            candidates.len()
        );
        Ok(Selection {
            validator,
            candidates,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::randomness::StaticEntropy;
    use arbitra_core::{ChainClock, FeeShares, Phase, ProcessId};
    use arbitra_economics::{AssetBank, InMemoryBank};
    use proptest::prelude::*;

    fn setup(stakes: &[u128]) -> (Service, StakeLedger) {
        let _ = env_logger::builder().is_test(true).try_init();
        let token = Address::from_label("stake-token");
        let custody = Address::from_label("protocol");
        let validators: Vec<Address> = (0..stakes.len())
            .map(|i| Address::from_label(&format!("validator-{}", i)))
            .collect();
        let service = Service {
            admin: Address::from_label("broker"),
            validators: validators.clone(),
            shares: FeeShares::default(),
        };
        let mut bank = InMemoryBank::new();
        bank.register_token(token, "STK");
        let mut ledger = StakeLedger::new(token);
        for (v, amount) in validators.iter().zip(stakes) {
            if *amount == 0 {
                continue;
            }
            bank.mint(&token, v, *amount).unwrap();
            bank.approve(&token, v, &custody, *amount).unwrap();
            ledger
                .stake(&mut bank, &custody, &service, v, *amount, 0, 0)
                .unwrap();
        }
        (service, ledger)
    }

    fn input(round: u32) -> SeedInput {
        SeedInput {
            block: ChainClock::genesis(1_700_000_000, 12).current(),
            customer: Address::from_label("customer"),
            process_id: ProcessId::from_label("123"),
            phase: Phase::Cost,
            round,
        }
    }

    #[test]
    fn test_unstaked_validators_are_skipped() {
        let (service, ledger) = setup(&[10, 0, 30]);
        let selector = ValidatorSelector::default();
        let selection = selector
            .select(&service, &ledger, &BTreeSet::new(), &input(1))
            .unwrap();

        assert_eq!(selection.candidates.len(), 2);
        assert!(!selection.candidates.contains(&service.validators[1]));
        assert_eq!(selection.validator, selection.candidates[0]);
    }

    #[test]
    fn test_excluded_validators_are_skipped() {
        let (service, ledger) = setup(&[10, 20, 30]);
        let excluded: BTreeSet<Address> = service.validators[..2].iter().copied().collect();
        let selection = ValidatorSelector::default()
            .select(&service, &ledger, &excluded, &input(2))
            .unwrap();
        assert_eq!(selection.validator, service.validators[2]);
        assert_eq!(selection.candidates, vec![service.validators[2]]);
    }

    #[test]
    fn test_empty_pool() {
        let (service, ledger) = setup(&[0, 0]);
        assert_eq!(
            ValidatorSelector::default().select(&service, &ledger, &BTreeSet::new(), &input(1)),
            Err(ProtocolError::NoEligibleValidator(service.admin))
        );
    }

    #[test]
    fn test_selection_is_reproducible() {
        let (service, ledger) = setup(&[1, 2, 3, 4, 5]);
        let selector = ValidatorSelector::new(Arc::new(StaticEntropy::new([1u8; 32])));
        let a = selector.select(&service, &ledger, &BTreeSet::new(), &input(1)).unwrap();
        let b = selector.select(&service, &ledger, &BTreeSet::new(), &input(1)).unwrap();
        assert_eq!(a, b);
    }

    proptest! {
        #[test]
        fn prop_candidates_are_a_permutation_of_eligible(round in 0u32..1_000, count in 1usize..8) {
            let stakes: Vec<u128> = (0..count).map(|i| (i as u128 % 3)).collect();
            let (service, ledger) = setup(&stakes);
            let eligible = ValidatorSelector::eligible(&service, &ledger, &BTreeSet::new());
            match ValidatorSelector::default().select(&service, &ledger, &BTreeSet::new(), &input(round)) {
                Ok(selection) => {
                    let mut sorted = selection.candidates.clone();
                    sorted.sort();
                    let mut expected = eligible.clone();
                    expected.sort();
                    prop_assert_eq!(sorted, expected);
                    prop_assert_eq!(selection.validator, selection.candidates[0]);
                }
                Err(_) => prop_assert!(eligible.is_empty()),
            }
        }
    }
}
