/// AGREEMENT ROUND
///
/// One phase of process consensus (cost or termination). The rule is the
/// same for both phases:
/// 1. The first submission of the assigned validator becomes the baseline.
/// 2. A different validator is drawn. If its value equals the baseline the
///    phase is agreed; otherwise its submission becomes the new baseline and
///    another validator is drawn.
/// 3. On agreement, every distinct validator whose submission differed from
///    the agreed value is reported as a dissenter.
///
/// Rounds are unbounded. The next validator is drawn BEFORE any field is
/// mutated, so a failed draw leaves the round exactly as it was.

use arbitra_core::{Address, ExclusionPolicy, ProtocolError, Role};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::selector::Selection;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission<V> {
    pub validator: Address,
    pub value: V,
    pub round: u32,
}

/// Outcome of an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance<V> {
    /// Disagreement (or first submission); `selection` names who goes next
    Awaiting { round: u32, selection: Selection },
    Agreed {
        value: V,
        round: u32,
        /// Distinct validators with at least one differing submission
        dissenters: Vec<Address>,
        /// Distinct validators who submitted, in first-submission order
        participants: Vec<Address>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusRound<V> {
    round: u32,
    assigned: Option<Address>,
    candidates: Vec<Address>,
    pending: Option<Submission<V>>,
    history: Vec<Submission<V>>,
    agreed: Option<V>,
}

impl<V> Default for ConsensusRound<V> {
    fn default() -> Self {
        ConsensusRound {
            round: 0,
            assigned: None,
            candidates: Vec::new(),
            pending: None,
            history: Vec::new(),
            agreed: None,
        }
    }
}

impl<V: Clone + PartialEq> ConsensusRound<V> {
    /// Start the phase with its first assigned validator (round 1).
    pub fn open(selection: Selection) -> Self {
        ConsensusRound {
            round: 1,
            assigned: Some(selection.validator),
            candidates: selection.candidates,
            ..Self::default()
        }
    }

    /// Accept `value` from `caller`.
    ///
    /// `select_next` receives the exclusion set and the upcoming round number
    /// and must return the next assignment; its error aborts the submission.
    pub fn submit<F>(
        &mut self,
        caller: &Address,
        value: V,
        policy: ExclusionPolicy,
        select_next: F,
    ) -> Result<Advance<V>, ProtocolError>
    where
        F: FnOnce(&BTreeSet<Address>, u32) -> Result<Selection, ProtocolError>,
    {
        if self.assigned.as_ref() != Some(caller) {
            return Err(ProtocolError::unauthorized(caller, Role::AssignedValidator));
        }

        let submission = Submission {
            validator: *caller,
            value: value.clone(),
            round: self.round,
        };

        let agrees = self
            .pending
            .as_ref()
            .map(|baseline| baseline.value == value)
            .unwrap_or(false);

        if agrees {
            self.history.push(submission);
            self.pending = None;
            self.assigned = None;
            self.candidates.clear();
            self.agreed = Some(value.clone());
            return Ok(Advance::Agreed {
                dissenters: self.dissenters(&value),
                participants: self.participants(),
                value,
                round: self.round,
            });
        }

        let excluded = self.exclusion_set(caller, policy);
        let next_round = self.round + 1;
        let selection = select_next(&excluded, next_round)?;

        self.history.push(submission.clone());
        self.pending = Some(submission);
        self.round = next_round;
        self.assigned = Some(selection.validator);
        self.candidates = selection.candidates.clone();
        Ok(Advance::Awaiting {
            round: next_round,
            selection,
        })
    }

    fn exclusion_set(&self, caller: &Address, policy: ExclusionPolicy) -> BTreeSet<Address> {
        let mut excluded = BTreeSet::new();
        excluded.insert(*caller);
        if policy == ExclusionPolicy::AllPrior {
            excluded.extend(self.history.iter().map(|s| s.validator));
        }
        excluded
    }

    fn dissenters(&self, agreed: &V) -> Vec<Address> {
        let mut seen = BTreeSet::new();
        self.history
            .iter()
            .filter(|s| s.value != *agreed)
            .filter(|s| seen.insert(s.validator))
            .map(|s| s.validator)
            .collect()
    }

    /// Distinct submitters in first-submission order.
    pub fn participants(&self) -> Vec<Address> {
        let mut seen = BTreeSet::new();
        self.history
            .iter()
            .filter(|s| seen.insert(s.validator))
            .map(|s| s.validator)
            .collect()
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn assigned(&self) -> Option<&Address> {
        self.assigned.as_ref()
    }

    pub fn candidates(&self) -> &[Address] {
        &self.candidates
    }

    /// Current baseline awaiting confirmation
    pub fn pending(&self) -> Option<&Submission<V>> {
        self.pending.as_ref()
    }

    pub fn history(&self) -> &[Submission<V>] {
        &self.history
    }

    pub fn agreed(&self) -> Option<&V> {
        self.agreed.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.assigned.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn addr(i: usize) -> Address {
        Address::from_label(&format!("validator-{}", i))
    }

    /// First non-excluded member of `pool`, in order.
    fn first_free(
        pool: &[Address],
    ) -> impl Fn(&BTreeSet<Address>, u32) -> Result<Selection, ProtocolError> + '_ {
        move |excluded, _round| {
            let candidates: Vec<Address> =
                pool.iter().filter(|v| !excluded.contains(v)).copied().collect();
            match candidates.first() {
                Some(v) => Ok(Selection {
                    validator: *v,
                    candidates: candidates.clone(),
                }),
                None => Err(ProtocolError::NoEligibleValidator(Address::ZERO)),
            }
        }
    }

    fn opened(pool: &[Address]) -> ConsensusRound<u32> {
        ConsensusRound::open(Selection {
            validator: pool[0],
            candidates: pool.to_vec(),
        })
    }

    #[test]
    fn test_two_equal_submissions_agree() {
        let pool: Vec<Address> = (0..3).map(addr).collect();
        let mut round = opened(&pool);

        let first = round.submit(&pool[0], 5, ExclusionPolicy::AllPrior, first_free(&pool)).unwrap();
        assert!(matches!(first, Advance::Awaiting { round: 2, .. }));
        assert_eq!(round.assigned(), Some(&pool[1]));
        assert_eq!(round.pending().map(|s| s.value), Some(5));

        let second = round.submit(&pool[1], 5, ExclusionPolicy::AllPrior, first_free(&pool)).unwrap();
        assert_eq!(
            second,
            Advance::Agreed {
                value: 5,
                round: 2,
                dissenters: vec![],
                participants: vec![pool[0], pool[1]],
            }
        );
        assert_eq!(round.agreed(), Some(&5));
        assert!(!round.is_open());
    }

    #[test]
    fn test_disagreement_reports_dissenter() {
        let pool: Vec<Address> = (0..3).map(addr).collect();
        let mut round = opened(&pool);

        round.submit(&pool[0], 0, ExclusionPolicy::AllPrior, first_free(&pool)).unwrap();
        round.submit(&pool[1], 1, ExclusionPolicy::AllPrior, first_free(&pool)).unwrap();
        assert_eq!(round.assigned(), Some(&pool[2]));
        let outcome = round.submit(&pool[2], 1, ExclusionPolicy::AllPrior, first_free(&pool)).unwrap();

        match outcome {
            Advance::Agreed { value, dissenters, participants, .. } => {
                assert_eq!(value, 1);
                assert_eq!(dissenters, vec![pool[0]]);
                assert_eq!(participants, pool);
            }
            other => panic!("expected agreement, got {:?}", other),
        }
    }

    #[test]
    fn test_exhausted_pool_leaves_round_untouched() {
        let pool: Vec<Address> = (0..2).map(addr).collect();
        let mut round = opened(&pool);
        round.submit(&pool[0], 1, ExclusionPolicy::AllPrior, first_free(&pool)).unwrap();
        let before = round.clone();

        let err = round
            .submit(&pool[1], 2, ExclusionPolicy::AllPrior, first_free(&pool))
            .unwrap_err();
        assert!(err.is_permanent());
        assert_eq!(round, before);
    }

    #[test]
    fn test_previous_only_readmits_earlier_validators() {
        let pool: Vec<Address> = (0..2).map(addr).collect();
        let mut round = opened(&pool);
        round.submit(&pool[0], 1, ExclusionPolicy::PreviousOnly, first_free(&pool)).unwrap();
        round.submit(&pool[1], 2, ExclusionPolicy::PreviousOnly, first_free(&pool)).unwrap();
        assert_eq!(round.assigned(), Some(&pool[0]));
        assert_eq!(round.round(), 3);
    }

    #[test]
    fn test_only_assigned_validator_may_submit() {
        let pool: Vec<Address> = (0..3).map(addr).collect();
        let mut round = opened(&pool);
        let err = round
            .submit(&pool[1], 1, ExclusionPolicy::AllPrior, first_free(&pool))
            .unwrap_err();
        assert_eq!(err, ProtocolError::unauthorized(&pool[1], Role::AssignedValidator));
        assert!(round.history().is_empty());
    }

    #[test]
    fn test_unopened_round_accepts_nothing() {
        let pool: Vec<Address> = (0..3).map(addr).collect();
        let mut round: ConsensusRound<bool> = ConsensusRound::default();
        assert!(round
            .submit(&pool[0], true, ExclusionPolicy::AllPrior, first_free(&pool))
            .is_err());
    }

    proptest! {
        #[test]
        fn prop_agreed_value_is_first_consecutive_pair(values in proptest::collection::vec(0u32..3, 2..30)) {
            let pool: Vec<Address> = (0..3).map(addr).collect();
            let mut round = opened(&pool);

            let expected_idx = values.windows(2).position(|w| w[0] == w[1]);
            let mut outcome = None;
            for (i, value) in values.iter().enumerate() {
                let caller = *round.assigned().unwrap();
                match round.submit(&caller, *value, ExclusionPolicy::PreviousOnly, first_free(&pool)).unwrap() {
                    Advance::Agreed { value, dissenters, .. } => {
                        outcome = Some((i, value, dissenters));
                        break;
                    }
                    Advance::Awaiting { .. } => {}
                }
            }

            match (expected_idx, outcome) {
                (Some(idx), Some((i, value, dissenters))) => {
                    prop_assert_eq!(i, idx + 1);
                    prop_assert_eq!(value, values[idx]);
                    let history = round.history();
                    for s in history {
                        let dissented = history
                            .iter()
                            .any(|h| h.validator == s.validator && h.value != value);
                        prop_assert_eq!(dissenters.contains(&s.validator), dissented);
                    }
                }
                (None, None) => prop_assert!(round.is_open()),
                (expected, got) => prop_assert!(false, "expected {:?}, got {:?}", expected, got.map(|g| g.0)),
            }
        }
    }
}
