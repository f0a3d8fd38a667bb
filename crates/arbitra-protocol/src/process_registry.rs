/// PROCESS REGISTRY
///
/// Processes are keyed by `(customer, process_id)` and move through
///
///   Created -> CostPending -> CostSet -> Deposited -> Terminating -> Completed
///
/// one step at a time. `Completed` is terminal: no operation mutates a
/// completed process again.

use arbitra_consensus::ConsensusRound;
use arbitra_core::{Address, Amount, Currency, ProcessId, ProcessKey, ProcessState, ProtocolError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Value validators agree on in the cost phase. Both fields must match for
/// two submissions to agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostQuote {
    pub amount: Amount,
    pub deposit_addr: Address,
}

impl fmt::Display for CostQuote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.amount, self.deposit_addr)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Process {
    pub customer: Address,
    pub process_id: ProcessId,
    pub service_admin: Address,
    pub state: ProcessState,
    pub currency: Currency,
    /// Agreed cost; zero until `CostSet`
    pub cost_amount: Amount,
    /// Agreed payout address; zero until `CostSet`
    pub deposit_addr: Address,
    pub data: String,
    pub actions: Vec<String>,
    /// Block height at creation
    pub created_at: u64,
    /// Protocol fee held in custody since deposit
    pub retained_fee: Amount,
    /// Final termination vote
    pub verdict: Option<bool>,
    /// Distinct validators that submitted in either phase
    pub participants: Vec<Address>,
    /// Distinct validators that dissented in either phase
    pub dissenters: Vec<Address>,
    pub cost_round: ConsensusRound<CostQuote>,
    pub termination_round: ConsensusRound<bool>,
}

impl Process {
    pub fn new(
        customer: Address,
        process_id: ProcessId,
        service_admin: Address,
        currency: Currency,
        data: String,
        created_at: u64,
        cost_round: ConsensusRound<CostQuote>,
    ) -> Self {
        Process {
            customer,
            process_id,
            service_admin,
            state: ProcessState::Created,
            currency,
            cost_amount: 0,
            deposit_addr: Address::ZERO,
            data,
            actions: Vec::new(),
            created_at,
            retained_fee: 0,
            verdict: None,
            participants: Vec::new(),
            dissenters: Vec::new(),
            cost_round,
            termination_round: ConsensusRound::default(),
        }
    }

    pub fn key(&self) -> ProcessKey {
        ProcessKey::new(self.customer, self.process_id)
    }

    /// Fail with `InvalidState` unless the process is in one of `allowed`.
    pub fn ensure_state(
        &self,
        allowed: &[ProcessState],
        operation: &'static str,
    ) -> Result<(), ProtocolError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(ProtocolError::InvalidState {
                state: self.state,
                operation,
            })
        }
    }

    pub fn advance(&mut self, next: ProcessState, operation: &'static str) -> Result<(), ProtocolError> {
        if !self.state.can_advance_to(next) {
            return Err(ProtocolError::InvalidState {
                state: self.state,
                operation,
            });
        }
        self.state = next;
        Ok(())
    }

    pub fn record_participants(&mut self, participants: &[Address], dissenters: &[Address]) {
        for p in participants {
            if !self.participants.contains(p) {
                self.participants.push(*p);
            }
        }
        for d in dissenters {
            if !self.dissenters.contains(d) {
                self.dissenters.push(*d);
            }
        }
    }

    /// Participants that never dissented, in first-participation order.
    pub fn honest_validators(&self) -> Vec<Address> {
        self.participants
            .iter()
            .filter(|p| !self.dissenters.contains(p))
            .copied()
            .collect()
    }

    pub fn is_customer_or_broker(&self, who: &Address) -> bool {
        *who == self.customer || *who == self.service_admin
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProcessRegistry {
    processes: BTreeMap<ProcessKey, Process>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, customer: &Address, process_id: &ProcessId) -> bool {
        self.processes
            .contains_key(&ProcessKey::new(*customer, *process_id))
    }

    pub fn insert(&mut self, process: Process) -> Result<(), ProtocolError> {
        let key = process.key();
        if self.processes.contains_key(&key) {
            return Err(ProtocolError::ProcessExists {
                customer: key.customer,
                process_id: key.process_id,
            });
        }
        self.processes.insert(key, process);
        Ok(())
    }

    pub fn get(&self, customer: &Address, process_id: &ProcessId) -> Result<&Process, ProtocolError> {
        self.processes
            .get(&ProcessKey::new(*customer, *process_id))
            .ok_or(ProtocolError::UnknownProcess {
                customer: *customer,
                process_id: *process_id,
            })
    }

    pub fn get_mut(
        &mut self,
        customer: &Address,
        process_id: &ProcessId,
    ) -> Result<&mut Process, ProtocolError> {
        self.processes
            .get_mut(&ProcessKey::new(*customer, *process_id))
            .ok_or(ProtocolError::UnknownProcess {
                customer: *customer,
                process_id: *process_id,
            })
    }

    /// Native-rail processes of `customer` waiting for their deposit.
    pub fn awaiting_native_deposit(&self, customer: &Address) -> Vec<ProcessId> {
        self.processes
            .values()
            .filter(|p| {
                p.customer == *customer
                    && p.state == ProcessState::CostSet
                    && p.currency == Currency::Native
            })
            .map(|p| p.process_id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Process> {
        self.processes.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbitra_consensus::Selection;

    fn process(customer: &str, id: &str) -> Process {
        let v = Address::from_label("v1");
        Process::new(
            Address::from_label(customer),
            ProcessId::from_label(id),
            Address::from_label("broker"),
            Currency::Native,
            "repair the roof".to_string(),
            0,
            ConsensusRound::open(Selection {
                validator: v,
                candidates: vec![v],
            }),
        )
    }

    #[test]
    fn test_ids_are_unique_per_customer() {
        let mut registry = ProcessRegistry::new();
        registry.insert(process("alice", "123")).unwrap();
        registry.insert(process("bob", "123")).unwrap();
        assert!(matches!(
            registry.insert(process("alice", "123")),
            Err(ProtocolError::ProcessExists { .. })
        ));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_state_cannot_skip() {
        let mut p = process("alice", "123");
        assert!(p.advance(ProcessState::Deposited, "deposit").is_err());
        assert_eq!(p.state, ProcessState::Created);
        p.advance(ProcessState::CostPending, "set_process_cost").unwrap();
        p.advance(ProcessState::CostSet, "set_process_cost").unwrap();
        assert_eq!(
            p.ensure_state(&[ProcessState::Deposited], "declare_action"),
            Err(ProtocolError::InvalidState {
                state: ProcessState::CostSet,
                operation: "declare_action",
            })
        );
    }

    #[test]
    fn test_honest_validators_exclude_dissenters() {
        let mut p = process("alice", "123");
        let (a, b, c) = (
            Address::from_label("a"),
            Address::from_label("b"),
            Address::from_label("c"),
        );
        p.record_participants(&[a, b], &[]);
        p.record_participants(&[c, a, b], &[c]);
        assert_eq!(p.participants, vec![a, b, c]);
        assert_eq!(p.honest_validators(), vec![a, b]);
    }

    #[test]
    fn test_awaiting_native_deposit() {
        let mut registry = ProcessRegistry::new();
        let mut p = process("alice", "1");
        p.state = ProcessState::CostSet;
        registry.insert(p).unwrap();
        registry.insert(process("alice", "2")).unwrap();

        let alice = Address::from_label("alice");
        assert_eq!(registry.awaiting_native_deposit(&alice), vec![ProcessId::from_label("1")]);
        assert!(registry
            .awaiting_native_deposit(&Address::from_label("bob"))
            .is_empty());
    }
}
