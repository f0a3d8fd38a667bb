/// OUTBOUND EVENTS
///
/// The protocol cannot block waiting for the next validator. Instead every
/// round-advancing call emits a request event naming the assigned validator
/// and the full candidate pool; validator agents poll `EventLog::since` or
/// subscribe to the broadcast channel to learn when it is their turn.

use serde::{Deserialize, Serialize};

use crate::config::{FeeShares, SlashPolicy};
use crate::types::{Address, Amount, Currency, ProcessId};

/// Consensus phase a request or submission belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Cost,
    Termination,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Cost => "cost",
            Phase::Termination => "termination",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardKind {
    Broker,
    Validator,
    Treasury,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolEvent {
    ServiceAdded {
        admin: Address,
        validators: Vec<Address>,
        shares: FeeShares,
    },
    ValidatorsUpdated {
        admin: Address,
        validators: Vec<Address>,
    },
    SharesUpdated {
        admin: Address,
        shares: FeeShares,
    },
    ParameterChanged {
        name: String,
        value: String,
    },
    AdminChanged {
        admin: Address,
        granted: bool,
    },
    Staked {
        service: Address,
        validator: Address,
        amount: Amount,
        locked_until: u64,
    },
    Unstaked {
        service: Address,
        validator: Address,
        amount: Amount,
    },
    Slashed {
        service: Address,
        validator: Address,
        amount: Amount,
        policy: SlashPolicy,
    },
    ProcessCreated {
        customer: Address,
        process_id: ProcessId,
        service: Address,
        currency: Currency,
    },
    /// A validator must now submit a cost quote
    CostRequest {
        customer: Address,
        process_id: ProcessId,
        round: u32,
        validator: Address,
        candidates: Vec<Address>,
    },
    CostProposed {
        customer: Address,
        process_id: ProcessId,
        validator: Address,
        amount: Amount,
        deposit_addr: Address,
    },
    CostSet {
        customer: Address,
        process_id: ProcessId,
        amount: Amount,
        deposit_addr: Address,
    },
    Deposited {
        customer: Address,
        process_id: ProcessId,
        amount: Amount,
        protocol_fee: Amount,
        payout: Amount,
        deposit_addr: Address,
    },
    ActionDeclared {
        customer: Address,
        process_id: ProcessId,
        index: usize,
        text: String,
    },
    /// A validator must now vote on completion
    TerminationRequest {
        customer: Address,
        process_id: ProcessId,
        round: u32,
        validator: Address,
        candidates: Vec<Address>,
    },
    TerminationVoted {
        customer: Address,
        process_id: ProcessId,
        validator: Address,
        vote: bool,
    },
    Completed {
        customer: Address,
        process_id: ProcessId,
        verdict: bool,
    },
    RewardPaid {
        customer: Address,
        process_id: ProcessId,
        recipient: Address,
        amount: Amount,
        kind: RewardKind,
    },
    TreasuryWithdrawn {
        currency: Currency,
        to: Address,
        amount: Amount,
    },
}

impl ProtocolEvent {
    /// The validator a request event is waiting on, if any.
    pub fn requested_validator(&self) -> Option<(Phase, &Address)> {
        match self {
            ProtocolEvent::CostRequest { validator, .. } => Some((Phase::Cost, validator)),
            ProtocolEvent::TerminationRequest { validator, .. } => {
                Some((Phase::Termination, validator))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Position in the log, starting at 0
    pub seq: u64,
    /// Block height the emitting call observed
    pub height: u64,
    pub event: ProtocolEvent,
}

/// Append-only event log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventLog {
    records: Vec<EventRecord>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, height: u64, event: ProtocolEvent) -> &EventRecord {
        let seq = self.records.len() as u64;
        self.records.push(EventRecord { seq, height, event });
        &self.records[self.records.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records with `seq >= from`.
    pub fn since(&self, from: u64) -> &[EventRecord] {
        let start = (from as usize).min(self.records.len());
        &self.records[start..]
    }

    pub fn last(&self) -> Option<&EventRecord> {
        self.records.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EventRecord> {
        self.records.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(round: u32) -> ProtocolEvent {
        ProtocolEvent::CostRequest {
            customer: Address::from_label("customer"),
            process_id: ProcessId::from_label("123"),
            round,
            validator: Address::from_label("v1"),
            candidates: vec![Address::from_label("v1"), Address::from_label("v2")],
        }
    }

    #[test]
    fn test_log_sequence_numbers() {
        let mut log = EventLog::new();
        log.emit(1, request(1));
        log.emit(2, request(2));
        log.emit(2, request(3));

        assert_eq!(log.len(), 3);
        let tail = log.since(1);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].seq, 1);
        assert_eq!(tail[1].height, 2);
        assert!(log.since(10).is_empty());
    }

    #[test]
    fn test_requested_validator() {
        let event = request(1);
        let (phase, who) = event.requested_validator().unwrap();
        assert_eq!(phase, Phase::Cost);
        assert_eq!(*who, Address::from_label("v1"));

        let done = ProtocolEvent::Completed {
            customer: Address::from_label("customer"),
            process_id: ProcessId::from_label("123"),
            verdict: true,
        };
        assert!(done.requested_validator().is_none());
    }

    #[test]
    fn test_event_json_is_tagged() {
        let json = serde_json::to_value(request(1)).unwrap();
        assert_eq!(json["type"], "cost_request");
        assert_eq!(json["round"], 1);
    }
}
