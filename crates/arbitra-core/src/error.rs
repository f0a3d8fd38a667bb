/// PROTOCOL ERROR TAXONOMY
///
/// Every failure is synchronous and terminal for the call that raised it;
/// a failed call leaves all state exactly as it was before the call.

use std::fmt;
use thiserror::Error;

use crate::config::ConfigError;
use crate::types::{Address, Amount, Currency, ProcessId, ProcessState};

/// Role a caller must hold for a guarded operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Protocol admin / governance
    Admin,
    /// Admin of the addressed service, or protocol admin
    ServiceOwner,
    /// Broker (service admin) of the process
    Broker,
    /// Member of the service's validator panel
    Validator,
    /// The validator currently assigned to the consensus round
    AssignedValidator,
    /// Customer or broker of the process
    Party,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Admin => "admin",
            Role::ServiceOwner => "service owner",
            Role::Broker => "broker",
            Role::Validator => "validator",
            Role::AssignedValidator => "assigned validator",
            Role::Party => "customer or broker",
        };
        f.write_str(name)
    }
}

/// Failures raised by the deposit / staking asset collaborator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AssetError {
    #[error("Unknown token: {0}")]
    UnknownToken(Address),
    #[error("Insufficient balance for {owner}: needed {needed}, available {available}")]
    InsufficientBalance {
        owner: Address,
        needed: Amount,
        available: Amount,
    },
    #[error("Insufficient allowance from {owner} to {spender}: needed {needed}, approved {approved}")]
    InsufficientAllowance {
        owner: Address,
        spender: Address,
        needed: Amount,
        approved: Amount,
    },
    #[error("Transfer rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Unknown service: {0}")]
    UnknownService(Address),
    #[error("Service already registered: {0}")]
    ServiceExists(Address),
    #[error("Invalid validator set: {0}")]
    InvalidValidatorSet(String),
    #[error("Unauthorized: {caller} is not the {role}")]
    Unauthorized { caller: Address, role: Role },
    #[error("Invalid state: {operation} not allowed while process is {state}")]
    InvalidState {
        state: ProcessState,
        operation: &'static str,
    },
    #[error("Unknown process {process_id} for customer {customer}")]
    UnknownProcess {
        customer: Address,
        process_id: ProcessId,
    },
    #[error("Process {process_id} already exists for customer {customer}")]
    ProcessExists {
        customer: Address,
        process_id: ProcessId,
    },
    #[error("Amount mismatch: expected {expected}, got {got}")]
    AmountMismatch { expected: Amount, got: Amount },
    #[error("Invalid amount: {0}")]
    InvalidAmount(&'static str),
    #[error("Insufficient stake: requested {requested}, available {available}")]
    InsufficientStake { requested: Amount, available: Amount },
    #[error("Stake locked until block {locked_until} (current block {now})")]
    StakeLocked { locked_until: u64, now: u64 },
    #[error("No eligible validator left for service {0}")]
    NoEligibleValidator(Address),
    #[error("Currency mismatch: process uses {expected}, call used {got}")]
    CurrencyMismatch { expected: Currency, got: Currency },
    #[error("No process of {0} is awaiting a native deposit")]
    NoPendingDeposit(Address),
    #[error("{customer} has {count} processes awaiting a native deposit")]
    AmbiguousDeposit { customer: Address, count: usize },
    #[error("Insufficient treasury balance in {currency}: requested {requested}, available {available}")]
    InsufficientTreasury {
        currency: Currency,
        requested: Amount,
        available: Amount,
    },
    #[error("Cannot revoke the last protocol admin")]
    LastAdmin,
    #[error("Asset error: {0}")]
    Asset(#[from] AssetError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl ProtocolError {
    /// True when the failure cannot resolve through another actor's normal
    /// next action and needs administrative intervention (adding validators,
    /// re-staking).
    pub fn is_permanent(&self) -> bool {
        matches!(self, ProtocolError::NoEligibleValidator(_))
    }

    pub fn unauthorized(caller: &Address, role: Role) -> Self {
        ProtocolError::Unauthorized {
            caller: *caller,
            role,
        }
    }
}
