/// ARBITRA CORE PRIMITIVES
///
/// Shared vocabulary for every Arbitra crate:
/// - Addresses, process identifiers and currencies
/// - The simulated chain clock that feeds lock periods and entropy
/// - The protocol-wide error taxonomy
/// - Protocol configuration (YAML-loadable, validated)
/// - Outbound events and the append-only event log

pub mod chain;
pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use chain::{BlockInfo, ChainClock};
pub use config::{
    ConfigError, ExclusionPolicy, FeeSchedule, FeeShares, ProtocolConfig, SlashPolicy,
    MAX_FEE_DENOMINATOR,
};
pub use error::{AssetError, ProtocolError, Role};
pub use events::{EventLog, EventRecord, Phase, ProtocolEvent, RewardKind};
pub use types::{
    keccak256, Address, Amount, Currency, ProcessId, ProcessKey, ProcessState, Service,
};
