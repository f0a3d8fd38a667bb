/// ARBITRA PROTOCOL
///
/// Escrow-and-arbitration state machine:
/// - `service_registry`: broker offerings and their validator panels
/// - `process_registry`: per-customer process records and their lifecycle
/// - `protocol`: the atomic operation facade every caller goes through
/// - `shared`: a serialized, cloneable handle for multi-task hosts

pub mod process_registry;
pub mod protocol;
pub mod service_registry;
pub mod shared;

pub use process_registry::{CostQuote, Process, ProcessRegistry};
pub use protocol::{Protocol, CUSTODY_LABEL};
pub use service_registry::ServiceRegistry;
pub use shared::SharedProtocol;
