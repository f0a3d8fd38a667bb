/// ARBITRA ECONOMICS
///
/// Financial bookkeeping of the escrow protocol:
/// - `asset_bank`: the external value/token collaborator and an in-memory implementation
/// - `stake_ledger`: per-service validator stakes with lock and slash rules
/// - `fee_router`: deposit splitting and completion-time fee distribution
/// - `treasury`: protocol-owned balances per currency

pub mod asset_bank;
pub mod fee_router;
pub mod stake_ledger;
pub mod treasury;

pub use asset_bank::{AssetBank, InMemoryBank};
pub use fee_router::{DepositSplit, Distribution, FeeRouter};
pub use stake_ledger::{SlashRecord, Stake, StakeLedger};
pub use treasury::Treasury;
