/// ARBITRA CONSENSUS
///
/// - `randomness`: injectable entropy sources with an explicit assurance grade
/// - `selector`: stake-gated, seeded selection of the next validator
/// - `round`: the "two consecutive equal submissions" agreement rule

pub mod randomness;
pub mod round;
pub mod selector;

pub use randomness::{ChainEntropy, EntropyGrade, RandomSource, SeedInput, StaticEntropy};
pub use round::{Advance, ConsensusRound, Submission};
pub use selector::{Selection, ValidatorSelector};
