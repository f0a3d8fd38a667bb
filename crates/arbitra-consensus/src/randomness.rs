/// SELECTION ENTROPY
///
/// Validator selection is seeded from a `RandomSource`. The default source,
/// `ChainEntropy`, hashes public block data and is therefore only `Weak`:
/// a block producer can bias it. Hosts that need more assurance plug in a
/// `Verifiable` (VRF-backed) source without touching the selector.

use arbitra_core::{keccak256, Address, BlockInfo, Phase, ProcessId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Domain separator for selection seeds
const SELECTION_DOMAIN: &[u8] = b"ARBITRA_VALIDATOR_SELECTION_V1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntropyGrade {
    /// Predictable or biasable by block producers
    Weak,
    /// Backed by a verifiable random function or beacon
    Verifiable,
}

/// Everything a selection seed may depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedInput {
    pub block: BlockInfo,
    pub customer: Address,
    pub process_id: ProcessId,
    pub phase: Phase,
    pub round: u32,
}

impl SeedInput {
    fn encode(&self, include_block: bool) -> Vec<u8> {
        let mut buf = Vec::with_capacity(128);
        buf.extend_from_slice(SELECTION_DOMAIN);
        if include_block {
            buf.extend_from_slice(&self.block.hash);
            buf.extend_from_slice(&self.block.height.to_le_bytes());
            buf.extend_from_slice(&self.block.timestamp.to_le_bytes());
        }
        buf.extend_from_slice(self.customer.as_bytes());
        buf.extend_from_slice(self.process_id.as_bytes());
        buf.push(match self.phase {
            Phase::Cost => 0,
            Phase::Termination => 1,
        });
        buf.extend_from_slice(&self.round.to_le_bytes());
        buf
    }
}

pub trait RandomSource: Send + Sync + fmt::Debug {
    fn grade(&self) -> EntropyGrade;

    fn seed(&self, input: &SeedInput) -> [u8; 32];
}

/// Keccak-256 over the latest block header and the process coordinates.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChainEntropy;

impl RandomSource for ChainEntropy {
    fn grade(&self) -> EntropyGrade {
        EntropyGrade::Weak
    }

    fn seed(&self, input: &SeedInput) -> [u8; 32] {
        keccak256(&input.encode(true))
    }
}

/// Fixed-key source that ignores block data. Selection becomes a pure
/// function of the process coordinates, which makes simulations replayable.
#[derive(Debug, Clone, Copy)]
pub struct StaticEntropy {
    key: [u8; 32],
}

impl StaticEntropy {
    pub fn new(key: [u8; 32]) -> Self {
        StaticEntropy { key }
    }
}

impl RandomSource for StaticEntropy {
    fn grade(&self) -> EntropyGrade {
        EntropyGrade::Weak
    }

    fn seed(&self, input: &SeedInput) -> [u8; 32] {
        let mut buf = self.key.to_vec();
        buf.extend_from_slice(&input.encode(false));
        keccak256(&buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbitra_core::ChainClock;

    fn input(clock: &ChainClock, round: u32) -> SeedInput {
        SeedInput {
            block: clock.current(),
            customer: Address::from_label("customer"),
            process_id: ProcessId::from_label("123"),
            phase: Phase::Cost,
            round,
        }
    }

    #[test]
    fn test_chain_entropy_is_deterministic() {
        let clock = ChainClock::genesis(1_700_000_000, 12);
        let a = ChainEntropy.seed(&input(&clock, 1));
        let b = ChainEntropy.seed(&input(&clock, 1));
        assert_eq!(a, b);
        assert_ne!(a, ChainEntropy.seed(&input(&clock, 2)));
        assert_eq!(ChainEntropy.grade(), EntropyGrade::Weak);
    }

    #[test]
    fn test_chain_entropy_follows_block() {
        let mut clock = ChainClock::genesis(1_700_000_000, 12);
        let before = ChainEntropy.seed(&input(&clock, 1));
        clock.mine(1);
        assert_ne!(before, ChainEntropy.seed(&input(&clock, 1)));
    }

    #[test]
    fn test_static_entropy_ignores_block() {
        let source = StaticEntropy::new([7u8; 32]);
        let mut clock = ChainClock::genesis(1_700_000_000, 12);
        let before = source.seed(&input(&clock, 1));
        clock.mine(3);
        assert_eq!(before, source.seed(&input(&clock, 1)));
        assert_ne!(before, StaticEntropy::new([8u8; 32]).seed(&input(&clock, 1)));
    }
}
