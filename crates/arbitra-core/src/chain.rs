/// SIMULATED CHAIN CLOCK
///
/// The protocol never reads wall-clock time. Lock periods are measured in
/// block heights and the validator selector draws its (weak) entropy from
/// the latest block, so both come from this clock. The host advances it
/// explicitly with `mine`.

use serde::{Deserialize, Serialize};

use crate::types::keccak256;

const GENESIS_TAG: &[u8] = b"ARBITRA_GENESIS_V1";

/// Header fields of the latest block visible to an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub height: u64,
    /// Seconds since the Unix epoch
    pub timestamp: u64,
    pub hash: [u8; 32],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainClock {
    current: BlockInfo,
    block_time_secs: u64,
}

impl ChainClock {
    pub fn genesis(genesis_timestamp: u64, block_time_secs: u64) -> Self {
        let mut seed = GENESIS_TAG.to_vec();
        seed.extend_from_slice(&genesis_timestamp.to_le_bytes());
        ChainClock {
            current: BlockInfo {
                height: 0,
                timestamp: genesis_timestamp,
                hash: keccak256(&seed),
            },
            block_time_secs,
        }
    }

    pub fn current(&self) -> BlockInfo {
        self.current
    }

    pub fn height(&self) -> u64 {
        self.current.height
    }

    /// Produce `blocks` empty blocks and return the new head.
    pub fn mine(&mut self, blocks: u64) -> BlockInfo {
        for _ in 0..blocks {
            let height = self.current.height + 1;
            let timestamp = self.current.timestamp + self.block_time_secs;
            let mut preimage = Vec::with_capacity(48);
            preimage.extend_from_slice(&self.current.hash);
            preimage.extend_from_slice(&height.to_le_bytes());
            preimage.extend_from_slice(&timestamp.to_le_bytes());
            self.current = BlockInfo {
                height,
                timestamp,
                hash: keccak256(&preimage),
            };
        }
        self.current
    }
}
