/// PROTOCOL CONFIGURATION
///
/// Defaults reproduce the parameters the protocol launched
/// with: 10% penalty, 51840-block stake lock, a 2/1000 protocol fee and a
/// 15/80/5 validators/broker/protocol split of that fee.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_PENALTY_PERC: u32 = 10;
pub const DEFAULT_LOCKING_PERIOD: u64 = 51_840;
pub const MAX_FEE_DENOMINATOR: u128 = u64::MAX as u128;
pub const DEFAULT_SHARE_DENOMINATOR: u32 = 100;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {reason}")]
    Io { path: String, reason: String },
    #[error("Failed to parse config: {0}")]
    Parse(String),
    #[error("Invalid fee schedule: {0}")]
    InvalidFee(String),
    #[error("Invalid fee shares: {0}")]
    InvalidShares(String),
    #[error("Invalid penalty percentage: {0}")]
    InvalidPenalty(u32),
}

/// Protocol fee retained from every deposit: `amount * numerator / denominator`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub numerator: u128,
    pub denominator: u128,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        FeeSchedule {
            numerator: 2,
            denominator: 1000,
        }
    }
}

impl FeeSchedule {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.denominator == 0 {
            return Err(ConfigError::InvalidFee("denominator must be > 0".to_string()));
        }
        // Keeps the remainder term of the fee split within u128
        if self.denominator > MAX_FEE_DENOMINATOR {
            return Err(ConfigError::InvalidFee(format!(
                "denominator {} exceeds {}",
                self.denominator, MAX_FEE_DENOMINATOR
            )));
        }
        if self.numerator > self.denominator {
            return Err(ConfigError::InvalidFee(format!(
                "numerator {} exceeds denominator {}",
                self.numerator, self.denominator
            )));
        }
        Ok(())
    }
}

/// Completion-time split of a process's retained fee, expressed over the
/// configured share denominator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeShares {
    pub validators: u32,
    pub broker: u32,
    pub protocol: u32,
}

impl Default for FeeShares {
    fn default() -> Self {
        FeeShares {
            validators: 15,
            broker: 80,
            protocol: 5,
        }
    }
}

impl FeeShares {
    pub fn total(&self) -> u64 {
        self.validators as u64 + self.broker as u64 + self.protocol as u64
    }

    pub fn validate(&self, denominator: u32) -> Result<(), ConfigError> {
        if denominator == 0 {
            return Err(ConfigError::InvalidShares("share denominator must be > 0".to_string()));
        }
        if self.total() != denominator as u64 {
            return Err(ConfigError::InvalidShares(format!(
                "validators {} + broker {} + protocol {} must equal {}",
                self.validators, self.broker, self.protocol, denominator
            )));
        }
        Ok(())
    }
}

/// Where slashed stake goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlashPolicy {
    /// Credited to the protocol treasury in the stake token
    Treasury,
    /// Sent to the burn address
    Burn,
}

/// Which prior submitters are excluded when the next validator of a
/// disagreeing round is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionPolicy {
    /// Everyone who already submitted in the phase; the pool shrinks each round
    AllPrior,
    /// Only the validator who set the current baseline
    PreviousOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Percentage of stake slashed for a dissenting submission
    pub penalty_perc: u32,
    /// Blocks a stake stays locked after each `stake` call
    pub locking_period: u64,
    pub fee: FeeSchedule,
    /// Shares applied to services registered without explicit shares
    pub default_shares: FeeShares,
    pub share_denominator: u32,
    pub slash_policy: SlashPolicy,
    pub exclusion_policy: ExclusionPolicy,
    /// Seconds between simulated blocks
    pub block_time_secs: u64,
    /// Capacity of the event broadcast channel
    pub event_buffer: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        ProtocolConfig {
            penalty_perc: DEFAULT_PENALTY_PERC,
            locking_period: DEFAULT_LOCKING_PERIOD,
            fee: FeeSchedule::default(),
            default_shares: FeeShares::default(),
            share_denominator: DEFAULT_SHARE_DENOMINATOR,
            slash_policy: SlashPolicy::Treasury,
            exclusion_policy: ExclusionPolicy::AllPrior,
            block_time_secs: 12,
            event_buffer: 1024,
        }
    }
}

impl ProtocolConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.penalty_perc > 100 {
            return Err(ConfigError::InvalidPenalty(self.penalty_perc));
        }
        self.fee.validate()?;
        self.default_shares.validate(self.share_denominator)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: ProtocolConfig =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_yaml_str(&raw)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}
