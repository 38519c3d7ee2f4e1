//! TOML configuration for a participant and the local demo cluster.
//!
//! Every field has a default, so a missing section (or no file at all)
//! yields a usable configuration.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use super::error::AgreementError;

pub const DEFAULT_ROUND_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub agreement: AgreementConfig,
    pub network: NetworkConfig,
}

/// Protocol timing.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AgreementConfig {
    /// How long a round may run before this participant freezes it.
    pub round_timeout_ms: u64,
    /// Added to the round-0 timeout only, giving participants that start
    /// late a window to catch up before the first freeze.
    pub passive_phase_ms: u64,
}

impl Default for AgreementConfig {
    fn default() -> Self {
        AgreementConfig {
            round_timeout_ms: DEFAULT_ROUND_TIMEOUT_MS,
            passive_phase_ms: 0,
        }
    }
}

impl AgreementConfig {
    pub fn round_timeout(&self, round: u64) -> Duration {
        if round == 0 {
            Duration::from_millis(self.passive_phase_ms.saturating_add(self.round_timeout_ms))
        } else {
            Duration::from_millis(self.round_timeout_ms)
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub participants: Vec<String>,
    pub channel_capacity: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            participants: vec![
                "directory-a".into(),
                "directory-b".into(),
                "directory-c".into(),
                "directory-d".into(),
            ],
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, AgreementError> {
        let contents = std::fs::read_to_string(path).map_err(|source| AgreementError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&contents)?;
        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self, AgreementError> {
        Ok(toml::from_str(contents)?)
    }
}
