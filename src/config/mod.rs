//! Configuration for the block download scheduler
//!
//! Handles configuration defaults, validation, and TOML file loading.

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::chain::NODE_WITNESS;

/// Block download tuning recognized by the sync core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Number of parallel download slots (one per peer).
    #[serde(default = "default_download_connections")]
    pub download_connections: u32,

    /// Per-slot stall threshold in seconds.
    #[serde(default = "default_block_timeout")]
    pub block_timeout_seconds: u32,

    /// Advertised local service bits. Must include NODE_WITNESS to demand
    /// witness data from peers.
    #[serde(default = "default_services")]
    pub services: u64,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_download_connections() -> u32 {
    8
}

fn default_block_timeout() -> u32 {
    5
}

fn default_services() -> u64 {
    NODE_WITNESS
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            download_connections: 8,
            block_timeout_seconds: 5,
            services: NODE_WITNESS,
            logging: LoggingConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Whether the local node demands witness data from download peers.
    pub fn require_witness(&self) -> bool {
        (self.services & NODE_WITNESS) != 0
    }

    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: SyncConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config: {}", path.display()))?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn to_toml_file(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default log filter when RUST_LOG is not set (e.g. "info",
    /// "blocksync=debug").
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
