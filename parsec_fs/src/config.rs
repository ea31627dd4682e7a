//! Client configuration.

use anyhow::{Context, ensure};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_BLOCK_SIZE: u64 = 4096;
pub const DEFAULT_MAX_FILE_SIZE: u64 = 1 << 36;

/// Tunables for a [`crate::ParsecFs`] instance.
///
/// Every field has a default, so a partial TOML document is enough:
///
/// ```toml
/// auto_sync = true
/// sync_min_wait_ms = 500
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    /// Max cleartext bytes per block for newly written data.
    pub block_size: u64,
    /// Writes ending past this size are refused.
    pub max_file_size: u64,
    /// Run the background synchronizer. When off, every mutation is
    /// committed before the call returns.
    pub auto_sync: bool,
    pub sync_min_wait_ms: u64,
    pub sync_max_wait_ms: u64,
    pub backend_offline_wait_ms: u64,
    /// Optimistic-concurrency retries before a conflict is surfaced.
    pub max_update_retries: u32,
    pub block_cache_capacity: u64,
    /// Delete blocks dropped by a commit right away. Restoring an older
    /// version then only works for blocks that are still referenced.
    pub prune_superseded_blocks: bool,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            auto_sync: false,
            sync_min_wait_ms: 1_000,
            sync_max_wait_ms: 60_000,
            backend_offline_wait_ms: 5_000,
            max_update_retries: 3,
            block_cache_capacity: parsec_core::block::DEFAULT_CACHE_CAPACITY,
            prune_superseded_blocks: false,
        }
    }
}

impl FsConfig {
    pub fn from_toml_str(source: &str) -> anyhow::Result<Self> {
        let config: FsConfig = toml::from_str(source).context("invalid parsec configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.block_size > 0, "block_size must be positive");
        ensure!(self.max_file_size > 0, "max_file_size must be positive");
        ensure!(
            self.sync_min_wait_ms <= self.sync_max_wait_ms,
            "sync_min_wait_ms must not exceed sync_max_wait_ms"
        );
        Ok(())
    }

    pub fn min_wait(&self) -> Duration {
        Duration::from_millis(self.sync_min_wait_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.sync_max_wait_ms)
    }

    pub fn backend_offline_wait(&self) -> Duration {
        Duration::from_millis(self.backend_offline_wait_ms)
    }
}
