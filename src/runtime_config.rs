// =============================================================================
// Runtime Configuration — Hot-reloadable engine settings with atomic save
// =============================================================================
//
// Central configuration hub for the Tipster verification engine.  Intervals,
// the operator pause flag, the seeded channel directory and the persistence
// paths all live here so the engine can be reconfigured without a rebuild.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.  All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
//
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::ChannelInfo;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_price_check_interval_secs() -> u64 {
    900 // 15 minutes
}

fn default_report_check_interval_secs() -> u64 {
    300
}

fn default_store_path() -> String {
    "signal_store.json".to_string()
}

fn default_bind_addr() -> String {
    "0.0.0.0:8001".to_string()
}

fn default_channels() -> Vec<ChannelInfo> {
    Vec::new()
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration for the verification engine.
///
/// Every field has a serde default so that older JSON files missing new fields
/// will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Operational -----------------------------------------------------

    /// When true the price-observation scheduler skips its tick entirely.
    /// Pending signals still expire at their deadline once resumed.
    #[serde(default)]
    pub paused: bool,

    // --- Cadence ----------------------------------------------------------

    /// Seconds between price-observation ticks.
    #[serde(default = "default_price_check_interval_secs")]
    pub price_check_interval_secs: u64,

    /// Seconds between due-ness checks of the weekly report loop. Coarse on
    /// purpose; the report itself is anchored to Monday 12:00 UTC.
    #[serde(default = "default_report_check_interval_secs")]
    pub report_check_interval_secs: u64,

    // --- Directory & persistence ------------------------------------------

    /// Channels seeded into the directory at startup. More can be added via
    /// the API at runtime.
    #[serde(default = "default_channels")]
    pub channels: Vec<ChannelInfo>,

    /// Path of the signal store JSON snapshot.
    #[serde(default = "default_store_path")]
    pub store_path: String,

    /// Address the REST API binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            paused: false,
            price_check_interval_secs: default_price_check_interval_secs(),
            report_check_interval_secs: default_report_check_interval_secs(),
            channels: default_channels(),
            store_path: default_store_path(),
            bind_addr: default_bind_addr(),
        }
    }
}

impl RuntimeConfig {
    /// Path of the config file itself, honoring the `TIPSTER_CONFIG_PATH`
    /// environment override. Every save must go through this path or a
    /// runtime change lands in a file the next boot never reads.
    pub fn resolve_path() -> String {
        std::env::var("TIPSTER_CONFIG_PATH")
            .unwrap_or_else(|_| "runtime_config.json".to_string())
    }

    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            channels = config.channels.len(),
            price_check_interval_secs = config.price_check_interval_secs,
            paused = config.paused,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    ///
    /// This prevents corruption if the process crashes mid-write.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        // Atomic write: write to a temporary sibling file, then rename.
        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }
}
