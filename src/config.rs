//! Scan configuration. Settings are read once per scan start from a
//! [`SettingsProvider`] handle owned by the orchestrating layer.

use crate::snapshot::LabelWidth;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    /// How long (ms) after an activation edge the input condition stays
    /// valid.
    pub input_timeout_ms: u64,
    /// Interval (ms) between repeated-scan ticks.
    pub tick_interval_ms: u64,
    /// Worker threads for region processing. 0 uses the rayon default.
    pub parallelism: usize,
    /// Element width in bytes for captured snapshots.
    pub element_width: usize,
    /// Element alignment in bytes for captured snapshots.
    pub alignment: usize,
    /// Label width selected for correlator scans.
    pub label_width: LabelWidth,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            input_timeout_ms: 1500,
            tick_interval_ms: 800,
            parallelism: 0,
            element_width: 4,
            alignment: 4,
            label_width: LabelWidth::I16,
        }
    }
}

impl ScanSettings {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("failed to parse scan settings")
    }

    /// Build the per-scan worker pool with the configured parallelism.
    pub fn build_pool(&self) -> Result<rayon::ThreadPool> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.parallelism)
            .build()
            .context("failed to build scan worker pool")
    }
}

/// Handle supplying settings to scans. Read once per scan start.
pub trait SettingsProvider: Send + Sync {
    fn settings(&self) -> ScanSettings;
}

impl SettingsProvider for ScanSettings {
    fn settings(&self) -> ScanSettings {
        self.clone()
    }
}
