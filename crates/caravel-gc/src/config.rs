//! Configuration for the retention core.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for retention behavior.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GcConfig {
    /// Cap on stored root versions, per-app version history, and per-pod
    /// version history. Must be at least 1.
    pub max_versions: usize,

    /// How many pinning roots to hydrate per scan batch.
    pub scan_batch_size: usize,

    /// Delay between collection cycles (in milliseconds). Zero disables the
    /// resting phase entirely: the collector stays ready and runs only when
    /// triggered.
    pub cleaning_interval_ms: u64,
}

impl GcConfig {
    /// The resting delay as a [`Duration`].
    pub fn cleaning_interval(&self) -> Duration {
        Duration::from_millis(self.cleaning_interval_ms)
    }
}

impl Default for GcConfig {
    fn default() -> Self {
        GcConfig {
            max_versions: 25,
            scan_batch_size: 32,
            cleaning_interval_ms: 60_000,
        }
    }
}

/// Builder for retention configuration.
pub struct GcConfigBuilder {
    config: GcConfig,
}

impl GcConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: GcConfig::default(),
        }
    }

    pub fn max_versions(mut self, cap: usize) -> Self {
        self.config.max_versions = cap;
        self
    }

    pub fn scan_batch_size(mut self, size: usize) -> Self {
        self.config.scan_batch_size = size;
        self
    }

    pub fn cleaning_interval(mut self, ms: u64) -> Self {
        self.config.cleaning_interval_ms = ms;
        self
    }

    pub fn build(self) -> GcConfig {
        self.config
    }
}

impl Default for GcConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
