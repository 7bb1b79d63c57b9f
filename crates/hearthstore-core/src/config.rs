//! Configuration management for HearthStore
//!
//! Provides presets for the two hardware classes a gateway ships on
//! and builder-style setters for custom configurations.

use std::time::Duration;

use crate::format::RECORD_HEADER_SIZE;

/// Largest payload whose full record length still fits the on-disk u32.
pub const MAX_RECORD_SIZE_LIMIT: usize = u32::MAX as usize - RECORD_HEADER_SIZE;

/// Environment variable overriding the flush period, in milliseconds.
pub const FLUSH_PERIOD_ENV: &str = "HEARTHSTORE_FLUSH_PERIOD_MS";

/// Default flush period (10 seconds)
pub const DEFAULT_FLUSH_PERIOD: Duration = Duration::from_millis(10_000);

/// HearthStore configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Period between two flush cycles
    pub flush_period: Duration,
    /// Compaction trigger: compact when stale/total bytes exceeds this
    pub compaction_trigger_ratio: f64,
    /// Segment rollover threshold (bytes)
    pub max_file_size: u64,
    /// Maximum serialized payload size for one resource (bytes)
    pub max_record_size: usize,
}

impl Config {
    /// Gateway-class: mains-powered controller with flash or SSD storage
    pub fn gateway() -> Self {
        Self {
            flush_period: DEFAULT_FLUSH_PERIOD,
            compaction_trigger_ratio: 0.5,
            max_file_size: 64 * 1024 * 1024,
            max_record_size: 4 * 1024 * 1024,
        }
    }

    /// Embedded-class: small board on SD card, fewer and larger writes
    pub fn embedded() -> Self {
        Self {
            flush_period: Duration::from_secs(30),
            compaction_trigger_ratio: 0.6,
            max_file_size: 8 * 1024 * 1024,
            max_record_size: 512 * 1024,
        }
    }

    /// Default preset with the flush period taken from
    /// [`FLUSH_PERIOD_ENV`] when it is set to a valid number.
    pub fn from_env() -> Self {
        let config = Self::default();
        match std::env::var(FLUSH_PERIOD_ENV).ok().and_then(|v| v.trim().parse::<u64>().ok()) {
            Some(ms) => config.with_flush_period(Duration::from_millis(ms)),
            None => config,
        }
    }

    /// Set the flush period.
    #[must_use]
    pub fn with_flush_period(mut self, period: Duration) -> Self {
        self.flush_period = period;
        self
    }

    /// Set the stale-byte ratio above which compaction runs.
    #[must_use]
    pub fn with_compaction_trigger_ratio(mut self, ratio: f64) -> Self {
        self.compaction_trigger_ratio = ratio;
        self
    }

    /// Set the segment rollover size.
    #[must_use]
    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    /// Set the maximum payload size for a single record.
    #[must_use]
    pub fn with_max_record_size(mut self, bytes: usize) -> Self {
        self.max_record_size = bytes;
        self
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.flush_period.as_millis() == 0 {
            return Err("flush_period must be > 0".into());
        }
        if self.compaction_trigger_ratio <= 0.0 || self.compaction_trigger_ratio >= 1.0 {
            return Err("compaction_trigger_ratio must be in (0.0, 1.0)".into());
        }
        if self.max_file_size < 64 {
            return Err("max_file_size must be >= 64 bytes".into());
        }
        // Record length on disk is a u32 covering header and payload
        if self.max_record_size == 0 || self.max_record_size > MAX_RECORD_SIZE_LIMIT {
            return Err(format!("max_record_size must be in [1, {}]", MAX_RECORD_SIZE_LIMIT));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self { Self::gateway() }
}
