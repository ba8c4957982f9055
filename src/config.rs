//! Configuration management for ringlimit.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, RingLimitError};

/// Parameters applied to every counter a limiter creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Maximum hits admitted per window
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Window length in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Idle sweep period in milliseconds
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            window_ms: default_window_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

fn default_capacity() -> usize {
    100
}

fn default_window_ms() -> u64 {
    1000
}

fn default_sweep_interval_ms() -> u64 {
    10_000
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl LimiterConfig {
    /// Build a configuration from durations.
    ///
    /// Durations too long for a `u64` of milliseconds saturate.
    pub fn new(capacity: usize, window: Duration, sweep_interval: Duration) -> Self {
        Self {
            capacity,
            window_ms: millis(window),
            sweep_interval_ms: millis(sweep_interval),
        }
    }

    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading limiter configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: LimiterConfig = serde_yaml::from_str(yaml)
            .map_err(|e| RingLimitError::Config(format!("Failed to parse limiter config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject parameters that would make a limiter meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(RingLimitError::Config("capacity must be at least 1".to_string()));
        }
        if self.window_ms == 0 {
            return Err(RingLimitError::Config("window_ms must be at least 1".to_string()));
        }
        if self.sweep_interval_ms == 0 {
            return Err(RingLimitError::Config(
                "sweep_interval_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// The trailing window as a duration.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// The sweep period as a duration.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}
