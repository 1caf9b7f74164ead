//! Tailer timing configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Polling and backoff intervals for a tailer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TailerConfig {
    /// Sleep between end-of-file checks when no new data is available.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Wait before retrying when the file path does not resolve.
    #[serde(default = "default_missing_backoff_secs")]
    pub missing_backoff_secs: u64,

    /// Wait before reopening after an I/O error.
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_missing_backoff_secs() -> u64 {
    5
}

fn default_error_backoff_ms() -> u64 {
    1000
}

impl TailerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn missing_backoff(&self) -> Duration {
        Duration::from_secs(self.missing_backoff_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
}

impl Default for TailerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            missing_backoff_secs: default_missing_backoff_secs(),
            error_backoff_ms: default_error_backoff_ms(),
        }
    }
}
