//! Scheduler tuning.

use crate::error::ConfigError;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tuning for the sync scheduler.
///
/// Missing fields take their defaults, so a partially persisted config
/// still loads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Minutes between scheduled cycles.
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,

    /// Total sync attempts per provider per cycle.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Base retry delay. Attempt `n` waits `retry_delay_ms * n` before the next.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Whether every finished cycle emits a notification.
    #[serde(default = "default_enable_notifications")]
    pub enable_notifications: bool,

    /// Cap on providers synced at once. `None` means unbounded.
    #[serde(default)]
    pub max_concurrency: Option<usize>,
}

fn default_interval_minutes() -> u64 {
    60
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    5000
}

fn default_enable_notifications() -> bool {
    true
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            enable_notifications: default_enable_notifications(),
            max_concurrency: None,
        }
    }
}

impl SyncConfig {
    /// Checks that the tuning can drive a scheduler.
    ///
    /// # Errors
    ///
    /// Returns an error if the interval, attempt count or concurrency cap is
    /// zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_minutes == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        if self.retry_attempts == 0 {
            return Err(ConfigError::ZeroRetryAttempts);
        }
        if self.max_concurrency == Some(0) {
            return Err(ConfigError::ZeroConcurrency);
        }
        Ok(())
    }

    /// Returns the time between scheduled cycles.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.saturating_mul(60))
    }

    /// Returns the per-provider retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_attempts,
            Duration::from_millis(self.retry_delay_ms),
        )
    }
}
