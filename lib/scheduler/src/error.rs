//! Error types for the scheduler crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `ConfigError`: Scheduler tuning that can never work
//! - `SchedulerError`: High-level wrapper returned by scheduler operations

use std::any::Any;
use std::fmt;

/// Invalid scheduler tuning. Never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The sync interval is zero.
    ZeroInterval,
    /// Fewer than one attempt per provider.
    ZeroRetryAttempts,
    /// A concurrency cap of zero would never run anything.
    ZeroConcurrency,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroInterval => write!(f, "interval_minutes must be at least 1"),
            Self::ZeroRetryAttempts => write!(f, "retry_attempts must be at least 1"),
            Self::ZeroConcurrency => write!(f, "max_concurrency must be at least 1"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// High-level scheduler errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// The scheduler was given invalid tuning.
    Configuration(ConfigError),
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(e) => write!(f, "invalid sync config: {e}"),
        }
    }
}

impl std::error::Error for SchedulerError {}

impl From<ConfigError> for SchedulerError {
    fn from(e: ConfigError) -> Self {
        Self::Configuration(e)
    }
}

/// Extracts a readable message from a panic payload.
pub(crate) fn describe_panic(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
