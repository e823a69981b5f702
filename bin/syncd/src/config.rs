//! Daemon configuration.
//!
//! Loaded via the `config` crate from `PONS__`-prefixed environment
//! variables, with `__` separating nested keys. For example
//! `PONS__SYNC__INTERVAL_MINUTES=15` sets [`SyncConfig::interval_minutes`].
//! Tuning persisted by a previous run takes precedence over `sync`.

use pons_integration::RateLimitConfig;
use pons_scheduler::SyncConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration composed from library configs.
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    /// Directory holding persisted state.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// JSON file with integration configs to connect at startup, on top of
    /// the ones restored from `data_dir`.
    #[serde(default)]
    pub integrations_file: Option<PathBuf>,

    /// Base scheduler tuning.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Settings for the custom endpoint adapter.
    #[serde(default)]
    pub http: HttpConfig,

    /// Interval between sweeps of expired rate limit records, in seconds.
    #[serde(default = "default_rate_limit_sweep_seconds")]
    pub rate_limit_sweep_seconds: u64,

    /// How long shutdown waits for an in-flight sync cycle, in seconds.
    #[serde(default = "default_shutdown_grace_seconds")]
    pub shutdown_grace_seconds: u64,
}

/// Settings for the custom endpoint adapter.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Per-request timeout, in seconds.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Requests allowed per minute against one custom endpoint.
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("pons-data")
}

fn default_rate_limit_sweep_seconds() -> u64 {
    60
}

fn default_shutdown_grace_seconds() -> u64 {
    30
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_requests_per_minute() -> u32 {
    RateLimitConfig::CONSERVATIVE.max_requests
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
            requests_per_minute: default_requests_per_minute(),
        }
    }
}

impl HttpConfig {
    /// Returns the per-request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Returns the quota applied to custom endpoints.
    #[must_use]
    pub fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig::per_minute(self.requests_per_minute)
    }
}

impl DaemonConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but cannot be parsed.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::from_environment(config::Environment::with_prefix("PONS"))
    }

    fn from_environment(environment: config::Environment) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(environment.separator("__").try_parsing(true))
            .build()?
            .try_deserialize()
    }

    /// Returns the interval between rate limit sweeps.
    #[must_use]
    pub fn rate_limit_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.rate_limit_sweep_seconds.max(1))
    }

    /// Returns how long shutdown waits for an in-flight cycle.
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }
}
