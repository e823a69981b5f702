//! Adapter registry and rate limiting for pons.
//!
//! This crate provides:
//!
//! - **Adapter trait**: Uniform capability surface over every provider
//! - **Adapter registry**: Connected integrations, persisted and restorable
//! - **Rate limiter**: Provider-keyed quotas shared by every call site

pub mod adapter;
pub mod credential;
pub mod error;
pub mod fanout;
pub mod limited;
pub mod rate_limit;
pub mod registry;

pub use adapter::{Adapter, AdapterCapability, AdapterInfo};
pub use credential::{CredentialData, CredentialType, IntegrationConfig};
pub use error::{AdapterError, ConfigError, RegistryError};
pub use fanout::{SyncReport, run_bounded};
pub use limited::RateLimitedAdapter;
pub use rate_limit::{
    DEFAULT_SWEEP_INTERVAL, RateLimitConfig, RateLimitResult, RateLimitStatus, RateLimiter,
    RetryBehavior,
};
pub use registry::{AdapterFactories, AdapterFactory, AdapterRegistry, RegisteredAdapter};
