//! Error types for the integration crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `AdapterError`: Errors reported by a provider adapter
//! - `ConfigError`: Integration configuration that can never succeed
//! - `RegistryError`: High-level wrapper returned by registry operations

use crate::credential::CredentialType;
use pons_core::ProviderType;
use std::fmt;

/// Errors from adapter operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    /// Connection to the provider failed.
    ConnectionFailed { reason: String },
    /// The provider rejected the credentials.
    AuthenticationFailed { reason: String },
    /// The adapter was handed a config for another provider.
    ProviderMismatch {
        expected: ProviderType,
        actual: ProviderType,
    },
    /// The operation needs a live connection.
    NotConnected,
    /// The provider quota is exhausted.
    RateLimited { retry_after_ms: Option<u64> },
    /// A sync pass failed.
    SyncFailed { reason: String },
    /// The provider answered with something the adapter cannot interpret.
    ProtocolError { reason: String },
    /// Timeout waiting for the provider.
    Timeout,
    /// The task running the operation panicked or was cancelled.
    TaskAborted { reason: String },
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed { reason } => {
                write!(f, "connection failed: {reason}")
            }
            Self::AuthenticationFailed { reason } => {
                write!(f, "authentication failed: {reason}")
            }
            Self::ProviderMismatch { expected, actual } => {
                write!(f, "adapter for '{expected}' cannot accept a '{actual}' config")
            }
            Self::NotConnected => write!(f, "adapter is not connected"),
            Self::RateLimited { retry_after_ms } => {
                if let Some(ms) = retry_after_ms {
                    write!(f, "rate limited, retry after {ms}ms")
                } else {
                    write!(f, "rate limited")
                }
            }
            Self::SyncFailed { reason } => write!(f, "sync failed: {reason}"),
            Self::ProtocolError { reason } => {
                write!(f, "protocol error: {reason}")
            }
            Self::Timeout => write!(f, "operation timed out"),
            Self::TaskAborted { reason } => write!(f, "task aborted: {reason}"),
        }
    }
}

impl std::error::Error for AdapterError {}

/// Configuration errors. These are never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// No adapter factory is registered for the provider.
    UnknownProvider { provider: ProviderType },
    /// The provider does not accept this kind of credential.
    UnsupportedCredential {
        provider: ProviderType,
        credential_type: CredentialType,
    },
    /// A required credential field is empty.
    MissingCredential {
        provider: ProviderType,
        field: &'static str,
    },
    /// The provider polls a user-supplied endpoint and none was given.
    MissingEndpoint { provider: ProviderType },
    /// The factory built an adapter for a different provider.
    ProviderMismatch {
        expected: ProviderType,
        actual: ProviderType,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownProvider { provider } => {
                write!(f, "unknown provider type: {provider}")
            }
            Self::UnsupportedCredential {
                provider,
                credential_type,
            } => {
                write!(
                    f,
                    "provider '{provider}' does not accept {credential_type} credentials"
                )
            }
            Self::MissingCredential { provider, field } => {
                write!(f, "missing credential field '{field}' for '{provider}'")
            }
            Self::MissingEndpoint { provider } => {
                write!(f, "missing endpoint for '{provider}'")
            }
            Self::ProviderMismatch { expected, actual } => {
                write!(f, "factory for '{expected}' built an adapter for '{actual}'")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// High-level registry errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The integration config can never connect as given.
    Configuration(ConfigError),
    /// The adapter could not establish a connection.
    ConnectFailed {
        provider: ProviderType,
        source: AdapterError,
    },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(e) => write!(f, "configuration error: {e}"),
            Self::ConnectFailed { provider, source } => {
                write!(f, "failed to connect '{provider}': {source}")
            }
        }
    }
}

impl std::error::Error for RegistryError {}

impl From<ConfigError> for RegistryError {
    fn from(e: ConfigError) -> Self {
        Self::Configuration(e)
    }
}
