//! Adapter trait and related types.
//!
//! Every provider integration implements [`Adapter`], giving the registry and
//! the sync scheduler one uniform capability surface regardless of which API
//! sits behind it.

use crate::credential::IntegrationConfig;
use crate::error::AdapterError;
use async_trait::async_trait;
use pons_core::ProviderType;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Information about an adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterInfo {
    /// The provider this adapter talks to.
    pub provider: ProviderType,
    /// Human-readable name.
    pub name: String,
    /// Description of the adapter.
    pub description: String,
    /// Capabilities of this adapter.
    pub capabilities: Vec<AdapterCapability>,
}

impl AdapterInfo {
    /// Creates adapter info with no declared capabilities.
    #[must_use]
    pub fn new(provider: ProviderType, name: impl Into<String>) -> Self {
        Self {
            provider,
            name: name.into(),
            description: String::new(),
            capabilities: Vec::new(),
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Adds a capability.
    #[must_use]
    pub fn with_capability(mut self, capability: AdapterCapability) -> Self {
        if !self.capabilities.contains(&capability) {
            self.capabilities.push(capability);
        }
        self
    }
}

/// Capabilities that an adapter may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterCapability {
    /// Pulls data from the provider into the local cache.
    Sync,
    /// Produces a structured insights payload for the AI layer.
    Insights,
    /// Can write back to the provider.
    Write,
    /// Receives provider push notifications.
    Subscribe,
}

/// Trait for provider adapters.
///
/// Adapters are shared behind `Arc` by the registry and by in-flight sync
/// tasks, so all methods take `&self` and implementations keep their
/// connection state behind interior mutability.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Returns information about this adapter.
    fn info(&self) -> AdapterInfo;

    /// Validates the config against the provider and opens the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider rejects the credentials or cannot be
    /// reached. The adapter must not be left half connected.
    async fn connect(&self, config: &IntegrationConfig) -> Result<(), AdapterError>;

    /// Closes the connection and forgets the credentials.
    async fn disconnect(&self);

    /// Returns whether the adapter currently holds a live connection.
    fn is_connected(&self) -> bool;

    /// Refreshes the locally cached provider data.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync pass failed; callers retry.
    async fn sync(&self) -> Result<(), AdapterError>;

    /// Returns an opaque insights payload for the AI layer.
    async fn insights(&self) -> Result<JsonValue, AdapterError>;

    /// Checks if this adapter supports a specific capability.
    fn supports(&self, capability: AdapterCapability) -> bool {
        self.info().capabilities.contains(&capability)
    }
}
