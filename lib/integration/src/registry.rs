//! The adapter registry.
//!
//! The registry owns every live adapter handle, keyed by provider. Connecting
//! is all or nothing: a handle is registered only after the adapter accepted
//! the config, and a failed attempt leaves any previous connection for the
//! same provider untouched. The set of connected configs is persisted under
//! the `integrations` key so [`AdapterRegistry::restore`] can reconnect them
//! after a restart.

use crate::adapter::Adapter;
use crate::credential::{CredentialType, IntegrationConfig};
use crate::error::{ConfigError, RegistryError};
use crate::fanout::{SyncReport, run_bounded};
use crate::limited::RateLimitedAdapter;
use crate::rate_limit::{RateLimitConfig, RateLimiter};
use pons_core::{KeyValueStore, ProviderType};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, instrument, warn};

/// Store key holding the connected integration configs.
pub const INTEGRATIONS_KEY: &str = "integrations";

type Constructor = dyn Fn(&IntegrationConfig) -> Arc<dyn Adapter> + Send + Sync;

/// Builds adapters for one provider.
pub struct AdapterFactory {
    build: Box<Constructor>,
    rate_limit: Option<RateLimitConfig>,
    accepts: Option<Vec<CredentialType>>,
    requires_endpoint: bool,
}

impl AdapterFactory {
    /// Creates a factory from a constructor. The constructor must not do I/O;
    /// the connection is opened by [`Adapter::connect`].
    pub fn new<F>(build: F) -> Self
    where
        F: Fn(&IntegrationConfig) -> Arc<dyn Adapter> + Send + Sync + 'static,
    {
        Self {
            build: Box::new(build),
            rate_limit: None,
            accepts: None,
            requires_endpoint: false,
        }
    }

    /// Wraps every adapter built by this factory in a [`RateLimitedAdapter`].
    #[must_use]
    pub fn with_rate_limit(mut self, limit: RateLimitConfig) -> Self {
        self.rate_limit = Some(limit);
        self
    }

    /// Restricts the credential kinds this provider accepts.
    #[must_use]
    pub fn accepting(mut self, kinds: impl IntoIterator<Item = CredentialType>) -> Self {
        self.accepts = Some(kinds.into_iter().collect());
        self
    }

    /// Rejects configs without an endpoint before an adapter is built.
    #[must_use]
    pub fn requiring_endpoint(mut self) -> Self {
        self.requires_endpoint = true;
        self
    }

    /// Returns the quota applied to adapters from this factory.
    #[must_use]
    pub fn rate_limit(&self) -> Option<&RateLimitConfig> {
        self.rate_limit.as_ref()
    }

    fn accepts(&self, kind: CredentialType) -> bool {
        self.accepts
            .as_ref()
            .is_none_or(|kinds| kinds.contains(&kind))
    }
}

impl fmt::Debug for AdapterFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterFactory")
            .field("rate_limit", &self.rate_limit)
            .field("accepts", &self.accepts)
            .field("requires_endpoint", &self.requires_endpoint)
            .finish_non_exhaustive()
    }
}

/// Factory table, populated once at startup.
#[derive(Debug, Default)]
pub struct AdapterFactories {
    factories: HashMap<ProviderType, AdapterFactory>,
}

impl AdapterFactories {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the factory for a provider, replacing any previous one.
    pub fn register(&mut self, provider: ProviderType, factory: AdapterFactory) -> &mut Self {
        self.factories.insert(provider, factory);
        self
    }

    /// Returns the factory for a provider.
    #[must_use]
    pub fn get(&self, provider: &ProviderType) -> Option<&AdapterFactory> {
        self.factories.get(provider)
    }

    /// Returns the registered providers, sorted.
    #[must_use]
    pub fn providers(&self) -> Vec<ProviderType> {
        let mut providers: Vec<_> = self.factories.keys().cloned().collect();
        providers.sort();
        providers
    }
}

/// A connected adapter together with the config it was connected with.
#[derive(Clone)]
pub struct RegisteredAdapter {
    config: IntegrationConfig,
    adapter: Arc<dyn Adapter>,
}

impl RegisteredAdapter {
    /// Pairs a config with its live adapter.
    #[must_use]
    pub fn new(config: IntegrationConfig, adapter: Arc<dyn Adapter>) -> Self {
        Self { config, adapter }
    }

    /// Returns the provider key.
    #[must_use]
    pub fn provider(&self) -> &ProviderType {
        self.config.provider()
    }

    /// Returns the config the adapter was connected with.
    #[must_use]
    pub fn config(&self) -> &IntegrationConfig {
        &self.config
    }

    /// Returns the live adapter handle.
    #[must_use]
    pub fn adapter(&self) -> &Arc<dyn Adapter> {
        &self.adapter
    }
}

impl fmt::Debug for RegisteredAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredAdapter")
            .field("config", &self.config)
            .field("connected", &self.adapter.is_connected())
            .finish()
    }
}

/// Tracks connected integrations and exposes them as adapter handles.
pub struct AdapterRegistry {
    factories: AdapterFactories,
    limiter: RateLimiter,
    store: Arc<dyn KeyValueStore>,
    handles: RwLock<BTreeMap<ProviderType, RegisteredAdapter>>,
    persist_lock: tokio::sync::Mutex<()>,
    max_concurrency: Option<usize>,
}

impl AdapterRegistry {
    /// Creates an empty registry. Call [`restore`](Self::restore) to reconnect
    /// persisted integrations.
    #[must_use]
    pub fn new(
        factories: AdapterFactories,
        limiter: RateLimiter,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            factories,
            limiter,
            store,
            handles: RwLock::new(BTreeMap::new()),
            persist_lock: tokio::sync::Mutex::new(()),
            max_concurrency: None,
        }
    }

    /// Caps how many adapters [`sync_all`](Self::sync_all) and
    /// [`collect_insights`](Self::collect_insights) drive at once.
    #[must_use]
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit.max(1));
        self
    }

    /// Returns the shared rate limiter.
    #[must_use]
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Connects an integration, replacing any existing connection for the
    /// same provider once the new one is up.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid for the provider or the
    /// adapter refused to connect. Nothing is registered in that case.
    #[instrument(skip(self, config), fields(provider = %config.provider()))]
    pub async fn try_connect(
        &self,
        config: IntegrationConfig,
    ) -> pons_core::Result<(), RegistryError> {
        self.establish(config).await?;
        self.persist().await;
        Ok(())
    }

    /// Connects an integration, reporting only whether it worked.
    ///
    /// The reason for a failure is logged.
    pub async fn connect(&self, config: IntegrationConfig) -> bool {
        let provider = config.provider().clone();
        match self.try_connect(config).await {
            Ok(()) => true,
            Err(e) => {
                warn!(provider = %provider, error = %e, "failed to connect integration");
                false
            }
        }
    }

    /// Disconnects a provider. Disconnecting an unknown provider is a no-op.
    #[instrument(skip(self), fields(provider = %provider))]
    pub async fn disconnect(&self, provider: &ProviderType) {
        let removed = self
            .handles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(provider);

        if let Some(registered) = removed {
            registered.adapter.disconnect().await;
            self.persist().await;
            info!("integration disconnected");
        } else {
            debug!("integration was not connected");
        }
    }

    /// Disconnects every adapter and forgets the handles, keeping the
    /// persisted integrations so the next [`restore`](Self::restore) brings
    /// them back. Returns how many were disconnected.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> usize {
        let handles = std::mem::take(
            &mut *self
                .handles
                .write()
                .unwrap_or_else(PoisonError::into_inner),
        );
        let count = handles.len();
        futures::future::join_all(
            handles
                .into_values()
                .map(|registered| async move { registered.adapter.disconnect().await }),
        )
        .await;
        info!(count, "integrations released");
        count
    }

    /// Returns the adapter for a provider.
    #[must_use]
    pub fn get(&self, provider: &ProviderType) -> Option<Arc<dyn Adapter>> {
        self.handles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(provider)
            .map(|registered| registered.adapter.clone())
    }

    /// Returns whether a provider is connected.
    #[must_use]
    pub fn is_connected(&self, provider: &ProviderType) -> bool {
        self.handles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(provider)
    }

    /// Returns the configs of every connected integration, sorted by provider.
    #[must_use]
    pub fn list_connected(&self) -> Vec<IntegrationConfig> {
        self.handles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|registered| registered.config.clone())
            .collect()
    }

    /// Returns the enabled integrations as they are right now.
    ///
    /// Later connects and disconnects do not affect the returned handles.
    #[must_use]
    pub fn snapshot(&self) -> Vec<RegisteredAdapter> {
        self.handles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|registered| registered.config.enabled())
            .cloned()
            .collect()
    }

    /// Syncs every enabled integration once, concurrently.
    #[instrument(skip(self))]
    pub async fn sync_all(&self) -> SyncReport {
        let adapters = self.snapshot();
        let results = run_bounded(adapters, self.max_concurrency, |registered| async move {
            registered.adapter.sync().await
        })
        .await;

        let report = SyncReport::from_results(results);
        for (provider, reason) in &report.failed {
            warn!(provider = %provider, reason = %reason, "integration sync failed");
        }
        info!(
            synced = report.synced.len(),
            failed = report.failed.len(),
            "sync pass finished"
        );
        report
    }

    /// Collects every enabled integration's insights payload.
    ///
    /// Integrations that fail are logged and left out of the map.
    #[instrument(skip(self))]
    pub async fn collect_insights(&self) -> BTreeMap<ProviderType, JsonValue> {
        let adapters = self.snapshot();
        let results = run_bounded(adapters, self.max_concurrency, |registered| async move {
            registered.adapter.insights().await
        })
        .await;

        let mut insights = BTreeMap::new();
        for (provider, result) in results {
            match result {
                Ok(payload) => {
                    insights.insert(provider, payload);
                }
                Err(e) => {
                    warn!(provider = %provider, error = %e, "failed to collect insights");
                }
            }
        }
        insights
    }

    /// Reconnects the persisted integrations. Returns how many connected.
    ///
    /// Integrations that fail to reconnect are logged and skipped. The
    /// persisted list is not rewritten here.
    #[instrument(skip(self))]
    pub async fn restore(&self) -> usize {
        let raw = match self.store.load(INTEGRATIONS_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return 0,
            Err(e) => {
                warn!(error = %e, "failed to load persisted integrations");
                return 0;
            }
        };
        let configs: Vec<IntegrationConfig> = match serde_json::from_str(&raw) {
            Ok(configs) => configs,
            Err(e) => {
                warn!(error = %e, "persisted integrations are unreadable, ignoring");
                return 0;
            }
        };

        let mut restored = 0;
        for config in configs {
            let provider = config.provider().clone();
            match self.establish(config).await {
                Ok(()) => restored += 1,
                Err(e) => {
                    warn!(provider = %provider, error = %e, "failed to restore integration");
                }
            }
        }
        info!(restored, "integrations restored");
        restored
    }

    fn validate(
        &self,
        config: &IntegrationConfig,
    ) -> pons_core::Result<&AdapterFactory, RegistryError> {
        let provider = config.provider();
        let factory = self.factories.get(provider).ok_or_else(|| {
            RegistryError::from(ConfigError::UnknownProvider {
                provider: provider.clone(),
            })
        })?;

        let kind = config.credentials().credential_type();
        if !factory.accepts(kind) {
            return Err(RegistryError::from(ConfigError::UnsupportedCredential {
                provider: provider.clone(),
                credential_type: kind,
            })
            .into());
        }
        if let Some(field) = config.credentials().missing_field() {
            return Err(RegistryError::from(ConfigError::MissingCredential {
                provider: provider.clone(),
                field,
            })
            .into());
        }
        if factory.requires_endpoint && config.endpoint().is_none_or(|e| e.trim().is_empty()) {
            return Err(RegistryError::from(ConfigError::MissingEndpoint {
                provider: provider.clone(),
            })
            .into());
        }
        Ok(factory)
    }

    async fn establish(&self, config: IntegrationConfig) -> pons_core::Result<(), RegistryError> {
        let factory = self.validate(&config)?;
        let provider = config.provider().clone();

        let mut adapter = (factory.build)(&config);
        let actual = adapter.info().provider;
        if actual != provider {
            return Err(RegistryError::from(ConfigError::ProviderMismatch {
                expected: provider,
                actual,
            })
            .into());
        }
        if let Some(limit) = factory.rate_limit {
            adapter = Arc::new(RateLimitedAdapter::new(adapter, self.limiter.clone(), limit));
        }

        if let Err(source) = adapter.connect(&config).await {
            return Err(RegistryError::ConnectFailed { provider, source }.into());
        }

        let previous = self
            .handles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(provider.clone(), RegisteredAdapter::new(config, adapter));

        if let Some(previous) = previous {
            debug!(provider = %provider, "replacing existing connection");
            previous.adapter.disconnect().await;
        }
        info!(provider = %provider, "integration connected");
        Ok(())
    }

    async fn persist(&self) {
        let _guard = self.persist_lock.lock().await;
        let configs = self.list_connected();

        let encoded = match serde_json::to_string(&configs) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(error = %e, "failed to encode integrations");
                return;
            }
        };
        if let Err(e) = self.store.save(INTEGRATIONS_KEY, &encoded).await {
            warn!(error = %e, "failed to persist integrations");
        }
    }
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("providers", &self.factories.providers())
            .field("connected", &self.list_connected().len())
            .field("max_concurrency", &self.max_concurrency)
            .finish_non_exhaustive()
    }
}
