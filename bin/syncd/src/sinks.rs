//! Daemon-side collaborators for the scheduler.

use async_trait::async_trait;
use pons_core::KeyValueStore;
use pons_integration::AdapterRegistry;
use pons_scheduler::{InsightsCache, NotificationSink, Severity, SyncNotification};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Store key holding the latest collected insights.
pub const INSIGHTS_KEY: &str = "insights";

/// Writes notifications to the log at a level matching their severity.
#[derive(Debug, Default)]
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn notify(&self, notification: SyncNotification) {
        let SyncNotification {
            title,
            message,
            severity,
        } = notification;
        match severity {
            Severity::Success => info!(title = %title, message = %message, "sync notification"),
            Severity::Warning => warn!(title = %title, message = %message, "sync notification"),
            Severity::Error => error!(title = %title, message = %message, "sync notification"),
        }
    }
}

/// Keeps the latest insights from every enabled integration in the store.
///
/// Invalidation re-collects right away, so readers of [`INSIGHTS_KEY`] never
/// see data older than the last productive cycle.
pub struct StoredInsights {
    registry: Arc<AdapterRegistry>,
    store: Arc<dyn KeyValueStore>,
}

impl StoredInsights {
    #[must_use]
    pub fn new(registry: Arc<AdapterRegistry>, store: Arc<dyn KeyValueStore>) -> Self {
        Self { registry, store }
    }
}

#[async_trait]
impl InsightsCache for StoredInsights {
    async fn invalidate(&self) {
        let insights = self.registry.collect_insights().await;
        let encoded = match serde_json::to_string(&insights) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(error = %e, "failed to encode insights");
                return;
            }
        };
        match self.store.save(INSIGHTS_KEY, &encoded).await {
            Ok(()) => debug!(providers = insights.len(), "insights refreshed"),
            Err(e) => warn!(error = %e, "failed to persist insights"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pons_core::{MemoryStore, ProviderType};
    use pons_integration::{
        Adapter, AdapterError, AdapterFactories, AdapterFactory, AdapterInfo, CredentialData,
        IntegrationConfig, RateLimiter,
    };
    use serde_json::{Value as JsonValue, json};

    struct Fixed;

    #[async_trait]
    impl Adapter for Fixed {
        fn info(&self) -> AdapterInfo {
            AdapterInfo::new(ProviderType::new("hubspot").expect("valid"), "Fixed")
        }

        async fn connect(&self, _config: &IntegrationConfig) -> Result<(), AdapterError> {
            Ok(())
        }

        async fn disconnect(&self) {}

        fn is_connected(&self) -> bool {
            true
        }

        async fn sync(&self) -> Result<(), AdapterError> {
            Ok(())
        }

        async fn insights(&self) -> Result<JsonValue, AdapterError> {
            Ok(json!({"open_deals": 4}))
        }
    }

    #[tokio::test]
    async fn invalidate_recollects_into_store() {
        let store = Arc::new(MemoryStore::new());
        let mut factories = AdapterFactories::new();
        factories.register(
            ProviderType::new("hubspot").expect("valid"),
            AdapterFactory::new(|_| Arc::new(Fixed) as Arc<dyn Adapter>),
        );
        let registry = Arc::new(AdapterRegistry::new(
            factories,
            RateLimiter::new(),
            store.clone(),
        ));
        let config = IntegrationConfig::new(
            ProviderType::new("hubspot").expect("valid"),
            CredentialData::oauth2("t"),
        );
        assert!(registry.connect(config).await);

        StoredInsights::new(registry, store.clone()).invalidate().await;

        let raw = store
            .load(INSIGHTS_KEY)
            .await
            .expect("load")
            .expect("insights stored");
        let parsed: JsonValue = serde_json::from_str(&raw).expect("json");
        assert_eq!(parsed["hubspot"]["open_deals"], 4);
    }
}
