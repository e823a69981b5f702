//! `pons-syncd`: keeps connected integrations fresh in the background.

mod config;
mod error;
mod http_adapter;
mod sinks;

use crate::config::DaemonConfig;
use crate::error::DaemonError;
use crate::http_adapter::{CUSTOM_PROVIDER, HttpEndpointAdapter};
use crate::sinks::{LogNotificationSink, StoredInsights};
use pons_core::{FileStore, KeyValueStore, ProviderType};
use pons_integration::{
    Adapter, AdapterFactories, AdapterFactory, AdapterRegistry, CredentialType,
    IntegrationConfig, RateLimiter,
};
use pons_scheduler::SyncScheduler;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "pons-syncd failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> pons_core::Result<(), DaemonError> {
    let config = DaemonConfig::from_env().map_err(|e| DaemonError::Config {
        details: e.to_string(),
    })?;
    tracing::info!(data_dir = %config.data_dir.display(), "Loaded configuration");

    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(&config.data_dir));
    let limiter = RateLimiter::new();
    let factories = adapter_factories(&config)?;

    let mut registry = AdapterRegistry::new(factories, limiter.clone(), store.clone());
    if let Some(limit) = config.sync.max_concurrency {
        registry = registry.with_max_concurrency(limit);
    }
    let registry = Arc::new(registry);

    let restored = registry.restore().await;
    tracing::info!(restored, "Restored integrations");
    if let Some(path) = &config.integrations_file {
        connect_bootstrap(&registry, path).await?;
    }

    let scheduler = SyncScheduler::builder(registry.clone(), store.clone())
        .with_config(config.sync.clone())
        .with_notification_sink(Arc::new(LogNotificationSink))
        .with_insights_cache(Arc::new(StoredInsights::new(registry.clone(), store)))
        .build()
        .await
        .map_err(|e| DaemonError::Scheduler {
            details: e.to_string(),
        })?;

    let _status_log = scheduler.subscribe(|status| {
        tracing::debug!(
            running = status.is_running,
            result = %status.last_sync_result,
            "Sync status changed"
        );
    });

    let shutdown = CancellationToken::new();
    let sweeper = limiter.spawn_sweeper(config.rate_limit_sweep_interval(), shutdown.clone());
    scheduler.start();

    let signal = tokio::signal::ctrl_c().await;
    tracing::info!("Shutting down");
    drain(&scheduler, &registry, config.shutdown_grace()).await;
    shutdown.cancel();
    if let Err(e) = sweeper.await {
        tracing::warn!(error = %e, "Rate limit sweeper ended abnormally");
    }

    signal.map_err(|e| DaemonError::Signal {
        details: e.to_string(),
    })?;
    Ok(())
}

/// Stops the scheduler, lets an in-flight cycle finish within `grace`, then
/// disconnects every adapter. Returns whether the cycle finished in time.
async fn drain(scheduler: &SyncScheduler, registry: &AdapterRegistry, grace: Duration) -> bool {
    scheduler.stop();
    let finished = tokio::time::timeout(grace, scheduler.wait_idle())
        .await
        .is_ok();
    if !finished {
        tracing::warn!(
            grace_seconds = grace.as_secs(),
            "In-flight sync cycle did not finish before shutdown"
        );
    }
    let released = registry.shutdown().await;
    tracing::info!(released, "Integrations disconnected");
    finished
}

fn adapter_factories(config: &DaemonConfig) -> pons_core::Result<AdapterFactories, DaemonError> {
    let client = reqwest::Client::builder()
        .timeout(config.http.timeout())
        .build()
        .map_err(|e| DaemonError::HttpClient {
            details: e.to_string(),
        })?;
    let custom = ProviderType::new(CUSTOM_PROVIDER).map_err(|e| DaemonError::Config {
        details: e.to_string(),
    })?;

    let mut factories = AdapterFactories::new();
    factories.register(
        custom,
        AdapterFactory::new(move |integration: &IntegrationConfig| {
            Arc::new(HttpEndpointAdapter::new(
                integration.provider().clone(),
                client.clone(),
            )) as Arc<dyn Adapter>
        })
        .with_rate_limit(config.http.rate_limit())
        .requiring_endpoint()
        .accepting([
            CredentialType::Oauth2,
            CredentialType::ApiKey,
            CredentialType::BasicAuth,
            CredentialType::BearerToken,
        ]),
    );
    Ok(factories)
}

async fn connect_bootstrap(
    registry: &AdapterRegistry,
    path: &Path,
) -> pons_core::Result<(), DaemonError> {
    let bootstrap_error = |details: String| DaemonError::Bootstrap {
        path: path.display().to_string(),
        details,
    };
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| bootstrap_error(e.to_string()))?;
    let integrations: Vec<IntegrationConfig> =
        serde_json::from_str(&raw).map_err(|e| bootstrap_error(e.to_string()))?;

    let total = integrations.len();
    let mut connected = 0;
    for integration in integrations {
        if registry.connect(integration).await {
            connected += 1;
        }
    }
    tracing::info!(connected, total, "Connected bootstrap integrations");
    Ok(())
}
