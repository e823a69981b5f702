//! Bounded concurrent fan-out over registered adapters.

use crate::error::AdapterError;
use crate::registry::RegisteredAdapter;
use futures::future::join_all;
use pons_core::ProviderType;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Runs `f` once per adapter on its own task, at most `limit` at a time.
///
/// Returns once every task has settled. A task that panics or is cancelled
/// yields [`AdapterError::TaskAborted`] for its provider; it never affects the
/// other tasks.
pub async fn run_bounded<T, F, Fut>(
    adapters: Vec<RegisteredAdapter>,
    limit: Option<usize>,
    f: F,
) -> Vec<(ProviderType, Result<T, AdapterError>)>
where
    T: Send + 'static,
    F: Fn(RegisteredAdapter) -> Fut,
    Fut: Future<Output = Result<T, AdapterError>> + Send + 'static,
{
    let semaphore = limit.map(|n| Arc::new(Semaphore::new(n.max(1))));

    let mut providers = Vec::with_capacity(adapters.len());
    let mut handles = Vec::with_capacity(adapters.len());
    for adapter in adapters {
        providers.push(adapter.provider().clone());
        let semaphore = semaphore.clone();
        let work = f(adapter);
        handles.push(tokio::spawn(async move {
            let _permit = match semaphore {
                Some(semaphore) => Some(semaphore.acquire_owned().await.map_err(|e| {
                    AdapterError::TaskAborted {
                        reason: format!("semaphore closed: {e}"),
                    }
                })?),
                None => None,
            };
            work.await
        }));
    }

    join_all(handles)
        .await
        .into_iter()
        .zip(providers)
        .map(|(joined, provider)| {
            let result = joined.unwrap_or_else(|e| {
                Err(AdapterError::TaskAborted {
                    reason: e.to_string(),
                })
            });
            (provider, result)
        })
        .collect()
}

/// Outcome of syncing a set of adapters once, without retries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Providers whose sync succeeded.
    pub synced: BTreeSet<ProviderType>,
    /// Providers whose sync failed, with the failure message.
    pub failed: BTreeMap<ProviderType, String>,
}

impl SyncReport {
    /// Builds a report from fan-out results.
    #[must_use]
    pub fn from_results(results: Vec<(ProviderType, Result<(), AdapterError>)>) -> Self {
        let mut report = Self::default();
        for (provider, result) in results {
            match result {
                Ok(()) => {
                    report.synced.insert(provider);
                }
                Err(e) => {
                    report.failed.insert(provider, e.to_string());
                }
            }
        }
        report
    }

    /// Returns true when nothing was synced or failed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.synced.is_empty() && self.failed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{Adapter, AdapterInfo};
    use crate::credential::{CredentialData, IntegrationConfig};
    use async_trait::async_trait;
    use serde_json::Value as JsonValue;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Gauge {
        provider: ProviderType,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Adapter for Gauge {
        fn info(&self) -> AdapterInfo {
            AdapterInfo::new(self.provider.clone(), "Gauge")
        }

        async fn connect(&self, _config: &IntegrationConfig) -> Result<(), AdapterError> {
            Ok(())
        }

        async fn disconnect(&self) {}

        fn is_connected(&self) -> bool {
            true
        }

        async fn sync(&self) -> Result<(), AdapterError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            if self.provider.as_str() == "broken" {
                panic!("adapter bug");
            }
            Ok(())
        }

        async fn insights(&self) -> Result<JsonValue, AdapterError> {
            Ok(JsonValue::Null)
        }
    }

    fn gauges(keys: &[&str]) -> (Vec<RegisteredAdapter>, Arc<AtomicUsize>) {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let adapters = keys
            .iter()
            .map(|key| {
                let provider = ProviderType::new(key).expect("valid");
                let config = IntegrationConfig::new(provider.clone(), CredentialData::api_key("k"));
                let adapter: Arc<dyn Adapter> = Arc::new(Gauge {
                    provider,
                    active: active.clone(),
                    peak: peak.clone(),
                });
                RegisteredAdapter::new(config, adapter)
            })
            .collect();
        (adapters, peak)
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_cap_holds() {
        let (adapters, peak) = gauges(&["a", "b", "c", "d", "e"]);

        let results = run_bounded(adapters, Some(2), |registered| async move {
            registered.adapter().sync().await
        })
        .await;

        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|(_, r)| r.is_ok()));
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_runs_everything_at_once() {
        let (adapters, peak) = gauges(&["a", "b", "c", "d"]);

        run_bounded(adapters, None, |registered| async move {
            registered.adapter().sync().await
        })
        .await;

        assert_eq!(peak.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_task_is_reported_not_propagated() {
        let (adapters, _) = gauges(&["broken", "fine"]);

        let results = run_bounded(adapters, Some(1), |registered| async move {
            registered.adapter().sync().await
        })
        .await;
        let report = SyncReport::from_results(results);

        assert!(report.synced.contains(&ProviderType::new("fine").expect("valid")));
        let reason = report
            .failed
            .get(&ProviderType::new("broken").expect("valid"))
            .expect("broken should fail");
        assert!(reason.contains("task aborted"));
    }
}
