//! The background sync scheduler.
//!
//! A started scheduler runs one cycle immediately and then one cycle every
//! `interval_minutes`, measured from the end of the previous cycle. Each cycle
//! syncs every enabled integration from a registry snapshot, retrying each
//! provider independently, and rolls the results up into a [`SyncStatus`].
//!
//! Cycles never overlap. The guard is a single `AtomicBool` taken with a
//! compare-and-swap and released by the cycle's own task when it ends; a
//! manual [`SyncScheduler::sync_now`] that loses the race returns `None`
//! instead of waiting.

use crate::config::SyncConfig;
use crate::error::{SchedulerError, describe_panic};
use crate::notification::{InsightsCache, NotificationSink, SyncNotification};
use crate::publisher::{StatusPublisher, Subscription};
use crate::status::{SyncOutcome, SyncStatus};
use chrono::{DateTime, Utc};
use pons_core::{KeyValueStore, ProviderType, SyncCycleId};
use pons_integration::{AdapterRegistry, run_bounded};
use futures::FutureExt;
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::{Notify, watch};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

/// Store key holding the persisted [`SyncConfig`].
pub const SYNC_CONFIG_KEY: &str = "sync_config";
/// Store key holding the RFC 3339 time of the last finished cycle.
pub const LAST_SYNC_TIME_KEY: &str = "last_sync_time";

const ALL_FAILED: &str = "All integrations failed to sync";

/// Builds a [`SyncScheduler`].
pub struct SyncSchedulerBuilder {
    registry: Arc<AdapterRegistry>,
    store: Arc<dyn KeyValueStore>,
    config: SyncConfig,
    notifications: Option<Arc<dyn NotificationSink>>,
    insights: Option<Arc<dyn InsightsCache>>,
}

impl SyncSchedulerBuilder {
    /// Sets the base config, used when the store holds none.
    #[must_use]
    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets where finished-cycle notifications go.
    #[must_use]
    pub fn with_notification_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.notifications = Some(sink);
        self
    }

    /// Sets the insights cache invalidated after productive cycles.
    #[must_use]
    pub fn with_insights_cache(mut self, cache: Arc<dyn InsightsCache>) -> Self {
        self.insights = Some(cache);
        self
    }

    /// Loads persisted state and builds a stopped scheduler.
    ///
    /// A valid persisted config wins over the base config. Unreadable
    /// persisted state is logged and ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the base config is invalid.
    pub async fn build(self) -> pons_core::Result<SyncScheduler, SchedulerError> {
        self.config.validate().map_err(SchedulerError::from)?;

        let config = load_config(self.store.as_ref())
            .await
            .unwrap_or(self.config);
        let last_sync_time = load_last_sync_time(self.store.as_ref()).await;

        let status = SyncStatus {
            last_sync_time,
            ..SyncStatus::default()
        };
        info!(
            interval_minutes = config.interval_minutes,
            retry_attempts = config.retry_attempts,
            "sync scheduler ready"
        );

        Ok(SyncScheduler {
            inner: Arc::new(Inner {
                registry: self.registry,
                store: self.store,
                notifications: self.notifications,
                insights: self.insights,
                config: RwLock::new(config),
                publisher: StatusPublisher::new(status.clone()),
                status: Mutex::new(status),
                running: AtomicBool::new(false),
                idle: Notify::new(),
                timer: Mutex::new(None),
            }),
        })
    }
}

async fn load_config(store: &dyn KeyValueStore) -> Option<SyncConfig> {
    let raw = match store.load(SYNC_CONFIG_KEY).await {
        Ok(raw) => raw?,
        Err(e) => {
            warn!(error = %e, "failed to load sync config");
            return None;
        }
    };
    match serde_json::from_str::<SyncConfig>(&raw) {
        Ok(config) => match config.validate() {
            Ok(()) => Some(config),
            Err(e) => {
                warn!(error = %e, "persisted sync config is invalid, ignoring");
                None
            }
        },
        Err(e) => {
            warn!(error = %e, "persisted sync config is unreadable, ignoring");
            None
        }
    }
}

async fn load_last_sync_time(store: &dyn KeyValueStore) -> Option<DateTime<Utc>> {
    let raw = match store.load(LAST_SYNC_TIME_KEY).await {
        Ok(raw) => raw?,
        Err(e) => {
            warn!(error = %e, "failed to load last sync time");
            return None;
        }
    };
    match DateTime::parse_from_rfc3339(raw.trim()) {
        Ok(time) => Some(time.with_timezone(&Utc)),
        Err(e) => {
            warn!(error = %e, "persisted last sync time is unreadable, ignoring");
            None
        }
    }
}

/// Drives periodic sync cycles across the registry's adapters.
///
/// Cloning is cheap; clones control the same scheduler.
#[derive(Clone)]
pub struct SyncScheduler {
    inner: Arc<Inner>,
}

// Lock order: `timer`, then `config`, then `status`.
struct Inner {
    registry: Arc<AdapterRegistry>,
    store: Arc<dyn KeyValueStore>,
    notifications: Option<Arc<dyn NotificationSink>>,
    insights: Option<Arc<dyn InsightsCache>>,
    config: RwLock<SyncConfig>,
    status: Mutex<SyncStatus>,
    publisher: StatusPublisher,
    running: AtomicBool,
    idle: Notify,
    timer: Mutex<Option<CancellationToken>>,
}

/// Held by the cycle task; releases the cycle guard when the task ends.
struct CycleGuard {
    inner: Arc<Inner>,
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.inner.running.store(false, Ordering::Release);
        self.inner.idle.notify_waiters();
    }
}

/// What one cycle body produced.
#[derive(Debug, Default)]
struct CycleReport {
    synced: BTreeSet<ProviderType>,
    failed: BTreeSet<ProviderType>,
    fault: Option<String>,
}

impl SyncScheduler {
    /// Starts building a scheduler over `registry`, persisting to `store`.
    #[must_use]
    pub fn builder(
        registry: Arc<AdapterRegistry>,
        store: Arc<dyn KeyValueStore>,
    ) -> SyncSchedulerBuilder {
        SyncSchedulerBuilder {
            registry,
            store,
            config: SyncConfig::default(),
            notifications: None,
            insights: None,
        }
    }

    /// Arms the timer and triggers a cycle right away, or as soon as an
    /// in-flight cycle finishes.
    ///
    /// Starting an already started scheduler does nothing.
    pub fn start(&self) {
        let (token, status) = {
            let mut timer = self.lock_timer();
            if timer.is_some() {
                debug!("sync scheduler already started");
                return;
            }
            self.arm(&mut timer)
        };
        self.spawn_timer_loop(token);
        self.inner.publisher.notify_listeners(&status);
        info!(
            interval_minutes = self.config().interval_minutes,
            "sync scheduler started"
        );
    }

    /// Cancels the timer. An in-flight cycle runs to completion.
    pub fn stop(&self) {
        let status = {
            let mut timer = self.lock_timer();
            let Some(token) = timer.take() else {
                return;
            };
            token.cancel();
            self.update_status(|status| status.next_sync_time = None)
        };
        self.inner.publisher.notify_listeners(&status);
        info!("sync scheduler stopped");
    }

    /// Returns whether the timer is armed.
    #[must_use]
    pub fn is_scheduled(&self) -> bool {
        self.lock_timer().is_some()
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> SyncStatus {
        self.inner
            .status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the current tuning.
    #[must_use]
    pub fn config(&self) -> SyncConfig {
        self.inner
            .config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Validates, persists and applies new tuning.
    ///
    /// A started scheduler is re-armed with the new interval. The re-armed
    /// timer runs a cycle right away, or right after the cycle that is in
    /// flight, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid; nothing changes then.
    pub async fn update_config(
        &self,
        config: SyncConfig,
    ) -> pons_core::Result<(), SchedulerError> {
        config.validate().map_err(SchedulerError::from)?;

        *self
            .inner
            .config
            .write()
            .unwrap_or_else(PoisonError::into_inner) = config.clone();

        match serde_json::to_string(&config) {
            Ok(encoded) => {
                if let Err(e) = self.inner.store.save(SYNC_CONFIG_KEY, &encoded).await {
                    warn!(error = %e, "failed to persist sync config");
                }
            }
            Err(e) => warn!(error = %e, "failed to encode sync config"),
        }
        info!(
            interval_minutes = config.interval_minutes,
            retry_attempts = config.retry_attempts,
            "sync config updated"
        );

        let rearmed = {
            let mut timer = self.lock_timer();
            match timer.take() {
                Some(previous) => {
                    previous.cancel();
                    Some(self.arm(&mut timer))
                }
                None => None,
            }
        };
        if let Some((token, status)) = rearmed {
            self.spawn_timer_loop(token);
            self.inner.publisher.notify_listeners(&status);
            debug!("sync timer re-armed");
        }
        Ok(())
    }

    /// Registers a listener called with every status change.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SyncStatus) + Send + Sync + 'static,
    {
        self.inner.publisher.subscribe(listener)
    }

    /// Returns a receiver that always holds the latest status.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<SyncStatus> {
        self.inner.publisher.watch()
    }

    /// Runs one cycle now.
    ///
    /// Returns the resulting status, or `None` if a cycle was already running.
    /// The cycle runs on its own task: dropping the returned future stops the
    /// wait, not the cycle.
    pub async fn sync_now(&self) -> Option<SyncStatus> {
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("sync already in progress");
            return None;
        }
        let guard = CycleGuard {
            inner: self.inner.clone(),
        };

        let cycle = SyncCycleId::new();
        let scheduler = self.clone();
        let task = tokio::spawn(
            async move { scheduler.run_cycle(guard).await }
                .instrument(info_span!("sync_cycle", cycle = %cycle)),
        );
        match task.await {
            Ok(status) => Some(status),
            Err(e) => {
                error!(cycle = %cycle, error = %e, "sync cycle task ended abnormally");
                None
            }
        }
    }

    /// Waits until no cycle is running.
    pub async fn wait_idle(&self) {
        loop {
            let mut idle = pin!(self.inner.idle.notified());
            idle.as_mut().enable();
            if !self.inner.running.load(Ordering::Acquire) {
                return;
            }
            idle.await;
        }
    }

    async fn sync_when_idle(&self) -> SyncStatus {
        loop {
            if let Some(status) = self.sync_now().await {
                return status;
            }
            self.wait_idle().await;
        }
    }

    async fn run_cycle(&self, guard: CycleGuard) -> SyncStatus {
        let status = self.update_status(|status| {
            status.is_running = true;
            status.synced_providers.clear();
            status.failed_providers.clear();
            status.error_message = None;
        });
        self.inner.publisher.notify_listeners(&status);

        let config = self.config();
        let report = AssertUnwindSafe(cycle_body(self.inner.registry.clone(), config.clone()))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                let reason = describe_panic(payload.as_ref());
                error!(reason = %reason, "sync cycle aborted by internal fault");
                CycleReport {
                    fault: Some(reason),
                    ..CycleReport::default()
                }
            });

        let now = Utc::now();
        let status = {
            let timer = self.lock_timer();
            let scheduled = timer.is_some();
            self.update_status(|status| {
                status.is_running = false;
                status.last_sync_time = Some(now);
                status.next_sync_time = if scheduled {
                    after(now, config.interval())
                } else {
                    None
                };
                if let Some(fault) = &report.fault {
                    status.last_sync_result = SyncOutcome::Error;
                    status.error_message = Some(fault.clone());
                } else {
                    status.last_sync_result =
                        SyncOutcome::classify(&report.synced, &report.failed);
                    if status.last_sync_result == SyncOutcome::Error {
                        status.error_message = Some(ALL_FAILED.to_string());
                    }
                }
                status.synced_providers = report.synced.clone();
                status.failed_providers = report.failed.clone();
            })
        };

        if let Err(e) = self
            .inner
            .store
            .save(LAST_SYNC_TIME_KEY, &now.to_rfc3339())
            .await
        {
            warn!(error = %e, "failed to persist last sync time");
        }
        self.inner.publisher.notify_listeners(&status);

        info!(
            result = %status.last_sync_result,
            synced = status.synced_providers.len(),
            failed = status.failed_providers.len(),
            "sync cycle finished"
        );

        if !status.synced_providers.is_empty() {
            if let Some(insights) = &self.inner.insights {
                insights.invalidate().await;
            }
        }
        if config.enable_notifications {
            if let (Some(sink), Some(notification)) = (
                &self.inner.notifications,
                SyncNotification::for_status(&status),
            ) {
                sink.notify(notification).await;
            }
        }
        drop(guard);
        status
    }

    /// Installs a fresh timer token and stamps the next sync time. The
    /// caller holds the timer lock and spawns the loop once it is released.
    fn arm(&self, timer: &mut Option<CancellationToken>) -> (CancellationToken, SyncStatus) {
        let token = CancellationToken::new();
        *timer = Some(token.clone());
        let interval = self.config().interval();
        let status = self.update_status(|status| {
            status.next_sync_time = after(Utc::now(), interval);
        });
        (token, status)
    }

    fn spawn_timer_loop(&self, token: CancellationToken) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = scheduler.sync_when_idle() => {}
                }
                let interval = scheduler.config().interval();
                tokio::select! {
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(interval) => {}
                }
            }
            debug!("sync timer loop exited");
        });
    }

    fn lock_timer(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.inner
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies `apply` to the status and hands the result to watchers while
    /// the status lock is held, so watchers never see updates out of order.
    fn update_status(&self, apply: impl FnOnce(&mut SyncStatus)) -> SyncStatus {
        let mut status = self
            .inner
            .status
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        apply(&mut status);
        self.inner.publisher.record(&status);
        status.clone()
    }
}

fn after(now: DateTime<Utc>, interval: std::time::Duration) -> Option<DateTime<Utc>> {
    chrono::TimeDelta::from_std(interval)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
}

async fn cycle_body(registry: Arc<AdapterRegistry>, config: SyncConfig) -> CycleReport {
    let adapters = registry.snapshot();
    if adapters.is_empty() {
        info!("no integrations connected, skipping sync");
        return CycleReport::default();
    }
    info!(count = adapters.len(), "syncing integrations");

    let policy = config.retry_policy();
    let results = run_bounded(adapters, config.max_concurrency, move |registered| {
        async move {
            let adapter = registered.adapter().clone();
            policy
                .run(registered.provider(), |_| {
                    let adapter = adapter.clone();
                    async move { adapter.sync().await }
                })
                .await
        }
        .instrument(Span::current())
    })
    .await;

    let mut report = CycleReport::default();
    for (provider, result) in results {
        match result {
            Ok(()) => {
                report.synced.insert(provider);
            }
            Err(_) => {
                report.failed.insert(provider);
            }
        }
    }
    report
}

impl std::fmt::Debug for SyncScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncScheduler")
            .field("config", &self.config())
            .field("scheduled", &self.is_scheduled())
            .field("running", &self.inner.running.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}
