//! Broadcasts status changes to observers.
//!
//! Two flavours of observer are supported. Callback listeners run
//! synchronously on every publish, in subscription order; a listener that
//! panics is logged and skipped. Async observers use [`StatusPublisher::watch`]
//! and only ever see the latest status.

use crate::error::describe_panic;
use crate::status::SyncStatus;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::watch;
use tracing::error;

type Listener = Arc<dyn Fn(&SyncStatus) + Send + Sync>;

struct Shared {
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_id: AtomicU64,
    latest: watch::Sender<SyncStatus>,
}

/// Fan-out point for [`SyncStatus`] updates.
#[derive(Clone)]
pub struct StatusPublisher {
    shared: Arc<Shared>,
}

impl StatusPublisher {
    /// Creates a publisher whose watchers start from `initial`.
    #[must_use]
    pub fn new(initial: SyncStatus) -> Self {
        let (latest, _) = watch::channel(initial);
        Self {
            shared: Arc::new(Shared {
                listeners: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
                latest,
            }),
        }
    }

    /// Registers a listener called with every published status.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SyncStatus) + Send + Sync + 'static,
    {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        self.shared
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        Subscription {
            id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Returns a receiver that always holds the latest status.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<SyncStatus> {
        self.shared.latest.subscribe()
    }

    /// Returns the number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.shared
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Delivers `status` to every listener and watcher.
    pub fn publish(&self, status: &SyncStatus) {
        self.record(status);
        self.notify_listeners(status);
    }

    /// Makes `status` the latest value seen by watchers. Calls no user code,
    /// so it is safe under the caller's locks.
    pub(crate) fn record(&self, status: &SyncStatus) {
        self.shared.latest.send_replace(status.clone());
    }

    /// Calls every listener with `status`.
    pub(crate) fn notify_listeners(&self, status: &SyncStatus) {
        // Snapshot so listeners may (un)subscribe while being called.
        let listeners: Vec<Listener> = self
            .shared
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        for listener in listeners {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| listener(status))) {
                error!(panic = %describe_panic(payload.as_ref()), "sync status listener panicked");
            }
        }
    }
}

impl std::fmt::Debug for StatusPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusPublisher")
            .field("listeners", &self.listener_count())
            .finish_non_exhaustive()
    }
}

/// Handle for removing a listener.
///
/// Dropping the handle keeps the listener registered.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    shared: Weak<Shared>,
}

impl Subscription {
    /// Removes the listener. Takes effect from the next publish; calling it
    /// again is a no-op.
    pub fn unsubscribe(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|(id, _)| *id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::SyncOutcome;
    use std::sync::atomic::AtomicUsize;

    fn counting(publisher: &StatusPublisher) -> (Arc<AtomicUsize>, Subscription) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let subscription = publisher.subscribe(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (count, subscription)
    }

    #[test]
    fn listeners_receive_full_status() {
        let publisher = StatusPublisher::new(SyncStatus::default());
        let received = Arc::new(Mutex::new(None));
        let slot = received.clone();
        let _subscription = publisher.subscribe(move |status| {
            *slot.lock().expect("lock") = Some(status.clone());
        });

        let status = SyncStatus {
            last_sync_result: SyncOutcome::Success,
            ..SyncStatus::default()
        };
        publisher.publish(&status);

        assert_eq!(received.lock().expect("lock").as_ref(), Some(&status));
    }

    #[test]
    fn panicking_listener_does_not_starve_others() {
        let publisher = StatusPublisher::new(SyncStatus::default());
        let (before, _a) = counting(&publisher);
        let _bad = publisher.subscribe(|_| panic!("listener bug"));
        let (after, _b) = counting(&publisher);

        publisher.publish(&SyncStatus::default());
        publisher.publish(&SyncStatus::default());

        assert_eq!(before.load(Ordering::SeqCst), 2);
        assert_eq!(after.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let publisher = StatusPublisher::new(SyncStatus::default());
        let (count, subscription) = counting(&publisher);

        publisher.publish(&SyncStatus::default());
        subscription.unsubscribe();
        subscription.unsubscribe();
        publisher.publish(&SyncStatus::default());

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(publisher.listener_count(), 0);
    }

    #[test]
    fn unsubscribe_from_inside_listener() {
        let publisher = StatusPublisher::new(SyncStatus::default());
        let own: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(AtomicUsize::new(0));

        let handle = own.clone();
        let seen = calls.clone();
        let subscription = publisher.subscribe(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            if let Some(subscription) = handle.lock().expect("lock").take() {
                subscription.unsubscribe();
            }
        });
        *own.lock().expect("lock") = Some(subscription);
        let (other, _other) = counting(&publisher);

        publisher.publish(&SyncStatus::default());
        publisher.publish(&SyncStatus::default());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(other.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn watchers_see_latest_status() {
        let publisher = StatusPublisher::new(SyncStatus::default());
        let mut rx = publisher.watch();

        publisher.publish(&SyncStatus {
            is_running: true,
            ..SyncStatus::default()
        });
        publisher.publish(&SyncStatus {
            last_sync_result: SyncOutcome::Partial,
            ..SyncStatus::default()
        });

        rx.changed().await.expect("sender alive");
        let latest = rx.borrow_and_update().clone();
        assert!(!latest.is_running);
        assert_eq!(latest.last_sync_result, SyncOutcome::Partial);
    }

    #[test]
    fn subscription_outliving_publisher_is_harmless() {
        let publisher = StatusPublisher::new(SyncStatus::default());
        let (_, subscription) = counting(&publisher);
        drop(publisher);
        subscription.unsubscribe();
    }
}
