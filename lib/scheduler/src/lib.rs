//! Background sync scheduling for pons.
//!
//! This crate provides:
//!
//! - **Sync scheduler**: Recurring, cancellable sync cycles with per-provider retry
//! - **Status publisher**: Listeners and watchers for every status change
//! - **Collaborator seams**: Notification sink and insights cache traits

pub mod config;
pub mod error;
pub mod notification;
pub mod publisher;
pub mod retry;
pub mod scheduler;
pub mod status;

pub use config::SyncConfig;
pub use error::{ConfigError, SchedulerError};
pub use notification::{InsightsCache, NotificationSink, Severity, SyncNotification};
pub use publisher::{StatusPublisher, Subscription};
pub use retry::RetryPolicy;
pub use scheduler::{LAST_SYNC_TIME_KEY, SYNC_CONFIG_KEY, SyncScheduler, SyncSchedulerBuilder};
pub use status::{SyncOutcome, SyncStatus};
