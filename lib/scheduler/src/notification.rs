//! Collaborators told about finished cycles.

use crate::status::{SyncOutcome, SyncStatus};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Severity of a sync notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Success,
    Warning,
    Error,
}

/// User-facing summary of one finished cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncNotification {
    pub title: String,
    pub message: String,
    pub severity: Severity,
}

impl SyncNotification {
    /// Builds the notification for a finished cycle.
    ///
    /// Returns `None` if no cycle has finished yet.
    #[must_use]
    pub fn for_status(status: &SyncStatus) -> Option<Self> {
        let synced = status.synced_providers.len();
        let failed = status.failed_providers.len();
        let (title, message, severity) = match status.last_sync_result {
            SyncOutcome::None => return None,
            SyncOutcome::Success => (
                "Sync complete",
                format!("Updated {synced} integration(s)"),
                Severity::Success,
            ),
            SyncOutcome::Partial => (
                "Partial sync",
                format!("{synced} succeeded, {failed} failed"),
                Severity::Warning,
            ),
            SyncOutcome::Error => (
                "Sync failed",
                status
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "Failed to sync integrations".to_string()),
                Severity::Error,
            ),
        };
        Some(Self {
            title: title.to_string(),
            message,
            severity,
        })
    }
}

/// Receives one notification per finished cycle.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Delivers a notification. Delivery is best effort.
    async fn notify(&self, notification: SyncNotification);
}

/// Cache of AI insights derived from synced data.
#[async_trait]
pub trait InsightsCache: Send + Sync {
    /// Drops cached insights so the next read recomputes them.
    async fn invalidate(&self);
}
