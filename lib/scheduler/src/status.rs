//! Sync status snapshots.

use chrono::{DateTime, Utc};
use pons_core::ProviderType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Overall result of the last finished cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// No cycle has finished yet.
    #[default]
    None,
    /// Every provider synced.
    Success,
    /// Some providers synced and some failed.
    Partial,
    /// Nothing synced.
    Error,
}

impl SyncOutcome {
    /// Classifies a finished cycle by which sets are populated.
    ///
    /// A cycle with no providers at all is a success.
    #[must_use]
    pub fn classify(synced: &BTreeSet<ProviderType>, failed: &BTreeSet<ProviderType>) -> Self {
        match (synced.is_empty(), failed.is_empty()) {
            (_, true) => Self::Success,
            (false, false) => Self::Partial,
            (true, false) => Self::Error,
        }
    }

    /// Returns the snake_case name of the outcome.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of the scheduler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    /// Whether a cycle is in flight.
    pub is_running: bool,
    /// When the last cycle finished.
    pub last_sync_time: Option<DateTime<Utc>>,
    /// When the next scheduled cycle is due. `None` exactly when stopped.
    pub next_sync_time: Option<DateTime<Utc>>,
    /// Result of the last finished cycle.
    pub last_sync_result: SyncOutcome,
    /// Providers that synced in the last cycle.
    pub synced_providers: BTreeSet<ProviderType>,
    /// Providers that exhausted their retries in the last cycle.
    pub failed_providers: BTreeSet<ProviderType>,
    /// Why the last cycle failed, when it did.
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(keys: &[&str]) -> BTreeSet<ProviderType> {
        keys.iter()
            .map(|key| ProviderType::new(key).expect("valid"))
            .collect()
    }

    #[test]
    fn classify_covers_every_combination() {
        assert_eq!(SyncOutcome::classify(&set(&[]), &set(&[])), SyncOutcome::Success);
        assert_eq!(
            SyncOutcome::classify(&set(&["a"]), &set(&[])),
            SyncOutcome::Success
        );
        assert_eq!(
            SyncOutcome::classify(&set(&["a"]), &set(&["b"])),
            SyncOutcome::Partial
        );
        assert_eq!(
            SyncOutcome::classify(&set(&[]), &set(&["b"])),
            SyncOutcome::Error
        );
    }

    #[test]
    fn status_serializes_outcome_in_snake_case() {
        let status = SyncStatus {
            last_sync_result: SyncOutcome::Partial,
            synced_providers: set(&["hubspot"]),
            ..SyncStatus::default()
        };
        let json = serde_json::to_value(&status).expect("serialize");

        assert_eq!(json["last_sync_result"], "partial");
        assert_eq!(json["synced_providers"][0], "hubspot");
        assert!(json["next_sync_time"].is_null());
    }
}
