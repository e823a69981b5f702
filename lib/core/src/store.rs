//! Key-value persistence for state that should survive a restart.
//!
//! Pons keeps very little durable state: the set of configured integrations,
//! the last successful sync time and the scheduler tuning. All of it is stored
//! as small JSON strings under fixed keys. A missing key always means "use the
//! default"; callers never treat absence as an error.

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};
use ulid::Ulid;

/// Errors from key-value store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The key contains characters that are not allowed in a store key.
    InvalidKey { key: String },
    /// Reading a value failed.
    ReadFailed { key: String, reason: String },
    /// Writing a value failed.
    WriteFailed { key: String, reason: String },
    /// Removing a value failed.
    RemoveFailed { key: String, reason: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidKey { key } => write!(f, "invalid store key: {key:?}"),
            Self::ReadFailed { key, reason } => {
                write!(f, "failed to read '{key}': {reason}")
            }
            Self::WriteFailed { key, reason } => {
                write!(f, "failed to write '{key}': {reason}")
            }
            Self::RemoveFailed { key, reason } => {
                write!(f, "failed to remove '{key}': {reason}")
            }
        }
    }
}

impl std::error::Error for StoreError {}

/// A simple string key-value store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Loads the value stored under `key`, or `None` if nothing is stored.
    async fn load(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Stores `value` under `key`, replacing any previous value.
    async fn save(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Removes the value stored under `key`. Removing a missing key succeeds.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// In-memory store, used by tests and by deployments that opt out of
/// persistence.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(key).cloned())
    }

    async fn save(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.remove(key);
        Ok(())
    }
}

/// Directory-backed store: one `<key>.json` file per key.
///
/// Writes go to a temporary sibling file that is then renamed over the
/// target, so a crash mid-write never leaves a truncated value behind.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Creates a store rooted at `dir`. The directory is created on first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the directory this store writes to.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StoreError::InvalidKey {
                key: key.to_string(),
            }
            .into());
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::ReadFailed {
                key: key.to_string(),
                reason: e.to_string(),
            }
            .into()),
        }
    }

    async fn save(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let write_failed = |e: std::io::Error| StoreError::WriteFailed {
            key: key.to_string(),
            reason: e.to_string(),
        };

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(write_failed)?;

        // One temp file per write, so concurrent saves of a key never share one.
        let tmp = self.dir.join(format!(".{key}.{}.tmp", Ulid::new()));
        tokio::fs::write(&tmp, value).await.map_err(write_failed)?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            if let Err(cleanup) = tokio::fs::remove_file(&tmp).await {
                warn!(path = %tmp.display(), error = %cleanup, "failed to remove temp file");
            }
            return Err(write_failed(e).into());
        }

        debug!(key, path = %path.display(), "value persisted");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::RemoveFailed {
                key: key.to_string(),
                reason: e.to_string(),
            }
            .into()),
        }
    }
}
