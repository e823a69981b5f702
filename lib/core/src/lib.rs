//! Core domain types and utilities for pons.
//!
//! This crate provides the foundational types shared by the integration
//! registry and the sync scheduler: error handling, identifiers, provider
//! keys and the key-value persistence seam.

pub mod error;
pub mod id;
pub mod provider;
pub mod store;

pub use error::Result;
pub use id::{ParseIdError, SyncCycleId};
pub use provider::{InvalidProviderType, ProviderType};
pub use store::{FileStore, KeyValueStore, MemoryStore, StoreError};
