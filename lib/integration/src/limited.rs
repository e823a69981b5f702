//! Adapter wrapper that charges every outbound call against a provider quota.

use crate::adapter::{Adapter, AdapterInfo};
use crate::credential::IntegrationConfig;
use crate::error::AdapterError;
use crate::rate_limit::{RateLimitConfig, RateLimitResult, RateLimiter, RetryBehavior};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::debug;

/// Wraps an adapter so `connect`, `sync` and `insights` consume quota first.
///
/// The quota key is the provider key, so every wrapped adapter for the same
/// provider shares one window through the shared [`RateLimiter`].
pub struct RateLimitedAdapter {
    inner: Arc<dyn Adapter>,
    limiter: RateLimiter,
    limit: RateLimitConfig,
    key: String,
}

impl RateLimitedAdapter {
    /// Wraps `inner` with the given quota.
    #[must_use]
    pub fn new(inner: Arc<dyn Adapter>, limiter: RateLimiter, limit: RateLimitConfig) -> Self {
        let key = inner.info().provider.to_string();
        Self {
            inner,
            limiter,
            limit,
            key,
        }
    }

    /// Returns the quota applied to the wrapped adapter.
    #[must_use]
    pub fn limit(&self) -> &RateLimitConfig {
        &self.limit
    }

    async fn charge(&self) -> Result<(), AdapterError> {
        let result = match self.limit.retry_behavior {
            RetryBehavior::WaitAndRetry => self.limiter.acquire(&self.key, &self.limit).await,
            RetryBehavior::FailFast => self.limiter.try_acquire(&self.key, &self.limit),
        };
        match result {
            RateLimitResult::Allowed { .. } => Ok(()),
            RateLimitResult::Exceeded { retry_after, .. } => {
                debug!(provider = %self.key, "request denied by rate limiter");
                Err(AdapterError::RateLimited {
                    retry_after_ms: Some(u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX)),
                })
            }
        }
    }
}

#[async_trait]
impl Adapter for RateLimitedAdapter {
    fn info(&self) -> AdapterInfo {
        self.inner.info()
    }

    async fn connect(&self, config: &IntegrationConfig) -> Result<(), AdapterError> {
        self.charge().await?;
        self.inner.connect(config).await
    }

    async fn disconnect(&self) {
        self.inner.disconnect().await;
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    async fn sync(&self) -> Result<(), AdapterError> {
        self.charge().await?;
        self.inner.sync().await
    }

    async fn insights(&self) -> Result<JsonValue, AdapterError> {
        self.charge().await?;
        self.inner.insights().await
    }
}
