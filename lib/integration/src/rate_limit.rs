//! Rate limiting for provider requests.
//!
//! One [`RateLimiter`] is shared by every call site in the process (clones
//! share state), so a provider's quota is enforced no matter which adapter or
//! task issues the request. Quotas use fixed windows: the first request after
//! a window elapses opens a new window of `window_ms` milliseconds.
//!
//! Windows are measured on Tokio's monotonic clock; reset times are projected
//! onto UTC only for reporting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Reference cadence for [`RateLimiter::spawn_sweeper`].
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Rate limit configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum requests per window.
    pub max_requests: u32,
    /// Window duration in milliseconds.
    pub window_ms: u64,
    /// What a rate-limited adapter does when the quota is exhausted.
    #[serde(default)]
    pub retry_behavior: RetryBehavior,
}

impl RateLimitConfig {
    /// Twitter API v2 reads, per app per 15 minutes.
    pub const TWITTER_READ: Self = Self::fixed(450, 15 * 60 * 1000);
    /// Twitter API v2 writes, per app per 15 minutes.
    pub const TWITTER_WRITE: Self = Self::fixed(50, 15 * 60 * 1000);
    /// Instagram Graph API, per user per hour.
    pub const INSTAGRAM: Self = Self::fixed(200, 60 * 60 * 1000);
    /// LinkedIn API, per member per day.
    pub const LINKEDIN: Self = Self::fixed(100, 24 * 60 * 60 * 1000);
    /// Facebook Graph API, per app per hour.
    pub const FACEBOOK: Self = Self::fixed(200, 60 * 60 * 1000);
    /// Plaid, per item per day.
    pub const PLAID: Self = Self::fixed(100, 24 * 60 * 60 * 1000);
    /// OpenAI, conservative.
    pub const OPENAI: Self = Self::fixed(60, 60 * 1000);
    /// Conservative default for providers without a documented quota.
    pub const CONSERVATIVE: Self = Self::fixed(30, 60 * 1000);

    const fn fixed(max_requests: u32, window_ms: u64) -> Self {
        Self {
            max_requests,
            window_ms,
            retry_behavior: RetryBehavior::FailFast,
        }
    }

    /// Creates a new rate limit configuration.
    #[must_use]
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self::fixed(
            max_requests,
            u64::try_from(window.as_millis()).unwrap_or(u64::MAX),
        )
    }

    /// Requests per minute.
    #[must_use]
    pub fn per_minute(max_requests: u32) -> Self {
        Self::new(max_requests, Duration::from_secs(60))
    }

    /// Requests per hour.
    #[must_use]
    pub fn per_hour(max_requests: u32) -> Self {
        Self::new(max_requests, Duration::from_secs(3600))
    }

    /// Requests per day.
    #[must_use]
    pub fn per_day(max_requests: u32) -> Self {
        Self::new(max_requests, Duration::from_secs(86400))
    }

    /// Sets the retry behavior.
    #[must_use]
    pub fn with_retry_behavior(mut self, retry_behavior: RetryBehavior) -> Self {
        self.retry_behavior = retry_behavior;
        self
    }

    /// Returns the window as a [`Duration`].
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::per_minute(60)
    }
}

/// Behavior when the rate limit is exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryBehavior {
    /// Fail immediately; the sync retry loop decides what happens next.
    #[default]
    FailFast,
    /// Suspend the calling task until the window resets.
    WaitAndRetry,
}

/// Result of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitResult {
    /// Request is allowed.
    Allowed {
        remaining: u32,
        resets_at: DateTime<Utc>,
    },
    /// Rate limit exceeded.
    Exceeded {
        retry_after: Duration,
        resets_at: DateTime<Utc>,
    },
}

impl RateLimitResult {
    /// Returns true if the request is allowed.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }

    /// Returns the number of remaining requests (0 if exceeded).
    #[must_use]
    pub fn remaining(&self) -> u32 {
        match self {
            Self::Allowed { remaining, .. } => *remaining,
            Self::Exceeded { .. } => 0,
        }
    }
}

/// Read-only view of a key's quota.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitStatus {
    /// Requests left in the current window.
    pub remaining: u32,
    /// When the current window resets.
    pub reset_time: DateTime<Utc>,
    /// Whether the next request would be denied.
    pub is_limited: bool,
}

/// Counter for a single key's current window.
#[derive(Debug, Clone)]
struct RateLimitRecord {
    count: u32,
    resets_at: Instant,
}

impl RateLimitRecord {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.resets_at
    }
}

fn wall_clock(at: Instant, now: Instant) -> DateTime<Utc> {
    let ahead = chrono::Duration::from_std(at.saturating_duration_since(now))
        .unwrap_or_else(|_| chrono::Duration::zero());
    Utc::now() + ahead
}

/// A process-wide, provider-keyed rate limiter.
#[derive(Debug, Clone, Default)]
pub struct RateLimiter {
    records: Arc<RwLock<HashMap<String, RateLimitRecord>>>,
}

impl RateLimiter {
    /// Creates a limiter with no tracked keys.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes one request from `key`'s quota if available.
    pub fn check_and_consume(&self, key: &str, limit: &RateLimitConfig) -> bool {
        self.try_acquire(key, limit).is_allowed()
    }

    /// Consumes one request from `key`'s quota and reports the outcome.
    ///
    /// A denied request does not change any state.
    pub fn try_acquire(&self, key: &str, limit: &RateLimitConfig) -> RateLimitResult {
        let now = Instant::now();
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);

        match records.get_mut(key) {
            Some(record) if !record.is_expired(now) => {
                let resets_at = wall_clock(record.resets_at, now);
                if record.count >= limit.max_requests {
                    return RateLimitResult::Exceeded {
                        retry_after: record.resets_at - now,
                        resets_at,
                    };
                }
                record.count += 1;
                RateLimitResult::Allowed {
                    remaining: limit.max_requests - record.count,
                    resets_at,
                }
            }
            _ if limit.max_requests == 0 => RateLimitResult::Exceeded {
                retry_after: limit.window(),
                resets_at: wall_clock(now + limit.window(), now),
            },
            _ => {
                let resets_at = now + limit.window();
                records.insert(
                    key.to_string(),
                    RateLimitRecord {
                        count: 1,
                        resets_at,
                    },
                );
                RateLimitResult::Allowed {
                    remaining: limit.max_requests - 1,
                    resets_at: wall_clock(resets_at, now),
                }
            }
        }
    }

    /// Reports `key`'s quota without consuming.
    #[must_use]
    pub fn status(&self, key: &str, limit: &RateLimitConfig) -> RateLimitStatus {
        let now = Instant::now();
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);

        match records.get(key) {
            Some(record) if !record.is_expired(now) => {
                let remaining = limit.max_requests.saturating_sub(record.count);
                RateLimitStatus {
                    remaining,
                    reset_time: wall_clock(record.resets_at, now),
                    is_limited: remaining == 0,
                }
            }
            _ => RateLimitStatus {
                remaining: limit.max_requests,
                reset_time: wall_clock(now + limit.window(), now),
                is_limited: limit.max_requests == 0,
            },
        }
    }

    /// Suspends the calling task until `key`'s current window resets.
    ///
    /// Returns immediately when the key is not limited.
    pub async fn wait_for_reset(&self, key: &str, limit: &RateLimitConfig) {
        let deadline = {
            let now = Instant::now();
            let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
            match records.get(key) {
                Some(record)
                    if !record.is_expired(now) && record.count >= limit.max_requests =>
                {
                    Some(record.resets_at)
                }
                _ => None,
            }
        };

        if let Some(deadline) = deadline {
            debug!(
                key,
                wait_ms = deadline.saturating_duration_since(Instant::now()).as_millis() as u64,
                "rate limited, waiting for window reset"
            );
            tokio::time::sleep_until(deadline).await;
        }
    }

    /// Consumes one request, waiting for window resets as long as needed.
    ///
    /// A quota of zero can never be satisfied, so it is reported as
    /// [`RateLimitResult::Exceeded`] right away instead of waiting.
    pub async fn acquire(&self, key: &str, limit: &RateLimitConfig) -> RateLimitResult {
        loop {
            match self.try_acquire(key, limit) {
                allowed @ RateLimitResult::Allowed { .. } => return allowed,
                exceeded @ RateLimitResult::Exceeded { .. } if limit.max_requests == 0 => {
                    warn!(key, "quota of zero requests can never be acquired");
                    return exceeded;
                }
                RateLimitResult::Exceeded { retry_after, .. } => {
                    debug!(key, retry_after_ms = retry_after.as_millis() as u64, "quota exhausted");
                    tokio::time::sleep(retry_after).await;
                }
            }
        }
    }

    /// Resets the rate limit for a key.
    pub fn reset(&self, key: &str) {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records.remove(key);
    }

    /// Resets every key.
    pub fn reset_all(&self) {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records.clear();
    }

    /// Removes records whose window has elapsed. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let before = records.len();
        records.retain(|_, record| !record.is_expired(now));
        before - records.len()
    }

    /// Returns the number of keys currently tracked.
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Spawns a task that sweeps expired records every `period` until
    /// `cancel` fires.
    pub fn spawn_sweeper(&self, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            info!(period_ms = period.as_millis() as u64, "rate limit sweeper started");
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("rate limit sweeper stopped");
                        break;
                    }
                    () = tokio::time::sleep(period) => {
                        let removed = limiter.sweep_expired();
                        if removed > 0 {
                            debug!(removed, "swept expired rate limit records");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limit(max_requests: u32, window_ms: u64) -> RateLimitConfig {
        RateLimitConfig::new(max_requests, Duration::from_millis(window_ms))
    }

    #[tokio::test(start_paused = true)]
    async fn allows_under_limit() {
        let limiter = RateLimiter::new();
        let config = limit(10, 60_000);

        for i in 0..10 {
            let result = limiter.try_acquire("test", &config);
            assert!(result.is_allowed());
            assert_eq!(result.remaining(), 10 - i - 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn window_reopens_after_elapsing() {
        let limiter = RateLimiter::new();
        let config = limit(2, 1000);

        assert!(limiter.check_and_consume("x", &config));
        assert!(limiter.check_and_consume("x", &config));
        assert!(!limiter.check_and_consume("x", &config));

        tokio::time::sleep(Duration::from_millis(1000)).await;

        assert!(limiter.check_and_consume("x", &config));
        assert_eq!(limiter.status("x", &config).remaining, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_max_within_window() {
        let limiter = RateLimiter::new();
        let config = limit(5, 10_000);

        let allowed = (0..6)
            .filter(|_| limiter.check_and_consume("k", &config))
            .count();
        assert_eq!(allowed, 5);

        tokio::time::sleep(Duration::from_millis(9_999)).await;
        assert!(!limiter.check_and_consume("k", &config));
    }

    #[tokio::test(start_paused = true)]
    async fn denied_request_does_not_mutate() {
        let limiter = RateLimiter::new();
        let config = limit(1, 1000);

        assert!(limiter.check_and_consume("k", &config));
        let before = limiter.status("k", &config);
        assert!(!limiter.check_and_consume("k", &config));
        let after = limiter.status("k", &config);

        assert_eq!(before.remaining, after.remaining);
        assert!(after.is_limited);
    }

    #[tokio::test(start_paused = true)]
    async fn per_key_isolation() {
        let limiter = RateLimiter::new();
        let config = limit(2, 60_000);

        limiter.check_and_consume("key1", &config);
        limiter.check_and_consume("key1", &config);

        assert!(limiter.status("key1", &config).is_limited);
        assert!(!limiter.status("key2", &config).is_limited);
        assert_eq!(limiter.status("key2", &config).remaining, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn status_does_not_consume() {
        let limiter = RateLimiter::new();
        let config = limit(3, 60_000);

        for _ in 0..5 {
            let status = limiter.status("k", &config);
            assert_eq!(status.remaining, 3);
        }
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn clones_share_state() {
        let limiter = RateLimiter::new();
        let other_call_site = limiter.clone();
        let config = limit(1, 60_000);

        assert!(limiter.check_and_consume("shared", &config));
        assert!(!other_call_site.check_and_consume("shared", &config));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_quota_always_denies() {
        let limiter = RateLimiter::new();
        let config = limit(0, 1000);

        assert!(!limiter.check_and_consume("k", &config));
        assert!(limiter.status("k", &config).is_limited);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_and_reset_all() {
        let limiter = RateLimiter::new();
        let config = limit(1, 60_000);

        limiter.check_and_consume("a", &config);
        limiter.check_and_consume("b", &config);

        limiter.reset("a");
        assert!(limiter.check_and_consume("a", &config));
        assert!(!limiter.check_and_consume("b", &config));

        limiter.reset_all();
        assert_eq!(limiter.tracked_keys(), 0);
        assert!(limiter.check_and_consume("b", &config));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_reset_suspends_until_window_end() {
        let limiter = RateLimiter::new();
        let config = limit(1, 500);

        assert!(limiter.check_and_consume("k", &config));
        let started = Instant::now();
        limiter.wait_for_reset("k", &config).await;

        assert!(started.elapsed() >= Duration::from_millis(500));
        assert!(limiter.check_and_consume("k", &config));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_reset_is_noop_when_not_limited() {
        let limiter = RateLimiter::new();
        let config = limit(5, 60_000);

        limiter.check_and_consume("k", &config);
        let started = Instant::now();
        limiter.wait_for_reset("k", &config).await;
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_waits_for_next_window() {
        let limiter = RateLimiter::new();
        let config = limit(1, 250);

        assert!(limiter.acquire("k", &config).await.is_allowed());
        let started = Instant::now();
        assert!(limiter.acquire("k", &config).await.is_allowed());
        assert!(started.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_gives_up_on_zero_quota() {
        let limiter = RateLimiter::new();
        let config = limit(0, 1000).with_retry_behavior(RetryBehavior::WaitAndRetry);

        let result = tokio::time::timeout(Duration::from_secs(3600), limiter.acquire("k", &config))
            .await
            .expect("returns without waiting for a window");

        assert!(!result.is_allowed());
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_removes_only_expired_records() {
        let limiter = RateLimiter::new();

        limiter.check_and_consume("short", &limit(1, 100));
        limiter.check_and_consume("long", &limit(1, 10_000));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(limiter.sweep_expired(), 1);
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_runs_until_cancelled() {
        let limiter = RateLimiter::new();
        let cancel = CancellationToken::new();
        let handle = limiter.spawn_sweeper(Duration::from_secs(60), cancel.clone());

        limiter.check_and_consume("k", &limit(1, 1000));
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(limiter.tracked_keys(), 0);

        cancel.cancel();
        handle.await.expect("sweeper should exit cleanly");
    }

    #[test]
    fn config_presets() {
        let per_minute = RateLimitConfig::per_minute(100);
        assert_eq!(per_minute.max_requests, 100);
        assert_eq!(per_minute.window(), Duration::from_secs(60));

        assert_eq!(RateLimitConfig::per_hour(1000).window_ms, 3_600_000);
        assert_eq!(RateLimitConfig::per_day(10).window_ms, 86_400_000);
        assert_eq!(RateLimitConfig::TWITTER_READ.max_requests, 450);
        assert_eq!(RateLimitConfig::PLAID.window_ms, 86_400_000);
        assert_eq!(
            RateLimitConfig::CONSERVATIVE.retry_behavior,
            RetryBehavior::FailFast
        );
    }
}
