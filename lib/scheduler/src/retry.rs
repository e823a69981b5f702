//! Per-provider retry with linear backoff.

use crate::error::describe_panic;
use futures::FutureExt;
use pons_core::ProviderType;
use pons_integration::AdapterError;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tracing::{debug, warn};

/// How often and how patiently one provider is retried within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    /// Creates a policy. At least one attempt is always made.
    #[must_use]
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay,
        }
    }

    /// Returns the total number of attempts.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Returns the wait after failed attempt `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    /// Runs `op` until it succeeds or the attempts are exhausted.
    ///
    /// `op` receives the 1-based attempt number. A panic inside an attempt is
    /// caught and counts as a failed attempt. Returns the last error on
    /// exhaustion.
    pub async fn run<T, F, Fut>(
        &self,
        provider: &ProviderType,
        mut op: F,
    ) -> Result<T, AdapterError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, AdapterError>>,
    {
        let mut attempt = 1;
        loop {
            let result = match AssertUnwindSafe(op(attempt)).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => Err(AdapterError::TaskAborted {
                    reason: describe_panic(payload.as_ref()),
                }),
            };

            match result {
                Ok(value) => {
                    debug!(provider = %provider, attempt, "sync attempt succeeded");
                    return Ok(value);
                }
                Err(e) if attempt < self.attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        provider = %provider,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "sync attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(provider = %provider, attempt, error = %e, "sync attempts exhausted");
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::time::Instant;

    fn provider() -> ProviderType {
        ProviderType::new("salesforce").expect("valid")
    }

    #[test]
    fn delay_is_linear_in_attempt() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        assert_eq!(policy.delay_for(1), Duration::from_millis(10));
        assert_eq!(policy.delay_for(2), Duration::from_millis(20));
    }

    #[test]
    fn at_least_one_attempt() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_op_is_attempted_exactly_n_times() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        let calls = Mutex::new(Vec::new());

        let result: Result<(), _> = policy
            .run(&provider(), |attempt| {
                calls.lock().expect("lock").push((attempt, Instant::now()));
                async {
                    Err(AdapterError::SyncFailed {
                        reason: "down".to_string(),
                    })
                }
            })
            .await;

        assert!(result.is_err());
        let calls = calls.into_inner().expect("lock");
        assert_eq!(calls.len(), 3);
        assert_eq!(
            calls.iter().map(|(attempt, _)| *attempt).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        let gaps: Vec<_> = calls.windows(2).map(|w| w[1].1 - w[0].1).collect();
        assert!(gaps.windows(2).all(|g| g[0] <= g[1]));
        assert!(gaps[0] >= Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn stops_at_first_success() {
        let policy = RetryPolicy::new(5, Duration::from_millis(10));
        let mut calls = 0;

        let result = policy
            .run(&provider(), |attempt| {
                calls += 1;
                async move {
                    if attempt < 2 {
                        Err(AdapterError::Timeout)
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls, 2);
    }

    async fn explode() -> Result<(), AdapterError> {
        panic!("adapter exploded")
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_attempt_counts_as_failure() {
        let policy = RetryPolicy::new(2, Duration::from_millis(1));
        let mut calls = 0;

        let result = policy
            .run(&provider(), |_| {
                calls += 1;
                explode()
            })
            .await;

        assert_eq!(calls, 2);
        assert_eq!(
            result,
            Err(AdapterError::TaskAborted {
                reason: "adapter exploded".to_string()
            })
        );
    }
}
