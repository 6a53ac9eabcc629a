//! Bounded retry with exponential backoff.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// Retry wrapper used around every network operation.
///
/// `max_retries` counts retries after the first attempt, so zero means the
/// operation runs exactly once. Policies nest: an inner exhausted policy
/// surfaces its last error as a single failure of the outer attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// Run exactly once.
    #[must_use]
    pub fn once() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_max_retries(self, max_retries: u32) -> Self {
        Self {
            max_retries,
            ..self
        }
    }

    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`, capped.
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Invoke `op` until it succeeds or the retry budget is spent.
    ///
    /// Returns the last error once attempts are exhausted.
    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut retry = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if retry >= self.max_retries => {
                    if self.max_retries > 0 {
                        warn!(operation, attempts = retry + 1, error = %e, "Retries exhausted");
                    }
                    return Err(e);
                }
                Err(e) => {
                    retry += 1;
                    let delay = self.delay_for(retry);
                    debug!(
                        operation,
                        retry,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Operation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(10), Duration::from_millis(40))
    }

    #[test]
    fn test_delay_is_exponential_and_capped() {
        let policy = fast(5);
        assert_eq!(policy.delay_for(1), Duration::from_millis(10));
        assert_eq!(policy.delay_for(2), Duration::from_millis(20));
        assert_eq!(policy.delay_for(3), Duration::from_millis(40));
        assert_eq!(policy.delay_for(4), Duration::from_millis(40));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_runs_once() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = RetryPolicy::once()
            .run("op", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("boom".to_string()) }
            })
            .await;

        assert_eq!(result, Err("boom".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = fast(3)
            .run("op", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(format!("attempt {n}"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = fast(2)
            .run("op", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { Err(format!("attempt {n}")) }
            })
            .await;

        assert_eq!(result, Err("attempt 2".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nested_exhaustion_counts_once_per_outer_attempt() {
        let inner_calls = AtomicU32::new(0);
        let outer_calls = AtomicU32::new(0);
        let inner = fast(1);
        let inner_calls = &inner_calls;

        let result: Result<(), String> = fast(2)
            .run("outer", || {
                outer_calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    inner
                        .run("inner", || {
                            inner_calls.fetch_add(1, Ordering::SeqCst);
                            async { Err::<(), _>("inner failed".to_string()) }
                        })
                        .await
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(outer_calls.load(Ordering::SeqCst), 3);
        assert_eq!(inner_calls.load(Ordering::SeqCst), 6);
    }
}
