//! Bounded exponential backoff.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::duration;

/// Retry schedule: `base_delay * multiplier^attempt`, capped at `max_delay`,
/// for at most `max_attempts` calls in total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    #[serde(with = "duration")]
    pub base_delay: Duration,
    /// Growth factor between retries.
    pub multiplier: f64,
    /// Upper bound for a single delay.
    #[serde(with = "duration")]
    pub max_delay: Duration,
    /// Total calls allowed, including the first.
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(200),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5),
            max_attempts: 4,
        }
    }
}

/// The last error from an exhausted retry loop.
#[derive(Debug)]
pub struct RetryError<E> {
    /// Error returned by the final attempt.
    pub error: E,
    /// Calls made, including the first.
    pub attempts: u32,
}

impl BackoffPolicy {
    /// Delay to wait after the given failed attempt (0-indexed).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay = self.base_delay.as_secs_f64() * self.multiplier.powi(exp);
        let capped = delay.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped >= 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            self.max_delay
        }
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. Sleeps between attempts use tokio time.
    ///
    /// # Errors
    ///
    /// Returns the last error together with the number of attempts made.
    pub async fn retry<T, E, F, Fut>(
        &self,
        what: &str,
        mut op: F,
        retryable: impl Fn(&E) -> bool,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    attempt += 1;
                    if attempt >= max_attempts || !retryable(&error) {
                        return Err(RetryError {
                            error,
                            attempts: attempt,
                        });
                    }
                    let delay = self.delay_for(attempt - 1);
                    warn!(what, attempt, ?delay, %error, "retrying after failure");
                    metrics::counter!("roomkeeper_store_retries_total").increment(1);
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

    #[test]
    fn delays_grow_then_cap() {
        let policy = BackoffPolicy {
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_millis(500),
            max_attempts: 10,
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(500));
        assert_eq!(policy.delay_for(40), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_succeeds_after_transient_failures() {
        let policy = BackoffPolicy::default();
        let calls = AtomicU32::new(0);

        let started = tokio::time::Instant::now();
        let result: Result<u32, RetryError<String>> = policy
            .retry(
                "test",
                || async {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < 2 { Err(format!("fail {n}")) } else { Ok(n) }
                },
                |_| true,
            )
            .await;

        assert_eq!(result.unwrap(), 2);
        // 200ms + 400ms of virtual sleep
        assert_eq!(started.elapsed(), Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_gives_up_after_budget() {
        let policy = BackoffPolicy {
            max_attempts: 3,
            ..BackoffPolicy::default()
        };
        let calls = AtomicU32::new(0);
        let err = policy
            .retry(
                "test",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("down")
                },
                |_| true,
            )
            .await
            .unwrap_err();

        assert_eq!(err.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_stops_immediately() {
        let policy = BackoffPolicy::default();
        let err = policy
            .retry("test", || async { Err::<(), _>("corrupt") }, |_| false)
            .await
            .unwrap_err();
        assert_eq!(err.attempts, 1);
    }
}
