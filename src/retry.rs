//! Bounded retry with randomized backoff
//!
//! Sources are rate-limited, so every failed attempt is followed by a pause
//! drawn uniformly from `[min_backoff, max_backoff]` before the next one. The
//! loop gives up after `max_attempts` total attempts and hands back the last
//! error together with the number of attempts made.
//!
//! # Example
//!
//! ```no_run
//! use listing_tracker::retry::{IsRetryable, retry_with_backoff};
//! use listing_tracker::config::RetryConfig;
//!
//! #[derive(Debug)]
//! struct Flaky;
//!
//! impl std::fmt::Display for Flaky {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "flaky")
//!     }
//! }
//!
//! impl IsRetryable for Flaky {
//!     fn is_retryable(&self) -> bool {
//!         true
//!     }
//! }
//!
//! # async fn example() {
//! let config = RetryConfig::default();
//! let result = retry_with_backoff(&config, || async { Ok::<_, Flaky>(()) }, |_, _| {}).await;
//! assert!(result.is_ok());
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::FetchError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            // Transport failures and non-success statuses are all worth another try
            FetchError::Transport(_) => true,
            FetchError::Status { .. } => true,
            FetchError::Source(_) => true,
            // A target that cannot be requested will not become valid by waiting
            FetchError::InvalidTarget(_) => false,
        }
    }
}

/// Error returned once retrying stops
#[derive(Debug)]
pub struct RetryExhausted<E> {
    /// Attempts made, including the first
    pub attempts: u32,
    /// Error from the final attempt
    pub error: E,
}

/// Execute an async operation, retrying transient failures with a random pause
///
/// `on_failure` is called for every failed attempt with the 1-based attempt
/// number, before any pause. It is the hook for per-attempt diagnostics.
pub async fn retry_with_backoff<F, Fut, T, E, C>(
    config: &RetryConfig,
    mut operation: F,
    mut on_failure: C,
) -> Result<T, RetryExhausted<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
    C: FnMut(u32, &E),
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) => {
                on_failure(attempt, &e);

                if !e.is_retryable() {
                    tracing::warn!(error = %e, "Operation failed with non-retryable error");
                    return Err(RetryExhausted { attempts: attempt, error: e });
                }
                if attempt >= max_attempts {
                    tracing::warn!(
                        error = %e,
                        attempts = attempt,
                        "Operation failed after all retry attempts exhausted"
                    );
                    return Err(RetryExhausted { attempts: attempt, error: e });
                }

                let delay = random_backoff(config.min_backoff, config.max_backoff);
                tracing::debug!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = max_attempts,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Pick a pause uniformly between `min` and `max` (inclusive)
fn random_backoff(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let mut rng = rand::thread_rng();
    let millis = rng.gen_range(min.as_millis() as u64..=max.as_millis() as u64);
    Duration::from_millis(millis)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    enum TestError {
        Transient,
        Permanent,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                TestError::Transient => write!(f, "transient error"),
                TestError::Permanent => write!(f, "permanent error"),
            }
        }
    }

    impl IsRetryable for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, TestError::Transient)
        }
    }

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            min_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn test_success_no_retry() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_backoff(
            &fast_config(5),
            || {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, TestError>(42)
                }
            },
            |_, _| {},
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1, "should only call once");
    }

    #[tokio::test]
    async fn test_retry_transient_then_succeed() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_backoff(
            &fast_config(5),
            || {
                let counter = counter_clone.clone();
                async move {
                    let count = counter.fetch_add(1, Ordering::SeqCst);
                    if count < 2 {
                        Err(TestError::Transient)
                    } else {
                        Ok(42)
                    }
                }
            },
            |_, _| {},
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_always_failing_makes_exactly_max_attempts() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();
        let mut reported = Vec::new();

        let start = std::time::Instant::now();
        let result = retry_with_backoff(
            &fast_config(5),
            || {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, _>(TestError::Transient)
                }
            },
            |attempt, _| reported.push(attempt),
        )
        .await;
        let elapsed = start.elapsed();

        let exhausted = result.unwrap_err();
        assert_eq!(exhausted.attempts, 5);
        assert_eq!(counter.load(Ordering::SeqCst), 5);
        assert_eq!(reported, vec![1, 2, 3, 4, 5]);

        // Four pauses of 1-5ms each; upper bound is generous for CI scheduling
        assert!(
            elapsed >= Duration::from_millis(4),
            "should pause between attempts, waited {:?}",
            elapsed
        );
        assert!(
            elapsed < Duration::from_secs(2),
            "should not wait too long, waited {:?}",
            elapsed
        );
    }

    #[tokio::test]
    async fn test_permanent_error_no_retry() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_backoff(
            &fast_config(5),
            || {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, _>(TestError::Permanent)
                }
            },
            |_, _| {},
        )
        .await;

        assert_eq!(result.unwrap_err().attempts, 1);
        assert_eq!(
            counter.load(Ordering::SeqCst),
            1,
            "should not retry permanent error"
        );
    }

    #[tokio::test]
    async fn test_zero_attempts_still_tries_once() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_backoff(
            &fast_config(0),
            || {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, _>(TestError::Transient)
                }
            },
            |_, _| {},
        )
        .await;

        assert_eq!(result.unwrap_err().attempts, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_stays_within_range() {
        let min = Duration::from_millis(1000);
        let max = Duration::from_millis(5000);

        for _ in 0..200 {
            let delay = random_backoff(min, max);
            assert!(delay >= min && delay <= max, "delay {:?} out of range", delay);
        }
    }

    #[test]
    fn test_backoff_degenerate_range_returns_min() {
        let d = Duration::from_millis(300);
        assert_eq!(random_backoff(d, d), d);
        assert_eq!(random_backoff(d, Duration::from_millis(10)), d);
    }

    #[test]
    fn test_fetch_error_retryability() {
        assert!(FetchError::Status { code: 503 }.is_retryable());
        assert!(FetchError::Status { code: 404 }.is_retryable());
        assert!(FetchError::Source("reset".into()).is_retryable());
        assert!(!FetchError::InvalidTarget("::".into()).is_retryable());
    }
}
