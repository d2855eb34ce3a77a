//! Retry with exponential backoff
//!
//! One combinator shared by every provider call and by database writes that can
//! hit SQLite lock contention. The caller decides which errors are worth retrying.

use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};

/// Retry budget and backoff curve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled after every further failure
    pub base_delay: Duration,
    /// Upper bound for a single backoff sleep
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Provider calls: 3 attempts, 2s base delay doubling (2s, 4s)
    pub fn provider_default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        }
    }

    /// Database lock contention: short sleeps starting at 10ms, capped at 1000ms
    pub fn database_lock(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(1000),
        }
    }

    /// Single attempt, no sleeping
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Backoff to apply after `attempt` (1-based) failed
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::provider_default()
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or the
/// attempt budget is spent.
///
/// **Algorithm:**
/// 1. Attempt operation
/// 2. On success, return result
/// 3. On error: if `is_retryable(&err)` and attempts remain, log WARN, back off, retry
/// 4. Otherwise return the last error unchanged
///
/// # Arguments
/// * `operation_name` - Name for logging (e.g. "batch classification", "append rows")
/// * `policy` - Attempt budget and backoff curve
/// * `is_retryable` - Decides whether an error is transient
/// * `operation` - Async closure performing one attempt
pub async fn retry_with_backoff<F, Fut, T, E, R>(
    operation_name: &str,
    policy: &RetryPolicy,
    is_retryable: R,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    R: Fn(&E) -> bool,
{
    let start_time = Instant::now();
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => {
                if !is_retryable(&err) {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        error = %err,
                        "Non-retryable failure"
                    );
                    return Err(err);
                }

                if attempt >= max_attempts {
                    tracing::warn!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        error = %err,
                        "Retry budget exhausted"
                    );
                    return Err(err);
                }

                let backoff = policy.delay_after(attempt);
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "Transient failure, will retry after backoff"
                );

                tokio::time::sleep(backoff).await;
            }
        }
    }
}
