//! Bounded exponential backoff
//!
//! Destination writes are retried a fixed number of times with a doubling
//! delay. There is no unbounded loop anywhere: once `max_retries` is spent the
//! last error is handed back to the caller, which decides whether to re-queue.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// Default retries after the first attempt
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay before the first retry
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

/// Ceiling on the backoff multiplier (2^6 = 64x)
const MAX_BACKOFF_SHIFT: u32 = 6;

/// Retry policy for destination writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each subsequent retry
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Policy that makes exactly one attempt
    pub const fn no_retry() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (0-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay * (1u32 << retry.min(MAX_BACKOFF_SHIFT))
    }

    /// Total attempts the policy allows
    #[inline]
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

/// Operation failed on every allowed attempt
#[derive(Debug)]
pub struct RetryError<E> {
    /// Attempts made
    pub attempts: u32,
    /// Error from the last attempt
    pub last_error: E,
}

/// Run `operation` until it succeeds or the policy is exhausted
pub async fn retry_with_backoff<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_attempts() => {
                let delay = policy.delay_for(attempt - 1);
                debug!(
                    operation = operation_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying after delay"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                warn!(
                    operation = operation_name,
                    attempts = attempt,
                    error = %e,
                    "retries exhausted"
                );
                return Err(RetryError {
                    attempts: attempt,
                    last_error: e,
                });
            }
        }
    }
}
