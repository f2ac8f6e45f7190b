//! Bounded retry with a fixed backoff.
//!
//! Used for the initial store connection, where a failure after the last
//! attempt is fatal.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Retry policy: how many attempts to make and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Duration,
}

impl RetryPolicy {
    /// Creates a new policy.
    ///
    /// `max_attempts` is clamped to at least one attempt.
    ///
    /// # Examples
    ///
    /// ```
    /// use bell_monitor::retry::RetryPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy::new(0, Duration::from_secs(2));
    /// assert_eq!(policy.max_attempts(), 1);
    /// ```
    #[must_use]
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Returns the maximum number of attempts.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the pause between two attempts.
    #[must_use]
    pub fn backoff(&self) -> Duration {
        self.backoff
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(2))
    }
}

/// All attempts of an operation failed.
#[derive(Debug, Error)]
#[error("{operation} failed after {attempts} attempt(s): {last_error}")]
pub struct RetryError<E> {
    /// Name of the operation, for diagnostics.
    pub operation: String,
    /// Number of attempts made.
    pub attempts: u32,
    /// Error returned by the final attempt.
    #[source]
    pub last_error: E,
}

/// Runs `op` until it succeeds or the policy's attempts are used up.
///
/// `op` receives the 1-based attempt number. The backoff is only slept
/// between attempts, never after the last one.
///
/// # Errors
///
/// Returns [`RetryError`] holding the last attempt's error once every
/// attempt has failed.
pub async fn retry<T, E, F, Fut>(
    policy: RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(operation, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if attempt >= policy.max_attempts => {
                tracing::error!(
                    operation,
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %e,
                    "Giving up"
                );
                return Err(RetryError {
                    operation: operation.to_string(),
                    attempts: attempt,
                    last_error: e,
                });
            }
            Err(e) => {
                tracing::warn!(
                    operation,
                    attempt,
                    max_attempts = policy.max_attempts,
                    backoff = ?policy.backoff,
                    error = %e,
                    "Attempt failed, retrying"
                );
                tokio::time::sleep(policy.backoff).await;
                attempt += 1;
            }
        }
    }
}
