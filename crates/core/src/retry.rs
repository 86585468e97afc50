//! Bounded retry with exponential backoff.
//!
//! [`retry_with_backoff`] is the single retry abstraction used by the
//! transfer and extraction stages. The caller supplies the operation, the
//! attempt budget and backoff policy, and a hook that observes each failed
//! attempt (the orchestrator uses it to bump `retry_count` and log a WARN).

use std::future::Future;
use std::time::Duration;

use crate::error::SyncError;

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// A policy that retries immediately. Used by tests.
    pub fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }
}

/// Calculate the next backoff delay from the current delay and policy.
///
/// The result is clamped to [`BackoffPolicy::max_delay`].
pub fn next_delay(current: Duration, policy: &BackoffPolicy) -> Duration {
    let next_ms = (current.as_millis() as f64 * policy.multiplier) as u64;
    Duration::from_millis(next_ms).min(policy.max_delay)
}

/// Information handed to the failure hook after each failed attempt.
#[derive(Debug, Clone)]
pub struct FailedAttempt<'a> {
    /// 1-based attempt number.
    pub attempt: u32,
    pub max_attempts: u32,
    pub error: &'a SyncError,
    /// Whether another attempt follows.
    pub will_retry: bool,
}

/// Run `op` up to `max_attempts` times.
///
/// Non-retryable errors ([`SyncError::is_retryable`]) are returned
/// immediately without consuming further attempts. `max_attempts == 0`
/// runs nothing and reports an internal error.
pub async fn retry_with_backoff<T, F, Fut, H>(
    max_attempts: u32,
    policy: &BackoffPolicy,
    mut op: F,
    mut on_failure: H,
) -> Result<T, SyncError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
    H: FnMut(FailedAttempt<'_>),
{
    if max_attempts == 0 {
        return Err(SyncError::Internal("retry budget exhausted".to_string()));
    }

    let mut delay = policy.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if !e.is_retryable() {
                    return Err(e);
                }
                let will_retry = attempt < max_attempts;
                on_failure(FailedAttempt {
                    attempt,
                    max_attempts,
                    error: &e,
                    will_retry,
                });
                if !will_retry {
                    return Err(e);
                }
            }
        }

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        delay = next_delay(delay, policy);
    }
}
