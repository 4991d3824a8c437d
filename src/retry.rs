//! Bounded exponential backoff for remote calls
//!
//! Every remote call of a run goes through [`with_retry`]. Each attempt is
//! reduced to an [`Attempt`]: rate-limit signals (HTTP 429 and transport
//! timeouts) are retried after `base_delay * 2^attempt` plus jitter, anything
//! else is returned to the caller untouched.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{CleanerError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Upper bound (exclusive) of the random jitter added to every delay
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_jitter: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after the zero-based `attempt` failed, without jitter
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor)
    }

    fn jitter(&self) -> Duration {
        if self.max_jitter.is_zero() {
            return Duration::ZERO;
        }
        let secs = rand::thread_rng().gen_range(0.0..self.max_jitter.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

/// Outcome of one attempt of a remote call
#[derive(Debug)]
pub enum Attempt<T> {
    Success(T),
    RateLimited(CleanerError),
    Failed(CleanerError),
}

impl<T> From<Result<T>> for Attempt<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(value) => Attempt::Success(value),
            Err(e) if e.is_rate_limited() => Attempt::RateLimited(e),
            Err(e) => Attempt::Failed(e),
        }
    }
}

/// Run `operation` until it succeeds, fails permanently, runs out of attempts
/// or `cancel` fires.
///
/// After the last rate-limited attempt the rate-limit error itself is returned.
pub async fn with_retry<T, F, Fut>(
    operation_name: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(CleanerError::Cancelled(format!("{} interrupted", operation_name)));
            }
            result = operation() => Attempt::from(result),
        };

        match outcome {
            Attempt::Success(value) => return Ok(value),
            Attempt::Failed(e) => return Err(e),
            Attempt::RateLimited(e) if attempt + 1 >= max_attempts => {
                warn!(
                    "{} still rate limited after {} attempts: {}",
                    operation_name, max_attempts, e
                );
                return Err(e);
            }
            Attempt::RateLimited(e) => {
                let delay = policy.backoff_delay(attempt) + policy.jitter();
                warn!(
                    "{} rate limited (attempt {}/{}): {}. Retrying in {:.2?}...",
                    operation_name,
                    attempt + 1,
                    max_attempts,
                    e,
                    delay
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return Err(CleanerError::Cancelled(format!("{} interrupted", operation_name)));
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
        }
    }
}

/// Bound a remote call by `timeout`, mapping expiry to [`CleanerError::Timeout`]
pub async fn with_timeout<T, Fut>(timeout: Duration, call: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(CleanerError::Timeout(timeout)),
    }
}

/// Sleep for `delay` unless `cancel` fires first
pub async fn pause(delay: Duration, cancel: &CancellationToken) -> Result<()> {
    if delay.is_zero() {
        return Ok(());
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CleanerError::Cancelled("pacing interrupted".to_string())),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}
