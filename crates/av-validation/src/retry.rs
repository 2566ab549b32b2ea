//! Bounded retry with exponential backoff for storage and notification calls.
//!
//! Each attempt runs under `attempt_timeout_ms`; failed attempts are retried
//! only when the error is transient, sleeping
//! `backoff_base_ms * 2^(attempt-1)` between attempts.
//!
//! Archive transfers get a deadline scaled to the object size instead, see
//! [`RetryPolicy::transfer_timeout_ms`].

use std::future::Future;
use std::time::Duration;

use av_storage::StorageError;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retries (0 = run once).
    pub max_retries: u32,
    /// Base delay for exponential backoff (milliseconds).
    pub backoff_base_ms: u64,
    /// Wall-clock limit for a single attempt (milliseconds).
    pub attempt_timeout_ms: u64,
    /// Slowest transfer rate tolerated before an archive transfer times out.
    #[serde(default = "default_min_transfer_rate")]
    pub min_transfer_bytes_per_sec: u64,
}

fn default_min_transfer_rate() -> u64 {
    1024 * 1024
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 200,
            attempt_timeout_ms: 60_000,
            min_transfer_bytes_per_sec: default_min_transfer_rate(),
        }
    }
}

impl RetryPolicy {
    /// Deadline for moving `bytes` in one attempt: the base attempt timeout
    /// plus the time the transfer takes at the minimum rate.
    pub fn transfer_timeout_ms(&self, bytes: u64) -> u64 {
        let rate = self.min_transfer_bytes_per_sec.max(1);
        let transfer_ms = (u128::from(bytes) * 1000).div_ceil(u128::from(rate));
        let transfer_ms = u64::try_from(transfer_ms).unwrap_or(u64::MAX);
        self.attempt_timeout_ms.saturating_add(transfer_ms)
    }

    /// Delay before attempt `attempt + 1`, given `attempt` (1-based) failed.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.backoff_base_ms.saturating_mul(factor))
    }
}

/// Errors that know whether retrying could help.
pub trait Transient {
    fn is_transient(&self) -> bool;

    /// Error to report when an attempt exceeds its timeout.
    fn timed_out(operation: &str, timeout_ms: u64) -> Self;
}

impl Transient for StorageError {
    fn is_transient(&self) -> bool {
        StorageError::is_transient(self)
    }

    fn timed_out(operation: &str, timeout_ms: u64) -> Self {
        StorageError::Timeout {
            operation: operation.to_string(),
            timeout_ms,
        }
    }
}

/// Run `f` until it succeeds, fails permanently, or retries run out.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, operation: &str, f: F) -> Result<T, E>
where
    E: Transient + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    with_retry_within(policy, operation, policy.attempt_timeout_ms, f).await
}

/// Like [`with_retry`], with an explicit per-attempt deadline.
pub async fn with_retry_within<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    timeout_ms: u64,
    mut f: F,
) -> Result<T, E>
where
    E: Transient + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_retries + 1;
    let timeout = Duration::from_millis(timeout_ms);
    let mut attempt = 1;

    loop {
        let result = match tokio::time::timeout(timeout, f()).await {
            Ok(result) => result,
            Err(_) => Err(E::timed_out(operation, timeout_ms)),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < max_attempts => {
                let delay = policy.backoff(attempt);
                warn!(
                    operation = %operation,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
