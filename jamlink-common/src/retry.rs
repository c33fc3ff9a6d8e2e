//! Retry logic for conditional writes
//!
//! Implements bounded exponential backoff for operations that lose a
//! compare-and-swap race (`Conflict`) or hit a transient store failure
//! (`StoreUnavailable`). Any other error returns immediately: validation
//! and state-machine failures must surface to the caller verbatim.
//!
//! Backoff strategy: base delay doubled per attempt, capped, with random
//! jitter so concurrent losers don't collide again in lockstep.

use std::time::Duration;

use rand::Rng;

use crate::config::EngineSettings;
use crate::Result;

/// Attempt bounds and backoff shape for one retried operation
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self {
            max_attempts: settings.max_write_attempts.max(1),
            base_delay_ms: settings.retry_base_delay_ms,
            max_delay_ms: settings.retry_max_delay_ms,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&EngineSettings::default())
    }
}

/// Run `operation`, retrying on retryable errors up to the policy bound.
///
/// The closure is invoked fresh on every attempt so it re-reads whatever
/// state it conditions on; a stale read is exactly what the retry is for.
///
/// # Arguments
/// * `operation_name` - Name for logging (e.g. "roster.add_participant")
/// * `policy` - Attempt bound and backoff shape
/// * `operation` - Async closure performing the conditional write
pub async fn with_retry<F, Fut, T>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut backoff_ms = policy.base_delay_ms.max(1);

    for attempt in 1..=max_attempts {
        if attempt > 1 {
            tracing::debug!(operation = operation_name, attempt, "Retrying conditional write");
        }

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        "Conditional write succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                let jitter = rand::thread_rng().gen_range(0..=backoff_ms / 2);
                let delay = (backoff_ms + jitter).min(policy.max_delay_ms);
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms = delay,
                    error = %err,
                    "Conditional write lost a race, will retry after backoff"
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
                backoff_ms = (backoff_ms * 2).min(policy.max_delay_ms);
            }
            Err(err) => {
                if err.is_retryable() {
                    tracing::error!(
                        operation = operation_name,
                        attempts = max_attempts,
                        error = %err,
                        "Conditional write failed: retry attempts exhausted"
                    );
                }
                return Err(err);
            }
        }
    }

    unreachable!("loop returns on the final attempt");
}
