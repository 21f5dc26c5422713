//! Retry of mutating calls that lose an optimistic-concurrency race.
//!
//! Desired-state documents are recomputed from a freshly read resource, so a
//! conflicting update is simply retried against the next resource version.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{AppError, AppResult, ErrorKind};
use crate::sampler::TimeoutSampler;

/// How long conflicting updates are retried before giving up
pub const DEFAULT_CONFLICT_TIMEOUT: Duration = Duration::from_secs(3);

/// Pause between conflicting attempts
pub const CONFLICT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Run `operation` until it completes without a conflict.
///
/// Success and every non-conflict error are returned as soon as they happen.
/// Conflicts persisting past `timeout` surface as [`AppError::Timeout`].
pub async fn retry_on_conflict<F, Fut, T>(
    operation_name: &str,
    timeout: Duration,
    operation: F,
) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut sampler = TimeoutSampler::new(timeout, CONFLICT_RETRY_INTERVAL, operation)
        .describe(format!("{} without conflict", operation_name))
        .tolerate(ErrorKind::Conflict);

    match sampler.next_sample().await {
        Ok(result) => {
            if sampler.attempts() > 1 {
                debug!(
                    operation = %operation_name,
                    attempts = sampler.attempts(),
                    "Operation succeeded after conflicts"
                );
            }
            Ok(result)
        }
        Err(e @ AppError::Timeout { .. }) => {
            warn!(
                operation = %operation_name,
                attempts = sampler.attempts(),
                "Operation kept conflicting until timeout"
            );
            Err(e)
        }
        Err(e) => Err(e),
    }
}
