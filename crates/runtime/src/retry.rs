//! Bounded retry with a per-call timeout for collaborator calls.

use std::future::Future;

use tokio::time::{sleep, timeout};
use tracing::warn;

use crate::api::{PipelineError, Result};
use crate::config::RetryPolicy;

/// Runs `call` until it succeeds, fails permanently, or the attempts run out.
///
/// Each attempt is bounded by `policy.call_timeout`; a timeout counts as a
/// transient failure. Permanent errors are returned as-is on first sight.
pub async fn with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Into<PipelineError>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;

        let error = match timeout(policy.call_timeout, call()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => err.into(),
            Err(_) => PipelineError::Timeout {
                operation,
                timeout: policy.call_timeout,
            },
        };

        if !error.is_transient() {
            return Err(error);
        }
        if attempt >= policy.max_attempts {
            return Err(PipelineError::RetriesExhausted {
                operation,
                attempts: attempt,
                source: Box::new(error),
            });
        }

        warn!(
            "{} failed (attempt {}/{}): {}",
            operation, attempt, policy.max_attempts, error
        );
        sleep(policy.backoff * attempt).await;
    }
}
