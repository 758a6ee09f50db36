//! Retry governor for chunk invocations.
//!
//! Transport failures may be retried up to a configured maximum; a
//! well-formed worker error is final on the first occurrence. Every failed
//! attempt leaves an error report in the store for post-render inspection.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use vfarm_models::{ErrorInfo, RenderId};
use vfarm_storage::{records, ObjectStore};

use crate::error::{CoordinatorError, CoordinatorResult};

/// Retry policy for one chunk invocation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries beyond the first attempt
    pub max_retries: u32,
    /// Base delay for exponential backoff (doubles each attempt)
    pub base_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.saturating_mul(2u32.saturating_pow(attempt));
        delay.min(self.max_delay)
    }
}

/// Run a chunk invocation under the retry policy.
///
/// `operation` receives the 1-based attempt number. Only transport errors
/// are retried; an application error fails the chunk on the spot. Each
/// failure is persisted as an [`ErrorInfo`] report before the decision to
/// retry or give up.
pub async fn invoke_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    store: &dyn ObjectStore,
    render_id: &RenderId,
    chunk: u32,
    operation: F,
) -> CoordinatorResult<T>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = CoordinatorResult<T>>,
{
    let total_attempts = policy.max_retries + 1;
    let mut attempt = 1u32;

    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                let will_retry = e.is_retryable() && attempt < total_attempts;

                let report = ErrorInfo {
                    chunk: Some(chunk),
                    message: e.to_string(),
                    stack: e.stack().map(str::to_string),
                    is_fatal: !will_retry,
                    attempt,
                    total_attempts,
                    will_retry,
                };
                if let Err(write_err) = records::write_error_report(store, render_id, &report).await
                {
                    warn!(
                        "Failed to persist error report for chunk {}: {}",
                        chunk, write_err
                    );
                }

                if !will_retry {
                    return Err(e);
                }

                let delay = policy.delay_for_attempt(attempt);
                debug!(
                    "Chunk {} attempt {} failed, retrying in {:?}: {}",
                    chunk, attempt, delay, e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Chunk indices expected but absent from the store listing.
pub fn find_missing_chunks(total_chunks: u32, present: &[u32]) -> Vec<u32> {
    (0..total_chunks).filter(|i| !present.contains(i)).collect()
}
