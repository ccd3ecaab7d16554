//! Bounded retry combinator.
//!
//! Every write to an OSArtifact is read-latest/compare/patch. When two reconciles
//! race, the loser gets a conflict and has to start again from a fresh read.
//! [`retry_on_conflict`] wraps that loop so call sites never hand-roll it.
//!
//! ```ignore
//! let changed = retry_on_conflict(&policy, "status update", || async {
//!     let latest = client.get_artifact(ns, name).await?;
//!     // ... compare, then patch with latest's resourceVersion
//! })
//! .await?;
//! ```

use crate::backoff::ExponentialBackoff;
use cluster_client::ClusterError;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// How often and how patiently an operation is retried
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first (at least 1)
    pub max_attempts: u32,
    /// Delay schedule between attempts
    pub backoff: ExponentialBackoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: ExponentialBackoff::new(Duration::from_millis(10), 2, Duration::from_secs(1)),
        }
    }
}

impl RetryPolicy {
    /// Policy that makes `max_attempts` attempts with a fixed delay between them
    #[must_use]
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: ExponentialBackoff::new(delay, 1, delay),
        }
    }
}

/// Run `operation` until it succeeds, fails with an error `is_retryable` rejects,
/// or the policy's attempts run out. The last error is returned on exhaustion.
pub async fn retry_when<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    operation_name: &str,
    is_retryable: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut backoff = policy.backoff.clone();
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if is_retryable(&e) && attempt < max_attempts => {
                let delay = backoff.next_delay();
                debug!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if is_retryable(&e) {
                    warn!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        "Operation failed after max retries"
                    );
                }
                return Err(e);
            }
        }
    }
}

/// Retry `operation` while it fails with [`ClusterError::Conflict`]
pub async fn retry_on_conflict<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    operation: F,
) -> Result<T, ClusterError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClusterError>>,
{
    retry_when(policy, operation_name, ClusterError::is_conflict, operation).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::fixed(max_attempts, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_retries_conflicts_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_on_conflict(&fast(5), "test", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ClusterError::Conflict("stale".to_string()))
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_on_conflict(&fast(3), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ClusterError::Conflict("stale".to_string()))
        })
        .await;

        assert!(result.unwrap_err().is_conflict());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_does_not_retry_other_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_on_conflict(&fast(5), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ClusterError::NotFound("gone".to_string()))
        })
        .await;

        assert!(result.unwrap_err().is_not_found());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_single_attempt_policy_does_not_retry() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(1, Duration::ZERO);
        let _: Result<(), _> = retry_on_conflict(&policy, "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ClusterError::Conflict("stale".to_string()))
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
