//! Timeout and bounded-retry wrappers for transient failures.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::BlockError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Exponential back-off: the delay before retry `n` (0-based) is
/// `initial_delay * backoff_multiplier^n`, capped at `max_delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.max(1.0).powi(attempt as i32);
        let delay = self.initial_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

// ---------------------------------------------------------------------------
// Wrappers
// ---------------------------------------------------------------------------

/// Race `fut` against a timer.  `None` means no deadline.
pub async fn with_timeout<T, F>(limit: Option<Duration>, fut: F) -> Result<T, BlockError>
where
    F: Future<Output = Result<T, BlockError>>,
{
    match limit {
        None => fut.await,
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .unwrap_or(Err(BlockError::Timeout(limit))),
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's retry budget is exhausted.
///
/// Returns the final result together with the number of retries performed.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> (Result<T, BlockError>, u32)
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, BlockError>>,
{
    let mut retries = 0u32;

    loop {
        match op(retries).await {
            Ok(value) => return (Ok(value), retries),
            Err(err) if err.is_retryable() && retries < policy.max_retries => {
                let delay = policy.delay_for(retries);
                retries += 1;
                warn!(
                    "'{}' retryable error (retry {}/{}), retrying in {:?}: {}",
                    label, retries, policy.max_retries, delay, err
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return (Err(err), retries),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delays_grow_exponentially_and_cap() {
        let policy = RetryPolicy {
            max_retries: 10,
            initial_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_until_success() {
        let attempts = AtomicU32::new(0);
        let (result, retries) = retry(&RetryPolicy::default(), "flaky", |_| {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(BlockError::Retryable("503".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(retries, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_errors_are_not_retried() {
        let attempts = AtomicU32::new(0);
        let (result, retries): (Result<(), _>, _) = retry(&RetryPolicy::default(), "bad", |_| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(BlockError::Fatal("no".into())) }
        })
        .await;

        assert!(matches!(result, Err(BlockError::Fatal(_))));
        assert_eq!(retries, 0);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_budget_is_bounded() {
        let policy = RetryPolicy {
            max_retries: 2,
            ..RetryPolicy::default()
        };
        let (result, retries): (Result<(), _>, _) = retry(&policy, "down", |_| async {
            Err(BlockError::Retryable("still down".into()))
        })
        .await;

        assert!(matches!(result, Err(BlockError::Retryable(_))));
        assert_eq!(retries, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fires_for_slow_operations() {
        let result: Result<(), _> = with_timeout(Some(Duration::from_millis(50)), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(())
        })
        .await;
        assert_eq!(result, Err(BlockError::Timeout(Duration::from_millis(50))));
    }
}
