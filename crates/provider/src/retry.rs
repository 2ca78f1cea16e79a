use std::future::Future;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::error::{ProviderError, ProviderResult};

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 1000;
const MAX_BACKOFF_MS: u64 = 60000;

/// Bounded exponential backoff for transient provider errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(MAX_BACKOFF_MS),
        }
    }
}

impl RetryPolicy {
    pub fn no_delay(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }
}

/// Run `operation`, retrying transient failures according to `policy`.
/// Non-transient errors are returned on the first occurrence.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation_name: &str,
    operation: F,
) -> ProviderResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = ProviderResult<T>>,
{
    with_retry_when(policy, operation_name, ProviderError::is_transient, operation).await
}

/// Like [`with_retry`], but only errors accepted by `retryable` are retried.
pub async fn with_retry_when<T, F, Fut, P>(
    policy: &RetryPolicy,
    operation_name: &str,
    retryable: P,
    operation: F,
) -> ProviderResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = ProviderResult<T>>,
    P: Fn(&ProviderError) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    let mut backoff = policy.initial_backoff;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if retryable(&e) => {
                if attempt >= max_attempts {
                    error!(
                        "{} failed after {} attempts: {}",
                        operation_name, attempt, e
                    );
                    return Err(e);
                }

                let wait = e
                    .retry_after()
                    .map(Duration::from_secs)
                    .unwrap_or(backoff)
                    .min(policy.max_backoff);

                warn!(
                    "{} transient failure ({}), retrying in {}ms (attempt {}/{})",
                    operation_name,
                    e,
                    wait.as_millis(),
                    attempt + 1,
                    max_attempts
                );

                tokio::time::sleep(wait).await;
                attempt += 1;
                backoff = (backoff * 2).min(policy.max_backoff);
            }
            Err(e) => {
                if attempt > 1 {
                    info!("{} failed after {} attempts: {}", operation_name, attempt, e);
                }
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = with_retry(&RetryPolicy::no_delay(3), "op", || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ProviderError::RateLimited { retry_after: None })
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: ProviderResult<()> = with_retry(&RetryPolicy::no_delay(3), "op", || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::Timeout("slow".into()))
        })
        .await;

        assert!(matches!(result, Err(ProviderError::Timeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_transient_is_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: ProviderResult<()> = with_retry(&RetryPolicy::no_delay(3), "op", || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::Unauthorized("bad key".into()))
        })
        .await;

        assert!(matches!(result, Err(ProviderError::Unauthorized(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_custom_predicate_limits_retries() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: ProviderResult<()> = with_retry_when(
            &RetryPolicy::no_delay(3),
            "submit",
            ProviderError::is_safe_to_resend,
            || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::Timeout("slow".into()))
            },
        )
        .await;

        assert!(matches!(result, Err(ProviderError::Timeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(40),
            max_backoff: Duration::from_secs(60),
        };
        let start = tokio::time::Instant::now();
        let _: ProviderResult<()> = with_retry(&policy, "op", || async {
            Err(ProviderError::Timeout("slow".into()))
        })
        .await;

        // 40s then min(80s, 60s)
        assert_eq!(start.elapsed(), Duration::from_secs(100));
    }
}
