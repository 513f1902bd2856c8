use common::config::{ContextConfig, TransactionConfig};
use std::future::Future;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::error::ProviderError;

/// Bounded retries with exponential backoff for external calls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
    /// Per-attempt timeout.
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration, timeout: Duration) -> Self {
        Self {
            max_retries,
            backoff,
            timeout,
        }
    }

    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

impl From<&ContextConfig> for RetryPolicy {
    fn from(config: &ContextConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.backoff_ms),
            Duration::from_millis(config.timeout_ms),
        )
    }
}

impl From<&TransactionConfig> for RetryPolicy {
    fn from(config: &TransactionConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.backoff_ms),
            Duration::from_millis(config.timeout_ms),
        )
    }
}

#[derive(Debug)]
pub struct CallOutcome<T> {
    pub result: Result<T, ProviderError>,
    pub attempts: u32,
}

/// Runs `op` until it succeeds, fails permanently, or retries run out.
///
/// When `permits` is given, each attempt holds one permit for its duration;
/// the wait for a permit is not counted against the attempt timeout.
pub async fn call_with_retry<T, F, Fut>(
    provider: &str,
    policy: &RetryPolicy,
    permits: Option<&Semaphore>,
    mut op: F,
) -> CallOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        let permit = match permits {
            Some(semaphore) => match semaphore.acquire().await {
                Ok(permit) => Some(permit),
                Err(_) => {
                    return CallOutcome {
                        result: Err(ProviderError::Transient("concurrency limiter closed".to_string())),
                        attempts,
                    };
                }
            },
            None => None,
        };

        let result = match tokio::time::timeout(policy.timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(policy.timeout.as_millis() as u64)),
        };
        drop(permit);

        match result {
            Ok(value) => {
                debug!(provider, attempts, "external call succeeded");
                return CallOutcome {
                    result: Ok(value),
                    attempts,
                };
            }
            Err(e) if e.is_retryable() && attempts <= policy.max_retries => {
                let delay = policy.backoff_for(attempts);
                warn!(provider, attempts, error = %e, "external call failed, retrying in {:?}", delay);
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                warn!(provider, attempts, error = %e, "external call gave up");
                return CallOutcome {
                    result: Err(e),
                    attempts,
                };
            }
        }
    }
}
