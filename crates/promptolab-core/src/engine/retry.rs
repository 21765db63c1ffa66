use super::CancelToken;
use crate::errors::{EngineError, EngineResult};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry policy for a single provider call.
///
/// Only connection-class errors (including timeouts) are retried. Quota and
/// capability errors return immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Bound on each attempt.
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            call_timeout: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    pub fn no_retry(call_timeout: Duration) -> Self {
        Self {
            max_retries: 0,
            call_timeout,
            ..Default::default()
        }
    }

    /// Backoff before retry number `retry` (1-based): exponential, capped, jittered into the upper half.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = self
            .base_backoff
            .saturating_mul(1u32 << retry.saturating_sub(1).min(16));
        let capped = exp.min(self.max_backoff);
        let ceiling = capped.as_millis() as u64;
        if ceiling == 0 {
            return Duration::ZERO;
        }
        let jittered = rand::thread_rng().gen_range(ceiling / 2..=ceiling);
        Duration::from_millis(jittered)
    }
}

#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: EngineResult<T>,
    pub attempts: u32,
}

/// Run `op` under `policy`. A cancel during backoff abandons the retry with
/// [`EngineError::Cancelled`].
pub async fn call_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancelToken,
    label: &str,
    mut op: F,
) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EngineResult<T>>,
{
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        let result = match tokio::time::timeout(policy.call_timeout, op()).await {
            Ok(r) => r,
            Err(_) => Err(EngineError::timeout(format!(
                "{label}: call exceeded {}ms",
                policy.call_timeout.as_millis()
            ))),
        };

        let err = match result {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts,
                }
            }
            Err(e) => e,
        };

        let retry = attempts;
        if !err.is_retryable() || retry > policy.max_retries {
            return RetryOutcome {
                result: Err(err),
                attempts,
            };
        }

        let backoff = policy.backoff(retry);
        warn!(
            call = label,
            error = %err,
            retry,
            max_retries = policy.max_retries,
            backoff_ms = backoff.as_millis() as u64,
            "retrying provider call"
        );

        let mut token = cancel.clone();
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                return RetryOutcome {
                    result: Err(EngineError::cancelled(format!(
                        "{label}: cancelled during retry backoff"
                    ))),
                    attempts,
                };
            }
            _ = tokio::time::sleep(backoff) => {}
        }
    }
}
