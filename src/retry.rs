//! Bounded retry for failures that happen before the provider sees a request.
//!
//! An authorization code is single-use, so only errors raised while the
//! connection is being established are retried. Anything after that may
//! already have consumed the code on the provider side.

use std::future::Future;
use std::time::Duration;

const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (1-indexed), doubling each time
    /// and capped at `MAX_BACKOFF`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(MAX_BACKOFF)
    }
}

/// Returns true when the request never left this process, so retrying cannot
/// consume the authorization code twice.
pub(crate) fn is_pre_request_failure(error: &reqwest::Error) -> bool {
    error.is_connect() && !error.is_timeout()
}

/// Runs `f` until it succeeds, fails with a non-retryable error, or the
/// policy is exhausted.
pub(crate) async fn with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    mut f: F,
) -> Result<T, reqwest::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, reqwest::Error>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.max_retries && is_pre_request_failure(&err) => {
                attempt += 1;
                let backoff = policy.backoff(attempt);
                tracing::warn!(
                    attempt,
                    max_retries = policy.max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "token endpoint unreachable, retrying"
                );
                tokio::time::sleep(backoff).await;
            }
            Err(err) => return Err(err),
        }
    }
}
