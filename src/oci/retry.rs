//! Retry policy for outbound OCI calls
//!
//! Exponential backoff starting at `min_error_retry_delay`, doubling per
//! attempt, capped at [`MAX_RETRY_DELAY`]. Only throttling, server errors and
//! transport failures are retried.

use crate::error::{api_error, ApiError};
use anyhow::Result;
use std::future::Future;
use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 9;
pub const DEFAULT_MIN_DELAY: Duration = Duration::from_millis(25);
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            min_delay: DEFAULT_MIN_DELAY,
            max_delay: MAX_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, min_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            min_delay,
            max_delay: MAX_RETRY_DELAY,
        }
    }

    /// Delay before the retry that follows `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        self.min_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Delay honoring a server supplied `Retry-After`, whichever is larger
    fn delay_after(&self, attempt: u32, error: &anyhow::Error) -> Duration {
        let backoff = self.delay_for(attempt);
        match api_error(error).and_then(|e| e.retry_after) {
            Some(secs) => backoff.max(Duration::from_secs(secs).min(self.max_delay)),
            None => backoff,
        }
    }
}

/// Whether an error is worth another attempt
pub fn is_retryable(error: &anyhow::Error) -> bool {
    if let Some(api) = api_error(error) {
        return api.is_retryable();
    }
    error.chain().any(|e| {
        e.downcast_ref::<reqwest::Error>()
            .map(|re| re.is_connect() || re.is_timeout())
            .unwrap_or(false)
    })
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy runs out of attempts. `op` receives the 1-based attempt number.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_attempts && is_retryable(&e) => {
                let delay = policy.delay_after(attempt, &e);
                let status = api_error(&e).map(|a: &ApiError| a.status);
                tracing::warn!(
                    "Retrying request (attempt {}/{}, status {:?}) in {:?}",
                    attempt + 1,
                    policy.max_attempts,
                    status,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            },
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn api(status: u16) -> anyhow::Error {
        anyhow::Error::new(ApiError::from_response(status, "", None))
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy::new(9, Duration::from_millis(25));
        assert_eq!(policy.delay_for(1), Duration::from_millis(25));
        assert_eq!(policy.delay_for(2), Duration::from_millis(50));
        assert_eq!(policy.delay_for(4), Duration::from_millis(200));
        assert_eq!(policy.delay_for(40), MAX_RETRY_DELAY);
    }

    #[test]
    fn test_retryable_statuses() {
        for status in [429, 500, 501, 502, 503, 504] {
            assert!(is_retryable(&api(status)), "{} should retry", status);
        }
        for status in [400, 401, 403, 404, 409] {
            assert!(!is_retryable(&api(status)), "{} should not retry", status);
        }
        assert!(!is_retryable(&anyhow::anyhow!("plain error")));
    }

    #[test]
    fn test_zero_attempts_clamped() {
        assert_eq!(RetryPolicy::new(0, DEFAULT_MIN_DELAY).max_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_recovers_from_throttling() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Duration::from_millis(10));

        let result = with_retry(&policy, |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(api(429))
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_stops_on_client_error() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Duration::from_millis(10));

        let result: Result<()> = with_retry(&policy, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(api(404)) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(10));

        let result: Result<()> = with_retry(&policy, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(api(503)) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
