//! Bounded retries with fixed backoff for calls into external services

use anyhow::{anyhow, Result};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Default number of attempts for an external API call
pub const DEFAULT_API_CALL_RETRIES: u32 = 10;

/// Default per-call timeout for infrastructure APIs
pub const DEFAULT_API_QUERY_TIMEOUT: Duration = Duration::from_secs(60);

/// Retry configuration for external calls
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (at least one is always made)
    pub attempts: u32,
    /// Fixed delay between attempts
    pub backoff: Duration,
    /// Timeout applied to every single attempt
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_API_CALL_RETRIES,
            backoff: Duration::from_secs(1),
            timeout: DEFAULT_API_QUERY_TIMEOUT,
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self {
            attempts,
            backoff,
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Migration completion polling: 10 minute horizon at 10 second intervals
    pub fn completion_poll() -> Self {
        Self {
            attempts: 60,
            backoff: Duration::from_secs(10),
            timeout: DEFAULT_API_QUERY_TIMEOUT,
        }
    }
}

/// Run `op` until it succeeds or the policy's attempts are exhausted
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        match tokio::time::timeout(policy.timeout, op()).await {
            Ok(Ok(value)) => {
                if attempt > 1 {
                    debug!(operation, attempt, "External call succeeded after retry");
                }
                return Ok(value);
            }
            Ok(Err(e)) => {
                warn!(operation, attempt, attempts, error = %e, "External call failed");
                last_error = Some(e);
            }
            Err(_) => {
                warn!(
                    operation,
                    attempt,
                    timeout_ms = policy.timeout.as_millis() as u64,
                    "External call timed out"
                );
                last_error = Some(anyhow!("{} timed out after {:?}", operation, policy.timeout));
            }
        }

        if attempt < attempts {
            tokio::time::sleep(policy.backoff).await;
        }
    }

    let err = last_error.unwrap_or_else(|| anyhow!("{} was never attempted", operation));
    Err(err.context(format!("{} failed after {} attempts", operation, attempts)))
}

/// Poll `check` until it reports `true`; returns `false` once the horizon is exhausted.
///
/// Errors from individual checks are logged and treated as "not yet".
pub async fn poll_until<F, Fut>(policy: &RetryPolicy, operation: &str, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let attempts = policy.attempts.max(1);

    for attempt in 1..=attempts {
        match tokio::time::timeout(policy.timeout, check()).await {
            Ok(Ok(true)) => return true,
            Ok(Ok(false)) => {}
            Ok(Err(e)) => debug!(operation, attempt, error = %e, "Poll check failed"),
            Err(_) => debug!(operation, attempt, "Poll check timed out"),
        }

        if attempt < attempts {
            tokio::time::sleep(policy.backoff).await;
        }
    }

    warn!(operation, attempts, "Gave up polling");
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(1)).with_timeout(Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry(&fast(5), "flaky", || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(anyhow!("not yet"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausts_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<()> = retry(&fast(3), "broken", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(anyhow!("down"))
            }
        })
        .await;

        let err = result.unwrap_err();
        assert!(format!("{:#}", err).contains("broken failed after 3 attempts"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_zero_attempts_still_calls_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let _ = retry(&fast(0), "once", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_times_out_slow_attempt() {
        let policy = RetryPolicy::new(2, Duration::from_millis(1))
            .with_timeout(Duration::from_millis(10));
        let result: Result<()> = retry(&policy, "slow", || async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        })
        .await;
        assert!(format!("{:#}", result.unwrap_err()).contains("timed out"));
    }

    #[tokio::test]
    async fn test_poll_until() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let done = poll_until(&fast(5), "converge", || {
            let counter = counter.clone();
            async move { Ok(counter.fetch_add(1, Ordering::SeqCst) >= 1) }
        })
        .await;
        assert!(done);

        let never = poll_until(&fast(3), "never", || async { Ok(false) }).await;
        assert!(!never);
    }
}
