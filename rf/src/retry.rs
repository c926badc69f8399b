//! Shared retry policy
//!
//! One [`RetryPolicy`] drives three loops: transient-call retries at every
//! collaborator call site, asset-level auto-regeneration, and the director's
//! attempt budget. [`FeedbackLog`] accumulates the text handed back to the
//! next attempt.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::services::ServiceError;

/// Attempt budget plus exponential backoff
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Policy that retries without sleeping
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay before the given retry (1-based: the first retry is 1)
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

/// Feedback accumulated across attempts
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedbackLog {
    entries: Vec<String>,
}

impl FeedbackLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: impl Into<String>) {
        let entry = entry.into();
        if !entry.trim().is_empty() {
            self.entries.push(entry);
        }
    }

    pub fn extend<I, S>(&mut self, entries: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for entry in entries {
            self.push(entry);
        }
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.entries.clone()
    }
}

/// Bound a collaborator call; elapsing is a retryable timeout
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, ServiceError>
where
    F: Future<Output = Result<T, ServiceError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            debug!(?limit, "with_timeout: call timed out");
            Err(ServiceError::Timeout(limit))
        }
    }
}

/// Run `op` until it succeeds, fails permanently, or the policy is spent
///
/// `op` receives the 1-based attempt number. Retryable errors sleep for the
/// policy backoff (or the service's retry-after, capped at the max backoff)
/// before the next attempt. Cancellation interrupts the sleep.
pub async fn call_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: Option<&CancellationToken>,
    what: &str,
    mut op: F,
) -> Result<T, ServiceError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    debug!(%what, max_attempts = policy.max_attempts, "call_with_retry: called");
    let mut attempt = 1;
    loop {
        if cancel.is_some_and(|c| c.is_cancelled()) {
            return Err(ServiceError::Cancelled);
        }

        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let backoff = e
                    .retry_after()
                    .map(|d| d.min(policy.max_backoff))
                    .unwrap_or_else(|| policy.backoff_for(attempt));
                warn!(%what, attempt, backoff_ms = backoff.as_millis() as u64, error = %e, "call_with_retry: retrying after transient error");

                match cancel {
                    Some(token) => {
                        tokio::select! {
                            _ = token.cancelled() => return Err(ServiceError::Cancelled),
                            _ = tokio::time::sleep(backoff) => {}
                        }
                    }
                    None => tokio::time::sleep(backoff).await,
                }
                attempt += 1;
            }
            Err(e) => {
                debug!(%what, attempt, error = %e, "call_with_retry: giving up");
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
        };
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(350));
    }

    #[test]
    fn test_feedback_log_skips_blank() {
        let mut log = FeedbackLog::new();
        log.push("pacing: too slow");
        log.push("   ");
        log.extend(["fidelity: missing the crit"]);
        assert_eq!(log.len(), 2);
        assert_eq!(log.entries()[1], "fidelity: missing the crit");
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = call_with_retry(&RetryPolicy::immediate(3), None, "test", |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(ServiceError::Transient("503".to_string()))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = call_with_retry(&RetryPolicy::immediate(3), None, "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ServiceError::Permanent("rejected".to_string())) }
        })
        .await;
        assert_eq!(result, Err(ServiceError::Permanent("rejected".to_string())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_returns_last_error() {
        let result: Result<(), _> = call_with_retry(&RetryPolicy::immediate(2), None, "test", |attempt| async move {
            Err(ServiceError::Transient(format!("attempt {}", attempt)))
        })
        .await;
        assert_eq!(result, Err(ServiceError::Transient("attempt 2".to_string())));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_backoff() {
        let token = CancellationToken::new();
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(60),
            max_backoff: Duration::from_secs(60),
        };
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });
        let result: Result<(), _> = call_with_retry(&policy, Some(&token), "test", |_| async {
            Err(ServiceError::Network("reset".to_string()))
        })
        .await;
        assert_eq!(result, Err(ServiceError::Cancelled));
    }

    #[tokio::test]
    async fn test_with_timeout() {
        let result: Result<(), _> = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert_eq!(result, Err(ServiceError::Timeout(Duration::from_millis(10))));
    }
}
