//! Retry policy with exponential backoff for transient store failures.
//!
//! Applied to idempotent reads and the agent-activity upsert only;
//! non-idempotent writes are never auto-retried.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

use crate::domain::errors::{StoreError, StoreResult};
use crate::domain::models::RetryConfig;

/// Retry policy: `attempts` total tries, backoff starting at `base_ms` and
/// multiplied by `factor` after each failure (150 ms, 300 ms, 600 ms with
/// the defaults).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    attempts: u32,
    base_ms: u64,
    factor: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: RetryConfig) -> Self {
        Self {
            attempts: config.attempts.max(1),
            base_ms: config.base_ms,
            factor: config.factor.max(1),
        }
    }

    /// Execute `operation`, retrying on transient errors.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempt += 1;
                    if !err.is_transient() || attempt >= self.attempts {
                        return Err(err);
                    }
                    let backoff = self.backoff(attempt - 1);
                    warn!(
                        attempt,
                        max_attempts = self.attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "transient store error, retrying"
                    );
                    sleep(backoff).await;
                }
            }
        }
    }

    fn backoff(&self, failures: u32) -> Duration {
        let factor = u64::from(self.factor).saturating_pow(failures);
        Duration::from_millis(self.base_ms.saturating_mul(factor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::from_config(RetryConfig { attempts: 3, base_ms: 1, factor: 2 })
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result = fast_policy()
            .execute(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(StoreError::transient("locked"))
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
    async fn fatal_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: StoreResult<()> = fast_policy()
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(StoreError::fatal("broken")) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: StoreResult<()> = fast_policy()
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(StoreError::transient("busy")) }
            })
            .await;
        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy::from_config(RetryConfig::default());
        assert_eq!(policy.backoff(0), Duration::from_millis(150));
        assert_eq!(policy.backoff(1), Duration::from_millis(300));
        assert_eq!(policy.backoff(2), Duration::from_millis(600));
    }
}
