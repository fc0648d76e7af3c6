//! Shared backoff policy for RPC calls.

use std::{future::Future, time::Duration};

use log::warn;

use crate::config::RetrySettings;
use crate::rpc::error::{ErrorKind, RpcError};

/// Growing, capped backoff with per-kind attempt bounds.
///
/// Used by the scanner, the provider pool's point calls, the balance
/// reconciler and backfills, so a rate limit is treated the same way
/// everywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub rate_limit_attempts: u32,
    pub transient_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms.max(settings.base_delay_ms)),
            rate_limit_attempts: settings.rate_limit_attempts,
            transient_attempts: settings.transient_attempts,
        }
    }

    /// Same attempt bounds without any sleeping.
    pub fn immediate() -> Self {
        Self {
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Delay before the `attempt`-th retry (1-based): base * 2^(attempt-1), capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// How many retries an error of `kind` earns on one provider.
    pub fn max_retries(&self, kind: ErrorKind) -> u32 {
        match kind {
            ErrorKind::RateLimited => self.rate_limit_attempts,
            ErrorKind::Transient => self.transient_attempts,
            ErrorKind::RangeTooLarge | ErrorKind::Unknown => 0,
        }
    }

    /// Variant that hands rate limits back to the caller instead of sleeping on them.
    pub fn transient_only(&self) -> Self {
        Self {
            rate_limit_attempts: 0,
            ..self.clone()
        }
    }
}

/// Run `op` until it succeeds or its error kind runs out of retries.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, RpcError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RpcError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                let max = policy.max_retries(e.kind());
                if attempt > max {
                    return Err(e);
                }

                let delay = policy.delay(attempt);
                warn!(
                    "{} failed ({}), retry {}/{} in {:?}",
                    label, e, attempt, max, delay
                );
                tokio::time::sleep(delay).await;
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(3),
            rate_limit_attempts: 5,
            transient_attempts: 3,
        };

        assert_eq!(policy.delay(1), Duration::from_millis(500));
        assert_eq!(policy.delay(2), Duration::from_millis(1_000));
        assert_eq!(policy.delay(3), Duration::from_millis(2_000));
        assert_eq!(policy.delay(4), Duration::from_secs(3));
        assert_eq!(policy.delay(40), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_transient_errors_retry_until_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = with_retry(&RetryPolicy::immediate(), "eth_call", move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(RpcError::Transient("reset".to_string()))
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_unknown_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<u64, RpcError> =
            with_retry(&RetryPolicy::immediate(), "eth_call", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(RpcError::Unknown("reverted".to_string()))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_only_returns_rate_limits() {
        let policy = RetryPolicy::immediate().transient_only();
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<u64, RpcError> = with_retry(&policy, "eth_getLogs", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(RpcError::RateLimited("429".to_string()))
        })
        .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::RateLimited);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
