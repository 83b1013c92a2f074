//! Caller-side retry for async operations.
//!
//! The client itself never retries a failed connect; hosts that want to keep
//! trying wrap the call here and decide which errors are worth another go.
//!
//! ```ignore
//! use tilechain_client::retry::{retry_with_classifier, RetryConfig};
//!
//! retry_with_classifier(RetryConfig::default(), "connect", || client.connect(), |e| {
//!     e.is_connection()
//! })
//! .await?;
//! ```

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::consts::{DEFAULT_MAX_RETRY_ATTEMPTS, DEFAULT_RETRY_DELAY_SECS};
use crate::error::ClientError;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts. 0 means retry forever.
    pub max_attempts: u32,
    pub delay: Duration,
    /// 1.0 keeps the delay fixed, 2.0 doubles it each attempt.
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::exponential(DEFAULT_RETRY_DELAY_SECS, DEFAULT_MAX_RETRY_ATTEMPTS, 2.0, 30)
    }
}

impl RetryConfig {
    pub fn fixed(delay_secs: u64, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            delay: Duration::from_secs(delay_secs),
            backoff_multiplier: 1.0,
            max_delay: Duration::from_secs(delay_secs),
        }
    }

    pub fn exponential(
        initial_delay_secs: u64,
        max_attempts: u32,
        multiplier: f64,
        max_delay_secs: u64,
    ) -> Self {
        Self {
            max_attempts,
            delay: Duration::from_secs(initial_delay_secs),
            backoff_multiplier: multiplier,
            max_delay: Duration::from_secs(max_delay_secs),
        }
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if self.backoff_multiplier <= 1.0 {
            return self.delay;
        }

        let multiplier = self
            .backoff_multiplier
            .powi(attempt.saturating_sub(1) as i32);
        let delay = Duration::from_millis((self.delay.as_millis() as f64 * multiplier) as u64);

        std::cmp::min(delay, self.max_delay)
    }
}

/// Retry only the errors `is_retryable` accepts; anything else fails at once.
pub async fn retry_with_classifier<F, Fut, T, E, C>(
    config: RetryConfig,
    operation_name: &str,
    operation: F,
    is_retryable: C,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    C: Fn(&E) -> bool,
{
    let mut attempt = 1u32;
    let max_attempts = if config.max_attempts == 0 {
        "∞".to_string()
    } else {
        config.max_attempts.to_string()
    };

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(operation = operation_name, attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) => {
                if !is_retryable(&e) {
                    debug!(operation = operation_name, error = %e, "Non-retryable error, failing immediately");
                    return Err(e);
                }

                if config.max_attempts > 0 && attempt >= config.max_attempts {
                    warn!(
                        operation = operation_name,
                        attempt,
                        max_attempts = config.max_attempts,
                        error = %e,
                        "Max retry attempts exhausted"
                    );
                    return Err(e);
                }

                let delay = config.delay_for_attempt(attempt);
                warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts = %max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Operation failed, retrying after delay"
                );

                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Retry while the failure is one a fresh connect may cure.
pub async fn retry_connection<F, Fut, T>(
    config: RetryConfig,
    operation_name: &str,
    operation: F,
) -> Result<T, ClientError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    retry_with_classifier(config, operation_name, operation, ClientError::is_connection).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConnectionError, Direction};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn refused() -> ClientError {
        ConnectionError::Refused {
            direction: Direction::Read,
            endpoint: "ws://127.0.0.1:46658/queryws".into(),
            reason: "connection refused".into(),
        }
        .into()
    }

    #[test]
    fn exponential_delay_is_capped() {
        let config = RetryConfig::exponential(1, 10, 2.0, 60);
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(4), Duration::from_secs(8));
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(60));
    }

    #[test]
    fn fixed_delay_stays_fixed() {
        let config = RetryConfig::fixed(3, 2);
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(3));
        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn connection_errors_are_retried_until_success() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result = retry_connection(RetryConfig::fixed(0, 5), "connect", || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(refused())
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn other_errors_fail_immediately() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<(), ClientError> = retry_connection(RetryConfig::fixed(0, 5), "connect", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ClientError::Config("bad".into()))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<(), ClientError> = retry_connection(RetryConfig::fixed(0, 3), "connect", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(refused())
            }
        })
        .await;

        assert!(result.unwrap_err().is_connection());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
