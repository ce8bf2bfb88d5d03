//! Bounded retries with exponential backoff
//!
//! Provider calls and search pushes both go through [`with_retry`]. Only
//! errors that report themselves as transient via [`RetryableError`] are
//! retried; anything else is returned on the first attempt.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::RetryableError;

/// Run `operation` under `policy`, retrying transient failures
pub async fn with_retry<F, Fut, T, E>(policy: &RetryConfig, operation: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError + Display,
{
    RetryManager::new(policy.clone()).execute(operation).await
}

/// Applies one [`RetryConfig`] to any number of operations
#[derive(Debug, Clone)]
pub struct RetryManager {
    policy: RetryConfig,
}

impl RetryManager {
    pub fn new(policy: RetryConfig) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryConfig {
        &self.policy
    }

    /// Call `operation` until it succeeds, fails terminally, or retries run out
    ///
    /// At most `max_retries + 1` calls are made. The last error is returned.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError + Display,
    {
        let mut retries = 0u32;

        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_retryable() {
                debug!(error = %err, "Terminal error, not retrying");
                return Err(err);
            }
            if retries >= self.policy.max_retries {
                warn!(
                    attempts = retries + 1,
                    error = %err,
                    "Giving up after retries"
                );
                return Err(err);
            }

            let delay = self.delay_before_retry(retries);
            debug!(
                retry = retries + 1,
                of = self.policy.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Transient error, backing off"
            );
            tokio::time::sleep(delay).await;
            retries += 1;
        }
    }

    /// Wait before retry number `retry + 1`
    ///
    /// `initial * multiplier^retry`, capped at `max_backoff_ms`. With jitter
    /// the result is scaled into `[0.5, 1.0)` of that value.
    pub fn delay_before_retry(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let uncapped = self.policy.initial_backoff_ms as f64 * self.policy.backoff_multiplier.powi(exponent);
        let mut millis = uncapped.min(self.policy.max_backoff_ms as f64);

        if self.policy.jitter {
            millis *= rand::thread_rng().gen_range(0.5..1.0);
        }

        Duration::from_secs_f64(millis.max(0.0) / 1000.0)
    }
}
