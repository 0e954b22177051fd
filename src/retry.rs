//! Bounded exponential backoff for transient provider errors
//!
//! Only errors for which [`GmailError::is_transient`] holds are retried. An
//! explicit rate-limit response waits at least as long as the server asked.
//! Every wait races the cancellation token so a cancelled operation never sits
//! out a long backoff.

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::RetryConfig;
use crate::error::{GmailError, Result};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_secs(config.max_backoff_secs),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_backoff)
            .with_multiplier(2.0)
            .with_randomization_factor(0.0)
            .with_max_interval(self.max_backoff)
            .with_max_elapsed_time(None)
            .build()
    }

    /// Run `operation` until it succeeds, fails permanently, or attempts run out
    pub async fn run<T, F, Fut>(
        &self,
        operation_name: &str,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut backoff = self.backoff();
        let mut attempts = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(GmailError::OperationCancelled(operation_name.to_string()));
            }

            attempts += 1;
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempts < self.max_attempts => e,
                Err(e) => return Err(e),
            };

            let mut delay = backoff.next_backoff().unwrap_or(self.max_backoff);
            if let GmailError::RateLimitExceeded { retry_after } = &error {
                delay = delay.max(Duration::from_secs(*retry_after));
            }

            warn!(
                "{} failed (attempt {}/{}): {}. Retrying in {:?}...",
                operation_name, attempts, self.max_attempts, error, delay
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(GmailError::OperationCancelled(operation_name.to_string()));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
