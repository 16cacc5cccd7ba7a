//! Retry with exponential backoff for recoverable external errors.

use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;

use crate::error::{EngineError, Result};

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 means no retries)
    pub max_retries: u32,

    /// Initial backoff duration
    pub initial_interval: Duration,

    /// Maximum backoff duration
    pub max_interval: Duration,

    /// Multiplier for backoff between retries
    pub multiplier: f64,

    /// Randomization applied to each interval
    pub randomization_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(15),
            multiplier: 2.0,
            randomization_factor: 0.2,
        }
    }
}

/// Executor for retry operations with exponential backoff.
///
/// Only errors whose variant is retryable (see [`EngineError::is_retryable`])
/// are retried; permanent errors and guardrail trips surface immediately.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub async fn execute<F, Fut, T>(&self, label: &str, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.config.initial_interval)
            .with_max_interval(self.config.max_interval)
            .with_multiplier(self.config.multiplier)
            .with_randomization_factor(self.config.randomization_factor)
            .with_max_elapsed_time(None)
            .build();

        let mut attempts = 0u32;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempts < self.config.max_retries => {
                    let delay = backoff
                        .next_backoff()
                        .unwrap_or(self.config.max_interval);
                    attempts += 1;
                    tracing::warn!(
                        operation = %label,
                        attempt = attempts,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retryable error, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    if attempts > 0 {
                        return Err(EngineError::transient(format!(
                            "{label} failed after {} attempts: {err}",
                            attempts + 1
                        )));
                    }
                    return Err(err);
                }
            }
        }
    }
}
