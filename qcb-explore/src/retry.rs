//! Bounded retry with per-attempt timeout and exponential backoff
//!
//! **Algorithm:**
//! 1. Run the attempt under `tokio::time::timeout`
//! 2. On success, return the result
//! 3. On a retryable error with attempts left: log WARN, back off, retry
//! 4. On a non-retryable error or exhaustion: return `RetryExhausted`
//!
//! Backoff doubles from `initial_backoff` and is capped at `max_backoff`.

use crate::clients::ClientError;
use qcb_common::config::RetrySettings;
use std::future::Future;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

/// Final failure after the policy gave up
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{operation} failed after {attempts} attempt(s): {last_error}")]
pub struct RetryExhausted {
    pub operation: String,
    pub attempts: u32,
    pub last_error: ClientError,
}

impl RetryPolicy {
    pub fn from_settings(settings: RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            timeout: settings.timeout,
            initial_backoff: settings.initial_backoff,
            max_backoff: settings.max_backoff,
        }
    }

    /// Delay after failed attempt `attempt` (1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Run `operation` until it succeeds or the policy is exhausted
    ///
    /// # Arguments
    /// * `operation_name` - Name for logging (e.g., "generation", "embedding")
    /// * `operation` - Called with the 1-based attempt number
    pub async fn run<T, F, Fut>(
        &self,
        operation_name: &str,
        mut operation: F,
    ) -> Result<T, RetryExhausted>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let start_time = Instant::now();
        let mut attempt = 0;

        loop {
            attempt += 1;

            if attempt > 1 {
                tracing::debug!(operation = operation_name, attempt, "Retrying external call");
            }

            let outcome = match tokio::time::timeout(self.timeout, operation(attempt)).await {
                Ok(result) => result,
                Err(_) => Err(ClientError::Timeout(self.timeout.as_millis() as u64)),
            };

            match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(
                            operation = operation_name,
                            attempt,
                            elapsed_ms = start_time.elapsed().as_millis() as u64,
                            "External call succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(err) => {
                    if !err.is_retryable() || attempt >= max_attempts {
                        tracing::error!(
                            operation = operation_name,
                            attempt,
                            elapsed_ms = start_time.elapsed().as_millis() as u64,
                            retryable = err.is_retryable(),
                            error = %err,
                            "External call failed"
                        );
                        return Err(RetryExhausted {
                            operation: operation_name.to_string(),
                            attempts: attempt,
                            last_error: err,
                        });
                    }

                    let backoff = self.backoff_for(attempt);
                    tracing::warn!(
                        operation = operation_name,
                        attempt,
                        max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "External call failed, will retry after backoff"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}
