//! Bounded retry with exponential backoff for idempotent remote probes.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{BootstrapError, Result};

/// Retry configuration for operations.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay to use after `delay`, capped at `max_delay`.
    #[must_use]
    pub fn next_delay(&self, delay: Duration) -> Duration {
        Duration::try_from_secs_f64(delay.as_secs_f64() * self.backoff_multiplier)
            .map_or(self.max_delay, |next| next.min(self.max_delay))
    }
}

/// Execute an async operation, retrying only transient failures.
///
/// Non-transient errors are returned immediately. Cancellation is observed
/// between attempts; an attempt already running is allowed to finish.
///
/// # Errors
/// Returns the last error once attempts are exhausted, the first
/// non-transient error, or [`BootstrapError::Cancelled`].
pub async fn retry_transient<T, F, Fut>(
    config: &RetryConfig,
    operation_name: &str,
    cancel: &CancellationToken,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        if cancel.is_cancelled() {
            return Err(BootstrapError::cancelled(operation_name));
        }

        attempt += 1;
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => {
                if attempt >= config.max_attempts {
                    warn!(
                        operation = operation_name,
                        attempt,
                        error = %e,
                        "Giving up after transient failures"
                    );
                    return Err(e);
                }

                info!(
                    "{operation_name} failed (attempt {attempt}/{}): {e}. Retrying in {delay:?}...",
                    config.max_attempts
                );

                tokio::select! {
                    () = cancel.cancelled() => {
                        return Err(BootstrapError::cancelled(operation_name));
                    }
                    () = tokio::time::sleep(delay) => {}
                }
                delay = config.next_delay(delay);
            }
        }
    }
}
