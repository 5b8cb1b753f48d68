use std::time::Duration;
use tokio::time::sleep;

use crate::event_sourcing::EventStoreError;

// ============================================================================
// Exponential Backoff Retry Strategy
// ============================================================================
//
// The event store never retries by itself: a version conflict means someone
// else wrote first, and only the caller knows whether reloading the stream
// and deciding again is safe. Callers that do want it wrap their whole
// load -> decide -> save cycle in `retry_on_transient`.
//
// ============================================================================

#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included
    pub max_attempts: u32,
    /// Initial delay before first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(500),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Single attempt; conflicts go straight back to the caller
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// For hot streams with many concurrent writers
    pub fn aggressive() -> Self {
        Self {
            max_attempts: 6,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
        }
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        let next = Duration::from_millis(((delay.as_millis() as f64) * self.multiplier) as u64);
        next.min(self.max_delay)
    }
}

/// Result of a retry operation
#[derive(Debug)]
pub enum RetryResult<T, E> {
    /// Operation succeeded
    Success(T),
    /// Operation failed after all retries
    Failed(E),
    /// Operation permanently failed (should not retry)
    PermanentFailure(E),
}

impl<T, E> RetryResult<T, E> {
    pub fn into_result(self) -> Result<T, E> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Failed(error) | Self::PermanentFailure(error) => Err(error),
        }
    }
}

/// Check if an error is transient (should retry) or permanent (should not retry)
pub trait IsTransient {
    fn is_transient(&self) -> bool;
}

/// Only a lost optimistic concurrency race is worth another attempt.
impl IsTransient for EventStoreError {
    fn is_transient(&self) -> bool {
        self.is_version_conflict()
    }
}

impl IsTransient for anyhow::Error {
    fn is_transient(&self) -> bool {
        self.downcast_ref::<EventStoreError>()
            .is_some_and(IsTransient::is_transient)
    }
}

/// Retry with transient error checking
pub async fn retry_on_transient<F, Fut, T, E>(
    config: RetryConfig,
    mut operation: F,
) -> RetryResult<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display + IsTransient,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        match operation(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(
                        attempt = attempt,
                        "Operation succeeded after retry"
                    );
                }
                return RetryResult::Success(result);
            }
            Err(error) => {
                if !error.is_transient() {
                    return RetryResult::PermanentFailure(error);
                }

                if attempt >= config.max_attempts {
                    tracing::warn!(
                        attempt = attempt,
                        error = %error,
                        "Operation still conflicting after all attempts"
                    );
                    return RetryResult::Failed(error);
                }

                tracing::debug!(
                    attempt = attempt,
                    error = %error,
                    delay_ms = delay.as_millis(),
                    "Transient failure, retrying after delay"
                );

                sleep(delay).await;
                delay = config.next_delay(delay);
            }
        }
    }
}
