//! Retry logic with exponential backoff
//!
//! Delay before retry `n` is `initial_delay * multiplier^(n-1)`, capped at
//! `max_delay`. A server-provided retry hint replaces the computed delay
//! (still capped).

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Errors that know whether another attempt could succeed
pub trait Retryable {
    /// Whether the operation should be retried
    fn is_retryable(&self) -> bool;

    /// Server-requested delay, overriding the computed backoff
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl Retryable for crate::error::SendError {
    fn is_retryable(&self) -> bool {
        crate::error::SendError::is_retryable(self)
    }

    fn retry_after(&self) -> Option<Duration> {
        crate::error::SendError::retry_after(self)
    }
}

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Add up to 25% random jitter (never beyond `max_delay`)
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: crate::config::DEFAULT_MAX_RETRIES,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set retries after the first attempt
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set initial delay
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set backoff multiplier
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enable or disable jitter
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Total attempts including the first
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `retry` (1-based)
    #[must_use]
    pub fn calculate_delay(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let base_ms =
            self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let max_ms = self.max_delay.as_millis() as f64;
        let delay_ms = base_ms.min(max_ms);

        let final_ms = if self.jitter && delay_ms >= 4.0 {
            let jitter = rand::thread_rng().gen_range(0.0..delay_ms / 4.0);
            (delay_ms + jitter).min(max_ms)
        } else {
            delay_ms
        };

        Duration::from_millis(final_ms as u64)
    }

    /// Delay honouring a server hint when present
    #[must_use]
    pub fn delay_for<E: Retryable>(&self, retry: u32, error: &E) -> Duration {
        match error.retry_after() {
            Some(hint) => hint.min(self.max_delay),
            None => self.calculate_delay(retry),
        }
    }
}

/// Error type for retry operations
#[derive(Debug)]
pub struct RetryError<E> {
    /// The last error encountered
    pub last_error: E,
    /// Total number of attempts made
    pub attempts: u32,
}

impl<E: std::fmt::Display> std::fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Operation failed after {} attempts: {}",
            self.attempts, self.last_error
        )
    }
}

impl<E: std::fmt::Debug + std::fmt::Display> std::error::Error for RetryError<E> {}

/// Execute an async operation with retry logic
///
/// `on_retry` is called with the retry number, the error and the chosen
/// delay before each sleep, so callers can count and log retries.
///
/// # Example
/// ```ignore
/// let result = retry_with_backoff(
///     &RetryConfig::default(),
///     || async { transport.send(&batch).await },
///     |retry, err, delay| warn!(retry, %err, ?delay, "Send failed, retrying"),
/// ).await;
/// ```
pub async fn retry_with_backoff<T, E, F, Fut, R>(
    config: &RetryConfig,
    mut operation: F,
    mut on_retry: R,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: FnMut(u32, &E, Duration),
    E: Retryable + std::fmt::Debug,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) => {
                if attempt >= config.max_attempts() || !e.is_retryable() {
                    debug!(attempt, error = ?e, "Operation failed, no more retries");
                    return Err(RetryError {
                        last_error: e,
                        attempts: attempt,
                    });
                }

                let delay = config.delay_for(attempt, &e);
                on_retry(attempt, &e, delay);
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
