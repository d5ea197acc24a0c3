//! Retry logic with exponential backoff and jitter.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::circuit_breaker::CircuitBreaker;
use crate::data_source::{SourceError, SourceErrorKind};

/// Backoff strategy for retrying failed requests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Uses a fixed delay between retries.
    Fixed {
        /// Delay between retries.
        delay: Duration,
    },
    /// Uses an exponential delay between retries.
    ///
    /// The delay is calculated as `base * (factor ^ attempt)`.
    Exponential {
        /// The initial backoff duration.
        base: Duration,
        /// The multiplicative factor for each subsequent retry.
        factor: f64,
        /// The maximum duration to wait between retries.
        max: Duration,
        /// Whether to apply random jitter (+/- 50%) to the delay.
        jitter: bool,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_millis(200),
            factor: 2.0,
            max: Duration::from_secs(5),
            jitter: true,
        }
    }
}

impl Backoff {
    /// Calculate the delay for a given retry attempt.
    ///
    /// # Arguments
    ///
    /// * `attempt` - The retry attempt number (0-based)
    pub fn delay(self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                let seconds = base.as_secs_f64() * factor.powi(exponent);
                let capped_seconds = seconds.min(max.as_secs_f64());

                let mut delay = Duration::from_secs_f64(capped_seconds.max(0.0));

                // +/- 50% multiplicative jitter
                if jitter {
                    let jitter_ms = (delay.as_millis() as f64 * 0.5) as u64;
                    let random_offset = fastrand::u64(0..=(jitter_ms * 2));
                    let total_ms =
                        delay.as_millis() as i64 + (random_offset as i64 - jitter_ms as i64);
                    delay = Duration::from_millis(total_ms.max(0) as u64);
                }

                delay
            }
        }
    }
}

/// Bounded retry wrapper composed around a breaker-guarded call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// The maximum number of retries after the first attempt.
    /// Total attempts = `max_retries + 1`.
    pub max_retries: u32,
    /// The backoff strategy to use between retries.
    pub backoff: Backoff,
    /// Error kinds that trigger a retry.
    pub retry_on: Vec<SourceErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Backoff::default(),
            retry_on: vec![
                SourceErrorKind::UpstreamTimeout,
                SourceErrorKind::UpstreamError,
                SourceErrorKind::RateLimited,
            ],
        }
    }
}

impl RetryPolicy {
    /// Create a retry policy with exponential backoff.
    pub fn exponential(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Create a retry policy with fixed backoff.
    pub fn fixed(delay: Duration, max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: Backoff::Fixed { delay },
            ..Self::default()
        }
    }

    /// Disable retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Whether an error of this kind may be retried. `CircuitOpen` and
    /// `RetryExhausted` never are, whatever the configured set says.
    pub fn should_retry(&self, error: &SourceError) -> bool {
        let kind = error.kind();
        !matches!(
            kind,
            SourceErrorKind::CircuitOpen | SourceErrorKind::RetryExhausted
        ) && self.retry_on.contains(&kind)
    }

    /// Calculate the delay for a given retry attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }

    /// Runs `op` through `breaker`, retrying retryable failures.
    ///
    /// Every attempt consults the breaker first. If the breaker opens between
    /// attempts the remaining attempts are abandoned with `CircuitOpen`.
    pub async fn run<T, F, Fut>(&self, breaker: &CircuitBreaker, mut op: F) -> Result<T, SourceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let mut attempts: u32 = 0;
        loop {
            let error = match breaker.call(&mut op).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            attempts = attempts.saturating_add(1);

            if !self.should_retry(&error) {
                return Err(error);
            }
            if attempts > self.max_retries {
                return Err(SourceError::retry_exhausted(attempts, error));
            }
            if !breaker.is_eligible() {
                debug!(
                    source = %breaker.source(),
                    attempts,
                    last_error = %error,
                    "breaker opened mid-retry, abandoning attempts"
                );
                return Err(SourceError::circuit_open(breaker.source()));
            }

            let delay = self.delay_for_attempt(attempts - 1);
            debug!(
                source = %breaker.source(),
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying source call"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
