use std::future::Future;
use std::time::Duration;

use crate::{FailureClass, PipelineError, Result};

/// Bounded exponential backoff for transient failures
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Try again after `delay`; `attempt` is the number of the next try
    Retry { attempt: u32, delay: Duration },
    GiveUp,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// A single attempt, never retried
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// Delay after the `attempt`-th failure: base * 2^(attempt-1), capped
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// What to do after attempt number `attempt` failed with `error`
    pub fn decide(&self, attempt: u32, error: &PipelineError) -> RetryDecision {
        if error.class() != FailureClass::Transient || attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }

        // A server-provided wait wins over our own schedule
        let delay = match error {
            PipelineError::RateLimited {
                retry_after: Some(wait),
            } => *wait,
            _ => self.backoff(attempt),
        };

        RetryDecision::Retry {
            attempt: attempt + 1,
            delay,
        }
    }

    /// Run `operation` until it succeeds, fails non-transiently or runs out
    /// of attempts. The closure receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, what: &str, mut operation: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) => match self.decide(attempt, &error) {
                    RetryDecision::Retry { attempt: next, delay } => {
                        tracing::warn!(
                            "{} failed (attempt {}/{}): {}; retrying in {:?}",
                            what,
                            attempt,
                            self.max_attempts,
                            error,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                        attempt = next;
                    }
                    RetryDecision::GiveUp => return Err(error),
                },
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(2), Duration::from_secs(60))
    }
}
