//! # Retry Policy
//!
//! Bounded attempts, a backoff function, and a caller-supplied retryable-error
//! predicate. Every retry logs at `warn`, exhaustion logs at `error`.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

/// Delay schedule between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay after every failed attempt
    Fixed { delay_ms: u64 },

    /// `base_ms * 2^(attempt - 1)`, capped at `max_ms`
    Exponential { base_ms: u64, max_ms: u64 },
}

impl Backoff {
    /// Delay to wait after the given failed attempt (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match *self {
            Self::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Self::Exponential { base_ms, max_ms } => {
                let exponent = attempt.saturating_sub(1).min(31);
                let delay = base_ms.saturating_mul(1u64 << exponent);
                Duration::from_millis(delay.min(max_ms))
            }
        }
    }
}

/// Reusable retry policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub backoff: Backoff,
}

/// Terminal outcome of [`RetryPolicy::run`]
#[derive(Debug)]
pub struct RetryFailure<E> {
    /// Attempts actually made
    pub attempts: u32,
    /// True when the budget ran out, false when a non-retryable error stopped early
    pub exhausted: bool,
    /// Error from the last attempt
    pub error: E,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed {
                delay_ms: delay.as_millis() as u64,
            },
        }
    }

    pub fn exponential(max_attempts: u32, base: Duration, max: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Exponential {
                base_ms: base.as_millis() as u64,
                max_ms: max.as_millis() as u64,
            },
        }
    }

    /// Broker connect at startup
    pub fn for_connect() -> Self {
        Self::fixed(5, Duration::from_secs(5))
    }

    /// Publishing one task
    pub fn for_publish() -> Self {
        Self::fixed(5, Duration::from_secs(2))
    }

    /// Binding one router subject
    pub fn for_subscribe() -> Self {
        Self::fixed(5, Duration::from_secs(3))
    }

    /// Store queries on transient connection errors
    pub fn for_store() -> Self {
        Self::exponential(3, Duration::from_millis(500), Duration::from_secs(10))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be greater than 0".to_string());
        }
        if let Backoff::Exponential { base_ms, max_ms } = self.backoff {
            if base_ms > max_ms {
                return Err("backoff base_ms must not exceed max_ms".to_string());
            }
        }
        Ok(())
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the budget runs out
    ///
    /// `op` receives the 1-based attempt number. Sleeps happen only between attempts,
    /// never after the last one.
    pub async fn run<T, E, F, Fut, P>(
        &self,
        operation: &str,
        is_retryable: P,
        mut op: F,
    ) -> Result<T, RetryFailure<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) if !is_retryable(&error) => {
                    debug!(operation, attempt, error = %error, "Non-retryable error, giving up");
                    return Err(RetryFailure {
                        attempts: attempt,
                        exhausted: false,
                        error,
                    });
                }
                Err(error) if attempt >= max_attempts => {
                    error!(
                        operation,
                        attempts = attempt,
                        error = %error,
                        "Retry budget exhausted"
                    );
                    return Err(RetryFailure {
                        attempts: attempt,
                        exhausted: true,
                        error,
                    });
                }
                Err(error) => {
                    let delay = self.backoff.delay_for(attempt);
                    warn!(
                        operation,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
