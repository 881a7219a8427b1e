//! Retry policy for RPC calls.

use std::time::Duration;

use crate::error::RpcError;

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// `step * attempt`
    Linear { step: Duration },
    /// `initial * factor^(attempt - 1)`, capped at `max`
    Exponential {
        initial: Duration,
        factor: f64,
        max: Duration,
    },
}

impl Backoff {
    /// Delay after failed attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Linear { step } => step.saturating_mul(attempt.max(1)),
            Backoff::Exponential {
                initial,
                factor,
                max,
            } => {
                let secs = initial.as_secs_f64() * factor.powi(attempt.saturating_sub(1) as i32);
                Duration::from_secs_f64(secs.min(max.as_secs_f64()))
            }
        }
    }
}

/// How many times to try a call, how long to wait between tries, and which
/// failures are worth retrying.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub retryable: fn(&RpcError) -> bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::linear(3, Duration::from_millis(500))
    }
}

impl RetryPolicy {
    pub fn linear(max_attempts: u32, step: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Linear { step },
            retryable: RpcError::is_transient,
        }
    }

    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self::linear(1, Duration::ZERO)
    }

    /// Whether a call that failed on `attempt` with `error` should be retried.
    pub fn should_retry(&self, attempt: u32, error: &RpcError) -> bool {
        attempt < self.max_attempts.max(1) && (self.retryable)(error)
    }
}
