//! Retry and backoff policy
//!
//! Pure decision logic: given the attempt number and the classified error,
//! either stop or retry after an exponential backoff capped at `max_delay`.

use crate::config::{validate_retry_config, RetryConfig};
use crate::{ConfigError, TaskError};
use std::time::Duration;

/// Outcome of consulting the retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    Stop,
}

/// Exponential backoff with an attempt budget
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay_ms: u64,
    max_delay_ms: u64,
    multiplier: f64,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Result<Self, ConfigError> {
        validate_retry_config(config)?;

        Ok(Self {
            max_attempts: config.max_attempts,
            initial_delay_ms: config.initial_delay_ms,
            max_delay_ms: config.max_delay_ms,
            multiplier: config.multiplier,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decides what to do after `attempt` (1-based) failed with `error`
    pub fn decide(&self, attempt: u32, error: &TaskError) -> RetryDecision {
        if !error.is_retryable() || attempt >= self.max_attempts {
            return RetryDecision::Stop;
        }

        RetryDecision::Retry {
            delay: self.backoff(attempt),
        }
    }

    /// Delay imposed after the given failed attempt
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(calculate_backoff(
            attempt,
            self.initial_delay_ms,
            self.max_delay_ms,
            self.multiplier,
        ))
    }
}

/// `min(initial * multiplier^(attempt-1), max)` in milliseconds
///
/// Attempt 0 is treated as attempt 1. Monotonically non-decreasing in
/// `attempt` for any multiplier >= 1.
pub fn calculate_backoff(attempt: u32, initial_ms: u64, max_ms: u64, multiplier: f64) -> u64 {
    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let raw = initial_ms as f64 * multiplier.powi(exponent);

    if !raw.is_finite() || raw >= max_ms as f64 {
        max_ms
    } else {
        raw as u64
    }
}
