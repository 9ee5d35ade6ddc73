//! Circuit breaker protecting the target from cascading failure
//!
//! # States
//! - Closed: normal operation, attempts pass through to the rate limiter
//! - Open: target assumed unhealthy, attempts are rejected immediately
//! - HalfOpen: exactly one trial attempt is let through to probe recovery
//!
//! # Transitions
//! ```text
//! Closed   -> Open:     consecutive failures reach the threshold
//! Open     -> HalfOpen: first admission check after the open timeout
//! HalfOpen -> Closed:   trial succeeds
//! HalfOpen -> Open:     trial fails (timeout restarts)
//! ```
//!
//! Outcomes of ordinary attempts that were admitted while the circuit was still
//! closed, but land after it opened, do not move the breaker.

use crate::config::{validate_circuit_breaker_config, CircuitBreakerConfig};
use crate::ConfigError;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Admission decision from the breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerPermit {
    /// Ordinary attempt while closed
    Normal,

    /// The single recovery probe while half-open
    Trial,

    /// Attempt refused; `retry_after` is the remaining open time, if known
    Rejected { retry_after: Option<Duration> },
}

impl BreakerPermit {
    pub fn is_admitted(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }

    pub fn is_trial(&self) -> bool {
        matches!(self, Self::Trial)
    }
}

/// Snapshot of breaker internals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub opened_at: Option<Instant>,
}

/// Failure-rate protection state machine
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    open_timeout: Duration,
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

impl CircuitBreaker {
    /// Creates a closed breaker
    pub fn new(config: &CircuitBreakerConfig) -> Result<Self, ConfigError> {
        validate_circuit_breaker_config(config)?;

        Ok(Self {
            failure_threshold: config.failure_threshold,
            open_timeout: config.open_timeout(),
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            trial_in_flight: false,
        })
    }

    /// Returns the stored state
    ///
    /// An open breaker whose timeout has elapsed still reports `Open` until the
    /// next admission check moves it to `HalfOpen`.
    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn open_timeout(&self) -> Duration {
        self.open_timeout
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        CircuitBreakerStats {
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            opened_at: self.opened_at,
        }
    }

    /// Admission check at the given instant
    ///
    /// Returns the permit and, if the check moved the breaker, its new state.
    pub fn try_acquire_at(&mut self, now: Instant) -> (BreakerPermit, Option<CircuitState>) {
        match self.state {
            CircuitState::Closed => (BreakerPermit::Normal, None),
            CircuitState::Open => {
                let opened_at = self.opened_at.unwrap_or(now);
                let elapsed = now.saturating_duration_since(opened_at);

                if elapsed < self.open_timeout {
                    return (
                        BreakerPermit::Rejected {
                            retry_after: Some(self.open_timeout - elapsed),
                        },
                        None,
                    );
                }

                tracing::info!("Circuit breaker transitioning to half-open");
                self.state = CircuitState::HalfOpen;
                self.trial_in_flight = true;
                (BreakerPermit::Trial, Some(CircuitState::HalfOpen))
            }
            CircuitState::HalfOpen => {
                if self.trial_in_flight {
                    return (BreakerPermit::Rejected { retry_after: None }, None);
                }
                self.trial_in_flight = true;
                (BreakerPermit::Trial, None)
            }
        }
    }

    /// Returns an unused trial permit (the attempt never reached the target)
    pub fn abandon_trial(&mut self) {
        if self.state == CircuitState::HalfOpen {
            self.trial_in_flight = false;
        }
    }

    /// Records a successful attempt
    pub fn record_success(&mut self, trial: bool) -> Option<CircuitState> {
        match self.state {
            CircuitState::Closed => {
                self.consecutive_failures = 0;
                None
            }
            CircuitState::HalfOpen if trial => {
                tracing::info!("Circuit breaker closing after successful trial");
                self.close();
                Some(CircuitState::Closed)
            }
            _ => None,
        }
    }

    /// Records a failed attempt at the given instant
    pub fn record_failure_at(&mut self, now: Instant, trial: bool) -> Option<CircuitState> {
        match self.state {
            CircuitState::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.failure_threshold {
                    tracing::warn!(
                        failures = self.consecutive_failures,
                        "Circuit breaker opening"
                    );
                    self.open(now);
                    return Some(CircuitState::Open);
                }
                None
            }
            CircuitState::HalfOpen if trial => {
                tracing::warn!("Circuit breaker reopening after failed trial");
                self.consecutive_failures += 1;
                self.open(now);
                Some(CircuitState::Open)
            }
            _ => None,
        }
    }

    /// Forces the breaker back to closed
    pub fn reset(&mut self) {
        self.close();
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.trial_in_flight = false;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
        self.trial_in_flight = false;
    }
}
