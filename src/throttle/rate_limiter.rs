//! Sliding-window rate limiter
//!
//! Tracks the instants of granted permits inside a trailing window. A check
//! first prunes permits that fell out of the window, then admits if fewer than
//! `max_requests` remain. Denials never consume a slot.

use crate::config::{validate_rate_limit_config, RateLimitConfig};
use crate::ConfigError;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Result of a rate limiter check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// A permit was granted and recorded
    Admitted,

    /// The window is full; the oldest permit expires after `retry_after`
    Denied { retry_after: Duration },
}

impl RateDecision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted)
    }
}

/// Snapshot of the limiter's window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterStats {
    /// Permits currently inside the window
    pub current: u32,
    pub max: u32,
    pub window: Duration,
}

/// Sliding-window admission control
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    granted: VecDeque<Instant>,
}

impl RateLimiter {
    /// Creates a new limiter, rejecting a zero window or zero capacity
    pub fn new(config: &RateLimitConfig) -> Result<Self, ConfigError> {
        validate_rate_limit_config(config)?;

        Ok(Self {
            max_requests: config.max_requests,
            window: config.window(),
            granted: VecDeque::with_capacity(config.max_requests as usize),
        })
    }

    /// Tries to take a permit now
    pub fn try_acquire(&mut self) -> RateDecision {
        self.try_acquire_at(Instant::now())
    }

    /// Tries to take a permit at the given instant
    pub fn try_acquire_at(&mut self, now: Instant) -> RateDecision {
        self.prune(now);

        if (self.granted.len() as u32) < self.max_requests {
            self.granted.push_back(now);
            tracing::trace!(current = self.granted.len(), "Rate limiter admitted");
            return RateDecision::Admitted;
        }

        // Window is full, so there is at least one permit to wait on
        let retry_after = self
            .granted
            .front()
            .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
            .unwrap_or(self.window);

        tracing::trace!(?retry_after, "Rate limiter denied");
        RateDecision::Denied { retry_after }
    }

    /// Returns the current window occupancy
    pub fn stats(&mut self) -> RateLimiterStats {
        self.stats_at(Instant::now())
    }

    /// Returns the window occupancy at the given instant
    pub fn stats_at(&mut self, now: Instant) -> RateLimiterStats {
        self.prune(now);
        RateLimiterStats {
            current: self.granted.len() as u32,
            max: self.max_requests,
            window: self.window,
        }
    }

    /// Forgets every granted permit
    pub fn reset(&mut self) {
        self.granted.clear();
    }

    /// Drops permits granted at or before `now - window`
    fn prune(&mut self, now: Instant) {
        let Some(window_start) = now.checked_sub(self.window) else {
            return;
        };

        while let Some(oldest) = self.granted.front() {
            if *oldest > window_start {
                break;
            }
            self.granted.pop_front();
        }
    }
}
