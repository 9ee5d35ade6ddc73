//! Admission control and failure policy
//!
//! This module contains the building blocks the scheduler consults before and
//! after every attempt:
//! - Sliding-window rate limiting
//! - Circuit breaking on consecutive failures
//! - Retry decisions with exponential backoff

mod circuit_breaker;
mod rate_limiter;
mod retry;

pub use circuit_breaker::{BreakerPermit, CircuitBreaker, CircuitBreakerStats, CircuitState};
pub use rate_limiter::{RateDecision, RateLimiter, RateLimiterStats};
pub use retry::{calculate_backoff, RetryDecision, RetryPolicy};
