//! Crawl-Throttle: a resilient request scheduler for rate-sensitive targets
//!
//! This crate governs how outbound fetches are admitted, paced, retried and
//! protected from cascading failure. A bounded-concurrency scheduler consults a
//! sliding-window rate limiter and a circuit breaker before every attempt, drives
//! a retry policy on failure, and presents a rotating browser identity to the
//! fetch capability on each attempt.

pub mod config;
pub mod fetch;
pub mod identity;
pub mod scheduler;
pub mod state;
pub mod throttle;

use std::time::Duration;
use thiserror::Error;

/// Main error type for Crawl-Throttle operations outside of task execution
#[derive(Debug, Error)]
pub enum ThrottleError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Classified failure of a scheduled task
///
/// This is the closed set of error kinds the scheduler reasons about. Every
/// terminal task failure carries exactly one of these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimitExceeded { retry_after: Duration },

    #[error("Fetch timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("Circuit breaker is open")]
    CircuitOpen,

    #[error("Fetch failed{}: {message}", status_suffix(.status_code))]
    Fetch {
        retryable: bool,
        status_code: Option<u16>,
        message: String,
    },

    #[error("Invalid task: {0}")]
    Validation(String),

    #[error("Task cancelled")]
    Cancelled,

    #[error("Scheduler is shutting down")]
    ShuttingDown,
}

impl TaskError {
    /// Returns true if another attempt of the same task could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimitExceeded { .. } | Self::Timeout { .. } | Self::CircuitOpen => true,
            Self::Fetch { retryable, .. } => *retryable,
            Self::Validation(_) | Self::Cancelled | Self::ShuttingDown => false,
        }
    }

    /// Short machine-readable code for logs and events
    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimitExceeded { .. } => "rate_limit",
            Self::Timeout { .. } => "timeout",
            Self::CircuitOpen => "circuit_open",
            Self::Fetch { .. } => "fetch_failure",
            Self::Validation(_) => "validation",
            Self::Cancelled => "cancelled",
            Self::ShuttingDown => "shutting_down",
        }
    }
}

fn status_suffix(status_code: &Option<u16>) -> String {
    status_code
        .map(|code| format!(" with HTTP {}", code))
        .unwrap_or_default()
}

/// Result type alias for Crawl-Throttle operations
pub type Result<T> = std::result::Result<T, ThrottleError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use fetch::{FetchError, FetchRequest, FetchResponse, Fetcher, HttpFetcher};
pub use identity::{BrowserFingerprint, FingerprintGenerator, Identity, SessionManager};
pub use scheduler::{RequestScheduler, SchedulerEvent, SchedulerStats, TaskHandle, TaskOutcome};
pub use state::{TaskId, TaskState};
pub use throttle::{CircuitBreaker, CircuitState, RateLimiter, RetryDecision, RetryPolicy};
