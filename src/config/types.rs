use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Crawl-Throttle
///
/// Every section is optional; missing sections and keys fall back to defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    #[serde(rename = "rate-limit")]
    pub rate_limit: RateLimitConfig,
    #[serde(rename = "circuit-breaker")]
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: RetryConfig,
    pub session: SessionConfig,
}

/// Request scheduler behavior configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum number of fetches in flight at once
    #[serde(rename = "max-concurrency")]
    pub max_concurrency: u32,

    /// Per-attempt deadline for the fetch capability (milliseconds)
    #[serde(rename = "fetch-timeout-ms")]
    pub fetch_timeout_ms: u64,

    /// Requeue tasks rejected by an open breaker instead of failing them
    #[serde(rename = "requeue-on-breaker-open")]
    pub requeue_on_breaker_open: bool,
}

impl SchedulerConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 3,
            fetch_timeout_ms: 30_000,
            requeue_on_breaker_open: false,
        }
    }
}

/// Sliding-window rate limit configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Maximum permits granted within one window
    #[serde(rename = "max-requests")]
    pub max_requests: u32,

    /// Length of the trailing window (milliseconds)
    #[serde(rename = "window-ms")]
    pub window_ms: u64,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 10,
            window_ms: 60_000,
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    #[serde(rename = "failure-threshold")]
    pub failure_threshold: u32,

    /// How long the circuit stays open before a trial is allowed (milliseconds)
    #[serde(rename = "open-timeout-ms")]
    pub open_timeout_ms: u64,
}

impl CircuitBreakerConfig {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout_ms: 60_000,
        }
    }
}

/// Retry and backoff configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts allowed per task, including the first
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (milliseconds)
    #[serde(rename = "initial-delay-ms")]
    pub initial_delay_ms: u64,

    /// Upper bound on any single backoff delay (milliseconds)
    #[serde(rename = "max-delay-ms")]
    pub max_delay_ms: u64,

    /// Growth factor applied per attempt
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

/// Identity rotation configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Requests an identity may serve before it is retired
    #[serde(rename = "max-requests-per-identity")]
    pub max_requests_per_identity: u32,

    /// Lifetime of an identity (milliseconds)
    #[serde(rename = "identity-ttl-ms")]
    pub identity_ttl_ms: u64,

    /// Number of distinct identities kept warm for concurrent loans
    #[serde(rename = "pool-size")]
    pub pool_size: u32,
}

impl SessionConfig {
    pub fn identity_ttl(&self) -> Duration {
        Duration::from_millis(self.identity_ttl_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_requests_per_identity: 50,
            identity_ttl_ms: 24 * 60 * 60 * 1000,
            pool_size: 3,
        }
    }
}
