//! Configuration module for Crawl-Throttle
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//! Every key has a default, so an empty file is a valid configuration.
//!
//! # Example
//!
//! ```no_run
//! use crawl_throttle::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("throttle.toml")).unwrap();
//! println!("Rate limit: {} per {}ms", config.rate_limit.max_requests, config.rate_limit.window_ms);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    CircuitBreakerConfig, Config, RateLimitConfig, RetryConfig, SchedulerConfig, SessionConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};

// Re-export validators used by component constructors
pub use validation::{
    validate, validate_circuit_breaker_config, validate_rate_limit_config, validate_retry_config,
    validate_scheduler_config, validate_session_config,
};
