use crate::config::types::{
    CircuitBreakerConfig, Config, RateLimitConfig, RetryConfig, SchedulerConfig, SessionConfig,
};
use crate::ConfigError;

/// Upper bound on concurrent fetches
pub const MAX_CONCURRENCY_LIMIT: u32 = 256;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_scheduler_config(&config.scheduler)?;
    validate_rate_limit_config(&config.rate_limit)?;
    validate_circuit_breaker_config(&config.circuit_breaker)?;
    validate_retry_config(&config.retry)?;
    validate_session_config(&config.session)?;
    Ok(())
}

/// Validates scheduler configuration
pub fn validate_scheduler_config(config: &SchedulerConfig) -> Result<(), ConfigError> {
    if config.max_concurrency < 1 || config.max_concurrency > MAX_CONCURRENCY_LIMIT {
        return Err(ConfigError::Validation(format!(
            "max_concurrency must be between 1 and {}, got {}",
            MAX_CONCURRENCY_LIMIT, config.max_concurrency
        )));
    }

    if config.fetch_timeout_ms < 1 {
        return Err(ConfigError::Validation(
            "fetch_timeout_ms must be >= 1ms".to_string(),
        ));
    }

    Ok(())
}

/// Validates rate limiter configuration
pub fn validate_rate_limit_config(config: &RateLimitConfig) -> Result<(), ConfigError> {
    if config.max_requests < 1 {
        return Err(ConfigError::Validation(format!(
            "rate limit max_requests must be >= 1, got {}",
            config.max_requests
        )));
    }

    if config.window_ms < 1 {
        return Err(ConfigError::Validation(
            "rate limit window_ms must be >= 1ms".to_string(),
        ));
    }

    Ok(())
}

/// Validates circuit breaker configuration
pub fn validate_circuit_breaker_config(config: &CircuitBreakerConfig) -> Result<(), ConfigError> {
    if config.failure_threshold < 1 {
        return Err(ConfigError::Validation(format!(
            "failure_threshold must be >= 1, got {}",
            config.failure_threshold
        )));
    }

    if config.open_timeout_ms < 1 {
        return Err(ConfigError::Validation(
            "open_timeout_ms must be >= 1ms".to_string(),
        ));
    }

    Ok(())
}

/// Validates retry configuration
pub fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "max_attempts must be >= 1, got {}",
            config.max_attempts
        )));
    }

    if config.initial_delay_ms < 1 {
        return Err(ConfigError::Validation(
            "initial_delay_ms must be >= 1ms".to_string(),
        ));
    }

    if config.max_delay_ms < config.initial_delay_ms {
        return Err(ConfigError::Validation(format!(
            "max_delay_ms ({}) must be >= initial_delay_ms ({})",
            config.max_delay_ms, config.initial_delay_ms
        )));
    }

    if !config.multiplier.is_finite() || config.multiplier < 1.0 {
        return Err(ConfigError::Validation(format!(
            "multiplier must be a finite number >= 1.0, got {}",
            config.multiplier
        )));
    }

    Ok(())
}

/// Validates session configuration
pub fn validate_session_config(config: &SessionConfig) -> Result<(), ConfigError> {
    if config.max_requests_per_identity < 1 {
        return Err(ConfigError::Validation(format!(
            "max_requests_per_identity must be >= 1, got {}",
            config.max_requests_per_identity
        )));
    }

    if config.identity_ttl_ms < 1 {
        return Err(ConfigError::Validation(
            "identity_ttl_ms must be >= 1ms".to_string(),
        ));
    }

    if config.pool_size < 1 {
        return Err(ConfigError::Validation(format!(
            "pool_size must be >= 1, got {}",
            config.pool_size
        )));
    }

    Ok(())
}
