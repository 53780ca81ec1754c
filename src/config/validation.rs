//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (capacities > 0, rates in (0, 1], multipliers >= 1)
//! - Detect duplicate method definitions
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: BridgeConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;

use crate::config::schema::BridgeConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field (e.g., "recovery.max_retries").
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a configuration, collecting every problem found.
pub fn validate_config(config: &BridgeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    match url::Url::parse(&config.runtime.url) {
        Ok(url) if url.scheme() == "ws" || url.scheme() == "wss" => {}
        Ok(url) => errors.push(ValidationError::new(
            "runtime.url",
            format!("unsupported scheme '{}'", url.scheme()),
        )),
        Err(e) => errors.push(ValidationError::new("runtime.url", e.to_string())),
    }

    let dispatch = &config.dispatch;
    if dispatch.queue_capacity == 0 {
        errors.push(ValidationError::new("dispatch.queue_capacity", "must be > 0"));
    }
    if dispatch.batch_size == 0 {
        errors.push(ValidationError::new("dispatch.batch_size", "must be > 0"));
    }
    if dispatch.poll_interval_ms == 0 {
        errors.push(ValidationError::new("dispatch.poll_interval_ms", "must be > 0"));
    }

    let mut seen = HashSet::new();
    for (i, method) in config.methods.iter().enumerate() {
        let field = format!("methods[{}]", i);
        if method.name.trim().is_empty() {
            errors.push(ValidationError::new(format!("{}.name", field), "must not be empty"));
        } else if !seen.insert(method.name.as_str()) {
            errors.push(ValidationError::new(
                format!("{}.name", field),
                format!("duplicate method '{}'", method.name),
            ));
        }
        if method.timeout_ms == Some(0) {
            errors.push(ValidationError::new(format!("{}.timeout_ms", field), "must be > 0"));
        }
    }

    let cb = &config.circuit_breaker;
    if cb.failure_threshold == 0 {
        errors.push(ValidationError::new("circuit_breaker.failure_threshold", "must be > 0"));
    }
    if !(cb.failure_rate_threshold > 0.0 && cb.failure_rate_threshold <= 1.0) {
        errors.push(ValidationError::new(
            "circuit_breaker.failure_rate_threshold",
            "must be in (0, 1]",
        ));
    }
    if cb.sliding_window_size == 0 {
        errors.push(ValidationError::new("circuit_breaker.sliding_window_size", "must be > 0"));
    }
    if cb.minimum_requests > cb.sliding_window_size {
        errors.push(ValidationError::new(
            "circuit_breaker.minimum_requests",
            "must not exceed sliding_window_size",
        ));
    }
    if cb.timeout_ms == 0 {
        errors.push(ValidationError::new("circuit_breaker.timeout_ms", "must be > 0"));
    }
    if cb.recovery_timeout_ms > cb.max_recovery_timeout_ms {
        errors.push(ValidationError::new(
            "circuit_breaker.recovery_timeout_ms",
            "must not exceed max_recovery_timeout_ms",
        ));
    }
    if cb.backoff_multiplier < 1.0 {
        errors.push(ValidationError::new("circuit_breaker.backoff_multiplier", "must be >= 1.0"));
    }
    if cb.success_threshold == 0 {
        errors.push(ValidationError::new("circuit_breaker.success_threshold", "must be > 0"));
    }
    if cb.half_open_max_calls == 0 {
        errors.push(ValidationError::new("circuit_breaker.half_open_max_calls", "must be > 0"));
    }

    let rc = &config.recovery;
    if rc.max_retries == 0 {
        errors.push(ValidationError::new("recovery.max_retries", "must be > 0"));
    }
    if rc.initial_delay_ms > rc.max_delay_ms {
        errors.push(ValidationError::new(
            "recovery.initial_delay_ms",
            "must not exceed max_delay_ms",
        ));
    }
    if rc.backoff_multiplier < 1.0 {
        errors.push(ValidationError::new("recovery.backoff_multiplier", "must be >= 1.0"));
    }
    if rc.health_check_interval_ms == 0 {
        errors.push(ValidationError::new("recovery.health_check_interval_ms", "must be > 0"));
    }
    if rc.max_queued_events == 0 {
        errors.push(ValidationError::new("recovery.max_queued_events", "must be > 0"));
    }

    if config.events.max_history_size == 0 {
        errors.push(ValidationError::new("events.max_history_size", "must be > 0"));
    }
    let filters = &config.events.filters;
    if let Some(rate) = filters.max_events_per_second {
        if rate.is_nan() || rate <= 0.0 {
            errors.push(ValidationError::new(
                "events.filters.max_events_per_second",
                "must be > 0",
            ));
        }
    }
    if filters.frequency_window_ms == 0 {
        errors.push(ValidationError::new("events.filters.frequency_window_ms", "must be > 0"));
    }
    let mut sampled: Vec<(&String, &f64)> = filters.sampling.iter().collect();
    sampled.sort_by(|a, b| a.0.cmp(b.0));
    for (event_type, rate) in sampled {
        if rate.is_nan() || *rate <= 0.0 || *rate > 1.0 {
            errors.push(ValidationError::new(
                format!("events.filters.sampling.{}", event_type),
                "must be in (0, 1]",
            ));
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<std::net::SocketAddr>().is_err()
    {
        errors.push(ValidationError::new("observability.metrics_address", "invalid socket address"));
    }
    if config.admin.enabled {
        if config.admin.bind_address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(ValidationError::new("admin.bind_address", "invalid socket address"));
        }
        if config.admin.api_key.is_empty() {
            errors.push(ValidationError::new("admin.api_key", "must not be empty"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
