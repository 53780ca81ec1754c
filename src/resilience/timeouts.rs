//! Timeout resolution for remote calls.
//!
//! # Design Decisions
//! - Every remote call has a deadline
//! - Precedence: per-command override, then per-method, then default
//! - A timeout resolves the caller's command; it is never retried here

use std::collections::HashMap;
use std::time::Duration;

use crate::config::{CircuitBreakerConfig, MethodConfig};

/// Resolves the deadline for a command.
#[derive(Debug, Clone)]
pub struct TimeoutPolicy {
    default: Duration,
    per_method: HashMap<String, Duration>,
}

impl TimeoutPolicy {
    pub fn new(default: Duration) -> Self {
        Self {
            default,
            per_method: HashMap::new(),
        }
    }

    /// The breaker's per-call timeout is the default deadline.
    pub fn from_config(breaker: &CircuitBreakerConfig, methods: &[MethodConfig]) -> Self {
        let mut policy = Self::new(breaker.timeout());
        for method in methods {
            if let Some(ms) = method.timeout_ms {
                policy = policy.with_method(&method.name, Duration::from_millis(ms));
            }
        }
        policy
    }

    pub fn with_method(mut self, method: &str, timeout: Duration) -> Self {
        self.per_method.insert(method.to_string(), timeout);
        self
    }

    pub fn default_timeout(&self) -> Duration {
        self.default
    }

    pub fn resolve(&self, method: &str, requested: Option<Duration>) -> Duration {
        requested
            .or_else(|| self.per_method.get(method).copied())
            .unwrap_or(self.default)
    }
}
