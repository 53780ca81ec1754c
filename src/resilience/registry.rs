//! Named circuit breakers owned by the bridge instance.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;

use crate::config::CircuitBreakerConfig;
use crate::resilience::circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitState};

/// Aggregate view over every registered breaker.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct RegistrySummary {
    pub total: usize,
    pub closed: usize,
    pub open: usize,
    pub half_open: usize,
}

/// Registry of breakers keyed by name.
///
/// Each bridge constructs its own registry; nothing is process-global.
pub struct BreakerRegistry<T> {
    default_config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker<T>>>,
}

impl<T> BreakerRegistry<T> {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            default_config,
            breakers: DashMap::new(),
        }
    }

    /// Fetch the breaker for `name`, creating it with the default config.
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker<T>> {
        self.get_or_create_with(name, || self.default_config.clone())
    }

    /// Fetch the breaker for `name`, creating it with a specific config.
    pub fn get_or_create_with(
        &self,
        name: &str,
        config: impl FnOnce() -> CircuitBreakerConfig,
    ) -> Arc<CircuitBreaker<T>> {
        if let Some(existing) = self.breakers.get(name) {
            return existing.clone();
        }
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, config())))
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker<T>>> {
        self.breakers.get(name).map(|b| b.clone())
    }

    pub fn remove(&self, name: &str) -> Option<Arc<CircuitBreaker<T>>> {
        self.breakers.remove(name).map(|(_, b)| b)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn reset_all(&self) {
        for entry in self.breakers.iter() {
            entry.value().reset();
        }
        tracing::info!(count = self.breakers.len(), "All circuit breakers reset");
    }

    /// Snapshots sorted by name.
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<BreakerSnapshot> =
            self.breakers.iter().map(|e| e.value().snapshot()).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    pub fn summary(&self) -> RegistrySummary {
        let mut summary = RegistrySummary::default();
        for entry in self.breakers.iter() {
            summary.total += 1;
            match entry.value().state() {
                CircuitState::Closed => summary.closed += 1,
                CircuitState::Open => summary.open += 1,
                CircuitState::HalfOpen => summary.half_open += 1,
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_or_create_returns_same_instance() {
        let registry: BreakerRegistry<u32> = BreakerRegistry::new(CircuitBreakerConfig::default());
        let a = registry.get_or_create("runtime");
        let b = registry.get_or_create("runtime");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.names(), vec!["runtime".to_string()]);
    }

    #[tokio::test]
    async fn test_registries_are_independent() {
        let first: BreakerRegistry<u32> = BreakerRegistry::new(CircuitBreakerConfig::default());
        let second: BreakerRegistry<u32> = BreakerRegistry::new(CircuitBreakerConfig::default());
        first.get_or_create("runtime").force_open();

        assert!(second.get("runtime").is_none());
        assert_eq!(
            second.get_or_create("runtime").state(),
            CircuitState::Closed
        );
    }

    #[tokio::test]
    async fn test_summary_and_reset_all() {
        let registry: BreakerRegistry<u32> = BreakerRegistry::new(CircuitBreakerConfig::default());
        registry.get_or_create("a").force_open();
        registry.get_or_create("b");

        assert_eq!(
            registry.summary(),
            RegistrySummary {
                total: 2,
                closed: 1,
                open: 1,
                half_open: 0
            }
        );

        registry.reset_all();
        assert_eq!(registry.summary().closed, 2);
        let names: Vec<String> = registry.snapshots().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);

        assert!(registry.remove("a").is_some());
        assert!(registry.get("a").is_none());
    }
}
