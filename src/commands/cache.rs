//! Latest runtime state, fed by events.
//!
//! Read-only methods configured with `cached_from` are answered from here
//! while the entry is fresh, skipping the remote call.

use dashmap::DashMap;
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Default)]
pub struct StateCache {
    entries: DashMap<String, (Value, Instant)>,
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, key: &str, value: Value) {
        self.entries
            .insert(key.to_string(), (value, Instant::now()));
    }

    /// The cached value if it is younger than `ttl`.
    pub fn get_fresh(&self, key: &str, ttl: Duration) -> Option<Value> {
        let entry = self.entries.get(key)?;
        let (value, recorded_at) = entry.value();
        if recorded_at.elapsed() < ttl {
            Some(value.clone())
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
