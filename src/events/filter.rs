//! Event filtering ahead of handler dispatch.
//!
//! # Responsibilities
//! - Allow/block event types by exact name or glob (`*`, `?`)
//! - Cap the rate of each event type over a sliding window
//! - Keep every Nth event of sampled types
//! - Count processed/passed/filtered per filter and for the chain
//!
//! # Design Decisions
//! - Filters run in insertion order; the first rejection wins
//! - Events whose type contains a bypass keyword skip every filter
//! - Glob matching only, no regex

use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::EventFilterConfig;
use crate::events::types::RuntimeEvent;

/// Decides whether an event reaches the handlers.
pub trait EventFilter: Send + Sync {
    fn name(&self) -> &str;

    fn should_process(&self, event: &RuntimeEvent) -> bool;
}

/// Match `text` against a glob where `*` is any run and `?` any one char.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, t));
            p += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            t = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|c| *c == '*')
}

fn is_glob(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?')
}

/// Exact names and glob patterns, split once at construction.
#[derive(Debug, Default)]
struct TypeSet {
    exact: HashSet<String>,
    globs: Vec<String>,
}

impl TypeSet {
    fn new(types: &[String]) -> Self {
        let mut set = Self::default();
        for t in types {
            if is_glob(t) {
                set.globs.push(t.clone());
            } else {
                set.exact.insert(t.clone());
            }
        }
        set
    }

    fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.globs.is_empty()
    }

    fn contains(&self, event_type: &str) -> bool {
        self.exact.contains(event_type) || self.globs.iter().any(|g| glob_match(g, event_type))
    }
}

/// Blocked types are rejected first; a non-empty allow list admits only its members.
#[derive(Debug)]
pub struct EventTypeFilter {
    allowed: TypeSet,
    blocked: TypeSet,
}

impl EventTypeFilter {
    pub fn new(allowed: &[String], blocked: &[String]) -> Self {
        Self {
            allowed: TypeSet::new(allowed),
            blocked: TypeSet::new(blocked),
        }
    }
}

impl EventFilter for EventTypeFilter {
    fn name(&self) -> &str {
        "event_type"
    }

    fn should_process(&self, event: &RuntimeEvent) -> bool {
        if self.blocked.contains(&event.event_type) {
            return false;
        }
        self.allowed.is_empty() || self.allowed.contains(&event.event_type)
    }
}

/// At most `max_per_second * window` events of each type within `window`.
#[derive(Debug)]
pub struct FrequencyFilter {
    limit: usize,
    window: Duration,
    seen: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl FrequencyFilter {
    pub fn new(max_per_second: f64, window: Duration) -> Self {
        let limit = (max_per_second * window.as_secs_f64()).floor().max(1.0) as usize;
        Self {
            limit,
            window,
            seen: Mutex::new(HashMap::new()),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl EventFilter for FrequencyFilter {
    fn name(&self) -> &str {
        "frequency"
    }

    fn should_process(&self, event: &RuntimeEvent) -> bool {
        let now = Instant::now();
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        let times = seen.entry(event.event_type.clone()).or_default();
        while times
            .front()
            .is_some_and(|t| now.duration_since(*t) >= self.window)
        {
            times.pop_front();
        }
        if times.len() >= self.limit {
            return false;
        }
        times.push_back(now);
        true
    }
}

/// Deterministic sampling: a rate of 0.25 keeps every 4th event of that type.
#[derive(Debug)]
pub struct SamplingFilter {
    every: HashMap<String, u64>,
    counters: Mutex<HashMap<String, u64>>,
}

impl SamplingFilter {
    pub fn new(rates: &HashMap<String, f64>) -> Self {
        let every = rates
            .iter()
            .filter(|(_, rate)| **rate < 1.0)
            .map(|(t, rate)| (t.clone(), (1.0 / rate).round().max(1.0) as u64))
            .collect();
        Self {
            every,
            counters: Mutex::new(HashMap::new()),
        }
    }
}

impl EventFilter for SamplingFilter {
    fn name(&self) -> &str {
        "sampling"
    }

    fn should_process(&self, event: &RuntimeEvent) -> bool {
        let Some(every) = self.every.get(&event.event_type) else {
            return true;
        };
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        let count = counters.entry(event.event_type.clone()).or_insert(0);
        *count += 1;
        *count % every == 0
    }
}

#[derive(Debug, Default)]
struct Counters {
    processed: AtomicU64,
    passed: AtomicU64,
    filtered: AtomicU64,
}

impl Counters {
    fn record(&self, passed: bool) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        if passed {
            self.passed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.filtered.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.processed.load(Ordering::Relaxed),
            self.passed.load(Ordering::Relaxed),
            self.filtered.load(Ordering::Relaxed),
        )
    }
}

struct Entry {
    filter: Arc<dyn EventFilter>,
    counters: Counters,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct FilterStats {
    pub name: String,
    pub processed: u64,
    pub passed: u64,
    pub filtered: u64,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct FilterChainStats {
    pub total_events: u64,
    pub events_passed: u64,
    pub events_filtered: u64,
    pub filters: Vec<FilterStats>,
}

/// Result of running an event through the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterVerdict {
    Pass,
    Filtered { by: String },
}

/// Ordered filters applied before dispatch.
#[derive(Default)]
pub struct EventFilterChain {
    filters: RwLock<Vec<Arc<Entry>>>,
    bypass_keywords: Vec<String>,
    totals: Counters,
}

impl EventFilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the chain the configuration describes; empty sections add no filter.
    pub fn from_config(config: &EventFilterConfig) -> Self {
        let chain = Self {
            bypass_keywords: config
                .bypass_keywords
                .iter()
                .map(|k| k.to_lowercase())
                .collect(),
            ..Self::default()
        };
        if !config.allowed_types.is_empty() || !config.blocked_types.is_empty() {
            chain.add_filter(Arc::new(EventTypeFilter::new(
                &config.allowed_types,
                &config.blocked_types,
            )));
        }
        if !config.sampling.is_empty() {
            chain.add_filter(Arc::new(SamplingFilter::new(&config.sampling)));
        }
        if let Some(rate) = config.max_events_per_second {
            chain.add_filter(Arc::new(FrequencyFilter::new(rate, config.frequency_window())));
        }
        chain
    }

    pub fn add_filter(&self, filter: Arc<dyn EventFilter>) {
        let mut filters = self.write();
        tracing::info!(filter = filter.name(), total = filters.len() + 1, "Added event filter");
        filters.push(Arc::new(Entry {
            filter,
            counters: Counters::default(),
        }));
    }

    /// Remove the first filter called `name`.
    pub fn remove_filter(&self, name: &str) -> bool {
        let mut filters = self.write();
        match filters.iter().position(|e| e.filter.name() == name) {
            Some(pos) => {
                filters.remove(pos);
                tracing::info!(filter = name, remaining = filters.len(), "Removed event filter");
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn apply(&self, event: &RuntimeEvent) -> FilterVerdict {
        let entries: Vec<Arc<Entry>> = self.read().clone();
        if entries.is_empty() {
            return FilterVerdict::Pass;
        }

        if self.bypasses(&event.event_type) {
            self.totals.record(true);
            return FilterVerdict::Pass;
        }

        for entry in entries {
            let passed = entry.filter.should_process(event);
            entry.counters.record(passed);
            if !passed {
                self.totals.record(false);
                return FilterVerdict::Filtered {
                    by: entry.filter.name().to_string(),
                };
            }
        }
        self.totals.record(true);
        FilterVerdict::Pass
    }

    fn bypasses(&self, event_type: &str) -> bool {
        if self.bypass_keywords.is_empty() {
            return false;
        }
        let event_type = event_type.to_lowercase();
        self.bypass_keywords.iter().any(|k| event_type.contains(k.as_str()))
    }

    pub fn stats(&self) -> FilterChainStats {
        let (total_events, events_passed, events_filtered) = self.totals.snapshot();
        let filters = self
            .read()
            .iter()
            .map(|e| {
                let (processed, passed, filtered) = e.counters.snapshot();
                FilterStats {
                    name: e.filter.name().to_string(),
                    processed,
                    passed,
                    filtered,
                }
            })
            .collect();
        FilterChainStats {
            total_events,
            events_passed,
            events_filtered,
            filters,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Arc<Entry>>> {
        self.filters.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Arc<Entry>>> {
        self.filters.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(kind: &str) -> RuntimeEvent {
        RuntimeEvent::new(kind, json!({}))
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("entity_*", "entity_move"));
        assert!(glob_match("*", ""));
        assert!(glob_match("ch?t", "chat"));
        assert!(glob_match("*_death", "bot_death"));
        assert!(!glob_match("entity_*", "position"));
        assert!(!glob_match("ch?t", "chatt"));
    }

    #[test]
    fn test_blocked_types_win_over_allowed() {
        let filter = EventTypeFilter::new(&strings(&["chat", "entity_*"]), &strings(&["entity_move"]));
        assert!(filter.should_process(&event("chat")));
        assert!(filter.should_process(&event("entity_spawn")));
        assert!(!filter.should_process(&event("entity_move")));
        assert!(!filter.should_process(&event("health")));

        let block_only = EventTypeFilter::new(&[], &strings(&["position"]));
        assert!(block_only.should_process(&event("health")));
        assert!(!block_only.should_process(&event("position")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_frequency_cap_per_type_and_window() {
        let filter = FrequencyFilter::new(2.0, Duration::from_secs(1));
        assert_eq!(filter.limit(), 2);

        assert!(filter.should_process(&event("position")));
        assert!(filter.should_process(&event("position")));
        assert!(!filter.should_process(&event("position")));
        // other types have their own budget
        assert!(filter.should_process(&event("chat")));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(filter.should_process(&event("position")));
    }

    #[test]
    fn test_sampling_keeps_every_nth() {
        let mut rates = HashMap::new();
        rates.insert("position".to_string(), 0.25);
        let filter = SamplingFilter::new(&rates);

        let kept = (0..8).filter(|_| filter.should_process(&event("position"))).count();
        assert_eq!(kept, 2);
        assert!(filter.should_process(&event("chat")));
    }

    #[test]
    fn test_chain_stops_at_first_rejection() {
        let chain = EventFilterChain::from_config(&EventFilterConfig {
            blocked_types: strings(&["position"]),
            max_events_per_second: Some(100.0),
            ..EventFilterConfig::default()
        });
        assert_eq!(chain.len(), 2);

        assert_eq!(chain.apply(&event("chat")), FilterVerdict::Pass);
        assert_eq!(
            chain.apply(&event("position")),
            FilterVerdict::Filtered { by: "event_type".into() }
        );

        let stats = chain.stats();
        assert_eq!(stats.total_events, 2);
        assert_eq!(stats.events_filtered, 1);
        assert_eq!(stats.filters[0].filtered, 1);
        // the rejected event never reached the frequency filter
        assert_eq!(stats.filters[1].processed, 1);
    }

    #[test]
    fn test_bypass_keywords_skip_filters() {
        let chain = EventFilterChain::from_config(&EventFilterConfig {
            allowed_types: strings(&["chat"]),
            bypass_keywords: strings(&["Death"]),
            ..EventFilterConfig::default()
        });
        assert_eq!(chain.apply(&event("bot_death")), FilterVerdict::Pass);
        assert!(matches!(chain.apply(&event("health")), FilterVerdict::Filtered { .. }));
    }

    #[test]
    fn test_remove_and_clear() {
        let chain = EventFilterChain::new();
        assert_eq!(chain.apply(&event("anything")), FilterVerdict::Pass);
        chain.add_filter(Arc::new(EventTypeFilter::new(&[], &strings(&["x"]))));
        chain.add_filter(Arc::new(FrequencyFilter::new(1.0, Duration::from_secs(1))));

        assert!(chain.remove_filter("event_type"));
        assert!(!chain.remove_filter("event_type"));
        assert_eq!(chain.apply(&event("x")), FilterVerdict::Pass);
        chain.clear();
        assert!(chain.is_empty());
    }
}
