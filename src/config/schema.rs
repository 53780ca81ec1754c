//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the bridge.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Root configuration for the runtime bridge.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BridgeConfig {
    /// External runtime connection settings.
    pub runtime: RuntimeConfig,

    /// Command queue and dispatch loop settings.
    pub dispatch: DispatchConfig,

    /// Methods the runtime accepts.
    pub methods: Vec<MethodConfig>,

    /// Circuit breaker guarding remote calls.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Reconnection, health checks and disconnect buffering.
    pub recovery: RecoveryConfig,

    /// Event stream settings.
    pub events: EventStreamConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,
}

/// External runtime configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// WebSocket endpoint of the runtime (e.g., "ws://127.0.0.1:8765").
    pub url: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8765".to_string(),
        }
    }
}

/// Command queue and dispatcher configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Maximum commands waiting in the queue (back-pressure).
    pub queue_capacity: usize,

    /// Maximum commands pulled per drain iteration.
    pub batch_size: usize,

    /// How long the drain loop waits for new work before polling again.
    pub poll_interval_ms: u64,

    /// Highest accepted priority (higher = more urgent).
    pub max_priority: u8,
}

impl DispatchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
            batch_size: 10,
            poll_interval_ms: 100,
            max_priority: 10,
        }
    }
}

/// A method the runtime accepts.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MethodConfig {
    /// Method selector (e.g., "pathfinder.goto").
    pub name: String,

    /// Method-specific timeout; falls back to `circuit_breaker.timeout_ms`.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Serve this method from the latest payload of the named event type.
    #[serde(default)]
    pub cached_from: Option<String>,

    /// Maximum age of a cached payload.
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,
}

impl MethodConfig {
    /// A plain remote method with the default timeout.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            timeout_ms: None,
            cached_from: None,
            cache_ttl_ms: default_cache_ttl_ms(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn cached_from(mut self, event_type: impl Into<String>) -> Self {
        self.cached_from = Some(event_type.into());
        self
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }
}

fn default_cache_ttl_ms() -> u64 {
    1000
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,

    /// Windowed failure rate (0.0-1.0) that opens the circuit.
    pub failure_rate_threshold: f64,

    /// Samples required in the window before the rate check applies.
    pub minimum_requests: usize,

    /// Number of recent outcomes kept for the rate check.
    pub sliding_window_size: usize,

    /// Per-call timeout in milliseconds, used for methods without their own.
    pub timeout_ms: u64,

    /// Base delay before an open circuit admits a probe.
    pub recovery_timeout_ms: u64,

    /// Upper bound for the open delay.
    pub max_recovery_timeout_ms: u64,

    /// Growth factor applied on each consecutive re-open.
    pub backoff_multiplier: f64,

    /// Cap on the backoff exponent.
    pub backoff_exponent_cap: u32,

    /// Half-open successes required to close.
    pub success_threshold: u32,

    /// Concurrent probes admitted while half-open.
    pub half_open_max_calls: u32,

    /// Add up to 10% random jitter to the open delay.
    pub jitter: bool,
}

impl CircuitBreakerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }

    pub fn max_recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.max_recovery_timeout_ms)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_rate_threshold: 0.5,
            minimum_requests: 10,
            sliding_window_size: 100,
            timeout_ms: 30_000,
            recovery_timeout_ms: 60_000,
            max_recovery_timeout_ms: 300_000,
            backoff_multiplier: 2.0,
            backoff_exponent_cap: 5,
            success_threshold: 3,
            half_open_max_calls: 3,
            jitter: true,
        }
    }
}

/// What to do with an inbound event when the disconnect buffer is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest buffered event to make room.
    #[default]
    DropOldest,
    /// Discard the incoming event.
    DropNewest,
    /// Discard the incoming event and report failure to the producer.
    Reject,
}

/// Connection recovery configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Connection attempts before giving up (state becomes Failed).
    pub max_retries: u32,

    /// Delay after the first failed attempt.
    pub initial_delay_ms: u64,

    /// Upper bound for the retry delay.
    pub max_delay_ms: u64,

    /// Growth factor between attempts.
    pub backoff_multiplier: f64,

    /// Add up to 10% random jitter to retry delays.
    pub jitter: bool,

    /// Deadline for a single connection attempt.
    pub connect_timeout_ms: u64,

    /// Interval between health probes while connected.
    pub health_check_interval_ms: u64,

    /// Deadline for a single health probe.
    pub health_check_timeout_ms: u64,

    /// Capacity of the disconnect buffer.
    pub max_queued_events: usize,

    /// Overflow handling for the disconnect buffer.
    pub overflow_policy: OverflowPolicy,

    /// Replay buffered events after reconnecting.
    pub enable_event_catch_up: bool,

    /// Maximum age of a buffered event still eligible for replay.
    pub catch_up_window_ms: u64,

    /// Invoke the resync hook after reconnecting.
    pub enable_state_resync: bool,
}

impl RecoveryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }

    pub fn catch_up_window(&self) -> Duration {
        Duration::from_millis(self.catch_up_window_ms)
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            initial_delay_ms: 1000,
            max_delay_ms: 300_000,
            backoff_multiplier: 2.0,
            jitter: true,
            connect_timeout_ms: 10_000,
            health_check_interval_ms: 30_000,
            health_check_timeout_ms: 5000,
            max_queued_events: 10_000,
            overflow_policy: OverflowPolicy::DropOldest,
            enable_event_catch_up: true,
            catch_up_window_ms: 300_000,
            enable_state_resync: true,
        }
    }
}

/// Event stream configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventStreamConfig {
    /// Events kept for introspection; oldest evicted first.
    pub max_history_size: usize,

    /// Filters applied before handlers see an event.
    pub filters: EventFilterConfig,
}

impl Default for EventStreamConfig {
    fn default() -> Self {
        Self {
            max_history_size: 1000,
            filters: EventFilterConfig::default(),
        }
    }
}

/// Event filter chain configuration. Empty lists and `None` add no filter.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventFilterConfig {
    /// Only these types (names or `*`/`?` globs) reach handlers, if non-empty.
    pub allowed_types: Vec<String>,

    /// Types never dispatched; checked before `allowed_types`.
    pub blocked_types: Vec<String>,

    /// Per-type cap, averaged over `frequency_window_ms`.
    pub max_events_per_second: Option<f64>,

    pub frequency_window_ms: u64,

    /// Fraction of events kept per type (e.g., 0.1 keeps every 10th).
    pub sampling: HashMap<String, f64>,

    /// Types containing any of these (case-insensitive) skip all filters.
    pub bypass_keywords: Vec<String>,
}

impl EventFilterConfig {
    pub fn frequency_window(&self) -> Duration {
        Duration::from_millis(self.frequency_window_ms)
    }
}

impl Default for EventFilterConfig {
    fn default() -> Self {
        Self {
            allowed_types: Vec::new(),
            blocked_types: Vec::new(),
            max_events_per_second: None,
            frequency_window_ms: 60_000,
            sampling: HashMap::new(),
            bypass_keywords: Vec::new(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Human-readable or JSON log lines.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
