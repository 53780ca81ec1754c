//! Circuit breaker for runtime protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: runtime assumed down, calls fail fast (or use the fallback)
//! - Half-Open: probing whether the runtime recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= failure_threshold,
//!                or windowed failure rate >= failure_rate_threshold
//! Open → Half-Open: next_attempt_at reached (checked lazily on call)
//! Half-Open → Closed: success_threshold successes
//! Half-Open → Open: any failure, with a longer delay
//! ```
//!
//! # Design Decisions
//! - Open delay grows per consecutive open: min(base * multiplier^n, max)
//! - A timeout is a failure
//! - Half-Open admits a bounded number of concurrent probes
//! - State lives behind a short-lived mutex never held across an await

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

pub use crate::config::CircuitBreakerConfig;
use crate::error::HookError;
use crate::observability::metrics;
use crate::resilience::backoff::Backoff;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    fn gauge_value(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }
}

/// Monotonic counters; never reset by `reset()`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CircuitBreakerStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub timeouts: u64,
    pub rejected_requests: u64,
    pub circuit_opens: u64,
    pub circuit_closes: u64,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
}

impl CircuitBreakerStats {
    pub fn failure_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.failed_requests as f64 / self.total_requests as f64
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.successful_requests as f64 / self.total_requests as f64
    }
}

/// Point-in-time view of a breaker, for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub failure_rate: f64,
    pub success_rate: f64,
    pub recent_failure_rate: f64,
    pub time_until_next_attempt_ms: Option<u64>,
    pub has_fallback: bool,
    pub stats: CircuitBreakerStats,
}

/// Error returned by a protected call.
#[derive(Debug, Clone, PartialEq)]
pub enum BreakerError<E> {
    /// Short-circuited without invoking the protected call.
    Open { name: String, retry_in: Duration },
    /// The protected call exceeded its deadline.
    Timeout(Duration),
    /// The protected call itself failed.
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for BreakerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerError::Open { name, retry_in } => {
                write!(f, "circuit breaker '{}' is open (retry in {:?})", name, retry_in)
            }
            BreakerError::Timeout(after) => write!(f, "operation timed out after {:?}", after),
            BreakerError::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for BreakerError<E> {}

/// Produces a substitute value while the circuit is open.
pub type Fallback<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, HookError>> + Send + Sync>;

enum Admission {
    Allowed { probe: bool },
    Rejected { retry_in: Duration },
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    next_attempt_at: Option<Instant>,
    half_open_in_flight: u32,
    window: VecDeque<bool>,
    stats: CircuitBreakerStats,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            next_attempt_at: None,
            half_open_in_flight: 0,
            window: VecDeque::new(),
            stats: CircuitBreakerStats::default(),
        }
    }

    fn window_failure_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let failures = self.window.iter().filter(|ok| !**ok).count();
        failures as f64 / self.window.len() as f64
    }
}

/// A named circuit breaker guarding calls that produce `T`.
pub struct CircuitBreaker<T> {
    name: String,
    config: CircuitBreakerConfig,
    backoff: Backoff,
    inner: Mutex<BreakerInner>,
    fallback: Mutex<Option<Fallback<T>>>,
}

impl<T> CircuitBreaker<T> {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let backoff = Backoff::new(
            config.recovery_timeout(),
            config.backoff_multiplier,
            config.max_recovery_timeout(),
        )
        .with_jitter(config.jitter);
        let name = name.into();

        tracing::debug!(
            breaker = %name,
            failure_threshold = config.failure_threshold,
            recovery_timeout_ms = config.recovery_timeout_ms,
            "Circuit breaker initialized"
        );

        Self {
            name,
            config,
            backoff,
            inner: Mutex::new(BreakerInner::new()),
            fallback: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state. An elapsed Open timer is only acted upon by the next call.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    pub fn next_attempt_at(&self) -> Option<Instant> {
        self.lock().next_attempt_at
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        self.lock().stats.clone()
    }

    /// Register a fallback used while the circuit is open.
    pub fn set_fallback(&self, fallback: Fallback<T>) {
        *self.fallback.lock().unwrap_or_else(PoisonError::into_inner) = Some(fallback);
        tracing::info!(breaker = %self.name, "Fallback handler set");
    }

    /// Execute `f` under protection, bounded by the configured timeout.
    pub async fn call<F, Fut, E>(&self, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.call_with_timeout(self.config.timeout(), f).await
    }

    /// Execute `f` under protection, bounded by `timeout`.
    pub async fn call_with_timeout<F, Fut, E>(
        &self,
        timeout: Duration,
        f: F,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let probe = match self.admit() {
            Admission::Allowed { probe } => probe,
            Admission::Rejected { retry_in } => return self.short_circuit(retry_in).await,
        };

        let mut guard = ProbeGuard {
            breaker: self,
            armed: probe,
        };

        match tokio::time::timeout(timeout, f()).await {
            Ok(Ok(value)) => {
                guard.disarm();
                self.on_success();
                Ok(value)
            }
            Ok(Err(e)) => {
                guard.disarm();
                self.on_failure(false, &e.to_string());
                Err(BreakerError::Inner(e))
            }
            Err(_) => {
                guard.disarm();
                self.on_failure(true, "timeout");
                Err(BreakerError::Timeout(timeout))
            }
        }
    }

    async fn short_circuit<E>(&self, retry_in: Duration) -> Result<T, BreakerError<E>> {
        tracing::debug!(breaker = %self.name, retry_in = ?retry_in, "Circuit open, rejecting call");

        let fallback = self
            .fallback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(fallback) = fallback {
            match fallback().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::error!(breaker = %self.name, error = %e, "Fallback handler failed");
                }
            }
        }

        Err(BreakerError::Open {
            name: self.name.clone(),
            retry_in,
        })
    }

    fn admit(&self) -> Admission {
        let mut inner = self.lock();
        inner.stats.total_requests += 1;
        let now = Instant::now();

        if inner.state == CircuitState::Open {
            match inner.next_attempt_at {
                Some(at) if now < at => {
                    inner.stats.rejected_requests += 1;
                    return Admission::Rejected { retry_in: at - now };
                }
                _ => self.to_half_open(&mut inner),
            }
        }

        if inner.state == CircuitState::HalfOpen {
            if inner.half_open_in_flight >= self.config.half_open_max_calls {
                inner.stats.rejected_requests += 1;
                return Admission::Rejected {
                    retry_in: Duration::ZERO,
                };
            }
            inner.half_open_in_flight += 1;
            return Admission::Allowed { probe: true };
        }

        Admission::Allowed { probe: false }
    }

    fn on_success(&self) {
        let mut inner = self.lock();
        inner.stats.successful_requests += 1;
        inner.stats.last_success_at = Some(Utc::now());
        self.push_outcome(&mut inner, true);

        match inner.state {
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    self.to_closed(&mut inner);
                }
            }
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self, timed_out: bool, error: &str) {
        let mut inner = self.lock();
        inner.stats.failed_requests += 1;
        if timed_out {
            inner.stats.timeouts += 1;
        }
        inner.stats.last_failure_at = Some(Utc::now());
        self.push_outcome(&mut inner, false);

        tracing::debug!(breaker = %self.name, error = %error, state = inner.state.as_str(), "Protected call failed");

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if self.should_open(&inner) {
                    self.to_open(&mut inner);
                }
            }
            CircuitState::HalfOpen => self.to_open(&mut inner),
            CircuitState::Open => {}
        }
    }

    fn push_outcome(&self, inner: &mut BreakerInner, success: bool) {
        inner.window.push_back(success);
        while inner.window.len() > self.config.sliding_window_size {
            inner.window.pop_front();
        }
    }

    fn should_open(&self, inner: &BreakerInner) -> bool {
        if inner.failure_count >= self.config.failure_threshold {
            return true;
        }
        inner.window.len() >= self.config.minimum_requests
            && inner.window_failure_rate() >= self.config.failure_rate_threshold
    }

    fn to_open(&self, inner: &mut BreakerInner) {
        let previous = inner.state;
        inner.state = CircuitState::Open;
        inner.success_count = 0;
        inner.half_open_in_flight = 0;
        inner.stats.circuit_opens += 1;

        let exponent = inner
            .stats
            .circuit_opens
            .min(u64::from(self.config.backoff_exponent_cap)) as u32;
        let delay = self.backoff.delay(exponent);
        inner.next_attempt_at = Some(Instant::now() + delay);

        tracing::warn!(
            breaker = %self.name,
            previous_state = previous.as_str(),
            failure_count = inner.failure_count,
            next_attempt_in = ?delay,
            "Circuit breaker opened"
        );
        metrics::record_circuit_transition(&self.name, "open", CircuitState::Open.gauge_value());
    }

    fn to_half_open(&self, inner: &mut BreakerInner) {
        inner.state = CircuitState::HalfOpen;
        inner.success_count = 0;
        inner.half_open_in_flight = 0;

        tracing::info!(breaker = %self.name, "Circuit breaker half-open");
        metrics::record_circuit_transition(
            &self.name,
            "half_open",
            CircuitState::HalfOpen.gauge_value(),
        );
    }

    fn to_closed(&self, inner: &mut BreakerInner) {
        let previous = inner.state;
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.half_open_in_flight = 0;
        inner.next_attempt_at = None;
        inner.window.clear();
        inner.stats.circuit_closes += 1;

        tracing::info!(breaker = %self.name, previous_state = previous.as_str(), "Circuit breaker closed");
        metrics::record_circuit_transition(&self.name, "closed", CircuitState::Closed.gauge_value());
    }

    /// Return to Closed with fresh counters; statistics are kept.
    pub fn reset(&self) {
        let mut inner = self.lock();
        let stats = std::mem::take(&mut inner.stats);
        *inner = BreakerInner::new();
        inner.stats = stats;
        tracing::info!(breaker = %self.name, "Circuit breaker reset");
    }

    /// Open the circuit regardless of counters (maintenance).
    pub fn force_open(&self) {
        let mut inner = self.lock();
        self.to_open(&mut inner);
        tracing::warn!(breaker = %self.name, "Circuit breaker forced open");
    }

    /// Close the circuit regardless of counters.
    pub fn force_close(&self) {
        let mut inner = self.lock();
        self.to_closed(&mut inner);
        tracing::info!(breaker = %self.name, "Circuit breaker forced closed");
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let has_fallback = self
            .fallback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some();
        let inner = self.lock();
        let time_until_next_attempt_ms = match (inner.state, inner.next_attempt_at) {
            (CircuitState::Open, Some(at)) => {
                Some(at.saturating_duration_since(Instant::now()).as_millis() as u64)
            }
            _ => None,
        };

        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            failure_rate: inner.stats.failure_rate(),
            success_rate: inner.stats.success_rate(),
            recent_failure_rate: inner.window_failure_rate(),
            time_until_next_attempt_ms,
            has_fallback,
            stats: inner.stats.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> fmt::Debug for CircuitBreaker<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

/// Releases a half-open probe slot if the call is dropped mid-flight.
struct ProbeGuard<'a, T> {
    breaker: &'a CircuitBreaker<T>,
    armed: bool,
}

impl<T> ProbeGuard<'_, T> {
    fn disarm(&mut self) {
        if self.armed {
            self.armed = false;
            let mut inner = self.breaker.lock();
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
    }
}

impl<T> Drop for ProbeGuard<'_, T> {
    fn drop(&mut self) {
        self.disarm();
    }
}
