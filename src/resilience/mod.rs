//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Remote call:
//!     → timeouts.rs (resolve the deadline for the method)
//!     → registry.rs (look up the breaker guarding the runtime)
//!     → circuit_breaker.rs (gate, time-bound and record the call)
//!     → backoff.rs (open delay after each consecutive trip)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - No implicit retries; retry policy belongs to the caller
//! - Breakers live in a registry owned by the bridge, never in a global

pub mod backoff;
pub mod circuit_breaker;
pub mod registry;
pub mod timeouts;

pub use backoff::Backoff;
pub use circuit_breaker::{
    BreakerError, BreakerSnapshot, CircuitBreaker, CircuitBreakerStats, CircuitState, Fallback,
};
pub use registry::{BreakerRegistry, RegistrySummary};
pub use timeouts::TimeoutPolicy;
