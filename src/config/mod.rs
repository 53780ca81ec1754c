//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → BridgeConfig (validated, immutable)
//!     → sections handed to each subsystem at construction
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::AdminConfig;
pub use schema::BridgeConfig;
pub use schema::CircuitBreakerConfig;
pub use schema::DispatchConfig;
pub use schema::EventFilterConfig;
pub use schema::EventStreamConfig;
pub use schema::LogFormat;
pub use schema::MethodConfig;
pub use schema::ObservabilityConfig;
pub use schema::OverflowPolicy;
pub use schema::RecoveryConfig;
pub use schema::RuntimeConfig;
