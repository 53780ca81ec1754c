//! Runtime bridge library.
//!
//! Forwards prioritized commands to an external scripting runtime and
//! streams the runtime's events back to registered handlers, surviving
//! connection loss along the way.

pub mod admin;
pub mod bridge;
pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod observability;
pub mod recovery;
pub mod resilience;
pub mod runtime;

pub use bridge::{BridgeStatus, RuntimeBridge};
pub use commands::{CommandHandle, CommandRequest};
pub use config::BridgeConfig;
pub use error::{BridgeError, BridgeResult, HookError};
pub use events::RuntimeEvent;
pub use lifecycle::Shutdown;
pub use recovery::ConnectionState;
