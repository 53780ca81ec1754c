//! Connection recovery subsystem.
//!
//! # Data Flow
//! ```text
//! transport Disconnected / failed health probe
//!     → manager.rs connection_lost (state → Disconnected, disconnect hook)
//!     → recovery loop (Reconnecting, connect() with backoff)
//!         success → Connected → replay buffered events → resync hook
//!         exhausted → Failed (until reset)
//! ```

pub mod manager;
pub mod state;

pub use manager::ConnectionRecoveryManager;
pub use state::{ConnectionMetrics, ConnectionState, RecoveryStatus};
