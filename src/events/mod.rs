//! Event subsystem.
//!
//! # Data Flow
//! ```text
//! Runtime push channel:
//!     → recovery manager (connected?)
//!         yes → stream.rs (filter.rs chain, history, handler dispatch)
//!         no  → queue.rs (bounded buffer, overflow policy)
//!                 → replayed through stream.rs after reconnect
//! ```

pub mod filter;
pub mod queue;
pub mod stream;
pub mod types;

pub use filter::{EventFilter, EventFilterChain, FilterChainStats, FilterVerdict};
pub use queue::{EnqueueOutcome, EventQueue};
pub use stream::{DispatchSummary, EventHandler, EventStream, EventStreamStats, HandlerId, WILDCARD};
pub use types::{QueuedEvent, RuntimeEvent};
