//! Command subsystem.
//!
//! # Data Flow
//! ```text
//! caller submit(request)
//!     → dispatcher.rs (validate, back-pressure, enqueue)
//!     → queue.rs (priority desc, FIFO within priority)
//!     → dispatcher drain loop (batches of batch_size)
//!     → executor.rs (cache shortcut or breaker-guarded remote call)
//!     → CommandHandle resolves exactly once
//! ```

pub mod cache;
pub mod dispatcher;
pub mod executor;
pub mod queue;
pub mod types;

pub use cache::StateCache;
pub use dispatcher::CommandDispatcher;
pub use executor::CommandExecutor;
pub use queue::{dispatch_key, CommandQueue};
pub use types::{Command, CommandHandle, CommandId, CommandRequest, Priority};
