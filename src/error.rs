//! Error taxonomy shared by every bridge subsystem.

use std::time::Duration;
use thiserror::Error;

/// Errors a caller can observe from the bridge.
///
/// Every `submit` resolves to either a value or one of these; none of them is
/// retried by the bridge itself.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BridgeError {
    /// The command queue is at capacity (back-pressure).
    #[error("command queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// The command was malformed (empty method, priority out of range).
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// The method is not in the executor's method table.
    #[error("unknown method: {0}")]
    UnknownMethod(String),

    /// The remote call did not complete within its deadline.
    #[error("command '{method}' timed out after {after:?}")]
    Timeout { method: String, after: Duration },

    /// The circuit breaker is protecting the runtime.
    #[error("circuit breaker '{name}' is open (retry in {retry_in:?})")]
    CircuitOpen { name: String, retry_in: Duration },

    /// Connection recovery gave up; requires an explicit reset.
    #[error("connection failed after {attempts} attempts")]
    ConnectionFailed { attempts: u32 },

    /// The transport to the runtime failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The runtime processed the command and reported a failure.
    #[error("command failed: {0}")]
    CommandFailed(String),

    /// The runtime replied with an envelope that is neither success nor failure.
    #[error("unrecognized reply shape: {0}")]
    UnrecognizedReply(String),

    /// The disconnect buffer rejected an inbound event.
    #[error("event queue full (capacity {capacity})")]
    EventQueueFull { capacity: usize },

    /// The command was cancelled before it produced a result.
    #[error("command cancelled")]
    Cancelled,

    /// Unexpected failure inside the bridge.
    #[error("internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Whether a caller may reasonably try the same command again later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BridgeError::QueueFull { .. }
                | BridgeError::CircuitOpen { .. }
                | BridgeError::Timeout { .. }
                | BridgeError::Transport(_)
        )
    }

    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::QueueFull { .. } => "queue_full",
            BridgeError::InvalidCommand(_) => "invalid_command",
            BridgeError::UnknownMethod(_) => "unknown_method",
            BridgeError::Timeout { .. } => "timeout",
            BridgeError::CircuitOpen { .. } => "circuit_open",
            BridgeError::ConnectionFailed { .. } => "connection_failed",
            BridgeError::Transport(_) => "transport",
            BridgeError::CommandFailed(_) => "command_failed",
            BridgeError::UnrecognizedReply(_) => "unrecognized_reply",
            BridgeError::EventQueueFull { .. } => "event_queue_full",
            BridgeError::Cancelled => "cancelled",
            BridgeError::Internal(_) => "internal",
        }
    }
}

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Error type returned by caller-supplied handlers and hooks.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;
