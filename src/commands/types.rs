//! Command types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::{BridgeError, BridgeResult};

/// Unique command identifier, echoed back in the runtime's reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(pub Uuid);

impl CommandId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CommandId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Dispatch priority; higher is more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub u8);

impl Priority {
    pub const NORMAL: Priority = Priority(0);
}

/// What a caller asks for.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRequest {
    pub method: String,
    pub args: Map<String, Value>,
    pub priority: Priority,
    /// Overrides the method's timeout.
    pub timeout: Option<Duration>,
}

impl CommandRequest {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            args: Map::new(),
            priority: Priority::NORMAL,
            timeout: None,
        }
    }

    pub fn arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    pub fn args(mut self, args: Map<String, Value>) -> Self {
        self.args = args;
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = Priority(priority);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A queued command. Owned by the dispatcher until handed to the executor.
///
/// Ordering lives in the queue's key function, not here.
#[derive(Debug)]
pub struct Command {
    pub id: CommandId,
    pub method: String,
    pub args: Map<String, Value>,
    pub priority: Priority,
    pub timeout: Option<Duration>,
    pub enqueued_at: Instant,
    /// Submission order; breaks ties within a priority class.
    pub sequence: u64,
    reply: oneshot::Sender<BridgeResult<Value>>,
}

impl Command {
    /// Build a command and the handle its caller awaits.
    pub fn new(request: CommandRequest, sequence: u64) -> (Self, CommandHandle) {
        let (tx, rx) = oneshot::channel();
        let id = CommandId::new();
        let command = Self {
            id,
            method: request.method,
            args: request.args,
            priority: request.priority,
            timeout: request.timeout,
            enqueued_at: Instant::now(),
            sequence,
            reply: tx,
        };
        (command, CommandHandle { id, rx })
    }

    /// The caller dropped its handle; nobody is waiting for a result.
    pub fn is_abandoned(&self) -> bool {
        self.reply.is_closed()
    }

    /// Resolve the command. Consumes it, so a command resolves exactly once.
    pub fn resolve(self, result: BridgeResult<Value>) {
        // receiver gone means the caller cancelled
        let _ = self.reply.send(result);
    }
}

/// Caller side of a submitted command.
///
/// Dropping the handle cancels interest in the result; a command dropped by
/// the bridge without a result resolves to `Cancelled`.
#[derive(Debug)]
pub struct CommandHandle {
    id: CommandId,
    rx: oneshot::Receiver<BridgeResult<Value>>,
}

impl CommandHandle {
    pub fn id(&self) -> CommandId {
        self.id
    }
}

impl Future for CommandHandle {
    type Output = BridgeResult<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or(Err(BridgeError::Cancelled)))
    }
}
