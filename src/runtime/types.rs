//! Remote call envelopes.

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::commands::types::CommandId;
use crate::error::BridgeError;

/// One remote call, as sent to the runtime.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteRequest {
    pub id: CommandId,
    pub method: String,
    pub args: Map<String, Value>,
}

/// A reply envelope validated at the boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteReply {
    Success(Value),
    Failure(String),
}

impl RemoteReply {
    /// Classify a raw reply by its `success` field.
    ///
    /// Anything without a boolean `success` is returned unchanged as the error.
    pub fn from_value(value: Value) -> Result<Self, Value> {
        let success = match value.get("success").and_then(Value::as_bool) {
            Some(success) => success,
            None => return Err(value),
        };

        if success {
            let result = value.get("result").cloned().unwrap_or(Value::Null);
            return Ok(RemoteReply::Success(result));
        }

        let message = match value.get("error") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => "unknown error".to_string(),
            Some(other) => other.to_string(),
        };
        Ok(RemoteReply::Failure(message))
    }
}

/// Failure of the transport itself, as opposed to a failed command.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("not connected to runtime")]
    NotConnected,

    #[error("connection closed: {0}")]
    Closed(String),

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<TransportError> for BridgeError {
    fn from(e: TransportError) -> Self {
        BridgeError::Transport(e.to_string())
    }
}
