//! Seams to the external runtime.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::HookError;
use crate::runtime::types::{RemoteRequest, TransportError};

/// Remote-call primitive.
///
/// Returns the raw reply envelope; the executor validates its shape.
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    async fn call(&self, request: RemoteRequest) -> Result<Value, TransportError>;
}

/// Connection lifecycle hooks driven by the recovery manager.
///
/// Hook failures are logged by the caller and never abort recovery.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish the connection. An error counts as a failed attempt.
    async fn connect(&self) -> Result<(), HookError>;

    /// Probe a live connection.
    async fn health_check(&self) -> Result<(), HookError> {
        Ok(())
    }

    /// Called once per detected disconnect, before recovery starts.
    async fn on_disconnect(&self, _reason: &str) -> Result<(), HookError> {
        Ok(())
    }

    /// Refresh local state after reconnecting.
    async fn resync(&self) -> Result<(), HookError> {
        Ok(())
    }
}
