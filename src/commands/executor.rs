//! Command execution.
//!
//! # Flow
//! ```text
//! Command
//!     → method table (unknown → UnknownMethod)
//!     → state cache (fresh cached read → done, no remote call)
//!     → connection state (Failed → ConnectionFailed)
//!     → breaker.call_with_timeout(client.call)
//!     → RemoteReply (Success → value, Failure → CommandFailed,
//!                    anything else → UnrecognizedReply)
//!     → resolve the caller's handle
//! ```
//!
//! # Design Decisions
//! - No retries; a timeout resolves the command and is reported to the caller
//! - Only transport failures and timeouts count against the breaker
//! - A panic while executing resolves the command with `Internal`

use futures_util::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::watch;

use crate::commands::cache::StateCache;
use crate::commands::types::Command;
use crate::config::MethodConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::observability::metrics;
use crate::recovery::state::ConnectionState;
use crate::resilience::circuit_breaker::{BreakerError, CircuitBreaker};
use crate::resilience::timeouts::TimeoutPolicy;
use crate::runtime::traits::RuntimeClient;
use crate::runtime::types::{RemoteReply, RemoteRequest};

pub struct CommandExecutor {
    client: Arc<dyn RuntimeClient>,
    breaker: Arc<CircuitBreaker<Value>>,
    methods: HashMap<String, MethodConfig>,
    timeouts: TimeoutPolicy,
    cache: Arc<StateCache>,
    connection: Option<(watch::Receiver<ConnectionState>, u32)>,
}

impl CommandExecutor {
    pub fn new(
        client: Arc<dyn RuntimeClient>,
        breaker: Arc<CircuitBreaker<Value>>,
        methods: &[MethodConfig],
        timeouts: TimeoutPolicy,
        cache: Arc<StateCache>,
    ) -> Self {
        Self {
            client,
            breaker,
            methods: methods
                .iter()
                .map(|m| (m.name.clone(), m.clone()))
                .collect(),
            timeouts,
            cache,
            connection: None,
        }
    }

    /// Fail fast while recovery has given up after `max_retries` attempts.
    pub fn with_connection_state(
        mut self,
        state: watch::Receiver<ConnectionState>,
        max_retries: u32,
    ) -> Self {
        self.connection = Some((state, max_retries));
        self
    }

    /// Run one command and resolve its handle.
    pub async fn execute(&self, mut command: Command) {
        if command.is_abandoned() {
            tracing::debug!(command_id = %command.id, method = %command.method, "Skipping abandoned command");
            metrics::record_command(&command.method, "abandoned", std::time::Instant::now());
            return;
        }

        let start = std::time::Instant::now();
        let outcome = AssertUnwindSafe(self.perform(&mut command))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(BridgeError::Internal("command execution panicked".into())));

        match &outcome {
            Ok(_) => {
                metrics::record_command(&command.method, "success", start);
                tracing::debug!(command_id = %command.id, method = %command.method, "Command succeeded");
            }
            Err(e) => {
                metrics::record_command(&command.method, e.kind(), start);
                tracing::warn!(command_id = %command.id, method = %command.method, error = %e, "Command failed");
            }
        }

        command.resolve(outcome);
    }

    async fn perform(&self, command: &mut Command) -> BridgeResult<Value> {
        let method = self
            .methods
            .get(&command.method)
            .ok_or_else(|| BridgeError::UnknownMethod(command.method.clone()))?;

        if let Some(source) = &method.cached_from {
            if let Some(value) = self.cache.get_fresh(source, method.cache_ttl()) {
                tracing::debug!(command_id = %command.id, method = %command.method, "Served from state cache");
                return Ok(value);
            }
        }

        if let Some((state, attempts)) = &self.connection {
            if *state.borrow() == ConnectionState::Failed {
                return Err(BridgeError::ConnectionFailed {
                    attempts: *attempts,
                });
            }
        }

        let timeout = self.timeouts.resolve(&command.method, command.timeout);
        let request = RemoteRequest {
            id: command.id,
            method: command.method.clone(),
            args: std::mem::take(&mut command.args),
        };
        let client = self.client.clone();

        let raw = self
            .breaker
            .call_with_timeout(timeout, || async move { client.call(request).await })
            .await
            .map_err(|e| match e {
                BreakerError::Open { name, retry_in } => BridgeError::CircuitOpen { name, retry_in },
                BreakerError::Timeout(after) => BridgeError::Timeout {
                    method: command.method.clone(),
                    after,
                },
                BreakerError::Inner(transport) => transport.into(),
            })?;

        match RemoteReply::from_value(raw) {
            Ok(RemoteReply::Success(value)) => Ok(value),
            Ok(RemoteReply::Failure(message)) => Err(BridgeError::CommandFailed(message)),
            Err(raw) => {
                tracing::warn!(command_id = %command.id, method = %command.method, reply = %raw, "Unrecognized reply shape");
                Err(BridgeError::UnrecognizedReply(raw.to_string()))
            }
        }
    }
}
