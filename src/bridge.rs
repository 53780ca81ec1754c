//! The bridge facade.
//!
//! Wires the command path (dispatcher, executor, breaker) and the event path
//! (recovery manager, disconnect buffer, event stream) around one runtime.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::commands::cache::StateCache;
use crate::commands::dispatcher::CommandDispatcher;
use crate::commands::executor::CommandExecutor;
use crate::commands::types::{CommandHandle, CommandRequest};
use crate::config::BridgeConfig;
use crate::error::{BridgeResult, HookError};
use crate::events::filter::EventFilterChain;
use crate::events::stream::{EventHandler, EventStream, EventStreamStats, HandlerId};
use crate::events::types::RuntimeEvent;
use crate::lifecycle::shutdown::Shutdown;
use crate::recovery::manager::ConnectionRecoveryManager;
use crate::recovery::state::{ConnectionState, RecoveryStatus};
use crate::resilience::circuit_breaker::{BreakerSnapshot, CircuitBreaker};
use crate::resilience::registry::BreakerRegistry;
use crate::resilience::timeouts::TimeoutPolicy;
use crate::runtime::traits::{Connector, RuntimeClient};
use crate::runtime::ws::Inbound;

/// Name of the breaker guarding remote calls.
pub const RUNTIME_BREAKER: &str = "runtime";

/// How long shutdown waits for the drain loop to finish its batch.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize)]
pub struct BridgeStatus {
    pub version: &'static str,
    pub connection: RecoveryStatus,
    pub breakers: Vec<BreakerSnapshot>,
    pub queue_depth: usize,
    pub cached_entries: usize,
    pub events: EventStreamStats,
}

pub struct RuntimeBridge {
    breakers: BreakerRegistry<Value>,
    dispatcher: Arc<CommandDispatcher>,
    stream: Arc<EventStream>,
    cache: Arc<StateCache>,
    recovery: Arc<ConnectionRecoveryManager>,
    shutdown: Shutdown,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RuntimeBridge {
    pub fn new(
        config: BridgeConfig,
        client: Arc<dyn RuntimeClient>,
        connector: Arc<dyn Connector>,
    ) -> Arc<Self> {
        let stream = Arc::new(
            EventStream::new(config.events.max_history_size)
                .with_filters(EventFilterChain::from_config(&config.events.filters)),
        );
        let cache = Arc::new(StateCache::new());
        let recovery = Arc::new(ConnectionRecoveryManager::new(
            config.recovery.clone(),
            connector,
            stream.clone(),
        ));

        let breakers = BreakerRegistry::new(config.circuit_breaker.clone());
        let breaker: Arc<CircuitBreaker<Value>> = breakers.get_or_create(RUNTIME_BREAKER);

        let executor = CommandExecutor::new(
            client,
            breaker,
            &config.methods,
            TimeoutPolicy::from_config(&config.circuit_breaker, &config.methods),
            cache.clone(),
        )
        .with_connection_state(recovery.subscribe_state(), config.recovery.max_retries);
        let dispatcher = Arc::new(CommandDispatcher::new(
            config.dispatch.clone(),
            Arc::new(executor),
        ));

        // keep cached reads fed from their source events
        let sources: HashSet<&String> = config
            .methods
            .iter()
            .filter_map(|m| m.cached_from.as_ref())
            .collect();
        for source in sources {
            let cache = cache.clone();
            stream.register_fn(source.clone(), move |event| {
                cache.record(&event.event_type, event.data.clone());
                Ok(())
            });
        }

        Arc::new(Self {
            breakers,
            dispatcher,
            stream,
            cache,
            recovery,
            shutdown: Shutdown::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Start the drain loop and the connection.
    pub fn start(self: &Arc<Self>) {
        let drain = tokio::spawn(self.dispatcher.clone().run(self.shutdown.subscribe()));
        self.track(drain);
        self.recovery.start();
        tracing::info!("Runtime bridge started");
    }

    /// Forward transport notifications into the bridge.
    pub fn attach(self: &Arc<Self>, mut inbound: mpsc::Receiver<Inbound>) {
        let bridge = Arc::downgrade(self);
        let mut shutdown = self.shutdown.subscribe();
        let pump = tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    _ = shutdown.recv() => break,
                    next = inbound.recv() => next,
                };
                let Some(message) = next else { break };
                let Some(bridge) = bridge.upgrade() else { break };
                match message {
                    Inbound::Event(event) => {
                        // rejection is already logged and counted by the recovery manager
                        let _ = bridge.on_runtime_event(event).await;
                    }
                    Inbound::Disconnected(reason) => bridge.on_disconnect(&reason).await,
                }
            }
        });
        self.track(pump);
    }

    pub fn submit(&self, request: CommandRequest) -> BridgeResult<CommandHandle> {
        self.dispatcher.submit(request)
    }

    /// Submit and wait for the result.
    pub async fn command(&self, request: CommandRequest) -> BridgeResult<Value> {
        self.submit(request)?.await
    }

    pub fn register_handler(
        &self,
        event_type: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> HandlerId {
        self.stream.register_handler(event_type, handler)
    }

    pub fn register_fn<F>(&self, event_type: impl Into<String>, f: F) -> HandlerId
    where
        F: Fn(&RuntimeEvent) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.stream.register_fn(event_type, f)
    }

    pub fn unregister_handler(&self, id: HandlerId) -> bool {
        self.stream.unregister_handler(id)
    }

    /// Inbound event from the runtime: dispatched if connected, else buffered.
    pub async fn on_runtime_event(&self, event: RuntimeEvent) -> BridgeResult<()> {
        self.recovery.handle_event(event).await
    }

    pub async fn on_disconnect(&self, reason: &str) {
        self.recovery.connection_lost(reason).await;
    }

    pub fn recent_events(&self, event_type: Option<&str>, limit: usize) -> Vec<RuntimeEvent> {
        self.stream.recent(event_type, limit)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.recovery.state()
    }

    pub fn recovery(&self) -> &Arc<ConnectionRecoveryManager> {
        &self.recovery
    }

    pub fn breakers(&self) -> &BreakerRegistry<Value> {
        &self.breakers
    }

    pub fn events(&self) -> &EventStream {
        &self.stream
    }

    pub fn shutdown_handle(&self) -> &Shutdown {
        &self.shutdown
    }

    pub fn status(&self) -> BridgeStatus {
        BridgeStatus {
            version: env!("CARGO_PKG_VERSION"),
            connection: self.recovery.status(),
            breakers: self.breakers.snapshots(),
            queue_depth: self.dispatcher.queue_depth(),
            cached_entries: self.cache.len(),
            events: self.stream.stats(),
        }
    }

    /// Stop the loops; queued commands resolve `Cancelled`.
    pub async fn shutdown(&self) {
        tracing::info!("Runtime bridge shutting down");
        self.shutdown.trigger();
        self.recovery.stop();

        let tasks: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for task in tasks {
            let abort = task.abort_handle();
            if tokio::time::timeout(DRAIN_GRACE, task).await.is_err() {
                tracing::warn!("Background task did not stop in time, aborting");
                abort.abort();
            }
        }
        // the drain loop normally closes itself; make sure submissions stop
        self.dispatcher.close();
        tracing::info!("Runtime bridge stopped");
    }

    fn track(&self, task: JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task);
    }
}
