//! Inbound event dispatch.
//!
//! # Responsibilities
//! - Keep per-type and wildcard (`"*"`) handler lists
//! - Run the filter chain; filtered events skip history and handlers
//! - Dispatch each event to wildcard handlers, then type-specific handlers
//! - Isolate handlers: an error or panic is logged and counted, never propagated
//! - Keep a capped history for introspection
//!
//! # Design Decisions
//! - Handler lists are cloned out of the lock before awaiting
//! - Registration order is dispatch order within each list
//! - No ordering guarantee across concurrently dispatched events

use async_trait::async_trait;
use futures_util::FutureExt;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::HookError;
use crate::events::filter::{EventFilterChain, FilterVerdict};
use crate::events::types::RuntimeEvent;
use crate::observability::metrics;

/// Handler key that receives every event type.
pub const WILDCARD: &str = "*";

/// Receives events of the type it was registered for.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &RuntimeEvent) -> Result<(), HookError>;
}

#[async_trait]
impl<F> EventHandler for F
where
    F: Fn(&RuntimeEvent) -> Result<(), HookError> + Send + Sync,
{
    async fn handle(&self, event: &RuntimeEvent) -> Result<(), HookError> {
        (self)(event)
    }
}

/// Identifies a registration for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct HandlerId(u64);

struct Registration {
    id: HandlerId,
    handler: Arc<dyn EventHandler>,
}

/// Outcome of dispatching one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub filtered: bool,
    pub handlers_invoked: usize,
    pub failures: usize,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct EventStreamStats {
    pub events_dispatched: u64,
    pub events_filtered: u64,
    pub handler_invocations: u64,
    pub handler_failures: u64,
    pub history_size: usize,
    pub registered_handlers: usize,
}

pub struct EventStream {
    handlers: Mutex<HashMap<String, Vec<Registration>>>,
    history: Mutex<VecDeque<RuntimeEvent>>,
    max_history_size: usize,
    filters: EventFilterChain,
    next_id: AtomicU64,
    events_dispatched: AtomicU64,
    events_filtered: AtomicU64,
    handler_invocations: AtomicU64,
    handler_failures: AtomicU64,
}

impl EventStream {
    pub fn new(max_history_size: usize) -> Self {
        Self {
            handlers: Mutex::new(HashMap::new()),
            history: Mutex::new(VecDeque::with_capacity(max_history_size.min(1024))),
            max_history_size,
            filters: EventFilterChain::new(),
            next_id: AtomicU64::new(1),
            events_dispatched: AtomicU64::new(0),
            events_filtered: AtomicU64::new(0),
            handler_invocations: AtomicU64::new(0),
            handler_failures: AtomicU64::new(0),
        }
    }

    pub fn with_filters(mut self, filters: EventFilterChain) -> Self {
        self.filters = filters;
        self
    }

    pub fn filters(&self) -> &EventFilterChain {
        &self.filters
    }

    /// Register a handler for `event_type`, or for every type with `"*"`.
    pub fn register_handler(
        &self,
        event_type: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> HandlerId {
        let event_type = event_type.into();
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock_handlers()
            .entry(event_type.clone())
            .or_default()
            .push(Registration { id, handler });

        tracing::info!(event_type = %event_type, handler_id = id.0, "Registered event handler");
        id
    }

    /// Register a synchronous closure as a handler.
    pub fn register_fn<F>(&self, event_type: impl Into<String>, f: F) -> HandlerId
    where
        F: Fn(&RuntimeEvent) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.register_handler(event_type, Arc::new(f))
    }

    /// Remove a registration. Returns false if it was not registered.
    pub fn unregister_handler(&self, id: HandlerId) -> bool {
        let mut handlers = self.lock_handlers();
        for (event_type, list) in handlers.iter_mut() {
            if let Some(pos) = list.iter().position(|r| r.id == id) {
                list.remove(pos);
                tracing::info!(event_type = %event_type, handler_id = id.0, "Unregistered event handler");
                return true;
            }
        }
        false
    }

    pub fn handler_count(&self, event_type: &str) -> usize {
        self.lock_handlers().get(event_type).map_or(0, Vec::len)
    }

    /// Record `event` and deliver it to every matching handler, unless filtered.
    pub async fn dispatch(&self, event: &RuntimeEvent) -> DispatchSummary {
        if let FilterVerdict::Filtered { by } = self.filters.apply(event) {
            self.events_filtered.fetch_add(1, Ordering::Relaxed);
            metrics::record_event_filtered(&event.event_type, &by);
            tracing::debug!(event_type = %event.event_type, filter = %by, "Event filtered");
            return DispatchSummary {
                filtered: true,
                ..DispatchSummary::default()
            };
        }

        self.push_history(event.clone());
        self.events_dispatched.fetch_add(1, Ordering::Relaxed);
        metrics::record_event(&event.event_type);
        tracing::debug!(event_type = %event.event_type, "Dispatching event");

        let targets = self.matching_handlers(&event.event_type);
        let mut summary = DispatchSummary::default();

        for handler in targets {
            summary.handlers_invoked += 1;
            self.handler_invocations.fetch_add(1, Ordering::Relaxed);

            let failure = match AssertUnwindSafe(handler.handle(event)).catch_unwind().await {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some("handler panicked".to_string()),
            };

            if let Some(error) = failure {
                summary.failures += 1;
                self.handler_failures.fetch_add(1, Ordering::Relaxed);
                metrics::record_handler_failure(&event.event_type);
                tracing::error!(event_type = %event.event_type, error = %error, "Event handler failed");
            }
        }

        summary
    }

    /// Wildcard handlers first, then type-specific, each in registration order.
    fn matching_handlers(&self, event_type: &str) -> Vec<Arc<dyn EventHandler>> {
        let handlers = self.lock_handlers();
        let wildcard = handlers.get(WILDCARD).into_iter().flatten();
        let specific = if event_type == WILDCARD {
            None
        } else {
            handlers.get(event_type)
        };

        wildcard
            .chain(specific.into_iter().flatten())
            .map(|r| r.handler.clone())
            .collect()
    }

    fn push_history(&self, event: RuntimeEvent) {
        if self.max_history_size == 0 {
            return;
        }
        let mut history = self.lock_history();
        history.push_back(event);
        while history.len() > self.max_history_size {
            history.pop_front();
        }
    }

    /// The most recent `limit` events, oldest first, optionally of one type.
    pub fn recent(&self, event_type: Option<&str>, limit: usize) -> Vec<RuntimeEvent> {
        let history = self.lock_history();
        let mut picked: Vec<RuntimeEvent> = history
            .iter()
            .rev()
            .filter(|e| event_type.map_or(true, |t| e.event_type == t))
            .take(limit)
            .cloned()
            .collect();
        picked.reverse();
        picked
    }

    pub fn clear_history(&self) {
        self.lock_history().clear();
    }

    pub fn stats(&self) -> EventStreamStats {
        EventStreamStats {
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            events_filtered: self.events_filtered.load(Ordering::Relaxed),
            handler_invocations: self.handler_invocations.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            history_size: self.lock_history().len(),
            registered_handlers: self.lock_handlers().values().map(Vec::len).sum(),
        }
    }

    fn lock_handlers(&self) -> MutexGuard<'_, HashMap<String, Vec<Registration>>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_history(&self) -> MutexGuard<'_, VecDeque<RuntimeEvent>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
