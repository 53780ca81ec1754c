//! Command dispatch.
//!
//! # Responsibilities
//! - Validate and enqueue submissions (back-pressure: QueueFull, never block)
//! - Drain the queue in batches and hand each command to the executor
//! - Cancel queued commands on shutdown
//!
//! # Design Decisions
//! - Order is priority descending, FIFO within a priority class
//! - The drain loop waits at most `poll_interval` for new work, so it stays
//!   responsive to shutdown
//! - Batches bound loop overhead only; each command resolves on its own

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, Notify};

use crate::commands::executor::CommandExecutor;
use crate::commands::queue::CommandQueue;
use crate::commands::types::{Command, CommandHandle, CommandRequest};
use crate::config::DispatchConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::observability::metrics;

/// Queue plus the closed flag, guarded together so no submission lands
/// after `close` has drained.
struct Pending {
    queue: CommandQueue,
    closed: bool,
}

pub struct CommandDispatcher {
    config: DispatchConfig,
    pending: Mutex<Pending>,
    notify: Notify,
    sequence: AtomicU64,
    executor: Arc<CommandExecutor>,
}

impl CommandDispatcher {
    pub fn new(config: DispatchConfig, executor: Arc<CommandExecutor>) -> Self {
        let queue = CommandQueue::new(config.queue_capacity);
        Self {
            config,
            pending: Mutex::new(Pending {
                queue,
                closed: false,
            }),
            notify: Notify::new(),
            sequence: AtomicU64::new(0),
            executor,
        }
    }

    /// Queue a command. Fails immediately when invalid or when the queue is full.
    pub fn submit(&self, request: CommandRequest) -> BridgeResult<CommandHandle> {
        if request.method.trim().is_empty() {
            return Err(BridgeError::InvalidCommand("method must not be empty".into()));
        }
        if request.priority.0 > self.config.max_priority {
            return Err(BridgeError::InvalidCommand(format!(
                "priority {} exceeds maximum {}",
                request.priority.0, self.config.max_priority
            )));
        }

        let (depth, id, priority, handle) = {
            let mut pending = self.lock();
            if pending.closed {
                return Err(BridgeError::Cancelled);
            }
            let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
            let (command, handle) = Command::new(request, sequence);
            let (id, priority) = (command.id, command.priority);
            if pending.queue.push(command).is_err() {
                let capacity = pending.queue.capacity();
                tracing::warn!(capacity, "Command queue full");
                return Err(BridgeError::QueueFull { capacity });
            }
            (pending.queue.len(), id, priority, handle)
        };
        metrics::record_queue_depth(depth);
        self.notify.notify_one();

        tracing::debug!(command_id = %id, priority = priority.0, depth, "Command queued");
        Ok(handle)
    }

    pub fn queue_depth(&self) -> usize {
        self.lock().queue.len()
    }

    /// Wait for the next batch of up to `batch_size` commands.
    pub async fn next_batch(&self) -> Vec<Command> {
        loop {
            let (batch, depth) = {
                let mut pending = self.lock();
                let batch = pending.queue.pop_batch(self.config.batch_size);
                (batch, pending.queue.len())
            };
            if !batch.is_empty() {
                metrics::record_queue_depth(depth);
                return batch;
            }
            let _ = tokio::time::timeout(self.config.poll_interval(), self.notify.notified()).await;
        }
    }

    /// Drain loop. Returns after shutdown, cancelling whatever is still queued.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            batch_size = self.config.batch_size,
            queue_capacity = self.config.queue_capacity,
            "Command dispatcher started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                batch = self.next_batch() => {
                    tracing::trace!(size = batch.len(), "Dispatching batch");
                    for command in batch {
                        self.executor.execute(command).await;
                    }
                }
            }
        }

        self.close();
    }

    /// Refuse new submissions and cancel queued commands.
    pub fn close(&self) {
        let (cancelled, was_open) = {
            let mut pending = self.lock();
            let was_open = !pending.closed;
            pending.closed = true;
            (pending.queue.drain(), was_open)
        };
        if !was_open {
            return;
        }
        if !cancelled.is_empty() {
            tracing::info!(count = cancelled.len(), "Cancelling queued commands");
        }
        metrics::record_queue_depth(0);
        // dropping a command resolves its handle with Cancelled
        drop(cancelled);
        tracing::info!("Command dispatcher stopped");
    }

    fn lock(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::cache::StateCache;
    use crate::config::{CircuitBreakerConfig, MethodConfig};
    use crate::resilience::circuit_breaker::CircuitBreaker;
    use crate::resilience::timeouts::TimeoutPolicy;
    use crate::runtime::traits::RuntimeClient;
    use crate::runtime::types::{RemoteRequest, TransportError};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingClient {
        methods: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RuntimeClient for RecordingClient {
        async fn call(&self, request: RemoteRequest) -> Result<Value, TransportError> {
            self.methods.lock().unwrap().push(request.method.clone());
            Ok(json!({"success": true, "result": request.method}))
        }
    }

    fn dispatcher(capacity: usize) -> (Arc<CommandDispatcher>, Arc<RecordingClient>) {
        let client = Arc::new(RecordingClient::default());
        let methods: Vec<MethodConfig> = ["cmd1", "cmd2", "cmd3", "a", "b"]
            .into_iter()
            .map(MethodConfig::new)
            .collect();
        let executor = CommandExecutor::new(
            client.clone(),
            Arc::new(CircuitBreaker::new("runtime", CircuitBreakerConfig::default())),
            &methods,
            TimeoutPolicy::new(Duration::from_secs(5)),
            Arc::new(StateCache::new()),
        );
        let config = DispatchConfig {
            queue_capacity: capacity,
            ..DispatchConfig::default()
        };
        (
            Arc::new(CommandDispatcher::new(config, Arc::new(executor))),
            client,
        )
    }

    #[tokio::test]
    async fn test_priority_order_scenario() {
        let (dispatcher, client) = dispatcher(10);
        let h1 = dispatcher.submit(CommandRequest::new("cmd1").priority(1)).unwrap();
        let h2 = dispatcher.submit(CommandRequest::new("cmd2").priority(5)).unwrap();
        let h3 = dispatcher.submit(CommandRequest::new("cmd3").priority(1)).unwrap();

        let (_tx, rx) = broadcast::channel(1);
        let task = tokio::spawn(dispatcher.clone().run(rx));

        assert_eq!(h1.await, Ok(json!("cmd1")));
        assert_eq!(h2.await, Ok(json!("cmd2")));
        assert_eq!(h3.await, Ok(json!("cmd3")));
        assert_eq!(*client.methods.lock().unwrap(), vec!["cmd2", "cmd1", "cmd3"]);
        task.abort();
    }

    #[tokio::test]
    async fn test_queue_full_fails_immediately() {
        let (dispatcher, _) = dispatcher(1);
        let _first = dispatcher.submit(CommandRequest::new("a")).unwrap();
        let err = dispatcher.submit(CommandRequest::new("b")).unwrap_err();
        assert_eq!(err, BridgeError::QueueFull { capacity: 1 });
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_invalid_submissions() {
        let (dispatcher, _) = dispatcher(10);
        assert!(matches!(
            dispatcher.submit(CommandRequest::new("  ")),
            Err(BridgeError::InvalidCommand(_))
        ));
        assert!(matches!(
            dispatcher.submit(CommandRequest::new("a").priority(11)),
            Err(BridgeError::InvalidCommand(_))
        ));
        assert_eq!(dispatcher.queue_depth(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_no_submission_accepted_after_close() {
        for _ in 0..200 {
            let (dispatcher, _) = dispatcher(10_000);
            let submitters: Vec<_> = (0..3)
                .map(|_| {
                    let dispatcher = dispatcher.clone();
                    tokio::spawn(async move {
                        let mut accepted = Vec::new();
                        loop {
                            match dispatcher.submit(CommandRequest::new("a")) {
                                Ok(handle) => accepted.push(handle),
                                Err(BridgeError::QueueFull { .. }) => {}
                                Err(err) => {
                                    assert_eq!(err, BridgeError::Cancelled);
                                    return accepted;
                                }
                            }
                            tokio::task::yield_now().await;
                        }
                    })
                })
                .collect();
            tokio::task::yield_now().await;
            dispatcher.close();

            for submitter in submitters {
                for handle in submitter.await.unwrap() {
                    let result = tokio::time::timeout(Duration::from_secs(1), handle)
                        .await
                        .expect("accepted command left in a closed queue");
                    assert_eq!(result, Err(BridgeError::Cancelled));
                }
            }
            assert_eq!(dispatcher.queue_depth(), 0);
        }
    }

    #[tokio::test]
    async fn test_shutdown_cancels_queued_commands() {
        let (dispatcher, client) = dispatcher(10);
        let handle = dispatcher.submit(CommandRequest::new("a")).unwrap();

        let (tx, rx) = broadcast::channel(1);
        tx.send(()).unwrap();
        dispatcher.clone().run(rx).await;

        assert_eq!(handle.await, Err(BridgeError::Cancelled));
        assert!(client.methods.lock().unwrap().is_empty());
        assert_eq!(
            dispatcher.submit(CommandRequest::new("a")).unwrap_err(),
            BridgeError::Cancelled
        );
    }
}
