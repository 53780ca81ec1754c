//! WebSocket transport to the runtime.
//!
//! # Wire Protocol (JSON text frames, tagged by `type`)
//! ```text
//! bridge → runtime  {"type":"command","id":..,"method":..,"args":{..}}
//! runtime → bridge  {"type":"command_result","id":..,"success":true,"result":..}
//!                   {"type":"command_result","id":..,"success":false,"error":".."}
//! runtime → bridge  {"type":"event","eventType":..,"timestamp":<ms>,"data":..}
//! either way        {"type":"heartbeat"} answered by {"type":"heartbeat_ack"}
//! ```
//!
//! # Design Decisions
//! - One reader task and one writer task per connection
//! - Pending calls are keyed by command id; a dropped call removes its entry
//! - Losing the socket fails every pending call and reports `Disconnected`
//! - An intentional close reports nothing

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::commands::types::CommandId;
use crate::error::HookError;
use crate::events::types::RuntimeEvent;
use crate::runtime::traits::{Connector, RuntimeClient};
use crate::runtime::types::{RemoteRequest, TransportError};

/// Capacity of the inbound notification channel.
const INBOUND_CAPACITY: usize = 1024;

/// A frame on the runtime socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Command {
        id: CommandId,
        method: String,
        args: Map<String, Value>,
    },
    CommandResult {
        id: CommandId,
        #[serde(flatten)]
        body: Map<String, Value>,
    },
    Event(RuntimeEvent),
    Heartbeat,
    HeartbeatAck,
}

/// Notifications from the transport to the bridge.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Event(RuntimeEvent),
    Disconnected(String),
}

type PendingMap = DashMap<CommandId, oneshot::Sender<Value>>;
type HeartbeatWaiters = Mutex<VecDeque<oneshot::Sender<()>>>;

struct Link {
    generation: u64,
    writer: mpsc::UnboundedSender<Message>,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

impl Link {
    fn abort(self) {
        self.reader_task.abort();
        self.writer_task.abort();
    }
}

pub struct WsRuntime {
    url: String,
    link: Arc<Mutex<Option<Link>>>,
    generation: AtomicU64,
    pending: Arc<PendingMap>,
    heartbeats: Arc<HeartbeatWaiters>,
    inbound: mpsc::Sender<Inbound>,
}

impl WsRuntime {
    /// Create a disconnected transport and the receiver for its notifications.
    pub fn new(url: impl Into<String>) -> (Arc<Self>, mpsc::Receiver<Inbound>) {
        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        let runtime = Arc::new(Self {
            url: url.into(),
            link: Arc::new(Mutex::new(None)),
            generation: AtomicU64::new(0),
            pending: Arc::new(DashMap::new()),
            heartbeats: Arc::new(Mutex::new(VecDeque::new())),
            inbound: tx,
        });
        (runtime, rx)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.link).is_some()
    }

    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// Open the socket, replacing any existing link.
    pub async fn open(&self) -> Result<(), TransportError> {
        let (stream, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (mut sink, mut source) = stream.split();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let (writer, mut outbound) = mpsc::unbounded_channel::<Message>();
        let writer_task = tokio::spawn(async move {
            while let Some(message) = outbound.recv().await {
                if let Err(e) = sink.send(message).await {
                    tracing::warn!(error = %e, "Runtime socket write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let link_slot = self.link.clone();
        let pending = self.pending.clone();
        let heartbeats = self.heartbeats.clone();
        let inbound = self.inbound.clone();
        let reply_writer = writer.clone();
        let (ready_tx, ready_rx) = oneshot::channel::<()>();
        let reader_task = tokio::spawn(async move {
            // the link must be registered before a disconnect can be reported
            let _ = ready_rx.await;
            let reason = loop {
                match source.next().await {
                    Some(Ok(Message::Text(text))) => {
                        handle_text(text.as_str(), &pending, &heartbeats, &inbound, &reply_writer)
                            .await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break frame
                            .map(|f| format!("closed by runtime: {}", f.reason.as_str()))
                            .unwrap_or_else(|| "closed by runtime".to_string());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break format!("socket error: {}", e),
                    None => break "socket closed".to_string(),
                }
            };

            // fail in-flight calls
            pending.clear();
            lock(&heartbeats).clear();

            let is_current = {
                let mut slot = lock(&link_slot);
                let is_current = slot.as_ref().map(|l| l.generation) == Some(generation);
                if is_current {
                    if let Some(link) = slot.take() {
                        link.writer_task.abort();
                    }
                }
                is_current
            };

            if is_current {
                tracing::warn!(reason = %reason, "Runtime connection lost");
                let _ = inbound.send(Inbound::Disconnected(reason)).await;
            }
        });

        let previous = lock(&self.link).replace(Link {
            generation,
            writer,
            reader_task,
            writer_task,
        });
        if let Some(previous) = previous {
            previous.abort();
        }
        let _ = ready_tx.send(());

        tracing::info!(url = %self.url, "Connected to runtime");
        Ok(())
    }

    /// Close the socket without reporting a disconnect.
    pub fn close(&self) {
        if let Some(link) = lock(&self.link).take() {
            link.abort();
            tracing::info!(url = %self.url, "Runtime connection closed");
        }
        self.pending.clear();
        lock(&self.heartbeats).clear();
    }

    /// Send a heartbeat and wait for its acknowledgement.
    pub async fn ping(&self) -> Result<(), TransportError> {
        let (tx, rx) = oneshot::channel();
        // registered before sending so the ack always finds it
        lock(&self.heartbeats).push_back(tx);
        if let Err(e) = self.send_frame(&Frame::Heartbeat) {
            drop(rx);
            lock(&self.heartbeats).retain(|waiter| !waiter.is_closed());
            return Err(e);
        }
        rx.await
            .map_err(|_| TransportError::Closed("connection dropped before heartbeat ack".into()))
    }

    fn send_frame(&self, frame: &Frame) -> Result<(), TransportError> {
        let text =
            serde_json::to_string(frame).map_err(|e| TransportError::Protocol(e.to_string()))?;
        let slot = lock(&self.link);
        let link = slot.as_ref().ok_or(TransportError::NotConnected)?;
        link.writer
            .send(Message::Text(text.into()))
            .map_err(|_| TransportError::NotConnected)
    }
}

async fn handle_text(
    text: &str,
    pending: &PendingMap,
    heartbeats: &HeartbeatWaiters,
    inbound: &mpsc::Sender<Inbound>,
    writer: &mpsc::UnboundedSender<Message>,
) {
    let frame: Frame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring malformed frame from runtime");
            return;
        }
    };

    match frame {
        Frame::CommandResult { id, body } => match pending.remove(&id) {
            Some((_, tx)) => {
                let _ = tx.send(Value::Object(body));
            }
            None => tracing::debug!(command_id = %id, "Reply for a call nobody awaits"),
        },
        Frame::Event(event) => {
            let _ = inbound.send(Inbound::Event(event)).await;
        }
        Frame::Heartbeat => {
            if let Ok(ack) = serde_json::to_string(&Frame::HeartbeatAck) {
                let _ = writer.send(Message::Text(ack.into()));
            }
        }
        Frame::HeartbeatAck => {
            let mut waiters = lock(heartbeats);
            while let Some(waiter) = waiters.pop_front() {
                // skip waiters whose ping already timed out
                if waiter.send(()).is_ok() {
                    break;
                }
            }
        }
        Frame::Command { method, .. } => {
            tracing::warn!(method = %method, "Unexpected command frame from runtime");
        }
    }
}

/// Removes a pending entry when the call finishes or is cancelled.
struct PendingGuard<'a> {
    pending: &'a PendingMap,
    id: CommandId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

#[async_trait]
impl RuntimeClient for WsRuntime {
    async fn call(&self, request: RemoteRequest) -> Result<Value, TransportError> {
        let (tx, rx) = oneshot::channel();
        let id = request.id;
        self.pending.insert(id, tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        self.send_frame(&Frame::Command {
            id,
            method: request.method,
            args: request.args,
        })?;

        rx.await
            .map_err(|_| TransportError::Closed("connection dropped before reply".into()))
    }
}

#[async_trait]
impl Connector for WsRuntime {
    async fn connect(&self) -> Result<(), HookError> {
        self.open().await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), HookError> {
        self.ping().await?;
        Ok(())
    }

    async fn on_disconnect(&self, reason: &str) -> Result<(), HookError> {
        tracing::debug!(reason = %reason, "Dropping stale runtime link");
        self.close();
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
