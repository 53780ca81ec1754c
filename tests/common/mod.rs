//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use runtime_bridge::config::{BridgeConfig, MethodConfig};
use runtime_bridge::runtime::{Connector, Frame, RemoteRequest, RuntimeClient, TransportError};
use runtime_bridge::{HookError, RuntimeEvent};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::protocol::Message;

/// Config with fast loops and no jitter, so paused-time tests are exact.
pub fn test_config(methods: &[&str]) -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.methods = methods.iter().map(|m| MethodConfig::new(*m)).collect();
    config.dispatch.poll_interval_ms = 10;
    config.circuit_breaker.jitter = false;
    config.circuit_breaker.timeout_ms = 5000;
    config.recovery.jitter = false;
    config.recovery.initial_delay_ms = 1000;
    config.recovery.max_retries = 3;
    config
}

type Responder = Box<dyn Fn(&RemoteRequest) -> Result<Value, TransportError> + Send + Sync>;

/// In-process runtime whose replies and connect outcomes are scripted.
pub struct ScriptedRuntime {
    responder: Responder,
    delay: Mutex<Duration>,
    connects: Mutex<VecDeque<bool>>,
    pub calls: Mutex<Vec<String>>,
    pub connect_attempts: AtomicU32,
    pub resyncs: AtomicU32,
}

impl ScriptedRuntime {
    /// Every call succeeds with the method name as its result.
    pub fn echo() -> Arc<Self> {
        Self::with_responder(|req| Ok(json!({"success": true, "result": req.method})))
    }

    pub fn with_responder<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&RemoteRequest) -> Result<Value, TransportError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            responder: Box::new(responder),
            delay: Mutex::new(Duration::ZERO),
            connects: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            connect_attempts: AtomicU32::new(0),
            resyncs: AtomicU32::new(0),
        })
    }

    /// Outcomes for the next connect attempts; afterwards connects succeed.
    pub fn script_connects(&self, outcomes: &[bool]) {
        self.connects.lock().unwrap().extend(outcomes);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RuntimeClient for ScriptedRuntime {
    async fn call(&self, request: RemoteRequest) -> Result<Value, TransportError> {
        self.calls.lock().unwrap().push(request.method.clone());
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        (self.responder)(&request)
    }
}

#[async_trait]
impl Connector for ScriptedRuntime {
    async fn connect(&self) -> Result<(), HookError> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        match self.connects.lock().unwrap().pop_front() {
            Some(false) => Err("connection refused".into()),
            _ => Ok(()),
        }
    }

    async fn resync(&self) -> Result<(), HookError> {
        self.resyncs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Control handle for [`spawn_ws_runtime`].
pub struct MockRuntime {
    pub addr: SocketAddr,
    events: broadcast::Sender<RuntimeEvent>,
    drop_tx: broadcast::Sender<()>,
    pub commands: mpsc::UnboundedReceiver<(String, Value)>,
    pub connections: Arc<AtomicU32>,
}

impl MockRuntime {
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Push an event to every connected client.
    pub fn emit(&self, event: RuntimeEvent) {
        let _ = self.events.send(event);
    }

    /// Close every open socket; new connections are still accepted.
    pub fn drop_connections(&self) {
        let _ = self.drop_tx.send(());
    }
}

/// WebSocket runtime on an ephemeral port.
///
/// Replies `{"success": true, "result": args}` to every command, except
/// method `fail` which replies with `{"success": false, "error": "boom"}`.
pub async fn spawn_ws_runtime() -> MockRuntime {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (events, _) = broadcast::channel(64);
    let (drop_tx, _) = broadcast::channel(4);
    let (commands_tx, commands) = mpsc::unbounded_channel();
    let connections = Arc::new(AtomicU32::new(0));

    {
        let events = events.clone();
        let drop_tx = drop_tx.clone();
        let connections = connections.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                connections.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve_socket(
                    ws,
                    events.subscribe(),
                    drop_tx.subscribe(),
                    commands_tx.clone(),
                ));
            }
        });
    }

    MockRuntime {
        addr,
        events,
        drop_tx,
        commands,
        connections,
    }
}

async fn serve_socket(
    ws: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    mut events: broadcast::Receiver<RuntimeEvent>,
    mut drop_rx: broadcast::Receiver<()>,
    commands: mpsc::UnboundedSender<(String, Value)>,
) {
    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            _ = drop_rx.recv() => {
                let _ = sink.close().await;
                return;
            }
            Ok(event) = events.recv() => {
                let text = serde_json::to_string(&Frame::Event(event)).unwrap();
                if sink.send(Message::Text(text.into())).await.is_err() {
                    return;
                }
            }
            message = stream.next() => {
                let Some(Ok(Message::Text(text))) = message else { return };
                let frame: Frame = match serde_json::from_str(text.as_str()) {
                    Ok(frame) => frame,
                    Err(_) => continue,
                };
                let reply = match frame {
                    Frame::Command { id, method, args } => {
                        let _ = commands.send((method.clone(), Value::Object(args.clone())));
                        let body = if method == "fail" {
                            json!({"success": false, "error": "boom"})
                        } else {
                            json!({"success": true, "result": Value::Object(args)})
                        };
                        let Value::Object(body) = body else { unreachable!() };
                        Frame::CommandResult { id, body }
                    }
                    Frame::Heartbeat => Frame::HeartbeatAck,
                    _ => continue,
                };
                let text = serde_json::to_string(&reply).unwrap();
                if sink.send(Message::Text(text.into())).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Poll `check` until it holds or `within` elapses.
pub async fn eventually<F: Fn() -> bool>(within: Duration, check: F) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
