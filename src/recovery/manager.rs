//! Connection recovery.
//!
//! # Responsibilities
//! - Own the connection state and publish it on a watch channel
//! - Drive reconnection with exponential backoff and jitter
//! - Probe the live connection periodically
//! - Buffer events while disconnected; replay them after reconnecting
//! - Trigger the resync hook after reconnecting
//!
//! # State Transitions
//! ```text
//! Connected → Disconnected: connection_lost (transport signal or failed probe)
//! Disconnected → Reconnecting: recovery loop starts
//! Reconnecting → Connected: connect() succeeded
//! Reconnecting → Failed: max_retries exhausted
//! Failed → Disconnected: explicit reset()
//! ```
//!
//! # Design Decisions
//! - State, disconnect buffer and the recovery-running flag share one lock:
//!   an event is either dispatched live or buffered before the drain that
//!   accompanies the switch to Connected, never stranded after it
//! - At most one recovery loop and one health loop; both aborted by stop()
//! - Hook failures (including panics) are logged, never propagated
//! - Replay is a stable timestamp sort, so ties keep arrival order

use chrono::Utc;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::RecoveryConfig;
use crate::error::{BridgeResult, HookError};
use crate::events::queue::{EnqueueOutcome, EventQueue};
use crate::events::stream::EventStream;
use crate::events::types::{QueuedEvent, RuntimeEvent};
use crate::observability::metrics;
use crate::recovery::state::{
    ConnectionMetrics, ConnectionState, MetricsStatus, QueueStatus, RecoveryProgress,
    RecoveryStatus,
};
use crate::resilience::backoff::Backoff;
use crate::runtime::traits::Connector;

struct ManagerInner {
    state: ConnectionState,
    queue: EventQueue,
    metrics: ConnectionMetrics,
    recovery_started: Option<Instant>,
    /// Set when a recovery loop is spawned, cleared by the loop itself in the
    /// same critical section as its final state change.
    recovery_active: bool,
    recovery_task: Option<JoinHandle<()>>,
    health_task: Option<JoinHandle<()>>,
}

/// What the producer of an inbound event should do, decided under the lock.
enum Delivery {
    Dispatch(RuntimeEvent),
    Buffered(BridgeResult<EnqueueOutcome>),
}

pub struct ConnectionRecoveryManager {
    config: RecoveryConfig,
    connector: Arc<dyn Connector>,
    stream: Arc<EventStream>,
    inner: Mutex<ManagerInner>,
    state_tx: watch::Sender<ConnectionState>,
}

impl ConnectionRecoveryManager {
    pub fn new(
        config: RecoveryConfig,
        connector: Arc<dyn Connector>,
        stream: Arc<EventStream>,
    ) -> Self {
        let queue = EventQueue::new(config.max_queued_events, config.overflow_policy);
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            connector,
            stream,
            inner: Mutex::new(ManagerInner {
                state: ConnectionState::Disconnected,
                queue,
                metrics: ConnectionMetrics::default(),
                recovery_started: None,
                recovery_active: false,
                recovery_task: None,
                health_task: None,
            }),
            state_tx,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    /// Start the health loop and the initial connection attempt.
    pub fn start(self: &Arc<Self>) {
        let disconnected = {
            let mut inner = self.lock();
            if inner.health_task.as_ref().map_or(true, JoinHandle::is_finished) {
                inner.health_task = Some(tokio::spawn(health_loop(
                    Arc::downgrade(self),
                    self.config.health_check_interval(),
                )));
            }
            inner.state == ConnectionState::Disconnected
        };

        if disconnected {
            self.ensure_recovery();
        }
    }

    /// Abort the recovery and health loops.
    pub fn stop(&self) {
        let mut inner = self.lock();
        if let Some(task) = inner.recovery_task.take() {
            task.abort();
        }
        inner.recovery_active = false;
        if let Some(task) = inner.health_task.take() {
            task.abort();
        }
        tracing::info!("Connection recovery stopped");
    }

    /// React to a lost connection.
    pub async fn connection_lost(self: &Arc<Self>, reason: &str) {
        let (previous, uptime) = {
            let mut inner = self.lock();
            let previous = inner.state;
            match previous {
                ConnectionState::Failed => {
                    tracing::debug!(reason = %reason, "Ignoring disconnect while failed");
                    return;
                }
                ConnectionState::Reconnecting => {
                    tracing::debug!(reason = %reason, "Ignoring disconnect while reconnecting");
                    return;
                }
                ConnectionState::Disconnected if inner.recovery_active => {
                    tracing::debug!(reason = %reason, "Recovery already running");
                    return;
                }
                ConnectionState::Connected | ConnectionState::Disconnected => {}
            }

            let uptime = inner.metrics.uptime();
            inner.metrics.disconnections += 1;
            inner.metrics.last_disconnected_at = Some(Utc::now());
            inner.metrics.uptime_start = None;
            inner.recovery_started.get_or_insert_with(Instant::now);
            self.transition(&mut inner, ConnectionState::Disconnected);
            (previous, uptime)
        };

        tracing::warn!(
            previous_state = previous.as_str(),
            reason = %reason,
            uptime = ?uptime,
            "Connection lost"
        );

        let hook = AssertUnwindSafe(self.connector.on_disconnect(reason))
            .catch_unwind()
            .await;
        if let Some(error) = hook_failure(hook) {
            tracing::error!(error = %error, "Disconnection hook failed");
        }

        self.ensure_recovery();
    }

    /// Deliver an inbound event, or buffer it while not connected.
    pub async fn handle_event(&self, event: RuntimeEvent) -> BridgeResult<()> {
        let event_type = event.event_type.clone();
        let delivery = {
            let mut inner = self.lock();
            if inner.state == ConnectionState::Connected {
                Delivery::Dispatch(event)
            } else {
                Delivery::Buffered(inner.queue.enqueue(event))
            }
        };

        match delivery {
            Delivery::Dispatch(event) => {
                self.stream.dispatch(&event).await;
                Ok(())
            }
            Delivery::Buffered(Ok(outcome)) => {
                metrics::record_event_buffered(outcome.as_str());
                if outcome != EnqueueOutcome::Accepted {
                    tracing::debug!(event_type = %event_type, outcome = outcome.as_str(), "Disconnect buffer overflow");
                }
                Ok(())
            }
            Delivery::Buffered(Err(e)) => {
                metrics::record_event_buffered("rejected");
                tracing::warn!(event_type = %event_type, error = %e, "Event rejected while disconnected");
                Err(e)
            }
        }
    }

    /// Leave Failed and start recovering again. Returns false if not Failed.
    pub fn reset(self: &Arc<Self>) -> bool {
        {
            let mut inner = self.lock();
            if inner.state != ConnectionState::Failed {
                return false;
            }
            inner.metrics.current_retry_count = 0;
            inner.metrics.consecutive_failures = 0;
            self.transition(&mut inner, ConnectionState::Disconnected);
        }
        tracing::info!("Connection recovery reset");
        self.ensure_recovery();
        true
    }

    /// Zero the metrics and clear the disconnect buffer.
    pub fn reset_metrics(&self) {
        let mut inner = self.lock();
        inner.metrics = ConnectionMetrics::default();
        if inner.state == ConnectionState::Connected {
            inner.metrics.uptime_start = Some(Instant::now());
        }
        inner.queue.clear();
        tracing::info!("Connection metrics reset");
    }

    pub fn metrics(&self) -> ConnectionMetrics {
        self.lock().metrics.clone()
    }

    pub fn queued_events(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn status(&self) -> RecoveryStatus {
        let inner = self.lock();
        let state = inner.state;
        RecoveryStatus {
            state,
            is_healthy: state == ConnectionState::Connected,
            metrics: MetricsStatus::from_metrics(&inner.metrics),
            queue: QueueStatus {
                size: inner.queue.len(),
                overflow_count: inner.queue.overflow_count(),
                max_size: inner.queue.capacity(),
            },
            recovery: RecoveryProgress {
                is_recovering: state == ConnectionState::Reconnecting,
                time_in_recovery_ms: inner
                    .recovery_started
                    .map_or(0, |started| started.elapsed().as_millis() as u64),
            },
        }
    }

    /// Spawn the recovery loop unless one is already running.
    fn ensure_recovery(self: &Arc<Self>) {
        let mut inner = self.lock();
        if inner.recovery_active {
            return;
        }
        inner.recovery_active = true;
        inner.recovery_task = Some(tokio::spawn(self.clone().run_recovery()));
    }

    async fn run_recovery(self: Arc<Self>) {
        loop {
            let Some(buffered) = self.reconnect().await else {
                return;
            };
            self.after_connect(buffered).await;

            let finished = {
                let mut inner = self.lock();
                if inner.state != ConnectionState::Disconnected {
                    inner.recovery_active = false;
                }
                !inner.recovery_active
            };
            if finished {
                return;
            }
            tracing::warn!("Connection lost during catch-up, recovering again");
        }
    }

    /// Attempt to connect up to `max_retries` times.
    ///
    /// On success returns the events buffered while down. On exhaustion the
    /// state becomes Failed and the loop is marked finished.
    async fn reconnect(&self) -> Option<Vec<QueuedEvent>> {
        {
            let mut inner = self.lock();
            inner.recovery_started.get_or_insert_with(Instant::now);
            self.transition(&mut inner, ConnectionState::Reconnecting);
        }

        let backoff = Backoff::new(
            self.config.initial_delay(),
            self.config.backoff_multiplier,
            self.config.max_delay(),
        )
        .with_jitter(self.config.jitter);
        let max_retries = self.config.max_retries;

        tracing::info!(max_retries, "Starting connection recovery");

        for attempt in 1..=max_retries {
            {
                let mut inner = self.lock();
                inner.metrics.current_retry_count = attempt;
                inner.metrics.connection_attempts += 1;
            }
            tracing::info!(attempt, max_retries, "Attempting to connect");

            let connect = AssertUnwindSafe(self.connector.connect()).catch_unwind();
            let error = match tokio::time::timeout(self.config.connect_timeout(), connect).await {
                Ok(outcome) => hook_failure(outcome),
                Err(_) => Some(format!(
                    "connect timed out after {:?}",
                    self.config.connect_timeout()
                )),
            };

            let Some(error) = error else {
                metrics::record_reconnect_attempt("success");
                return Some(self.mark_connected());
            };

            {
                let mut inner = self.lock();
                inner.metrics.failed_connections += 1;
                inner.metrics.consecutive_failures += 1;
            }
            metrics::record_reconnect_attempt("failure");

            let delay = backoff.delay(attempt - 1);
            tracing::warn!(attempt, error = %error, delay = ?delay, "Connection attempt failed");
            tokio::time::sleep(delay).await;
        }

        let downtime = {
            let mut inner = self.lock();
            self.transition(&mut inner, ConnectionState::Failed);
            inner.recovery_active = false;
            inner
                .recovery_started
                .map_or(Duration::ZERO, |started| started.elapsed())
        };
        tracing::error!(
            attempts = max_retries,
            downtime = ?downtime,
            "Connection recovery failed after all retries"
        );
        None
    }

    /// Switch to Connected and take the disconnect buffer in one step.
    fn mark_connected(&self) -> Vec<QueuedEvent> {
        let (previous, buffered) = {
            let mut inner = self.lock();
            let previous = inner.state;
            let metrics = &mut inner.metrics;
            metrics.successful_connections += 1;
            metrics.last_connected_at = Some(Utc::now());
            metrics.uptime_start = Some(Instant::now());
            metrics.current_retry_count = 0;
            metrics.consecutive_failures = 0;
            if let Some(started) = inner.recovery_started.take() {
                inner.metrics.total_downtime += started.elapsed();
            }
            self.transition(&mut inner, ConnectionState::Connected);
            (previous, inner.queue.drain())
        };
        tracing::info!(previous_state = previous.as_str(), "Connection established");
        buffered
    }

    async fn after_connect(&self, buffered: Vec<QueuedEvent>) {
        if self.config.enable_event_catch_up {
            self.replay_buffered(buffered).await;
        } else if !buffered.is_empty() {
            tracing::info!(
                dropped = buffered.len(),
                "Event catch-up disabled, discarding buffered events"
            );
        }

        if self.config.enable_state_resync {
            tracing::info!("Triggering state resynchronization");
            let outcome = AssertUnwindSafe(self.connector.resync()).catch_unwind().await;
            match hook_failure(outcome) {
                None => tracing::info!("State resynchronization completed"),
                Some(error) => tracing::error!(error = %error, "State resynchronization failed"),
            }
        }
    }

    /// Replay buffered events younger than the catch-up window, oldest first.
    async fn replay_buffered(&self, queued: Vec<QueuedEvent>) {
        if queued.is_empty() {
            return;
        }
        let overflow_count = self.lock().queue.overflow_count();

        let total = queued.len();
        let cutoff = chrono::Duration::from_std(self.config.catch_up_window())
            .ok()
            .and_then(|window| Utc::now().checked_sub_signed(window));

        let mut valid: Vec<RuntimeEvent> = queued
            .into_iter()
            .map(|q| q.event)
            .filter(|event| cutoff.map_or(true, |cutoff| event.timestamp > cutoff))
            .collect();
        valid.sort_by_key(|event| event.timestamp);

        let discarded = total - valid.len();
        tracing::info!(
            count = total,
            replaying = valid.len(),
            discarded,
            overflow_count,
            "Replaying buffered events"
        );
        metrics::record_events_replayed("replayed", valid.len());
        metrics::record_events_replayed("expired", discarded);

        for event in &valid {
            self.stream.dispatch(event).await;
        }
    }

    /// Change state. Callers hold the inner lock so that the state and the
    /// disconnect buffer move together.
    fn transition(&self, inner: &mut ManagerInner, state: ConnectionState) {
        inner.state = state;
        self.state_tx.send_replace(state);
        metrics::record_connection_state(state.gauge_value());
    }

    fn lock(&self) -> MutexGuard<'_, ManagerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn health_loop(manager: Weak<ConnectionRecoveryManager>, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some(manager) = manager.upgrade() else {
            return;
        };
        if manager.state() != ConnectionState::Connected {
            continue;
        }

        let probe = AssertUnwindSafe(manager.connector.health_check()).catch_unwind();
        let failure = match tokio::time::timeout(manager.config.health_check_timeout(), probe).await
        {
            Ok(outcome) => hook_failure(outcome),
            Err(_) => Some("health check timed out".to_string()),
        };

        if let Some(error) = failure {
            tracing::warn!(error = %error, "Health check failed, triggering recovery");
            manager
                .connection_lost(&format!("health check failed: {}", error))
                .await;
        }
    }
}

/// Flatten a caught hook outcome into an error message.
fn hook_failure(
    outcome: Result<Result<(), HookError>, Box<dyn std::any::Any + Send>>,
) -> Option<String> {
    match outcome {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(_) => Some("hook panicked".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OverflowPolicy;
    use crate::error::BridgeError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    #[derive(Default)]
    struct ScriptedConnector {
        outcomes: Mutex<VecDeque<bool>>,
        attempts: Mutex<Vec<Instant>>,
        unhealthy: AtomicBool,
        disconnects: AtomicU32,
        resyncs: AtomicU32,
    }

    impl ScriptedConnector {
        fn with_outcomes(outcomes: &[bool]) -> Arc<Self> {
            let connector = Self::default();
            connector.outcomes.lock().unwrap().extend(outcomes);
            Arc::new(connector)
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self) -> Result<(), HookError> {
            self.attempts.lock().unwrap().push(Instant::now());
            // an exhausted script connects
            match self.outcomes.lock().unwrap().pop_front() {
                Some(false) => Err("connection refused".into()),
                _ => {
                    self.unhealthy.store(false, Ordering::SeqCst);
                    Ok(())
                }
            }
        }

        async fn health_check(&self) -> Result<(), HookError> {
            if self.unhealthy.load(Ordering::SeqCst) {
                return Err("no heartbeat".into());
            }
            Ok(())
        }

        async fn on_disconnect(&self, _reason: &str) -> Result<(), HookError> {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            Err("cleanup failed".into())
        }

        async fn resync(&self) -> Result<(), HookError> {
            self.resyncs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn config() -> RecoveryConfig {
        RecoveryConfig {
            max_retries: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 60_000,
            backoff_multiplier: 2.0,
            jitter: false,
            health_check_interval_ms: 30_000,
            ..RecoveryConfig::default()
        }
    }

    fn manager(
        config: RecoveryConfig,
        connector: Arc<ScriptedConnector>,
    ) -> (Arc<ConnectionRecoveryManager>, Arc<EventStream>) {
        let stream = Arc::new(EventStream::new(100));
        let manager = Arc::new(ConnectionRecoveryManager::new(
            config,
            connector,
            stream.clone(),
        ));
        (manager, stream)
    }

    async fn wait_for(manager: &ConnectionRecoveryManager, state: ConnectionState) {
        let mut rx = manager.subscribe_state();
        rx.wait_for(|s| *s == state).await.unwrap();
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_then_failed() {
        let connector = ScriptedConnector::with_outcomes(&[false, false, false]);
        let (manager, _) = manager(config(), connector.clone());
        let start = Instant::now();

        manager.start();
        wait_for(&manager, ConnectionState::Failed).await;

        let attempts = connector.attempts.lock().unwrap().clone();
        let offsets: Vec<Duration> = attempts.iter().map(|t| *t - start).collect();
        assert_eq!(
            offsets,
            vec![
                Duration::ZERO,
                Duration::from_secs(1),
                Duration::from_secs(3)
            ]
        );
        // the third failure still sleeps 4s before giving up
        assert_eq!(Instant::now() - start, Duration::from_secs(7));

        let metrics = manager.metrics();
        assert_eq!(metrics.connection_attempts, 3);
        assert_eq!(metrics.failed_connections, 3);
        manager.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_is_terminal_until_reset() {
        let connector = ScriptedConnector::with_outcomes(&[false, false, false]);
        let (manager, _) = manager(config(), connector.clone());
        manager.start();
        wait_for(&manager, ConnectionState::Failed).await;

        manager.connection_lost("still down").await;
        settle().await;
        assert_eq!(manager.state(), ConnectionState::Failed);
        assert_eq!(connector.attempts.lock().unwrap().len(), 3);

        assert!(manager.reset());
        wait_for(&manager, ConnectionState::Connected).await;
        assert!(!manager.reset());
        assert_eq!(manager.metrics().successful_connections, 1);
        manager.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_within_catch_up_window() {
        let connector = ScriptedConnector::with_outcomes(&[]);
        let (manager, stream) = manager(config(), connector.clone());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        stream.register_fn("*", move |e| {
            log.lock().unwrap().push(e.event_type.clone());
            Ok(())
        });

        let now = Utc::now();
        let at = |secs: i64| now - chrono::Duration::seconds(secs);
        manager
            .handle_event(RuntimeEvent::at("stale", at(600), json!({})))
            .await
            .unwrap();
        manager
            .handle_event(RuntimeEvent::at("second", at(2), json!({})))
            .await
            .unwrap();
        manager
            .handle_event(RuntimeEvent::at("first", at(5), json!({})))
            .await
            .unwrap();
        assert_eq!(manager.queued_events(), 3);
        assert!(seen.lock().unwrap().is_empty());

        manager.start();
        while connector.resyncs.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
        assert_eq!(manager.queued_events(), 0);

        // connected: delivered immediately
        manager
            .handle_event(RuntimeEvent::new("live", json!({})))
            .await
            .unwrap();
        assert_eq!(seen.lock().unwrap().last().map(String::as_str), Some("live"));
        manager.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reject_policy_reports_to_producer() {
        let connector = ScriptedConnector::with_outcomes(&[]);
        let mut config = config();
        config.max_queued_events = 1;
        config.overflow_policy = OverflowPolicy::Reject;
        let (manager, _) = manager(config, connector);

        manager
            .handle_event(RuntimeEvent::new("a", json!({})))
            .await
            .unwrap();
        let err = manager
            .handle_event(RuntimeEvent::new("b", json!({})))
            .await
            .unwrap_err();
        assert_eq!(err, BridgeError::EventQueueFull { capacity: 1 });

        let status = manager.status();
        assert_eq!(status.queue.size, 1);
        assert_eq!(status.queue.overflow_count, 1);

        manager.reset_metrics();
        assert_eq!(manager.status().queue.size, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_triggers_recovery() {
        let connector = ScriptedConnector::with_outcomes(&[]);
        let (manager, _) = manager(config(), connector.clone());
        manager.start();
        wait_for(&manager, ConnectionState::Connected).await;

        connector.unhealthy.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(31)).await;
        settle().await;
        wait_for(&manager, ConnectionState::Connected).await;

        assert_eq!(connector.disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(connector.attempts.lock().unwrap().len(), 2);
        let metrics = manager.metrics();
        assert_eq!(metrics.disconnections, 1);
        assert_eq!(metrics.successful_connections, 2);
        manager.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_recovery_loop() {
        let connector = ScriptedConnector::with_outcomes(&[false, false]);
        let (manager, _) = manager(config(), connector.clone());

        manager.connection_lost("socket closed").await;
        manager.connection_lost("socket closed").await;
        manager.connection_lost("health check failed").await;
        wait_for(&manager, ConnectionState::Connected).await;

        assert_eq!(connector.attempts.lock().unwrap().len(), 3);
        assert_eq!(connector.disconnects.load(Ordering::SeqCst), 1);
        manager.stop();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_no_event_stranded_once_connected() {
        for _ in 0..200 {
            let connector = ScriptedConnector::with_outcomes(&[]);
            let (manager, stream) = manager(config(), connector.clone());
            let delivered = Arc::new(AtomicU32::new(0));
            let counter = delivered.clone();
            stream.register_fn("*", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });

            let producers: Vec<_> = (0..6)
                .map(|_| {
                    let manager = manager.clone();
                    tokio::spawn(async move {
                        for _ in 0..100 {
                            manager
                                .handle_event(RuntimeEvent::new("tick", json!({})))
                                .await
                                .unwrap();
                        }
                    })
                })
                .collect();
            manager.start();
            for producer in producers {
                producer.await.unwrap();
            }

            wait_for(&manager, ConnectionState::Connected).await;
            // replay finishes before the resync hook runs
            while connector.resyncs.load(Ordering::SeqCst) == 0 {
                tokio::task::yield_now().await;
            }

            assert_eq!(manager.queued_events(), 0);
            assert_eq!(delivered.load(Ordering::SeqCst), 600);
            manager.stop();
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_disconnect_right_after_connect_restarts_recovery() {
        let mut config = config();
        config.enable_state_resync = false;

        for _ in 0..200 {
            let connector = ScriptedConnector::with_outcomes(&[]);
            let (manager, _) = manager(config.clone(), connector.clone());
            manager.start();
            wait_for(&manager, ConnectionState::Connected).await;

            manager.connection_lost("socket closed").await;

            tokio::time::timeout(
                Duration::from_secs(5),
                wait_for(&manager, ConnectionState::Connected),
            )
            .await
            .expect("recovery loop was not restarted");
            assert_eq!(connector.attempts.lock().unwrap().len(), 2);
            manager.stop();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_during_catch_up_recovers_again() {
        let connector = Arc::new(BlockingResync::default());
        let stream = Arc::new(EventStream::new(10));
        let manager = Arc::new(ConnectionRecoveryManager::new(
            config(),
            connector.clone(),
            stream,
        ));
        manager.start();
        connector.entered.notified().await;
        assert_eq!(manager.state(), ConnectionState::Connected);

        manager.connection_lost("socket closed").await;
        connector.release.notify_one();

        wait_for(&manager, ConnectionState::Connected).await;
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
        assert_eq!(manager.metrics().disconnections, 1);
        manager.stop();
    }

    /// Connects at once; the first resync waits until released.
    #[derive(Default)]
    struct BlockingResync {
        connects: AtomicU32,
        resyncs: AtomicU32,
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl Connector for BlockingResync {
        async fn connect(&self) -> Result<(), HookError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn resync(&self) -> Result<(), HookError> {
            if self.resyncs.fetch_add(1, Ordering::SeqCst) == 0 {
                self.entered.notify_one();
                self.release.notified().await;
            }
            Ok(())
        }
    }
}
