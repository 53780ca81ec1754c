//! Connection state and metrics.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

/// Connection state owned by the recovery manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connected,
    Disconnected,
    Reconnecting,
    /// Recovery gave up. Left only by an explicit reset.
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        }
    }

    pub(crate) fn gauge_value(&self) -> f64 {
        match self {
            ConnectionState::Connected => 0.0,
            ConnectionState::Disconnected => 1.0,
            ConnectionState::Reconnecting => 2.0,
            ConnectionState::Failed => 3.0,
        }
    }
}

/// Connection counters; reset only by `reset_metrics`.
#[derive(Debug, Clone, Default)]
pub struct ConnectionMetrics {
    pub connection_attempts: u64,
    pub successful_connections: u64,
    pub failed_connections: u64,
    pub disconnections: u64,
    pub consecutive_failures: u32,
    /// Attempts made by the current recovery run.
    pub current_retry_count: u32,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub last_disconnected_at: Option<DateTime<Utc>>,
    pub total_downtime: Duration,
    pub uptime_start: Option<Instant>,
}

impl ConnectionMetrics {
    /// Time since the current connection was established.
    pub fn uptime(&self) -> Duration {
        self.uptime_start.map_or(Duration::ZERO, |start| start.elapsed())
    }

    pub fn success_rate(&self) -> f64 {
        if self.connection_attempts == 0 {
            return 0.0;
        }
        self.successful_connections as f64 / self.connection_attempts as f64
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MetricsStatus {
    pub connection_attempts: u64,
    pub successful_connections: u64,
    pub failed_connections: u64,
    pub disconnections: u64,
    pub success_rate: f64,
    pub current_uptime_ms: u64,
    pub total_downtime_ms: u64,
    pub consecutive_failures: u32,
    pub current_retry_count: u32,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub last_disconnected_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QueueStatus {
    pub size: usize,
    pub overflow_count: u64,
    pub max_size: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RecoveryProgress {
    pub is_recovering: bool,
    pub time_in_recovery_ms: u64,
}

/// Status report for operators.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RecoveryStatus {
    pub state: ConnectionState,
    pub is_healthy: bool,
    pub metrics: MetricsStatus,
    pub queue: QueueStatus,
    pub recovery: RecoveryProgress,
}

impl MetricsStatus {
    pub fn from_metrics(metrics: &ConnectionMetrics) -> Self {
        Self {
            connection_attempts: metrics.connection_attempts,
            successful_connections: metrics.successful_connections,
            failed_connections: metrics.failed_connections,
            disconnections: metrics.disconnections,
            success_rate: metrics.success_rate(),
            current_uptime_ms: metrics.uptime().as_millis() as u64,
            total_downtime_ms: metrics.total_downtime.as_millis() as u64,
            consecutive_failures: metrics.consecutive_failures,
            current_retry_count: metrics.current_retry_count,
            last_connected_at: metrics.last_connected_at,
            last_disconnected_at: metrics.last_disconnected_at,
        }
    }
}
