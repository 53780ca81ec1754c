//! Startup orchestration.
//!
//! # Order
//! 1. Metrics exporter (if enabled)
//! 2. Runtime transport and bridge
//! 3. Admin API (if enabled), last so it only serves a running bridge
//!
//! Then wait for a signal and shut down in reverse.

use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;

use crate::admin::admin_router;
use crate::bridge::RuntimeBridge;
use crate::config::BridgeConfig;
use crate::lifecycle::signals::wait_for_signal;
use crate::observability::metrics;
use crate::runtime::ws::WsRuntime;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid {field} address '{value}'")]
    InvalidAddress { field: &'static str, value: String },

    #[error("failed to bind admin listener: {0}")]
    Bind(#[source] std::io::Error),
}

fn parse_addr(field: &'static str, value: &str) -> Result<SocketAddr, StartupError> {
    value.parse().map_err(|_| StartupError::InvalidAddress {
        field,
        value: value.to_string(),
    })
}

/// Run the bridge daemon until SIGINT/SIGTERM.
pub async fn run(config: BridgeConfig) -> Result<(), StartupError> {
    if config.observability.metrics_enabled {
        let addr = parse_addr(
            "observability.metrics_address",
            &config.observability.metrics_address,
        )?;
        metrics::init_metrics(addr);
    }

    let admin_listener = if config.admin.enabled {
        let addr = parse_addr("admin.bind_address", &config.admin.bind_address)?;
        Some(TcpListener::bind(addr).await.map_err(StartupError::Bind)?)
    } else {
        None
    };

    let (runtime, inbound) = WsRuntime::new(config.runtime.url.clone());
    tracing::info!(
        url = %config.runtime.url,
        methods = config.methods.len(),
        queue_capacity = config.dispatch.queue_capacity,
        "Configuration loaded"
    );

    let admin_key = config.admin.api_key.clone();
    let bridge = RuntimeBridge::new(config, runtime.clone(), runtime);
    bridge.attach(inbound);
    bridge.start();

    let admin_task = admin_listener.map(|listener| {
        let router = admin_router(bridge.clone(), &admin_key);
        let bridge = Arc::clone(&bridge);
        tokio::spawn(async move {
            let address = listener.local_addr().ok();
            tracing::info!(address = ?address, "Admin API listening");
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { bridge.shutdown_handle().wait().await })
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "Admin API server error");
            }
        })
    });

    wait_for_signal().await;
    bridge.shutdown().await;

    if let Some(task) = admin_task {
        let _ = task.await;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
