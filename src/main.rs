//! Runtime bridge daemon.
//!
//! ```text
//!                    ┌──────────────────────────────────────────────┐
//!   submit()         │                 RUNTIME BRIDGE               │
//!   ─────────────────┼─▶ dispatcher ─▶ executor ─▶ circuit breaker ─┼──▶ runtime (ws)
//!                    │   (priority)    (timeouts,                   │
//!                    │                  cache)                      │
//!   handlers         │                                              │
//!   ◀────────────────┼── event stream ◀─ recovery manager ◀─────────┼─── events
//!                    │                  (buffer, reconnect, replay) │
//!                    └──────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;

use runtime_bridge::config::loader::load_config;
use runtime_bridge::config::BridgeConfig;
use runtime_bridge::lifecycle::startup;
use runtime_bridge::observability::logging::init_logging;

#[derive(Parser)]
#[command(name = "runtime-bridge")]
#[command(about = "Command and event bridge for an external scripting runtime", long_about = None)]
struct Args {
    /// Path to the TOML config file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => BridgeConfig::default(),
    };

    init_logging(&config.observability)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?args.config,
        "runtime-bridge starting"
    );

    startup::run(config).await?;
    Ok(())
}
