//! Heartbeat router
//!
//! Maps incoming HTTP hosts to backend pools learned from a NATS heartbeat
//! stream.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────────┐
//!                      │                       ROUTER                         │
//!                      │                                                      │
//!   NATS               │  ┌────────────┐   register /    ┌──────────────┐     │
//!   router.register ───┼─▶│ subscriber │───unregister───▶│   registry   │     │
//!   router.unregister  │  │ (heartbeat)│                 │ route → pool │     │
//!   router.greet       │  └─────┬──────┘                 └──┬───────▲───┘     │
//!   ◀── router.start ──┼────────┘                  snapshot │       │ prune   │
//!                      │                                    ▼       │         │
//!   Client Request     │  ┌────────────┐   ┌──────────┐  ┌─────────┴──┐      │
//!   ───────────────────┼─▶│ access log │──▶│  lookup  │  │   pruner   │      │
//!                      │  └────────────┘   └────┬─────┘  └────────────┘      │
//!                      │                        ▼ RoutePool                   │
//!   Client Response    │                  ┌──────────┐                        │
//!   ◀──────────────────┼──────────────────│ dispatch │                        │
//!                      │                  └──────────┘                        │
//!                      └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use heartbeat_router::config::{load_config, RouterConfig};
use heartbeat_router::lifecycle::startup;
use heartbeat_router::observability::logging::init_logging;

#[derive(Parser)]
#[command(name = "heartbeat-router", version, about = "Heartbeat-driven HTTP route registry")]
struct Args {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => RouterConfig::default(),
    };

    init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "heartbeat-router starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        bus_servers = config.bus.servers.len(),
        stale_threshold_secs = config.registry.stale_threshold_secs,
        prune_interval_secs = config.registry.prune_interval_secs,
        "Configuration loaded"
    );

    startup::run(config).await?;
    Ok(())
}
