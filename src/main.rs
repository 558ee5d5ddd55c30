//! Edge Router
//!
//! HTTP edge router that learns its routing table from the message bus.
//!
//! # Architecture Overview
//!
//! ```text
//!                         ┌───────────────────────────────────────────────┐
//!                         │                  EDGE ROUTER                  │
//!                         │                                               │
//!   router.register ──────┼─▶┌─────────┐    ┌──────────┐    ┌──────────┐ │
//!   router.unregister ────┼─▶│ ingest  │───▶│ registry │───▶│ snapshot │─┼──▶ router.active_apps
//!                         │  └─────────┘    └────┬─────┘    └──────────┘ │
//!                         │                      │                        │
//!     Client Request      │  ┌─────────┐    ┌────▼─────┐                  │
//!     ────────────────────┼─▶│   net   │───▶│  proxy   │──────────────────┼──▶ Backend
//!                         │  │listener │    └──────────┘                  │
//!                         │  └─────────┘                                  │
//!                         │                                               │
//!                         │  ┌─────────────────────────────────────────┐ │
//!                         │  │ component (announce, /varz, /healthz)   │ │
//!                         │  │ lifecycle (startup, drain, deadline)    │ │
//!                         │  └─────────────────────────────────────────┘ │
//!                         └───────────────────────────────────────────────┘
//! ```
//!
//! Exits successfully when every connection drained before the deadline,
//! and with a failure status otherwise.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use edge_router::config::loader::{prepare_config, read_config};
use edge_router::config::RouterConfig;
use edge_router::lifecycle::signals::spawn_signal_listener;
use edge_router::lifecycle::startup;
use edge_router::observability::init_logging;
use edge_router::{Shutdown, ShutdownState};

#[derive(Parser)]
#[command(name = "edge-router")]
#[command(about = "HTTP edge router fed by the message bus", long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// NATS server, overriding the configuration file
    #[arg(long, env = "EDGE_ROUTER_NATS_URI")]
    nats_uri: Option<String>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match resolve_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("edge-router: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(&config.logging) {
        eprintln!("edge-router: failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if config.worker_threads > 0 {
        builder.worker_threads(config.worker_threads);
    }
    let runtime = match builder.enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build runtime");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(run(config))
}

fn resolve_config(args: &Args) -> Result<RouterConfig, edge_router::config::ConfigError> {
    let mut config = match &args.config {
        Some(path) => read_config(path)?,
        None => RouterConfig::default(),
    };
    if let Some(uri) = &args.nats_uri {
        config.nats.uri = uri.clone();
        config.nats.host.clear();
    }
    prepare_config(config)
}

async fn run(config: RouterConfig) -> ExitCode {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.port,
        index = config.index,
        "edge-router starting"
    );

    let shutdown = Arc::new(Shutdown::new());
    let requested = shutdown.requested();
    if let Err(e) = spawn_signal_listener(shutdown.clone()) {
        tracing::error!(error = %e, "Startup failed");
        return ExitCode::FAILURE;
    }

    let running = match startup::launch(config).await {
        Ok(running) => running,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            return ExitCode::FAILURE;
        }
    };

    match running.serve_proxy(requested).await {
        ShutdownState::Drained => ExitCode::SUCCESS,
        ShutdownState::TimedOut => ExitCode::FAILURE,
    }
}
