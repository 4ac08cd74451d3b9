//! Request gate for the school portal API.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ request id ─▶ trace ─▶ rate limit ─▶ CSRF gate ─▶ handlers
//!                                               │              │
//!                                        429 + Retry-After   403 {error, message}
//!
//!     Cross-cutting: config (TOML + hot reload), observability (tracing,
//!     Prometheus), lifecycle (signals, graceful shutdown)
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use portal_guard::config::{load_config, watcher::ConfigWatcher, GuardConfig};
use portal_guard::lifecycle::{shutdown_signal, Shutdown};
use portal_guard::observability::{logging, metrics};
use portal_guard::HttpServer;

#[derive(Parser)]
#[command(name = "portal-guard")]
#[command(about = "CSRF and rate-limit gate for the school portal API", long_about = None)]
struct Args {
    /// Path to a TOML config file. Defaults apply when omitted.
    #[arg(short, long, env = "PORTAL_GUARD_CONFIG")]
    config: Option<PathBuf>,

    /// Watch the config file and apply policy changes without restart.
    #[arg(long)]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GuardConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "portal-guard starting");

    tracing::info!(
        bind_address = %config.listener.bind_address,
        environment = ?config.environment,
        store = ?config.rate_limit.store,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    // Keep the watcher handle alive for the lifetime of the server.
    let (config_updates, _watcher) = match (&args.config, args.watch) {
        (Some(path), true) => {
            let (watcher, updates) = ConfigWatcher::new(path, config.clone());
            (updates, Some(watcher.run()?))
        }
        _ => (mpsc::unbounded_channel().1, None),
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    shutdown.trigger_on(shutdown_signal());
    let grace = Duration::from_secs(config.timeouts.shutdown_secs);
    let mut deadline = shutdown.subscribe();

    let server = HttpServer::connect(config).await?;
    tokio::select! {
        result = server.run(listener, config_updates, shutdown.subscribe()) => result?,
        _ = async {
            let _ = deadline.recv().await;
            tokio::time::sleep(grace).await;
        } => tracing::warn!(grace_secs = grace.as_secs(), "Graceful shutdown timed out"),
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
