//! HTTP/1.1 reverse proxy front end.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client            ┌──────────────────────────────────────────────┐
//!     ──────────────────┼─▶ net::listener ─▶ net::client               │
//!                       │                      │                        │
//!                       │                      ▼                        │
//!                       │              upstream::bridge                 │
//!                       │        (parser, pipeline queue, framer)       │
//!                       │                      │                        │
//!                       │                      ▼                        │
//!                       │   downstream::exchange ─▶ net::backend ───────┼──▶ Backend
//!                       │                                               │
//!                       │   config · observability · lifecycle          │
//!                       └──────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use h1_upstream::config::{load_config, validate_config, watcher::ConfigWatcher, ProxyConfig};
use h1_upstream::lifecycle::signals;
use h1_upstream::observability::{logging, metrics};
use h1_upstream::{HttpServer, Shutdown};

#[derive(Parser)]
#[command(name = "h1-upstream")]
#[command(about = "HTTP/1.1 reverse proxy front end", long_about = None)]
struct Cli {
    /// TOML configuration file, watched for changes.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(long)]
    bind: Option<String>,

    /// Override `backend.address`.
    #[arg(long)]
    backend: Option<String>,

    /// Override `server.name`.
    #[arg(long)]
    server_name: Option<String>,
}

impl Cli {
    fn apply_overrides(&self, config: &mut ProxyConfig) {
        if let Some(bind) = &self.bind {
            config.listener.bind_address = bind.clone();
        }
        if let Some(backend) = &self.backend {
            config.backend.address = backend.clone();
        }
        if let Some(name) = &self.server_name {
            config.server.name = name.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    cli.apply_overrides(&mut config);
    if let Err(errors) = validate_config(&config) {
        for error in &errors {
            eprintln!("invalid configuration: {error}");
        }
        return Err(format!("{} configuration error(s)", errors.len()).into());
    }

    logging::init(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "h1-upstream starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        backend = %config.backend.address,
        max_connections = config.listener.max_connections,
        max_pipeline_depth = config.limits.max_pipeline_depth,
        idle_secs = config.timeouts.idle_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    // Held for the life of the process; dropping it stops the watch.
    let mut _watcher = None;
    let mut config_updates = None;
    if let Some(path) = &cli.config {
        let (watcher, updates) = ConfigWatcher::new(path);
        match watcher.run() {
            Ok(handle) => {
                _watcher = Some(handle);
                config_updates = Some(updates);
            }
            Err(e) => tracing::warn!(error = %e, "Config hot reload disabled"),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    tokio::spawn(signals::shutdown_on_signal(shutdown.clone()));

    HttpServer::new(config).run(listener, config_updates, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
