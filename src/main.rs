//! HTTP load balancer.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌───────────────────────────────────────────────┐
//!                      │                 LOAD BALANCER                 │
//!                      │                                               │
//!   Client Request     │  ┌─────────┐    ┌────────────┐    ┌────────┐ │
//!   ───────────────────┼─▶│  http   │───▶│ dispatcher │───▶│  pool  │ │
//!                      │  │ server  │    │ (1 retry)  │    │  + LB  │ │
//!                      │  └─────────┘    └─────┬──────┘    └───┬────┘ │
//!                      │                       │               │      │
//!   Client Response    │                       ▼               ▼      │
//!   ◀──────────────────┼────────────────  ┌──────────┐    ┌─────────┐ │
//!                      │                  │ backend  │◀───│ health  │ │
//!                      │                  │ forward  │    │ checker │ │
//!                      │                  └────┬─────┘    └─────────┘ │
//!                      └───────────────────────┼──────────────────────┘
//!                                              ▼
//!                                        Upstream servers
//! ```

use clap::Parser;
use std::path::PathBuf;

use balancer::config::{load_config, BalancerConfig};
use balancer::lifecycle::{signals, startup, startup::StartupError, Shutdown};
use balancer::observability::{logging, metrics};
use balancer::HttpServer;

#[derive(Debug, Parser)]
#[command(name = "balancer", version, about = "HTTP load balancer with active health checking")]
struct Cli {
    /// Path to the YAML or TOML configuration file.
    #[arg(short, long, env = "BALANCER_CONFIG", default_value = "config.yaml")]
    config: PathBuf,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = load_config(&cli.config).map_err(StartupError::from)?;
    if cli.check {
        println!("{}: configuration ok", cli.config.display());
        return Ok(());
    }

    logging::init(&config.observability).map_err(StartupError::from)?;
    tracing::info!("balancer v{} starting", env!("CARGO_PKG_VERSION"));
    log_config(&config);

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let server = HttpServer::new(config)?;
    let listener = startup::bind(&server.config().listener).await?;

    let shutdown = Shutdown::new();
    signals::spawn_signal_listener(&shutdown);

    server
        .run(listener, shutdown.subscribe())
        .await
        .map_err(StartupError::Serve)?;

    tracing::info!("Shutdown complete");
    Ok(())
}

fn log_config(config: &BalancerConfig) {
    tracing::info!(
        bind_address = %config.listener.bind_address,
        strategy = %config.strategy,
        backends = config.backends.len(),
        health_check_interval_secs = config.health_check.interval_secs,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );
    if config.retries.max_attempts > 2 {
        tracing::debug!(
            max_attempts = config.retries.max_attempts,
            "retries.max_attempts is reserved; requests are retried at most once"
        );
    }
}
