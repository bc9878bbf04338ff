//! Minimal upstream for trying the balancer locally.
//!
//! Answers every request with a greeting naming its own address, so
//! round-robin rotation is visible from the client side.

use axum::{http::Uri, Router};
use clap::Parser;
use std::net::SocketAddr;
use tokio::net::TcpListener;

#[derive(Debug, Parser)]
#[command(name = "demo-backend", about = "Toy upstream server")]
struct Cli {
    /// Port to listen on.
    #[arg(short, long, env = "PORT", default_value_t = 8081)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "demo_backend=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    let greeting = format!("hello from {}", addr);

    let app = Router::new().fallback(move |uri: Uri| {
        let greeting = greeting.clone();
        async move {
            tracing::info!(path = %uri.path(), "Request received");
            greeting
        }
    });

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(address = %addr, "Demo backend listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
