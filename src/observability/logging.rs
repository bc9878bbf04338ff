//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber
//! - Pick the log level from `RUST_LOG`, falling back to config
//! - Select pretty or JSON output

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::schema::{LogFormat, ObservabilityConfig};

/// Error raised when a global subscriber is already installed.
pub type InitError = tracing_subscriber::util::TryInitError;

/// Build the filter: `RUST_LOG` wins, otherwise the configured level for
/// this crate plus tower_http.
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("balancer={level},tower_http={level}")))
}

/// Install the global subscriber for the process.
pub fn init(config: &ObservabilityConfig) -> Result<(), InitError> {
    let filter = env_filter(&config.log_level);
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    }
}
