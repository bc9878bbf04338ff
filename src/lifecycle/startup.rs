//! Startup orchestration.
//!
//! # Responsibilities
//! - Turn validated configuration into a populated backend pool
//! - Bind the listener
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - All backends share one upstream client and its connection pool
//! - Listeners start last (traffic only when ready)

use std::sync::Arc;
use tokio::net::TcpListener;
use url::Url;

use crate::config::{BalancerConfig, ConfigError, ListenerConfig};
use crate::load_balancer::backend::{upstream_client, Backend};
use crate::load_balancer::ServerPool;
use crate::observability::logging::InitError;

/// Fatal error before the balancer starts serving.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid backend url {url:?}: {source}")]
    BackendUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to initialize logging: {0}")]
    Logging(#[from] InitError),

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Build the backend pool described by `config`, in declaration order.
///
/// Repeated addresses are skipped with a warning.
pub fn build_pool(config: &BalancerConfig) -> Result<Arc<ServerPool>, StartupError> {
    let pool = ServerPool::new(config.strategy);
    let client = upstream_client(Some(config.timeouts.connect()));
    let forward_timeout = config.timeouts.upstream();

    for raw in &config.backends {
        let url = Url::parse(raw).map_err(|source| StartupError::BackendUrl {
            url: raw.clone(),
            source,
        })?;
        let backend = Arc::new(Backend::with_client(url, client.clone(), forward_timeout));
        if pool.add_backend(backend) {
            tracing::info!(url = %raw, "Configured server");
        } else {
            tracing::warn!(url = %raw, "Duplicate backend ignored");
        }
    }

    Ok(Arc::new(pool))
}

/// Bind the client-facing listener.
pub async fn bind(config: &ListenerConfig) -> Result<TcpListener, StartupError> {
    let listener = TcpListener::bind(&config.bind_address)
        .await
        .map_err(|source| StartupError::Bind {
            address: config.bind_address.clone(),
            source,
        })?;

    if let Ok(addr) = listener.local_addr() {
        tracing::info!(address = %addr, "Load Balancer started");
    }
    Ok(listener)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::Strategy;

    fn config(backends: &[&str]) -> BalancerConfig {
        BalancerConfig {
            backends: backends.iter().map(|s| s.to_string()).collect(),
            strategy: Strategy::LeastConnection,
            ..BalancerConfig::default()
        }
    }

    #[test]
    fn builds_pool_in_order_without_duplicates() {
        let pool = build_pool(&config(&[
            "http://127.0.0.1:3031",
            "http://127.0.0.1:3032",
            "http://127.0.0.1:3031",
        ]))
        .unwrap();

        assert_eq!(pool.strategy(), Strategy::LeastConnection);
        let ports: Vec<_> = pool.backends().iter().map(|b| b.url().port().unwrap()).collect();
        assert_eq!(ports, vec![3031, 3032]);
        assert_eq!(pool.alive_count(), 2);
    }

    #[test]
    fn rejects_unparseable_backend() {
        let err = build_pool(&config(&["not a url"])).unwrap_err();
        assert!(matches!(err, StartupError::BackendUrl { .. }));
    }

    #[tokio::test]
    async fn bind_reports_address_in_use() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = taken.local_addr().unwrap().to_string();

        let err = bind(&ListenerConfig { bind_address: address.clone() }).await.unwrap_err();
        match err {
            StartupError::Bind { address: a, .. } => assert_eq!(a, address),
            other => panic!("unexpected error: {other}"),
        }
    }
}
