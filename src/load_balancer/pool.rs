//! Backend pool management.
//!
//! # Responsibilities
//! - Hold the insertion-ordered, append-only set of backends
//! - Apply the configured load balancing algorithm to select a peer
//! - Hand out independent snapshots for health checking

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

use crate::load_balancer::{
    LoadBalancer,
    backend::Backend,
    least_conn::LeastConnections,
    round_robin::RoundRobin,
};

/// Peer selection strategy, as named in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum Strategy {
    #[default]
    #[serde(rename = "round-robin")]
    RoundRobin,
    #[serde(rename = "least-connection", alias = "least-connections")]
    LeastConnection,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::RoundRobin => "round-robin",
            Strategy::LeastConnection => "least-connection",
        }
    }

    fn balancer(self) -> Box<dyn LoadBalancer> {
        match self {
            Strategy::RoundRobin => Box::new(RoundRobin::new()),
            Strategy::LeastConnection => Box::new(LeastConnections::new()),
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown strategy name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid strategy: {0:?}")]
pub struct ParseStrategyError(String);

impl FromStr for Strategy {
    type Err = ParseStrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round-robin" => Ok(Strategy::RoundRobin),
            "least-connection" | "least-connections" => Ok(Strategy::LeastConnection),
            other => Err(ParseStrategyError(other.to_string())),
        }
    }
}

/// An ordered collection of backends plus the algorithm that picks among them.
///
/// Duplicate addresses are rejected: adding a backend whose URL is already
/// present is a no-op.
#[derive(Debug)]
pub struct ServerPool {
    strategy: Strategy,
    backends: RwLock<Vec<Arc<Backend>>>,
    balancer: Box<dyn LoadBalancer>,
}

impl ServerPool {
    /// Create an empty pool using the given strategy.
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            backends: RwLock::new(Vec::new()),
            balancer: strategy.balancer(),
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Append a backend. Returns false if its address is already pooled.
    pub fn add_backend(&self, backend: Arc<Backend>) -> bool {
        let mut backends = self.backends.write().unwrap_or_else(PoisonError::into_inner);
        if backends.iter().any(|b| b.url() == backend.url()) {
            tracing::debug!(url = %backend.url(), "Ignoring duplicate backend");
            return false;
        }
        backends.push(backend);
        true
    }

    /// Return an independent copy of the backend list.
    pub fn backends(&self) -> Vec<Arc<Backend>> {
        self.backends.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Select the next alive peer, or `None` if the pool is empty or all dead.
    pub fn next_valid_peer(&self) -> Option<Arc<Backend>> {
        // Selection runs on a snapshot so appends never wait on a scan.
        let backends = self.backends();
        let peer = self.balancer.next_server(&backends);
        if peer.is_none() {
            tracing::debug!(
                strategy = %self.strategy,
                backend_count = backends.len(),
                "No alive backends found in pool"
            );
        }
        peer
    }

    pub fn size(&self) -> usize {
        self.backends.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Number of backends currently marked alive.
    pub fn alive_count(&self) -> usize {
        self.backends().iter().filter(|b| b.is_alive()).count()
    }
}
