//! Least Connections load balancing strategy.

use std::sync::Arc;
use crate::load_balancer::{LoadBalancer, backend::Backend};

/// Least connections selector.
/// Selects the alive backend with the minimum number of active connections.
///
/// Each backend's count is an independent snapshot, so under concurrent
/// traffic the choice is eventually rather than instantaneously minimal.
#[derive(Debug, Default)]
pub struct LeastConnections;

impl LeastConnections {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for LeastConnections {
    fn next_server(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        // In case of tie, the first one is selected (stability)
        backends
            .iter()
            .filter(|b| b.is_alive())
            .min_by_key(|b| b.active_connections())
            .cloned()
    }
}
