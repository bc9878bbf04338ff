//! Round-robin load balancing strategy.

use std::sync::{Arc, Mutex, PoisonError};
use crate::load_balancer::{LoadBalancer, backend::Backend};

/// Round-robin selector.
/// Stores the index of the last selected backend; each call advances it
/// under one exclusive lock that spans the whole scan.
#[derive(Debug, Default)]
pub struct RoundRobin {
    current: Mutex<usize>,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobin {
    fn next_server(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        let len = backends.len();
        if len == 0 {
            return None;
        }

        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);

        // At most one full rotation
        for _ in 0..len {
            *current = (*current + 1) % len;
            let backend = &backends[*current];
            if backend.is_alive() {
                return Some(backend.clone());
            }
        }
        None
    }
}
