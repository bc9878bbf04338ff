//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request
//!     → pool.rs (snapshot of backends, append-only)
//!     → Apply load balancing algorithm:
//!         - round_robin.rs (rotate through backends)
//!         - least_conn.rs (pick backend with fewest connections)
//!     → backend.rs (count connection, forward upstream)
//!     → Return response or forward error
//! ```
//!
//! # Design Decisions
//! - One strategy per pool, fixed at construction
//! - Dead backends excluded from selection
//! - Liveness and connection counts are per-backend atomics; no lock is
//!   held across a network call

use std::sync::Arc;

pub mod backend;
pub mod least_conn;
pub mod pool;
pub mod round_robin;

pub use backend::{Backend, ForwardError};
pub use pool::{ServerPool, Strategy};

/// A peer selection algorithm.
pub trait LoadBalancer: Send + Sync + std::fmt::Debug {
    /// Pick an alive backend from `backends`, or `None` if every one is dead.
    fn next_server(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>>;
}
