//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Fixed-interval timer
//!     → spawn one sweep per tick (sweeps may overlap)
//!     → fan out one probe per backend, fan results back in
//!     → set each backend alive/dead
//!
//! Passive detection (http/dispatcher.rs):
//!     Proxy transport error
//!     → mark the failing backend dead immediately
//! ```
//!
//! # Design Decisions
//! - A probe is a point check: a single 200 revives, anything else kills
//! - No hysteresis or flap damping
//! - Health state is per-backend, independent of request traffic

pub mod active;

pub use active::{sweep, HealthChecker, SweepOutcome};
