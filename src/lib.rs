//! HTTP load balancer library.
//!
//! A reverse proxy that spreads requests over a fixed set of backends,
//! evicts backends that fail, and revives them through periodic probes.

pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;

#[cfg(test)]
mod testing;

pub use config::BalancerConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
