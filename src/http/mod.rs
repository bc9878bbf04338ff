//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware)
//!     → request.rs (request ID, buffered replayable request)
//!     → dispatcher.rs (pick peer, forward, retry once on transport error)
//!     → response.rs (balancer-generated error responses)
//!     → Send to client
//! ```

pub mod dispatcher;
pub mod request;
pub mod response;
pub mod server;

pub use dispatcher::{Attempt, Dispatcher};
pub use request::{MakeRequestUuidV4, X_REQUEST_ID};
pub use server::HttpServer;
