//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the catch-all proxy handler
//! - Wire up middleware (tracing, request timeout, request ID)
//! - Start the health checker alongside the listener
//! - Serve until shutdown, then drain in-flight requests up to a deadline

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    response::Response,
    routing::any,
    Router,
};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::BalancerConfig;
use crate::health::HealthChecker;
use crate::http::dispatcher::Dispatcher;
use crate::http::request::MakeRequestUuidV4;
use crate::lifecycle::startup::{self, StartupError};
use crate::load_balancer::ServerPool;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
}

/// HTTP front door of the balancer.
pub struct HttpServer {
    router: Router,
    config: BalancerConfig,
    pool: Arc<ServerPool>,
}

impl HttpServer {
    /// Create a server, building the backend pool from `config`.
    pub fn new(config: BalancerConfig) -> Result<Self, StartupError> {
        let pool = startup::build_pool(&config)?;
        Ok(Self::with_pool(config, pool))
    }

    /// Create a server around an already populated pool.
    pub fn with_pool(config: BalancerConfig, pool: Arc<ServerPool>) -> Self {
        let state = AppState {
            dispatcher: Arc::new(Dispatcher::new(pool.clone(), config.limits.max_body_bytes)),
        };
        let router = Self::build_router(&config, state);
        Self {
            router,
            config,
            pool,
        }
    }

    /// Build the Axum router with all middleware layers.
    ///
    /// A request that outlives `timeouts.request_secs` gets the same 503 as
    /// an exhausted retry.
    fn build_router(config: &BalancerConfig, state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(TimeoutLayer::with_status_code(
                StatusCode::SERVICE_UNAVAILABLE,
                config.timeouts.request(),
            ))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV4))
            .layer(TraceLayer::new_for_http())
    }

    /// Run the server, accepting connections on the given listener.
    ///
    /// Returns once `shutdown` fires and in-flight requests have drained,
    /// or the drain deadline passes.
    pub async fn run(self, listener: TcpListener, shutdown: CancellationToken) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            strategy = %self.pool.strategy(),
            backends = self.pool.size(),
            "HTTP server starting"
        );

        if self.config.health_check.enabled {
            let checker = HealthChecker::new(self.pool.clone(), &self.config.health_check);
            tokio::spawn(checker.run(shutdown.child_token()));
        } else {
            tracing::warn!("Health checking disabled; backends only leave rotation on proxy errors");
        }

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        let signal = shutdown.clone();
        let server = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                signal.cancelled().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .into_future();

        let drain = self.config.timeouts.shutdown();
        tokio::select! {
            result = server => result?,
            _ = async {
                shutdown.cancelled().await;
                tokio::time::sleep(drain).await;
            } => {
                tracing::warn!(deadline_secs = drain.as_secs(), "Drain deadline passed, dropping open connections");
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn pool(&self) -> Arc<ServerPool> {
        self.pool.clone()
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &BalancerConfig {
        &self.config
    }

    /// The fully layered router, for driving requests without a socket.
    pub fn router(&self) -> Router {
        self.router.clone()
    }
}

/// Main proxy handler.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    state.dispatcher.dispatch(request).await
}
