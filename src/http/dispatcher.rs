//! Request dispatch with a single retry.
//!
//! # Responsibilities
//! - Buffer the client body so a failed attempt can be replayed
//! - Select a peer from the pool and forward the request
//! - On a transport error, mark the peer dead and retry once on another peer
//! - Answer 503 when no peer is available or the retry also fails
//!
//! # Design Decisions
//! - Upstream status codes (5xx included) are responses, not errors, and
//!   are never retried
//! - The retry budget is carried by an explicit `Attempt` value, not by
//!   anything attached to the request
//! - No backoff between attempts

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{header, Request, Response};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use crate::http::{request, response};
use crate::load_balancer::{Backend, ForwardError, ServerPool};
use crate::observability::metrics;

/// Position of a forwarding attempt within one client request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    Original,
    Retry,
}

impl Attempt {
    /// The attempt that follows a failure, or `None` once the retry is spent.
    pub fn retry(self) -> Option<Attempt> {
        match self {
            Attempt::Original => Some(Attempt::Retry),
            Attempt::Retry => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Attempt::Original => "original",
            Attempt::Retry => "retry",
        }
    }
}

/// Routes client requests to pool members.
#[derive(Debug)]
pub struct Dispatcher {
    pool: Arc<ServerPool>,
    max_body_bytes: usize,
}

impl Dispatcher {
    pub fn new(pool: Arc<ServerPool>, max_body_bytes: usize) -> Self {
        Self {
            pool,
            max_body_bytes,
        }
    }

    pub fn pool(&self) -> &Arc<ServerPool> {
        &self.pool
    }

    /// Serve one client request.
    ///
    /// At most two peers are contacted. Every path ends in a response.
    pub async fn dispatch(&self, request: Request<Body>) -> Response<Body> {
        let start = Instant::now();
        let request_id = request::request_id(request.headers()).to_string();
        let client_ip = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());

        let (parts, body) = request.into_parts();
        let method = parts.method.to_string();

        tracing::debug!(
            request_id = %request_id,
            method = %parts.method,
            path = %parts.uri.path(),
            "Proxying request"
        );

        if declared_length(&parts.headers).is_some_and(|len| len > self.max_body_bytes) {
            tracing::warn!(request_id = %request_id, limit = self.max_body_bytes, "Request body exceeds limit");
            metrics::record_request(&method, 413, "none", start);
            return response::payload_too_large();
        }

        let body = match axum::body::to_bytes(body, self.max_body_bytes).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(request_id = %request_id, error = %e, "Failed to buffer request body");
                metrics::record_request(&method, 413, "none", start);
                return response::payload_too_large();
            }
        };

        let mut attempt = Attempt::Original;
        loop {
            let Some(peer) = self.pool.next_valid_peer() else {
                tracing::warn!(request_id = %request_id, attempt = attempt.as_str(), "No alive backends");
                metrics::record_request(&method, 503, "none", start);
                return response::service_unavailable();
            };

            let upstream = request::replay(&parts, &body, client_ip);
            match peer.forward(upstream).await {
                Ok(response) => {
                    metrics::record_request(&method, response.status().as_u16(), peer.url().as_str(), start);
                    return response;
                }
                Err(err) => match self.on_forward_error(&peer, &err, attempt, &request_id) {
                    Some(next) => attempt = next,
                    None => {
                        metrics::record_request(&method, 503, peer.url().as_str(), start);
                        return response::service_unavailable();
                    }
                },
            }
        }
    }

    /// Evict a failing peer and decide whether to try again.
    fn on_forward_error(
        &self,
        peer: &Backend,
        err: &ForwardError,
        attempt: Attempt,
        request_id: &str,
    ) -> Option<Attempt> {
        tracing::error!(
            request_id = %request_id,
            host = %peer.url(),
            attempt = attempt.as_str(),
            error = %err,
            "Error forwarding request"
        );
        peer.set_alive(false);
        metrics::record_proxy_error(peer.url().as_str());

        let next = attempt.retry();
        if next.is_some() {
            tracing::info!(request_id = %request_id, "Retrying on another backend");
        }
        next
    }
}

fn declared_length(headers: &header::HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::Strategy;
    use crate::testing::{closed_addr, spawn_upstream};
    use axum::http::{Method, StatusCode};
    use axum::Router;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use url::Url;

    fn backend_at(addr: SocketAddr) -> Arc<Backend> {
        Arc::new(Backend::new(Url::parse(&format!("http://{}", addr)).unwrap()))
    }

    fn pool_of(backends: &[Arc<Backend>]) -> Arc<ServerPool> {
        let pool = ServerPool::new(Strategy::RoundRobin);
        for b in backends {
            pool.add_backend(b.clone());
        }
        Arc::new(pool)
    }

    async fn echo_upstream() -> SocketAddr {
        spawn_upstream(Router::new().fallback(|body: String| async move { format!("echo:{}", body) })).await
    }

    async fn body_string(response: Response<Body>) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn post(body: &'static str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/submit")
            .body(Body::from(body))
            .unwrap()
    }

    #[test]
    fn attempt_allows_one_retry() {
        assert_eq!(Attempt::Original.retry(), Some(Attempt::Retry));
        assert_eq!(Attempt::Retry.retry(), None);
    }

    #[tokio::test]
    async fn forwards_to_alive_backend() {
        let live = backend_at(echo_upstream().await);
        let dispatcher = Dispatcher::new(pool_of(&[live.clone()]), 1024);

        let response = dispatcher.dispatch(post("hi")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "echo:hi");
        assert!(live.is_alive());
        assert_eq!(live.active_connections(), 0);
    }

    #[tokio::test]
    async fn retries_on_other_backend_with_same_body() {
        let live = backend_at(echo_upstream().await);
        let down = backend_at(closed_addr());
        // Round-robin starts at the second entry, so `down` is tried first.
        let dispatcher = Dispatcher::new(pool_of(&[live.clone(), down.clone()]), 1024);

        let response = dispatcher.dispatch(post("replayed")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "echo:replayed");
        assert!(!down.is_alive());
        assert!(live.is_alive());
    }

    #[tokio::test]
    async fn retry_is_bounded_to_one() {
        let backends: Vec<_> = (0..3).map(|_| backend_at(closed_addr())).collect();
        let dispatcher = Dispatcher::new(pool_of(&backends), 1024);

        let response = dispatcher.dispatch(post("x")).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_string(response).await, "service unavailable");

        let dead = backends.iter().filter(|b| !b.is_alive()).count();
        assert_eq!(dead, 2);
    }

    #[tokio::test]
    async fn empty_or_all_dead_pool_is_unavailable() {
        let dispatcher = Dispatcher::new(pool_of(&[]), 1024);
        let response = dispatcher.dispatch(post("x")).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let b = backend_at(echo_upstream().await);
        b.set_alive(false);
        let dispatcher = Dispatcher::new(pool_of(&[b]), 1024);
        let response = dispatcher.dispatch(post("x")).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn upstream_error_status_is_not_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().fallback(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        });
        let failing = backend_at(spawn_upstream(app).await);
        let other = backend_at(echo_upstream().await);
        let dispatcher = Dispatcher::new(pool_of(&[other, failing.clone()]), 1024);

        let response = dispatcher.dispatch(post("x")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(failing.is_alive());
    }

    #[tokio::test]
    async fn rejects_oversized_body_without_contacting_backends() {
        let live = backend_at(echo_upstream().await);
        let dispatcher = Dispatcher::new(pool_of(&[live.clone()]), 4);

        let response = dispatcher.dispatch(post("far too long")).await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(live.is_alive());
    }
}
