//! Backend abstraction.
//!
//! # Responsibilities
//! - Represent a single upstream server
//! - Track liveness (toggled by health probes and proxy errors)
//! - Track active connections (for Least Connections LB)
//! - Forward requests to the upstream as a reverse proxy
//! - Answer point-in-time health probes

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderValue, Method, Request, Response, StatusCode, Uri};
use http_body::{Body as HttpBody, Frame, SizeHint};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use std::ops::Deref;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time;
use url::Url;

/// HTTP client shared by backends for forwarding and probing.
pub type UpstreamClient = Client<HttpConnector, Body>;

/// Build an upstream client with the given connect timeout.
pub fn upstream_client(connect_timeout: Option<Duration>) -> UpstreamClient {
    let mut connector = HttpConnector::new();
    connector.set_connect_timeout(connect_timeout);
    connector.set_nodelay(true);
    Client::builder(TokioExecutor::new()).build(connector)
}

/// Headers that apply to a single transport hop and must not be forwarded.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Transport-level failure while forwarding a request.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("invalid upstream request: {0}")]
    InvalidRequest(#[from] axum::http::Error),

    #[error("invalid upstream host header: {0}")]
    InvalidHost(#[from] header::InvalidHeaderValue),

    #[error("backend url has no host")]
    MissingHost,

    #[error("upstream request failed: {0}")]
    Upstream(#[from] hyper_util::client::legacy::Error),

    #[error("upstream did not respond within {0:?}")]
    Timeout(Duration),
}

/// A single upstream server.
pub struct Backend {
    url: Url,
    alive: AtomicBool,
    active_connections: AtomicUsize,
    client: UpstreamClient,
    forward_timeout: Option<Duration>,
}

impl Backend {
    /// Create a backend with its own client and no forward timeout.
    pub fn new(url: Url) -> Self {
        Self::with_client(url, upstream_client(None), None)
    }

    /// Create a backend sharing an existing client.
    pub fn with_client(url: Url, client: UpstreamClient, forward_timeout: Option<Duration>) -> Self {
        Self {
            url,
            alive: AtomicBool::new(true),
            active_connections: AtomicUsize::new(0),
            client,
            forward_timeout,
        }
    }

    /// The upstream address. Immutable for the backend's lifetime.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::Release);
    }

    /// Get the current number of in-flight forwarded requests.
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Acquire)
    }

    /// Count a new in-flight request. The count is released when the guard drops.
    pub fn track(self: &Arc<Self>) -> BackendConnectionGuard {
        self.active_connections.fetch_add(1, Ordering::AcqRel);
        BackendConnectionGuard {
            backend: self.clone(),
        }
    }

    /// Forward a client request to this backend.
    ///
    /// The connection stays counted until the response body has been fully
    /// streamed or dropped; on error it is released before returning.
    /// Transport failures are returned, never panicked on; the upstream's
    /// own status codes (5xx included) pass through untouched.
    pub async fn forward(self: &Arc<Self>, request: Request<Body>) -> Result<Response<Body>, ForwardError> {
        let guard = self.track();

        let request = self.upstream_request(request)?;
        let response_future = self.client.request(request);

        let response = match self.forward_timeout {
            Some(limit) => time::timeout(limit, response_future)
                .await
                .map_err(|_| ForwardError::Timeout(limit))??,
            None => response_future.await?,
        };

        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        let body = TrackedBody {
            inner: Body::new(body),
            guard: Some(guard),
        };
        Ok(Response::from_parts(parts, Body::new(body)))
    }

    /// Probe the backend's base address with a plain GET.
    ///
    /// Alive iff the upstream answers 200 within `timeout`. Transport errors,
    /// any other status, or a timeout all count as dead.
    pub async fn probe(&self, timeout: Duration) -> bool {
        let uri = match self.url.as_str().parse::<Uri>() {
            Ok(uri) => uri,
            Err(e) => {
                tracing::warn!(url = %self.url, error = %e, "Backend url is not a valid probe uri");
                return false;
            }
        };

        let request = match Request::builder()
            .method(Method::GET)
            .uri(uri)
            .header(header::USER_AGENT, "balancer-health-check")
            .body(Body::empty())
        {
            Ok(req) => req,
            Err(e) => {
                tracing::error!(url = %self.url, error = %e, "Failed to build probe request");
                return false;
            }
        };

        match time::timeout(timeout, self.client.request(request)).await {
            Ok(Ok(response)) => response.status() == StatusCode::OK,
            Ok(Err(e)) => {
                tracing::trace!(url = %self.url, error = %e, "Probe failed: connection error");
                false
            }
            Err(_) => {
                tracing::trace!(url = %self.url, "Probe failed: timeout");
                false
            }
        }
    }

    /// Rewrite a client request so it targets this backend.
    fn upstream_request(&self, request: Request<Body>) -> Result<Request<Body>, ForwardError> {
        let (mut parts, body) = request.into_parts();

        let authority = self.authority().ok_or(ForwardError::MissingHost)?;
        parts.uri = Uri::builder()
            .scheme(self.url.scheme())
            .authority(authority.as_str())
            .path_and_query(self.path_and_query(&parts.uri))
            .build()?;

        strip_hop_by_hop(&mut parts.headers);
        parts
            .headers
            .insert(header::HOST, HeaderValue::from_str(&authority)?);

        Ok(Request::from_parts(parts, body))
    }

    fn authority(&self) -> Option<String> {
        let host = self.url.host_str()?;
        Some(match self.url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        })
    }

    /// Join the backend's base path with the request path and merge queries.
    fn path_and_query(&self, uri: &Uri) -> String {
        let mut out = join_paths(self.url.path(), uri.path());

        let base_query = self.url.query().filter(|q| !q.is_empty());
        let req_query = uri.query().filter(|q| !q.is_empty());
        match (base_query, req_query) {
            (Some(a), Some(b)) => {
                out.push('?');
                out.push_str(a);
                out.push('&');
                out.push_str(b);
            }
            (Some(q), None) | (None, Some(q)) => {
                out.push('?');
                out.push_str(q);
            }
            (None, None) => {}
        }
        out
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("url", &self.url.as_str())
            .field("alive", &self.is_alive())
            .field("active_connections", &self.active_connections())
            .finish()
    }
}

fn join_paths(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) => format!("{}/{}", base, path),
        _ => format!("{}{}", base, path),
    }
}

fn strip_hop_by_hop(headers: &mut header::HeaderMap) {
    // Headers named by Connection are hop-by-hop too.
    let named: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();

    for name in named.iter().map(String::as_str).chain(HOP_BY_HOP) {
        headers.remove(name);
    }
}

/// A RAII guard that manages the active connection count.
#[derive(Debug)]
pub struct BackendConnectionGuard {
    backend: Arc<Backend>,
}

impl Deref for BackendConnectionGuard {
    type Target = Backend;
    fn deref(&self) -> &Self::Target {
        &self.backend
    }
}

impl Drop for BackendConnectionGuard {
    fn drop(&mut self) {
        self.backend.active_connections.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Response body that keeps its backend's connection counted until the
/// last frame is handed out, an error ends the stream, or it is dropped.
struct TrackedBody {
    inner: Body,
    guard: Option<BackendConnectionGuard>,
}

impl HttpBody for TrackedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let polled = Pin::new(&mut self.inner).poll_frame(cx);
        let finished = match &polled {
            Poll::Ready(None) | Poll::Ready(Some(Err(_))) => true,
            Poll::Ready(Some(Ok(_))) => self.inner.is_end_stream(),
            Poll::Pending => false,
        };
        if finished {
            self.guard.take();
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
