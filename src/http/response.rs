//! Responses the balancer produces itself.
//!
//! # Design Decisions
//! - Upstream responses are streamed back untouched apart from hop-by-hop headers
//! - Selection failure and exhausted retries both surface as 503

use axum::body::Body;
use axum::http::{header, Response, StatusCode};

pub const SERVICE_UNAVAILABLE_BODY: &str = "service unavailable";

fn plain(status: StatusCode, message: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(message));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// No alive peer, or the single retry also failed.
pub fn service_unavailable() -> Response<Body> {
    plain(StatusCode::SERVICE_UNAVAILABLE, SERVICE_UNAVAILABLE_BODY)
}

/// The client body could not be buffered within the configured limit.
pub fn payload_too_large() -> Response<Body> {
    plain(StatusCode::PAYLOAD_TOO_LARGE, "request body too large")
}
