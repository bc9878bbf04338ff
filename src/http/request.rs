//! Request handling and transformation.
//!
//! # Responsibilities
//! - Generate a unique request ID (UUID v4) for every inbound request
//! - Build the per-attempt upstream copy of a buffered client request
//! - Record the client address in X-Forwarded-For
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - The client request is buffered once; each attempt gets a fresh copy

use axum::body::{Body, Bytes};
use axum::http::{request::Parts, HeaderMap, HeaderName, HeaderValue, Request, Version};
use std::net::IpAddr;
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::Uuid;

pub const X_REQUEST_ID: &str = "x-request-id";
pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Generates `x-request-id` values from random UUIDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeRequestUuidV4;

impl MakeRequestId for MakeRequestUuidV4 {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = Uuid::new_v4().to_string();
        HeaderValue::from_str(&id).ok().map(RequestId::new)
    }
}

/// Read the request ID set by the middleware, if any.
pub fn request_id(headers: &HeaderMap) -> &str {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
}

/// Rebuild a request from buffered parts for one upstream attempt.
pub fn replay(parts: &Parts, body: &Bytes, client_ip: Option<IpAddr>) -> Request<Body> {
    let mut request = Request::new(Body::from(body.clone()));
    *request.method_mut() = parts.method.clone();
    *request.uri_mut() = parts.uri.clone();
    // The upstream client speaks HTTP/1.1 regardless of the inbound version.
    *request.version_mut() = Version::HTTP_11;
    *request.headers_mut() = parts.headers.clone();

    if let Some(ip) = client_ip {
        append_forwarded_for(request.headers_mut(), ip);
    }
    request
}

fn append_forwarded_for(headers: &mut HeaderMap, ip: IpAddr) {
    let value = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(prior) if !prior.is_empty() => format!("{}, {}", prior, ip),
        _ => ip.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}
