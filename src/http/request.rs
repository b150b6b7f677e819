//! Request inspection helpers.
//!
//! # Responsibilities
//! - Extract the routing host (Host header, or URI authority for HTTP/2)
//! - Read the request ID set by the request-id layer

use axum::http::{header, HeaderName, Request};

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Raw host as sent by the client, port included.
pub fn host<B>(req: &Request<B>) -> Option<&str> {
    req.headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| req.uri().authority().map(|a| a.as_str()))
        .filter(|h| !h.trim().is_empty())
}

pub fn request_id<B>(req: &Request<B>) -> &str {
    req.headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
}
