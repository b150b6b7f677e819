//! Downstream stage of the shipped binary.
//!
//! Byte forwarding is someone else's job. This stage picks the endpoint the
//! forwarder would use and reports it.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{HeaderValue, Request, StatusCode},
    response::{IntoResponse, Response},
};

use crate::http::access_log::AccessLogRecord;
use crate::http::response::{self, X_FORWARDED_PATH, X_VCAP_BACKEND};
use crate::http::request;
use crate::load_balancer::{RoutePool, Selection};

pub async fn dispatch_handler(req: Request<Body>) -> Response {
    let host = request::host(&req).unwrap_or_default();
    let Some(RoutePool(pool)) = req.extensions().get::<RoutePool>() else {
        // Only reachable if the lookup layer is missing.
        tracing::error!(host = %host, "Request reached dispatch without a resolved pool");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };

    // Set by the lookup stage when the request pinned an instance.
    let selection = req.extensions().get::<Selection>().cloned().unwrap_or(Selection::Any);
    let Some(endpoint) = pool.select_endpoint(&selection) else {
        return response::no_endpoints(host);
    };

    if let Some(record) = req.extensions().get::<Arc<AccessLogRecord>>() {
        record.set_backend(endpoint.address());
    }

    let mut response = StatusCode::OK.into_response();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(endpoint.address()) {
        headers.insert(X_VCAP_BACKEND, value);
    }
    if let Ok(value) = HeaderValue::from_str(&pool.forward_path(req.uri().path())) {
        headers.insert(X_FORWARDED_PATH, value);
    }
    response
}
