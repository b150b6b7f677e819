//! Router-generated responses.
//!
//! # Design Decisions
//! - Every lookup failure produces the same body shape and marker header
//! - Marker values are machine-readable and stable

use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};

/// Marker header naming the router-side failure.
pub const X_CF_ROUTER_ERROR: &str = "x-cf-routererror";
/// Address of the endpoint chosen for the request.
pub const X_VCAP_BACKEND: &str = "x-vcap-backend";
/// Path the forwarding layer should send upstream.
pub const X_FORWARDED_PATH: &str = "x-forwarded-path";

pub const UNKNOWN_ROUTE: &str = "unknown_route";
pub const NO_ENDPOINTS: &str = "no_endpoints";

fn router_error(status: StatusCode, marker: &'static str, body: String) -> Response {
    (
        status,
        [
            (X_CF_ROUTER_ERROR, HeaderValue::from_static(marker)),
            (
                header::CONTENT_TYPE.as_str(),
                HeaderValue::from_static("text/plain; charset=utf-8"),
            ),
        ],
        Body::from(body),
    )
        .into_response()
}

/// 404 for a host (or instance) the registry cannot resolve.
pub fn unknown_route(host: &str) -> Response {
    router_error(
        StatusCode::NOT_FOUND,
        UNKNOWN_ROUTE,
        format!("Requested route ('{}') does not exist.", host),
    )
}

/// 503 when a resolved pool has nothing selectable.
pub fn no_endpoints(host: &str) -> Response {
    router_error(
        StatusCode::SERVICE_UNAVAILABLE,
        NO_ENDPOINTS,
        format!("No endpoints available for route ('{}').", host),
    )
}
