//! Lookup middleware.
//!
//! Resolves every request to a pool before it reaches the downstream stage.
//! Failures are answered here and never forwarded.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderName, Request},
    middleware::Next,
    response::Response,
};

use crate::http::access_log::AccessLogRecord;
use crate::http::{request, response};
use crate::load_balancer::{RoutePool, Selection};
use crate::observability::metrics;
use crate::routing::{parse_instance_header, resolve, LookupError, RouteTable};

/// Receives one call per request rejected by the lookup stage.
pub trait BadRequestReporter: Send + Sync {
    fn capture_bad_request(&self);
}

/// Reports to the `router_bad_requests_total` counter.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsReporter;

impl BadRequestReporter for MetricsReporter {
    fn capture_bad_request(&self) {
        metrics::record_bad_request();
    }
}

pub const DEFAULT_INSTANCE_HEADER: &str = "x-cf-app-instance";

#[derive(Clone)]
pub struct LookupState {
    table: Arc<dyn RouteTable>,
    instance_header: HeaderName,
    reporter: Arc<dyn BadRequestReporter>,
}

impl LookupState {
    pub fn new(table: Arc<dyn RouteTable>) -> Self {
        Self {
            table,
            instance_header: HeaderName::from_static(DEFAULT_INSTANCE_HEADER),
            reporter: Arc::new(MetricsReporter),
        }
    }

    pub fn with_instance_header(mut self, header: HeaderName) -> Self {
        self.instance_header = header;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn BadRequestReporter>) -> Self {
        self.reporter = reporter;
        self
    }
}

pub async fn lookup_middleware(
    State(state): State<LookupState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let host = request::host(&req);

    let result = match req.headers().get(&state.instance_header).map(|v| v.to_str()) {
        Some(Err(_)) => Err(LookupError::MalformedInstanceHeader("<non-ascii>".into())),
        Some(Ok(value)) => resolve(state.table.as_ref(), host, req.uri().path(), Some(value))
            .map(|pool| (pool, selection(value))),
        None => resolve(state.table.as_ref(), host, req.uri().path(), None)
            .map(|pool| (pool, Selection::Any)),
    };
    metrics::record_lookup(start);

    match result {
        Ok((pool, selection)) => {
            let extensions = req.extensions_mut();
            extensions.insert(RoutePool(pool));
            extensions.insert(selection);
            next.run(req).await
        }
        Err(e) => {
            let host = host.unwrap_or_default().to_string();
            tracing::debug!(
                host = %host,
                request_id = %request::request_id(&req),
                reason = %e,
                "Unknown route"
            );
            state.reporter.capture_bad_request();
            if let Some(record) = req.extensions().get::<Arc<AccessLogRecord>>() {
                record.set_status(404);
            }
            response::unknown_route(&host)
        }
    }
}

/// Endpoint choice carried to the downstream stage. Only called after
/// `resolve` accepted the header.
fn selection(header: &str) -> Selection {
    match parse_instance_header(header) {
        Ok(Some(selector)) => selector.into(),
        _ => Selection::Any,
    }
}
