//! Per-request access log record.
//!
//! The middleware creates one record per request and puts it in the request
//! extensions. Inner stages fill in what they decide (status on lookup
//! failure, chosen backend); the line is written once the response is ready.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::{body::Body, http::Request, middleware::Next, response::Response};
use parking_lot::Mutex;

use crate::http::request;

#[derive(Debug)]
pub struct AccessLogRecord {
    started: Instant,
    method: String,
    host: String,
    path: String,
    request_id: String,
    status: AtomicU16,
    backend: Mutex<Option<String>>,
}

impl AccessLogRecord {
    pub fn new(method: impl Into<String>, host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            started: Instant::now(),
            method: method.into(),
            host: host.into(),
            path: path.into(),
            request_id: String::new(),
            status: AtomicU16::new(0),
            backend: Mutex::new(None),
        }
    }

    fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    /// Status recorded so far; 0 until a stage or the response sets it.
    pub fn status(&self) -> u16 {
        self.status.load(Ordering::Relaxed)
    }

    pub fn set_status(&self, status: u16) {
        self.status.store(status, Ordering::Relaxed);
    }

    pub fn backend(&self) -> Option<String> {
        self.backend.lock().clone()
    }

    pub fn set_backend(&self, address: impl Into<String>) {
        *self.backend.lock() = Some(address.into());
    }

    fn emit(&self) {
        let backend = self.backend();
        tracing::info!(
            target: "access_log",
            request_id = %self.request_id,
            method = %self.method,
            host = %self.host,
            path = %self.path,
            status = self.status(),
            backend = backend.as_deref().unwrap_or("-"),
            duration_ms = self.started.elapsed().as_millis() as u64,
            "request"
        );
    }
}

pub async fn access_log_middleware(mut req: Request<Body>, next: Next) -> Response {
    let record = Arc::new(
        AccessLogRecord::new(
            req.method().as_str(),
            request::host(&req).unwrap_or_default(),
            req.uri().path(),
        )
        .with_request_id(request::request_id(&req)),
    );
    req.extensions_mut().insert(record.clone());

    let response = next.run(req).await;
    if record.status() == 0 {
        record.set_status(response.status().as_u16());
    }
    record.emit();
    response
}
