//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::IntoResponse,
    Router,
};

use heartbeat_router::http::lookup::lookup_middleware;
use heartbeat_router::http::{AccessLogRecord, BadRequestReporter, LookupState};
use heartbeat_router::load_balancer::{Endpoint, RoutePool};
use heartbeat_router::registry::RouteRegistry;
use heartbeat_router::routing::{RouteKey, RouteTable};

/// Counts rejected requests instead of touching global metrics.
#[derive(Debug, Default)]
pub struct CountingReporter {
    count: AtomicUsize,
}

impl CountingReporter {
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl BadRequestReporter for CountingReporter {
    fn capture_bad_request(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

/// Registry holding `(route, address, app_id, instance_index)` entries.
pub fn registry_with(entries: &[(&str, &str, &str, &str)]) -> Arc<RouteRegistry> {
    let registry = Arc::new(RouteRegistry::default());
    let now = Instant::now();
    for (route, address, app_id, index) in entries {
        let key = RouteKey::parse(route).unwrap();
        registry.register(&key, Endpoint::new(*address, now).with_app(*app_id, *index));
    }
    registry
}

/// Everything a lookup-stage test wants to inspect after a request.
pub struct LookupHarness {
    pub router: Router,
    pub reporter: Arc<CountingReporter>,
    pub record: Arc<AccessLogRecord>,
    pub downstream_calls: Arc<AtomicUsize>,
}

/// Lookup middleware in front of a counting downstream handler.
///
/// The downstream answers 200 and echoes the resolved pool's route in
/// `x-test-route`. A fixed access log record is injected, so tests can read
/// what the lookup stage wrote into it.
pub fn lookup_harness(registry: Arc<RouteRegistry>) -> LookupHarness {
    let reporter = Arc::new(CountingReporter::default());
    let record = Arc::new(AccessLogRecord::new("GET", "", "/"));
    let downstream_calls = Arc::new(AtomicUsize::new(0));

    let table: Arc<dyn RouteTable> = registry;
    let state = LookupState::new(table).with_reporter(reporter.clone());

    let calls = downstream_calls.clone();
    let downstream = move |req: Request<Body>| {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            match req.extensions().get::<RoutePool>() {
                Some(RoutePool(pool)) => {
                    let mut response = StatusCode::OK.into_response();
                    if let Ok(value) = pool.key().to_string().parse() {
                        response.headers_mut().insert("x-test-route", value);
                    }
                    response.headers_mut().insert(
                        "x-test-endpoints",
                        pool.len().to_string().parse().unwrap(),
                    );
                    response
                }
                None => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
            }
        }
    };

    let injected = record.clone();
    let router = Router::new()
        .fallback(downstream)
        .layer(middleware::from_fn_with_state(state, lookup_middleware))
        .layer(middleware::from_fn(move |mut req: Request<Body>, next: Next| {
            let record = injected.clone();
            async move {
                req.extensions_mut().insert(record);
                next.run(req).await
            }
        }));

    LookupHarness {
        router,
        reporter,
        record,
        downstream_calls,
    }
}

pub fn get(host: &str, path: &str) -> Request<Body> {
    Request::builder()
        .uri(path)
        .header("host", host)
        .body(Body::empty())
        .unwrap()
}

pub fn get_instance(host: &str, path: &str, instance: &str) -> Request<Body> {
    Request::builder()
        .uri(path)
        .header("host", host)
        .header("x-cf-app-instance", instance)
        .body(Body::empty())
        .unwrap()
}

/// Poll `condition` until it holds or `timeout` passes.
pub async fn eventually<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
