//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define router metrics (lookups, registry traffic, pruning, bus health)
//! - Expose a Prometheus-compatible scrape endpoint
//!
//! # Metrics
//! - `router_bad_requests_total` (counter): lookups that ended in `unknown_route`
//! - `router_lookup_duration_seconds` (histogram): resolver latency
//! - `router_registry_messages_total` (counter): bus messages by kind
//! - `router_routes_total` / `router_endpoints_total` (gauge): table size
//! - `router_pruned_endpoints_total` / `router_pruned_pools_total` (counter)
//! - `router_prune_suspended_total` (counter): sweeps skipped while suspended
//! - `router_bus_reconnects_total` (counter)
//!
//! # Design Decisions
//! - Free functions over the `metrics` facade; without an installed recorder
//!   every call is a no-op, so tests need no setup

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_bad_request() {
    counter!("router_bad_requests_total").increment(1);
}

pub fn record_lookup(start: Instant) {
    histogram!("router_lookup_duration_seconds").record(start.elapsed().as_secs_f64());
}

/// `kind` is one of `register`, `heartbeat`, `unregister`, `greet`, `invalid`.
pub fn record_registry_message(kind: &'static str) {
    counter!("router_registry_messages_total", "kind" => kind).increment(1);
}

pub fn record_table_size(routes: usize, endpoints: usize) {
    gauge!("router_routes_total").set(routes as f64);
    gauge!("router_endpoints_total").set(endpoints as f64);
}

pub fn record_prune(endpoints: usize, pools: usize) {
    counter!("router_pruned_endpoints_total").increment(endpoints as u64);
    counter!("router_pruned_pools_total").increment(pools as u64);
}

pub fn record_prune_suspended() {
    counter!("router_prune_suspended_total").increment(1);
}

pub fn record_bus_reconnect() {
    counter!("router_bus_reconnects_total").increment(1);
}
