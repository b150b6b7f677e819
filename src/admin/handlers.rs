use std::time::Instant;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::admin::AdminState;
use crate::load_balancer::PoolSummary;

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub subscriber_id: String,
    pub bus_connected: bool,
    pub routes: usize,
    pub endpoints: usize,
    pub uptime_secs: u64,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let bus_connected = state.connectivity.is_connected();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: if bus_connected { "operational" } else { "degraded" },
        subscriber_id: state.subscriber_id.to_string(),
        bus_connected,
        routes: state.registry.route_count(),
        endpoints: state.registry.endpoint_count(),
        uptime_secs: state.started.elapsed().as_secs(),
    })
}

/// Full route table dump.
pub async fn get_routes(State(state): State<AdminState>) -> Json<Vec<PoolSummary>> {
    Json(state.registry.routes(Instant::now()))
}
