//! Admin API.
//!
//! Read-only views of the route table and subscriber state, behind a bearer
//! token. Served on its own listener so it never shares a port with traffic.

pub mod auth;
pub mod handlers;

use std::sync::Arc;
use std::time::Instant;

use axum::{middleware, routing::get, Router};

use crate::registry::{BusConnectivity, RouteRegistry};

use self::auth::admin_auth_middleware;
use self::handlers::{get_routes, get_status};

#[derive(Clone)]
pub struct AdminState {
    pub registry: Arc<RouteRegistry>,
    pub connectivity: BusConnectivity,
    pub subscriber_id: Arc<str>,
    pub api_key: Arc<str>,
    pub started: Instant,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/routes", get(get_routes))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
