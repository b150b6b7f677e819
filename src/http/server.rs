//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with the lookup pipeline
//! - Wire up middleware (tracing, request ID, timeout, access log)
//! - Serve on a listener until shutdown, draining in-flight requests

use std::time::Duration;

use axum::{middleware, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::http::access_log::access_log_middleware;
use crate::http::dispatch::dispatch_handler;
use crate::http::lookup::{lookup_middleware, LookupState};

/// Build the request pipeline.
///
/// Outermost first: trace → request id → timeout → access log → lookup →
/// dispatch.
#[allow(deprecated)]
pub fn build_router(state: LookupState, request_timeout: Duration) -> Router {
    Router::new()
        .fallback(dispatch_handler)
        .layer(middleware::from_fn_with_state(state, lookup_middleware))
        .layer(middleware::from_fn(access_log_middleware))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
}

/// Client-facing HTTP server.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(state: LookupState, request_timeout: Duration) -> Self {
        Self {
            router: build_router(state, request_timeout),
        }
    }

    /// Serve until shutdown fires. In-flight requests finish first.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
