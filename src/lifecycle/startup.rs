//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize all subsystems in dependency order
//! - Hold traffic back until the route table had a chance to fill
//! - Start background tasks (subscriber, pruner, admin)
//! - Bind the client listener last and run until a shutdown signal
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::HeaderName;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use url::Url;

use crate::admin::{setup_admin_router, AdminState};
use crate::bus::{NatsBus, NatsOptions, ReconnectPolicy};
use crate::config::RouterConfig;
use crate::http::{HttpServer, LookupState};
use crate::lifecycle::shutdown::{drain_tasks, Shutdown};
use crate::lifecycle::signals::shutdown_signal;
use crate::load_balancer::PoolOptions;
use crate::observability::metrics;
use crate::registry::{
    BusConnectivity, NeverSuspend, PruningController, RegistryOptions, RouteRegistry, SuspendPruning,
};
use crate::routing::RouteTable;
use crate::subscriber::{Subscriber, SubscriberOptions};

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("invalid bus server URL '{0}': {1}")]
    BusUrl(String, url::ParseError),
    #[error("invalid instance header '{0}'")]
    InstanceHeader(String),
    #[error("invalid address '{0}'")]
    Address(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Build the registry with the configured defaults and suspend predicate.
pub fn build_registry(config: &RouterConfig, connectivity: &BusConnectivity) -> RouteRegistry {
    let options = RegistryOptions {
        stale_threshold: config.registry.stale_threshold(),
        pool: PoolOptions {
            ttl: config.registry.pool_ttl(),
            strip_context_path: config.registry.strip_context_path,
            strategy: config.registry.strategy,
        },
    };
    let suspend: Arc<dyn SuspendPruning> = if config.registry.suspend_pruning_if_bus_unavailable {
        Arc::new(connectivity.clone())
    } else {
        Arc::new(NeverSuspend)
    };
    RouteRegistry::new(options).with_suspend(suspend)
}

pub fn nats_options(config: &RouterConfig) -> Result<NatsOptions, StartupError> {
    let servers = config
        .bus
        .servers
        .iter()
        .map(|s| Url::parse(s).map_err(|e| StartupError::BusUrl(s.clone(), e)))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(NatsOptions {
        servers,
        ping_interval: Duration::from_secs(config.bus.ping_interval_secs),
        max_outstanding_pings: config.bus.max_outstanding_pings,
        connect_timeout: Duration::from_secs(config.bus.connect_timeout_secs),
        ..NatsOptions::default()
    })
}

pub fn subscriber_options(config: &RouterConfig) -> SubscriberOptions {
    SubscriberOptions {
        minimum_register_interval: Duration::from_secs(config.subscriber.minimum_register_interval_secs),
        prune_threshold: config.registry.stale_threshold(),
        reconnect: ReconnectPolicy {
            base: Duration::from_millis(config.bus.reconnect_base_ms),
            max: Duration::from_millis(config.bus.reconnect_max_ms),
        },
        ..SubscriberOptions::new(config.subscriber.index)
    }
}

fn parse_addr(addr: &str) -> Result<SocketAddr, StartupError> {
    addr.parse().map_err(|_| StartupError::Address(addr.to_string()))
}

/// Run the router until SIGINT/SIGTERM.
pub async fn run(config: RouterConfig) -> Result<(), StartupError> {
    let started = Instant::now();

    if config.observability.metrics_enabled {
        metrics::init_metrics(parse_addr(&config.observability.metrics_address)?);
    }

    let shutdown = Shutdown::new();
    let connectivity = BusConnectivity::new();
    let registry = Arc::new(build_registry(&config, &connectivity));

    // Subscriber first, so registrations start flowing before anything else.
    let bus = NatsBus::new(nats_options(&config)?);
    let sub_options = subscriber_options(&config);
    let subscriber_id: Arc<str> = Arc::from(sub_options.id.as_str());
    let (ready_tx, mut ready_rx) = mpsc::channel(1);
    let subscriber = Subscriber::new(bus, registry.clone(), connectivity.clone(), ready_tx, sub_options);
    let mut tasks = vec![("subscriber", tokio::spawn(subscriber.run(shutdown.subscribe())))];

    let delay = Duration::from_secs(config.subscriber.start_response_delay_secs);
    tracing::info!(subscriber_id = %subscriber_id, "Waiting for message bus");
    let proceed = tokio::select! {
        ready = ready_rx.recv() => ready.is_some(),
        _ = shutdown_signal() => false,
    };
    if !proceed {
        shutdown.trigger();
        drain_tasks(tasks, SHUTDOWN_DEADLINE).await;
        return Ok(());
    }

    tracing::info!(delay_secs = delay.as_secs(), "Message bus ready, waiting for registrations");
    let interrupted = tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        _ = shutdown_signal() => true,
    };
    if interrupted {
        shutdown.trigger();
        drain_tasks(tasks, SHUTDOWN_DEADLINE).await;
        return Ok(());
    }

    // Later ready signals mark reconnects.
    tasks.push((
        "ready-watch",
        tokio::spawn({
            let mut shutdown = shutdown.subscribe();
            async move {
                loop {
                    tokio::select! {
                        ready = ready_rx.recv() => match ready {
                            Some(()) => tracing::info!("Message bus connection re-established"),
                            None => break,
                        },
                        _ = shutdown.recv() => break,
                    }
                }
            }
        }),
    ));

    let pruner = PruningController::new(registry.clone(), config.registry.prune_interval());
    tasks.push(("pruner", tokio::spawn(pruner.run(shutdown.subscribe()))));

    if config.admin.enabled {
        let addr = parse_addr(&config.admin.bind_address)?;
        let listener = TcpListener::bind(addr).await?;
        let app = setup_admin_router(AdminState {
            registry: registry.clone(),
            connectivity: connectivity.clone(),
            subscriber_id: subscriber_id.clone(),
            api_key: Arc::from(config.admin.api_key.as_str()),
            started,
        });
        let mut admin_shutdown = shutdown.subscribe();
        tracing::info!(address = %addr, "Admin API listening");
        tasks.push((
            "admin",
            tokio::spawn(async move {
                let served = axum::serve(listener, app)
                    .with_graceful_shutdown(async move {
                        let _ = admin_shutdown.recv().await;
                    })
                    .await;
                if let Err(e) = served {
                    tracing::error!(error = %e, "Admin API failed");
                }
            }),
        ));
    }

    let instance_header = HeaderName::from_bytes(config.lookup.instance_header.as_bytes())
        .map_err(|_| StartupError::InstanceHeader(config.lookup.instance_header.clone()))?;
    let table: Arc<dyn RouteTable> = registry.clone();
    let state = LookupState::new(table).with_instance_header(instance_header);
    let server = HttpServer::new(state, Duration::from_secs(config.listener.request_timeout_secs));

    let listener = TcpListener::bind(parse_addr(&config.listener.bind_address)?).await?;
    tracing::info!(
        routes = registry.route_count(),
        endpoints = registry.endpoint_count(),
        startup_ms = started.elapsed().as_millis() as u64,
        "Router ready"
    );
    let mut http = tokio::spawn(server.run(listener, shutdown.subscribe()));

    let served = tokio::select! {
        _ = shutdown_signal() => None,
        result = &mut http => Some(result),
    };
    shutdown.trigger();

    match served {
        // Listener stopped on its own: report why.
        Some(Ok(Err(e))) => tracing::error!(error = %e, "HTTP server failed"),
        Some(Err(e)) => tracing::error!(error = %e, "HTTP server task failed"),
        Some(Ok(Ok(()))) => {}
        None => match tokio::time::timeout(SHUTDOWN_DEADLINE, http).await {
            Ok(Ok(Err(e))) => tracing::error!(error = %e, "HTTP server failed during drain"),
            Ok(_) => {}
            Err(_) => tracing::warn!("HTTP server did not drain before deadline"),
        },
    }

    let aborted = drain_tasks(tasks, SHUTDOWN_DEADLINE).await;
    tracing::info!(aborted = aborted.len(), "Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_honours_suspend_setting() {
        let mut config = RouterConfig::default();
        let connectivity = BusConnectivity::new();

        let registry = build_registry(&config, &connectivity);
        assert!(registry.prune(Instant::now()).suspended);

        config.registry.suspend_pruning_if_bus_unavailable = false;
        let registry = build_registry(&config, &connectivity);
        assert!(!registry.prune(Instant::now()).suspended);
    }

    #[test]
    fn subscriber_options_follow_config() {
        let mut config = RouterConfig::default();
        config.subscriber.index = 7;
        config.registry.stale_threshold_secs = 90;
        let options = subscriber_options(&config);
        assert!(options.id.starts_with("7-"));
        assert_eq!(options.prune_threshold, Duration::from_secs(90));
        assert_eq!(options.minimum_register_interval, Duration::from_secs(5));
    }

    #[test]
    fn bus_urls_keep_credentials() {
        let mut config = RouterConfig::default();
        config.bus.servers = vec!["nats://user:pw@10.0.0.5:4222".into()];
        let options = nats_options(&config).unwrap();
        assert_eq!(options.servers[0].username(), "user");
        assert_eq!(options.servers[0].password(), Some("pw"));
    }
}
