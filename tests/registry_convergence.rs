//! Registry convergence driven by the heartbeat subscriber over an
//! in-process bus.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use heartbeat_router::bus::{BusMessage, LocalBus, ReconnectPolicy};
use heartbeat_router::lifecycle::Shutdown;
use heartbeat_router::load_balancer::{Endpoint, PoolOptions};
use heartbeat_router::registry::{BusConnectivity, RegistryOptions, RouteRegistry};
use heartbeat_router::routing::{RouteKey, RouteUri};
use heartbeat_router::subscriber::{StartMessage, Subscriber, SubscriberOptions};

mod common;

use common::eventually;

const WAIT: Duration = Duration::from_secs(2);

struct Running {
    bus: LocalBus,
    registry: Arc<RouteRegistry>,
    connectivity: BusConnectivity,
    ready: mpsc::Receiver<()>,
    shutdown: Shutdown,
    task: JoinHandle<()>,
}

fn start_subscriber() -> Running {
    let bus = LocalBus::new();
    let connectivity = BusConnectivity::new();
    let registry =
        Arc::new(RouteRegistry::default().with_suspend(Arc::new(connectivity.clone())));
    let (ready_tx, ready) = mpsc::channel(1);
    let options = SubscriberOptions {
        reconnect: ReconnectPolicy {
            base: Duration::from_millis(10),
            max: Duration::from_millis(50),
        },
        ..SubscriberOptions::new(2)
    };
    let subscriber = Subscriber::new(
        bus.clone(),
        registry.clone(),
        connectivity.clone(),
        ready_tx,
        options,
    );
    let shutdown = Shutdown::new();
    let task = tokio::spawn(subscriber.run(shutdown.subscribe()));
    Running {
        bus,
        registry,
        connectivity,
        ready,
        shutdown,
        task,
    }
}

async fn wait_ready(ready: &mut mpsc::Receiver<()>) {
    tokio::time::timeout(WAIT, ready.recv())
        .await
        .expect("ready signal")
        .expect("ready channel open");
}

fn start_messages(bus: &LocalBus) -> Vec<StartMessage> {
    bus.published()
        .into_iter()
        .filter(|m| m.subject == "router.start")
        .map(|m| serde_json::from_slice(&m.payload).unwrap())
        .collect()
}

/// Registers `address` as instance `index` of app `app`.
fn register(bus: &LocalBus, route: &str, address: &str, index: u32) {
    bus.publish(
        "router.register",
        format!(
            r#"{{"uris":["{route}"],"address":"{address}","app_id":"app","instance_index":{index}}}"#
        ),
    );
}

fn resolves(registry: &RouteRegistry, host: &str) -> usize {
    registry
        .lookup(&RouteUri::new(host, "/"))
        .map(|pool| pool.len())
        .unwrap_or(0)
}

#[tokio::test]
async fn announces_itself_then_applies_registrations() {
    let mut running = start_subscriber();
    wait_ready(&mut running.ready).await;
    assert!(running.connectivity.is_connected());

    let starts = start_messages(&running.bus);
    assert_eq!(starts.len(), 1);
    assert!(starts[0].id.starts_with("2-"));
    assert_eq!(starts[0].minimum_register_interval_in_seconds, 5);
    assert_eq!(starts[0].prune_threshold_in_seconds, 120);

    register(&running.bus, "app.example.com", "10.0.0.1:8080", 0);
    register(&running.bus, "app.example.com", "10.0.0.2:8080", 1);
    assert!(eventually(WAIT, || resolves(&running.registry, "app.example.com") == 2).await);

    running.bus.publish(
        "router.unregister",
        r#"{"uris":["app.example.com"],"address":"10.0.0.1:8080"}"#,
    );
    assert!(eventually(WAIT, || resolves(&running.registry, "app.example.com") == 1).await);

    running.shutdown.trigger();
    tokio::time::timeout(WAIT, running.task).await.unwrap().unwrap();
}

#[tokio::test]
async fn malformed_messages_do_not_stop_the_loop() {
    let mut running = start_subscriber();
    wait_ready(&mut running.ready).await;

    running.bus.publish("router.register", "{not json");
    running
        .bus
        .publish("router.register", r#"{"uris":["x.example.com"],"address":"no-port"}"#);
    register(&running.bus, "ok.example.com", "10.0.0.3:8080", 0);

    assert!(eventually(WAIT, || resolves(&running.registry, "ok.example.com") == 1).await);
    assert_eq!(running.registry.route_count(), 1);
    running.shutdown.trigger();
}

#[tokio::test]
async fn greet_is_answered_on_the_reply_subject() {
    let mut running = start_subscriber();
    wait_ready(&mut running.ready).await;

    running
        .bus
        .send(BusMessage::new("router.greet", "").with_reply_to("_INBOX.greeter"));

    let bus = running.bus.clone();
    assert!(
        eventually(WAIT, || bus
            .published()
            .iter()
            .any(|m| m.subject == "_INBOX.greeter"))
        .await
    );
    let reply = bus
        .published()
        .into_iter()
        .find(|m| m.subject == "_INBOX.greeter")
        .unwrap();
    let start: StartMessage = serde_json::from_slice(&reply.payload).unwrap();
    assert_eq!(start, start_messages(&bus)[0]);
    running.shutdown.trigger();
}

#[tokio::test]
async fn reconnect_announces_again_and_signals_ready() {
    let mut running = start_subscriber();
    wait_ready(&mut running.ready).await;

    register(&running.bus, "app.example.com", "10.0.0.1:8080", 0);
    assert!(eventually(WAIT, || resolves(&running.registry, "app.example.com") == 1).await);

    running.bus.drop_connections();
    wait_ready(&mut running.ready).await;

    assert_eq!(running.bus.connect_count(), 2);
    let starts = start_messages(&running.bus);
    assert_eq!(starts.len(), 2);
    // Same process, same identity.
    assert_eq!(starts[0].id, starts[1].id);
    // Routes survive the reconnect.
    assert_eq!(resolves(&running.registry, "app.example.com"), 1);

    running.shutdown.trigger();
    tokio::time::timeout(WAIT, running.task).await.unwrap().unwrap();
}

#[tokio::test]
async fn pruning_is_suspended_while_the_bus_is_down() {
    let mut running = start_subscriber();
    wait_ready(&mut running.ready).await;

    register(&running.bus, "app.example.com", "10.0.0.1:8080", 0);
    assert!(eventually(WAIT, || resolves(&running.registry, "app.example.com") == 1).await);

    running.bus.set_available(false);
    let connectivity = running.connectivity.clone();
    assert!(eventually(WAIT, || !connectivity.is_connected()).await);

    // Well past the stale threshold, but nothing could have refreshed it.
    let later = Instant::now() + Duration::from_secs(600);
    let report = running.registry.prune(later);
    assert!(report.suspended);
    assert_eq!(resolves(&running.registry, "app.example.com"), 1);

    running.bus.set_available(true);
    wait_ready(&mut running.ready).await;
    assert!(running.connectivity.is_connected());

    let report = running.registry.prune(later);
    assert!(!report.suspended);
    assert_eq!(report.endpoints_removed, 1);
    assert_eq!(resolves(&running.registry, "app.example.com"), 0);

    running.shutdown.trigger();
}

#[tokio::test]
async fn shutdown_while_disconnected_exits() {
    let running = start_subscriber();
    running.bus.set_available(false);
    running.bus.drop_connections();

    running.shutdown.trigger();
    tokio::time::timeout(WAIT, running.task).await.unwrap().unwrap();
    assert!(!running.connectivity.is_connected());
}

#[test]
fn concurrent_register_and_prune_never_lose_a_registration() {
    let registry = Arc::new(RouteRegistry::new(RegistryOptions {
        pool: PoolOptions {
            ttl: Duration::ZERO,
            ..PoolOptions::default()
        },
        ..RegistryOptions::default()
    }));
    let keys: Vec<RouteKey> = (0..4)
        .map(|i| RouteKey::parse(&format!("app{i}.example.com")).unwrap())
        .collect();

    let pruner = {
        let registry = registry.clone();
        thread::spawn(move || {
            for _ in 0..2_000 {
                registry.prune(Instant::now());
            }
        })
    };

    let writers: Vec<_> = (0..4)
        .map(|w| {
            let registry = registry.clone();
            let keys = keys.clone();
            thread::spawn(move || {
                for round in 0..500 {
                    let key = &keys[round % keys.len()];
                    let address = format!("10.0.{w}.{}:8080", round % 200);
                    registry.register(key, Endpoint::new(address.clone(), Instant::now()));

                    // Emptied pools expire immediately, yet a fresh
                    // registration must always be visible.
                    let snapshot = registry
                        .lookup(&RouteUri::new(key.host(), "/"))
                        .expect("registered route resolves");
                    assert!(!snapshot.is_empty());

                    registry.unregister(key, &address);
                }
            })
        })
        .collect();

    for writer in writers {
        writer.join().unwrap();
    }
    pruner.join().unwrap();
}

#[test]
fn readers_see_whole_snapshots() {
    let registry = Arc::new(RouteRegistry::default());
    let key = RouteKey::parse("busy.example.com").unwrap();

    let writer = {
        let registry = registry.clone();
        let key = key.clone();
        thread::spawn(move || {
            for i in 0..1_000 {
                registry.register(&key, Endpoint::new(format!("10.1.0.{}:{}", i % 250, 8000 + i), Instant::now()));
            }
        })
    };

    let mut last_len = 0;
    while !writer.is_finished() {
        if let Ok(snapshot) = registry.lookup(&RouteUri::new("busy.example.com", "/")) {
            let endpoints = snapshot.endpoints();
            assert_eq!(endpoints.len(), snapshot.len());
            // Only additions happen, so a later snapshot is never smaller.
            assert!(snapshot.len() >= last_len);
            last_len = snapshot.len();
        }
    }
    writer.join().unwrap();
    assert_eq!(registry.lookup(&RouteUri::new("busy.example.com", "/")).unwrap().len(), 1_000);
}
