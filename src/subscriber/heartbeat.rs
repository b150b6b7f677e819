//! Heartbeat subscriber.
//!
//! # Responsibilities
//! - Keep a bus connection alive, reconnecting forever with backoff
//! - Announce the router (`router.start`) on every connection
//! - Turn register/unregister messages into registry calls
//! - Answer `router.greet` requests
//! - Signal readiness once per established connection

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::bus::{BusConnection, BusError, BusMessage, MessageBus, ReconnectPolicy};
use crate::observability::metrics;
use crate::registry::{BusConnectivity, RouteRegistry};
use crate::subscriber::messages::{
    RegistryEvent, RegistryMessage, StartMessage, SubscriberError, GREET_SUBJECT, REGISTER_SUBJECT,
    START_SUBJECT, UNREGISTER_SUBJECT,
};

/// `<index>-<uuid>`, unique per process start.
pub fn subscriber_id(index: u32) -> String {
    format!("{}-{}", index, Uuid::new_v4())
}

#[derive(Debug, Clone)]
pub struct SubscriberOptions {
    pub id: String,
    /// Advertised to backends as the interval they should re-register at.
    pub minimum_register_interval: Duration,
    /// Advertised to backends; the registry enforces it.
    pub prune_threshold: Duration,
    pub reconnect: ReconnectPolicy,
}

impl SubscriberOptions {
    pub fn new(index: u32) -> Self {
        Self {
            id: subscriber_id(index),
            minimum_register_interval: Duration::from_secs(5),
            prune_threshold: Duration::from_secs(120),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

pub struct Subscriber<B: MessageBus> {
    bus: B,
    registry: Arc<RouteRegistry>,
    connectivity: BusConnectivity,
    ready: mpsc::Sender<()>,
    options: SubscriberOptions,
}

impl<B: MessageBus> Subscriber<B> {
    pub fn new(
        bus: B,
        registry: Arc<RouteRegistry>,
        connectivity: BusConnectivity,
        ready: mpsc::Sender<()>,
        options: SubscriberOptions,
    ) -> Self {
        Self {
            bus,
            registry,
            connectivity,
            ready,
            options,
        }
    }

    pub fn id(&self) -> &str {
        &self.options.id
    }

    pub fn start_message(&self) -> StartMessage {
        StartMessage {
            id: self.options.id.clone(),
            minimum_register_interval_in_seconds: self.options.minimum_register_interval.as_secs(),
            prune_threshold_in_seconds: self.options.prune_threshold.as_secs(),
        }
    }

    fn start_payload(&self) -> Bytes {
        // A struct of strings and integers always serializes.
        Bytes::from(serde_json::to_vec(&self.start_message()).unwrap_or_default())
    }

    /// Run until shutdown. Connection failures are never fatal.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(id = %self.options.id, "Subscriber starting");
        let mut attempt: u32 = 0;

        loop {
            let connected = tokio::select! {
                result = self.bus.connect() => result,
                _ = shutdown.recv() => break,
            };

            let mut conn = match connected {
                Ok(conn) => conn,
                Err(e) => {
                    attempt = attempt.saturating_add(1);
                    let delay = self.options.reconnect.delay(attempt);
                    tracing::warn!(
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "Message bus still disconnected"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => continue,
                        _ = shutdown.recv() => break,
                    }
                }
            };

            if attempt > 0 {
                metrics::record_bus_reconnect();
                tracing::info!(server = %conn.server(), attempts = attempt, "Message bus reconnected");
            }

            match self.serve(&mut conn, &mut shutdown).await {
                Ok(()) => break,
                Err(e) => {
                    self.connectivity.set_connected(false);
                    tracing::warn!(server = %conn.server(), error = %e, "Message bus connection lost");
                    // Count the drop itself as the first failed attempt.
                    attempt = 1;
                }
            }
        }

        self.connectivity.set_connected(false);
        tracing::info!(id = %self.options.id, "Subscriber stopped");
    }

    /// Drive one connection. `Ok` means shutdown was requested.
    async fn serve(
        &self,
        conn: &mut B::Connection,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), BusError> {
        for subject in [REGISTER_SUBJECT, UNREGISTER_SUBJECT, GREET_SUBJECT] {
            conn.subscribe(subject).await?;
        }
        conn.publish(START_SUBJECT, self.start_payload()).await?;
        self.connectivity.set_connected(true);
        tracing::info!(server = %conn.server(), id = %self.options.id, "Subscribed to message bus");

        if self.ready.try_send(()).is_err() {
            tracing::debug!("Previous ready signal not consumed yet");
        }

        loop {
            let message = tokio::select! {
                message = conn.next_message() => message?,
                _ = shutdown.recv() => return Ok(()),
            };
            if let Some(reply) = self.handle_message(&message) {
                conn.publish(&reply.subject, reply.payload).await?;
            }
        }
    }

    /// Apply one bus message to the registry. Returns a reply to publish, if any.
    ///
    /// Malformed messages are logged and dropped.
    pub fn handle_message(&self, message: &BusMessage) -> Option<BusMessage> {
        let result = match RegistryEvent::decode(message) {
            Ok(Some(RegistryEvent::Register(reg))) => self.apply_register(&reg).map(|kind| {
                metrics::record_registry_message(kind);
                None
            }),
            Ok(Some(RegistryEvent::Unregister(reg))) => self.apply_unregister(&reg).map(|()| {
                metrics::record_registry_message("unregister");
                None
            }),
            Ok(Some(RegistryEvent::Greet { reply_to })) => {
                metrics::record_registry_message("greet");
                Ok(self.greet_reply(reply_to))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        };

        result.unwrap_or_else(|e| {
            metrics::record_registry_message("invalid");
            tracing::warn!(
                subject = %message.subject,
                error = %e,
                payload = %String::from_utf8_lossy(&message.payload),
                "Dropping malformed registry message"
            );
            None
        })
    }

    /// `register` for a brand new address, `heartbeat` for a refresh.
    fn apply_register(&self, reg: &RegistryMessage) -> Result<&'static str, SubscriberError> {
        let routes = reg.routes()?;
        let now = Instant::now();
        let endpoint = reg.endpoint(now)?;

        let mut added = false;
        for key in &routes {
            added |= self.registry.register(key, endpoint.clone());
        }
        Ok(if added { "register" } else { "heartbeat" })
    }

    fn apply_unregister(&self, reg: &RegistryMessage) -> Result<(), SubscriberError> {
        let routes = reg.routes()?;
        reg.validate_address()?;
        for key in &routes {
            self.registry.unregister(key, &reg.address);
        }
        Ok(())
    }

    fn greet_reply(&self, reply_to: Option<String>) -> Option<BusMessage> {
        match reply_to {
            Some(reply_to) => Some(BusMessage::new(reply_to, self.start_payload())),
            None => {
                tracing::debug!("Ignoring greet without reply subject");
                None
            }
        }
    }
}
