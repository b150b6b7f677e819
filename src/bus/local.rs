//! In-process message bus.
//!
//! Every connection sees every message published after it connected, filtered
//! by its subscriptions. The bus can be taken down and brought back to
//! exercise reconnect handling.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};

use crate::bus::{BusConnection, BusError, BusMessage, MessageBus};

#[derive(Debug)]
struct Inner {
    messages: broadcast::Sender<BusMessage>,
    available: AtomicBool,
    generation: watch::Sender<u64>,
    connects: AtomicU64,
    published: Mutex<Vec<BusMessage>>,
}

/// Cheap to clone; all clones share one broker.
#[derive(Debug, Clone)]
pub struct LocalBus {
    inner: Arc<Inner>,
}

impl LocalBus {
    pub fn new() -> Self {
        let (messages, _) = broadcast::channel(1024);
        let (generation, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                messages,
                available: AtomicBool::new(true),
                generation,
                connects: AtomicU64::new(0),
                published: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Deliver a message to every connected subscriber of `subject`.
    pub fn publish(&self, subject: &str, payload: impl Into<Bytes>) {
        self.send(BusMessage::new(subject, payload));
    }

    pub fn send(&self, message: BusMessage) {
        // No receivers is fine: nobody is connected yet.
        let _ = self.inner.messages.send(message);
    }

    /// Take the broker down (dropping live connections) or bring it back.
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
        if !available {
            self.drop_connections();
        }
    }

    /// Sever every live connection; new connections still succeed.
    pub fn drop_connections(&self) {
        self.inner.generation.send_modify(|g| *g += 1);
    }

    /// Successful connects so far.
    pub fn connect_count(&self) -> u64 {
        self.inner.connects.load(Ordering::SeqCst)
    }

    /// Messages published by connections, oldest first.
    pub fn published(&self) -> Vec<BusMessage> {
        self.inner.published.lock().clone()
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus for LocalBus {
    type Connection = LocalConnection;

    async fn connect(&self) -> Result<LocalConnection, BusError> {
        if !self.inner.available.load(Ordering::SeqCst) {
            return Err(BusError::Connect("local bus unavailable".into()));
        }
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        Ok(LocalConnection {
            inner: self.inner.clone(),
            messages: self.inner.messages.subscribe(),
            generation: self.inner.generation.subscribe(),
            subjects: HashSet::new(),
        })
    }
}

pub struct LocalConnection {
    inner: Arc<Inner>,
    messages: broadcast::Receiver<BusMessage>,
    generation: watch::Receiver<u64>,
    subjects: HashSet<String>,
}

impl LocalConnection {
    fn check_alive(&self) -> Result<(), BusError> {
        match self.generation.has_changed() {
            Ok(false) => Ok(()),
            _ => Err(BusError::ConnectionLost("local bus dropped the connection".into())),
        }
    }
}

impl BusConnection for LocalConnection {
    fn server(&self) -> &str {
        "local"
    }

    async fn subscribe(&mut self, subject: &str) -> Result<(), BusError> {
        self.check_alive()?;
        self.subjects.insert(subject.to_string());
        Ok(())
    }

    async fn publish(&mut self, subject: &str, payload: Bytes) -> Result<(), BusError> {
        self.check_alive()?;
        let message = BusMessage::new(subject, payload);
        self.inner.published.lock().push(message.clone());
        let _ = self.inner.messages.send(message);
        Ok(())
    }

    async fn next_message(&mut self) -> Result<BusMessage, BusError> {
        loop {
            tokio::select! {
                _ = self.generation.changed() => {
                    return Err(BusError::ConnectionLost("local bus dropped the connection".into()));
                }
                received = self.messages.recv() => match received {
                    Ok(message) if self.subjects.contains(&message.subject) => return Ok(message),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Local bus subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(BusError::ConnectionLost("local bus closed".into()));
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn delivers_subscribed_subjects_only() {
        let bus = LocalBus::new();
        let mut conn = bus.connect().await.unwrap();
        conn.subscribe("router.register").await.unwrap();

        bus.publish("other", "x");
        bus.publish("router.register", "y");
        let msg = conn.next_message().await.unwrap();
        assert_eq!(msg.subject, "router.register");
        assert_eq!(&msg.payload[..], b"y");
    }

    #[tokio::test]
    async fn unavailable_bus_drops_connections() {
        let bus = LocalBus::new();
        let mut conn = bus.connect().await.unwrap();
        conn.subscribe("a").await.unwrap();

        bus.set_available(false);
        let err = tokio::time::timeout(Duration::from_secs(1), conn.next_message())
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, BusError::ConnectionLost(_)));
        assert!(bus.connect().await.is_err());

        bus.set_available(true);
        assert!(bus.connect().await.is_ok());
        assert_eq!(bus.connect_count(), 2);
    }

    #[tokio::test]
    async fn records_connection_publishes() {
        let bus = LocalBus::new();
        let mut conn = bus.connect().await.unwrap();
        conn.publish("router.start", Bytes::from_static(b"{}")).await.unwrap();
        assert_eq!(bus.published()[0].subject, "router.start");
    }
}
