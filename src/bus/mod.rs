//! Message bus transport.
//!
//! # Data Flow
//! ```text
//! MessageBus::connect (cycles through configured servers)
//!     → BusConnection
//!         → subscribe(subject)
//!         → publish(subject, payload)
//!         → next_message() ──▶ BusMessage { subject, reply_to, payload }
//!
//! nats.rs  : NATS text protocol over TCP (codec.rs frames)
//! local.rs : in-process broker for tests and embedding
//! ```
//!
//! # Design Decisions
//! - A connection is owned by a single task; no internal locking
//! - Keepalive (server PING/PONG, client PING) is handled inside
//!   `next_message`, callers only see application messages
//! - Any transport failure surfaces as `BusError`; reconnecting is the
//!   caller's job

pub mod backoff;
pub mod codec;
pub mod local;
pub mod nats;

use std::future::Future;

use bytes::Bytes;

pub use backoff::ReconnectPolicy;
pub use local::LocalBus;
pub use nats::{NatsBus, NatsOptions};

/// One application message delivered by the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub subject: String,
    pub reply_to: Option<String>,
    pub payload: Bytes,
}

impl BusMessage {
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            reply_to: None,
            payload: payload.into(),
        }
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("failed to connect: {0}")]
    Connect(String),
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A pub/sub system the subscriber can connect to.
pub trait MessageBus: Send + Sync + 'static {
    type Connection: BusConnection;

    fn connect(&self) -> impl Future<Output = Result<Self::Connection, BusError>> + Send;
}

/// A live session with the bus.
pub trait BusConnection: Send + 'static {
    /// Server this connection is attached to, for logging.
    fn server(&self) -> &str;

    fn subscribe(&mut self, subject: &str) -> impl Future<Output = Result<(), BusError>> + Send;

    fn publish(
        &mut self,
        subject: &str,
        payload: Bytes,
    ) -> impl Future<Output = Result<(), BusError>> + Send;

    /// Wait for the next message on any subscribed subject.
    ///
    /// Cancel-safe: dropping the future loses no delivered message.
    fn next_message(&mut self) -> impl Future<Output = Result<BusMessage, BusError>> + Send;
}
