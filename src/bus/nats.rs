//! Minimal NATS client.
//!
//! # Responsibilities
//! - Connect to one of several servers, rotating on each attempt
//! - Authenticate with credentials from the server URL
//! - Subscribe, publish, and deliver `MSG` frames
//! - Answer server PINGs and detect a dead server with client PINGs

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::time::{self, Instant, Interval};
use tokio_util::codec::Framed;
use url::Url;

use crate::bus::codec::{ClientOp, NatsCodec, ServerOp};
use crate::bus::{BusConnection, BusError, BusMessage, MessageBus};

#[derive(Debug, Clone)]
pub struct NatsOptions {
    /// `nats://[user:pass@]host[:port]`
    pub servers: Vec<Url>,
    pub ping_interval: Duration,
    /// Unanswered client PINGs before the connection is declared dead.
    pub max_outstanding_pings: u32,
    pub connect_timeout: Duration,
    /// Client name reported in CONNECT.
    pub name: String,
}

impl Default for NatsOptions {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            ping_interval: Duration::from_secs(20),
            max_outstanding_pings: 2,
            connect_timeout: Duration::from_secs(2),
            name: env!("CARGO_PKG_NAME").to_string(),
        }
    }
}

#[derive(Serialize)]
struct ConnectInfo<'a> {
    verbose: bool,
    pedantic: bool,
    name: &'a str,
    lang: &'static str,
    version: &'static str,
    protocol: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pass: Option<&'a str>,
}

/// Connection factory over a fixed server list.
#[derive(Debug)]
pub struct NatsBus {
    options: NatsOptions,
    next_server: AtomicUsize,
}

impl NatsBus {
    pub fn new(options: NatsOptions) -> Self {
        Self {
            options,
            next_server: AtomicUsize::new(0),
        }
    }

    async fn connect_to(&self, server: &Url) -> Result<NatsConnection, BusError> {
        let host = server
            .host_str()
            .ok_or_else(|| BusError::Connect(format!("server URL '{}' has no host", server)))?;
        let port = server.port().unwrap_or(4222);
        let addr = format!("{}:{}", host, port);

        let stream = time::timeout(self.options.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| BusError::Connect(format!("timed out connecting to {}", addr)))??;
        stream.set_nodelay(true)?;

        let mut framed = Framed::new(stream, NatsCodec::default());
        let deadline = self.options.connect_timeout;

        match time::timeout(deadline, framed.next()).await {
            Ok(Some(Ok(ServerOp::Info(_)))) => {}
            Ok(Some(Ok(op))) => return Err(BusError::Protocol(format!("expected INFO, got {:?}", op))),
            Ok(Some(Err(e))) => return Err(e),
            Ok(None) => return Err(BusError::ConnectionLost(format!("{} closed during handshake", addr))),
            Err(_) => return Err(BusError::Connect(format!("timed out waiting for INFO from {}", addr))),
        }

        let user = (!server.username().is_empty()).then(|| server.username());
        let connect = ConnectInfo {
            verbose: false,
            pedantic: false,
            name: &self.options.name,
            lang: "rust",
            version: env!("CARGO_PKG_VERSION"),
            protocol: 1,
            user,
            pass: server.password(),
        };
        let connect = serde_json::to_string(&connect)
            .map_err(|e| BusError::Protocol(format!("encoding CONNECT: {}", e)))?;
        framed.send(ClientOp::Connect(connect)).await?;
        framed.send(ClientOp::Ping).await?;

        // The PONG confirms the server accepted CONNECT.
        loop {
            match time::timeout(deadline, framed.next()).await {
                Ok(Some(Ok(ServerOp::Pong))) => break,
                Ok(Some(Ok(ServerOp::Err(e)))) => return Err(BusError::Connect(format!("{}: {}", addr, e))),
                Ok(Some(Ok(ServerOp::Ping))) => framed.send(ClientOp::Pong).await?,
                Ok(Some(Ok(_))) => {}
                Ok(Some(Err(e))) => return Err(e),
                Ok(None) => return Err(BusError::ConnectionLost(format!("{} closed during handshake", addr))),
                Err(_) => return Err(BusError::Connect(format!("timed out waiting for PONG from {}", addr))),
            }
        }

        let period = self.options.ping_interval;
        Ok(NatsConnection {
            framed,
            server: addr,
            next_sid: 1,
            ping: time::interval_at(Instant::now() + period, period),
            outstanding_pings: 0,
            max_outstanding_pings: self.options.max_outstanding_pings,
        })
    }
}

impl MessageBus for NatsBus {
    type Connection = NatsConnection;

    /// Try each server once, starting after the last one used.
    async fn connect(&self) -> Result<NatsConnection, BusError> {
        let servers = &self.options.servers;
        if servers.is_empty() {
            return Err(BusError::Connect("no servers configured".into()));
        }

        let start = self.next_server.fetch_add(1, Ordering::Relaxed);
        let mut last_error = None;
        for offset in 0..servers.len() {
            let server = &servers[(start + offset) % servers.len()];
            match self.connect_to(server).await {
                Ok(conn) => return Ok(conn),
                Err(e) => {
                    tracing::warn!(
                        server = %redact(server),
                        error = %e,
                        "Message bus connection attempt failed"
                    );
                    last_error = Some(e);
                }
            }
        }
        Err(BusError::Connect(match last_error {
            Some(e) => format!("all servers failed, last error: {}", e),
            None => "all servers failed".into(),
        }))
    }
}

/// Server URL with the password masked, for logs.
fn redact(url: &Url) -> String {
    let mut url = url.clone();
    if url.password().is_some() {
        let _ = url.set_password(Some("***"));
    }
    url.to_string()
}

pub struct NatsConnection {
    framed: Framed<TcpStream, NatsCodec>,
    server: String,
    next_sid: u64,
    ping: Interval,
    outstanding_pings: u32,
    max_outstanding_pings: u32,
}

impl BusConnection for NatsConnection {
    fn server(&self) -> &str {
        &self.server
    }

    async fn subscribe(&mut self, subject: &str) -> Result<(), BusError> {
        let sid = self.next_sid;
        self.next_sid += 1;
        self.framed
            .send(ClientOp::Sub {
                subject: subject.to_string(),
                sid,
            })
            .await
    }

    async fn publish(&mut self, subject: &str, payload: Bytes) -> Result<(), BusError> {
        self.framed
            .send(ClientOp::Pub {
                subject: subject.to_string(),
                reply_to: None,
                payload,
            })
            .await
    }

    async fn next_message(&mut self) -> Result<BusMessage, BusError> {
        loop {
            tokio::select! {
                frame = self.framed.next() => match frame {
                    Some(Ok(ServerOp::Msg(msg))) => return Ok(msg),
                    Some(Ok(ServerOp::Ping)) => self.framed.send(ClientOp::Pong).await?,
                    Some(Ok(ServerOp::Pong)) => self.outstanding_pings = 0,
                    Some(Ok(ServerOp::Err(e))) => {
                        if e.to_ascii_lowercase().starts_with("permissions violation") {
                            tracing::warn!(server = %self.server, error = %e, "Message bus rejected an operation");
                        } else {
                            return Err(BusError::Protocol(e));
                        }
                    }
                    Some(Ok(ServerOp::Info(_) | ServerOp::Ok)) => {}
                    Some(Err(e)) => return Err(e),
                    None => return Err(BusError::ConnectionLost(format!("{} closed the connection", self.server))),
                },
                _ = self.ping.tick() => {
                    if self.outstanding_pings >= self.max_outstanding_pings {
                        return Err(BusError::ConnectionLost(format!("{} stopped answering PINGs", self.server)));
                    }
                    self.outstanding_pings += 1;
                    self.framed.send(ClientOp::Ping).await?;
                }
            }
        }
    }
}
