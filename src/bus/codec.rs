//! NATS text protocol framing.
//!
//! Control lines end in `\r\n`. `MSG` lines announce a payload of a given
//! byte length that follows, itself terminated by `\r\n`.

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::bus::{BusError, BusMessage};

const CRLF: &[u8] = b"\r\n";
const MAX_CONTROL_LINE: usize = 4096;

/// Operations sent by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerOp {
    Info(String),
    Msg(BusMessage),
    Ping,
    Pong,
    Ok,
    Err(String),
}

/// Operations sent by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientOp {
    Connect(String),
    Sub { subject: String, sid: u64 },
    Pub { subject: String, reply_to: Option<String>, payload: Bytes },
    Ping,
    Pong,
}

#[derive(Debug)]
pub struct NatsCodec {
    max_payload: usize,
}

impl NatsCodec {
    pub fn new(max_payload: usize) -> Self {
        Self { max_payload }
    }
}

impl Default for NatsCodec {
    fn default() -> Self {
        Self::new(1024 * 1024)
    }
}

/// Parsed `MSG` header, owned so the buffer can be advanced afterwards.
struct MsgHeader {
    subject: String,
    reply_to: Option<String>,
    len: usize,
}

enum Line {
    Op(ServerOp),
    Msg(MsgHeader),
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

fn protocol(msg: impl Into<String>) -> BusError {
    BusError::Protocol(msg.into())
}

fn parse_line(line: &str) -> Result<Line, BusError> {
    let (op, args) = match line.split_once([' ', '\t']) {
        Some((op, args)) => (op, args.trim()),
        None => (line, ""),
    };

    let parsed = match op.to_ascii_uppercase().as_str() {
        "MSG" => {
            let fields: Vec<&str> = args.split_whitespace().collect();
            let (subject, reply_to, len) = match fields.as_slice() {
                [subject, _sid, len] => (subject, None, len),
                [subject, _sid, reply, len] => (subject, Some(reply.to_string()), len),
                _ => return Err(protocol(format!("malformed MSG line '{}'", line))),
            };
            let len = len
                .parse()
                .map_err(|_| protocol(format!("invalid MSG size in '{}'", line)))?;
            Line::Msg(MsgHeader {
                subject: subject.to_string(),
                reply_to,
                len,
            })
        }
        "PING" => Line::Op(ServerOp::Ping),
        "PONG" => Line::Op(ServerOp::Pong),
        "+OK" => Line::Op(ServerOp::Ok),
        "-ERR" => Line::Op(ServerOp::Err(args.trim_matches('\'').to_string())),
        "INFO" => Line::Op(ServerOp::Info(args.to_string())),
        other => return Err(protocol(format!("unknown operation '{}'", other))),
    };
    Ok(parsed)
}

impl Decoder for NatsCodec {
    type Item = ServerOp;
    type Error = BusError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<ServerOp>, BusError> {
        let Some(line_end) = find_crlf(src) else {
            if src.len() > MAX_CONTROL_LINE {
                return Err(protocol("control line too long"));
            }
            return Ok(None);
        };

        let line = std::str::from_utf8(&src[..line_end])
            .map_err(|_| protocol("control line is not UTF-8"))?;

        match parse_line(line)? {
            Line::Op(op) => {
                let _ = src.split_to(line_end + CRLF.len());
                Ok(Some(op))
            }
            Line::Msg(header) => {
                if header.len > self.max_payload {
                    return Err(protocol(format!("payload of {} bytes exceeds limit", header.len)));
                }
                let total = line_end + CRLF.len() + header.len + CRLF.len();
                if src.len() < total {
                    src.reserve(total - src.len());
                    return Ok(None);
                }
                let _ = src.split_to(line_end + CRLF.len());
                let payload = src.split_to(header.len).freeze();
                let trailer = src.split_to(CRLF.len());
                if &trailer[..] != CRLF {
                    return Err(protocol("MSG payload not terminated by CRLF"));
                }
                Ok(Some(ServerOp::Msg(BusMessage {
                    subject: header.subject,
                    reply_to: header.reply_to,
                    payload,
                })))
            }
        }
    }
}

impl Encoder<ClientOp> for NatsCodec {
    type Error = BusError;

    fn encode(&mut self, op: ClientOp, dst: &mut BytesMut) -> Result<(), BusError> {
        match op {
            ClientOp::Connect(options) => {
                dst.put_slice(b"CONNECT ");
                dst.put_slice(options.as_bytes());
            }
            ClientOp::Sub { subject, sid } => {
                dst.put_slice(format!("SUB {} {}", subject, sid).as_bytes());
            }
            ClientOp::Pub { subject, reply_to, payload } => {
                if payload.len() > self.max_payload {
                    return Err(protocol(format!("payload of {} bytes exceeds limit", payload.len())));
                }
                let header = match reply_to {
                    Some(reply) => format!("PUB {} {} {}", subject, reply, payload.len()),
                    None => format!("PUB {} {}", subject, payload.len()),
                };
                dst.reserve(header.len() + payload.len() + 2 * CRLF.len());
                dst.put_slice(header.as_bytes());
                dst.put_slice(CRLF);
                dst.put_slice(&payload);
            }
            ClientOp::Ping => dst.put_slice(b"PING"),
            ClientOp::Pong => dst.put_slice(b"PONG"),
        }
        dst.put_slice(CRLF);
        Ok(())
    }
}
