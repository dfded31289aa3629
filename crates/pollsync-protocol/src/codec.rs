//! Codec for Engine.IO v4 text frames carrying Socket.IO v5 packets.
//!
//! Every WebSocket text message is one Engine.IO packet: a single type digit
//! followed by its data. Message packets (`4`) wrap a Socket.IO packet, whose
//! event form is `42["event_name", payload]`.

use crate::events::{ClientEvent, EventKind, EventShapeError, ErrorNotice, ServerEvent};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Maximum accepted frame size (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Frame or packet has no type digit.
    #[error("Empty packet")]
    Empty,

    /// Type digit is not defined by the protocol.
    #[error("Unknown packet type: {0:?}")]
    UnknownPacketType(char),

    /// Type digit is defined but not handled (acks, binary attachments).
    #[error("Unsupported packet type: {0:?}")]
    Unsupported(char),

    /// Event name outside the poll event taxonomy.
    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    /// Known event with a payload of the wrong shape.
    #[error("Invalid {kind} payload: {source}")]
    InvalidEvent {
        kind: EventKind,
        #[source]
        source: EventShapeError,
    },

    /// Malformed JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid frame data.
    #[error("Invalid frame: {0}")]
    Invalid(String),
}

/// Handshake data sent by the server in the Engine.IO open packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    /// Engine.IO session identifier.
    pub sid: String,
    /// Transports the connection may upgrade to.
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Server ping interval in milliseconds.
    pub ping_interval: u64,
    /// Time the server waits for a pong, in milliseconds.
    pub ping_timeout: u64,
    /// Maximum payload size accepted by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_payload: Option<u64>,
}

#[derive(Serialize, Deserialize)]
struct ConnectPayload {
    sid: String,
}

/// A decoded protocol packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Engine.IO session opened.
    Open(Handshake),
    /// Engine.IO session closed.
    Close,
    /// Heartbeat ping (server to client in v4).
    Ping,
    /// Heartbeat pong.
    Pong,
    /// No-op.
    Noop,
    /// Socket.IO namespace connect (request from the client, ack from the server).
    Connect {
        /// Socket.IO session id, present in the server's ack.
        sid: Option<String>,
    },
    /// Socket.IO namespace disconnect.
    Disconnect,
    /// Socket.IO connection refused.
    ConnectError {
        /// Reason given by the server.
        message: String,
    },
    /// Event pushed by the server.
    Event(ServerEvent),
    /// Event emitted by the client.
    Emit(ClientEvent),
}

impl Packet {
    /// Create a client namespace connect packet.
    #[must_use]
    pub fn connect() -> Self {
        Packet::Connect { sid: None }
    }

    /// Create a `join_poll` packet.
    #[must_use]
    pub fn join(poll_id: impl Into<String>) -> Self {
        Packet::Emit(ClientEvent::JoinPoll(poll_id.into()))
    }

    /// Create a `leave_poll` packet.
    #[must_use]
    pub fn leave(poll_id: impl Into<String>) -> Self {
        Packet::Emit(ClientEvent::LeavePoll(poll_id.into()))
    }
}

/// Encode a packet to a text frame.
///
/// # Errors
///
/// Returns an error if JSON serialization fails or the frame is too large.
pub fn encode(packet: &Packet) -> Result<String, ProtocolError> {
    let frame = match packet {
        Packet::Open(handshake) => format!("0{}", serde_json::to_string(handshake)?),
        Packet::Close => "1".to_string(),
        Packet::Ping => "2".to_string(),
        Packet::Pong => "3".to_string(),
        Packet::Noop => "6".to_string(),
        Packet::Connect { sid: None } => "40".to_string(),
        Packet::Connect { sid: Some(sid) } => {
            format!("40{}", serde_json::to_string(&ConnectPayload { sid: sid.clone() })?)
        }
        Packet::Disconnect => "41".to_string(),
        Packet::ConnectError { message } => format!(
            "44{}",
            serde_json::to_string(&ErrorNotice {
                message: message.clone()
            })?
        ),
        Packet::Event(event) => encode_event(event.kind(), event.data()?)?,
        Packet::Emit(event) => {
            encode_event(event.kind(), Value::String(event.poll_id().to_string()))?
        }
    };

    if frame.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(frame.len()));
    }

    Ok(frame)
}

fn encode_event(kind: EventKind, data: Value) -> Result<String, ProtocolError> {
    let body = serde_json::to_string(&Value::Array(vec![
        Value::String(kind.as_str().to_string()),
        data,
    ]))?;
    Ok(format!("42{body}"))
}

/// Decode a text frame.
///
/// # Errors
///
/// Returns an error if the frame is too large, malformed, names an unknown
/// event, or carries a payload of the wrong shape.
pub fn decode(frame: &str) -> Result<Packet, ProtocolError> {
    if frame.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(frame.len()));
    }

    let mut chars = frame.chars();
    let packet_type = chars.next().ok_or(ProtocolError::Empty)?;
    let data = chars.as_str();

    match packet_type {
        '0' => Ok(Packet::Open(serde_json::from_str(data)?)),
        '1' => Ok(Packet::Close),
        // Ping data ("probe") only matters for transport upgrades.
        '2' => Ok(Packet::Ping),
        '3' => Ok(Packet::Pong),
        '4' => decode_message(data),
        '5' => Err(ProtocolError::Unsupported(packet_type)),
        '6' => Ok(Packet::Noop),
        other => Err(ProtocolError::UnknownPacketType(other)),
    }
}

fn decode_message(data: &str) -> Result<Packet, ProtocolError> {
    let mut chars = data.chars();
    let packet_type = chars.next().ok_or(ProtocolError::Empty)?;
    let body = strip_namespace(chars.as_str());

    match packet_type {
        '0' if body.is_empty() => Ok(Packet::Connect { sid: None }),
        '0' => {
            let payload: ConnectPayload = serde_json::from_str(body)?;
            Ok(Packet::Connect {
                sid: Some(payload.sid),
            })
        }
        '1' => Ok(Packet::Disconnect),
        '2' => decode_event(strip_ack_id(body)),
        '4' => {
            let notice: ErrorNotice = serde_json::from_str(body)?;
            Ok(Packet::ConnectError {
                message: notice.message,
            })
        }
        '3' | '5' | '6' => Err(ProtocolError::Unsupported(packet_type)),
        other => Err(ProtocolError::UnknownPacketType(other)),
    }
}

fn decode_event(body: &str) -> Result<Packet, ProtocolError> {
    let mut parts: Vec<Value> = serde_json::from_str(body)?;
    if parts.is_empty() {
        return Err(ProtocolError::Invalid("event packet without a name".into()));
    }

    let data = if parts.len() > 1 {
        parts.swap_remove(1)
    } else {
        Value::Null
    };
    let name = match &parts[0] {
        Value::String(name) => name.as_str(),
        other => {
            return Err(ProtocolError::Invalid(format!(
                "event name must be a string, got {other}"
            )))
        }
    };

    let kind: EventKind = name.parse().map_err(ProtocolError::UnknownEvent)?;
    let invalid = |source| ProtocolError::InvalidEvent { kind, source };

    if kind.is_outbound() {
        ClientEvent::from_parts(kind, data)
            .map(Packet::Emit)
            .map_err(invalid)
    } else {
        ServerEvent::from_parts(kind, data)
            .map(Packet::Event)
            .map_err(invalid)
    }
}

/// Skip a `/namespace,` prefix. The default namespace has none.
fn strip_namespace(body: &str) -> &str {
    if body.starts_with('/') {
        match body.find(',') {
            Some(idx) => &body[idx + 1..],
            None => "",
        }
    } else {
        body
    }
}

/// Skip the numeric ack id that precedes an event's JSON array.
fn strip_ack_id(body: &str) -> &str {
    body.trim_start_matches(|c: char| c.is_ascii_digit())
}
