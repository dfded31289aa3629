//! Connector and connection traits for pollsync.
//!
//! A [`Connector`] dials the server and completes the Engine.IO/Socket.IO
//! handshake; the resulting [`Connection`] is split into independent send and
//! receive halves so the adapter can wait on both at once.

use async_trait::async_trait;
use pollsync_protocol::{Handshake, Packet, ProtocolError};
use std::fmt;
use thiserror::Error;

/// Identifier of an established session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Connection or handshake timed out.
    #[error("Connection timed out")]
    Timeout,

    /// The server answered with something other than a handshake.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// The server refused the namespace connection.
    #[error("Connection refused by server: {0}")]
    Refused(String),

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// A frame could not be decoded or encoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl TransportError {
    /// Check whether the error concerns a single frame rather than the connection.
    #[must_use]
    pub fn is_frame_error(&self) -> bool {
        matches!(self, TransportError::Protocol(_))
    }
}

/// Sending half of a connection.
#[async_trait]
pub trait PacketSink: Send {
    /// Send one packet.
    async fn send(&mut self, packet: Packet) -> Result<(), TransportError>;

    /// Close the underlying transport.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Receiving half of a connection.
#[async_trait]
pub trait PacketStream: Send {
    /// Receive the next packet.
    ///
    /// Returns `None` when the connection is closed cleanly. A frame that
    /// fails to decode is reported as [`TransportError::Protocol`]; the
    /// stream stays usable afterwards. Must be cancel-safe.
    async fn recv(&mut self) -> Result<Option<Packet>, TransportError>;
}

/// An established session.
pub struct Connection {
    /// Socket.IO session id (Engine.IO id if the server sent none).
    pub id: ConnectionId,
    /// Engine.IO handshake parameters.
    pub handshake: Handshake,
    /// Sending half.
    pub sink: Box<dyn PacketSink>,
    /// Receiving half.
    pub stream: Box<dyn PacketStream>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("handshake", &self.handshake)
            .finish_non_exhaustive()
    }
}

/// Something that can establish sessions with the poll server.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect and complete the handshake.
    async fn connect(&self) -> Result<Connection, TransportError>;

    /// Get the connector name (e.g., "websocket").
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_from_string() {
        let id: ConnectionId = "sio-1".into();
        assert_eq!(id.as_str(), "sio-1");
        assert_eq!(id.to_string(), "sio-1");
    }

    #[test]
    fn test_frame_errors() {
        assert!(TransportError::Protocol(ProtocolError::Empty).is_frame_error());
        assert!(!TransportError::Timeout.is_frame_error());
        assert_eq!(
            TransportError::Refused("unauthorized".into()).to_string(),
            "Connection refused by server: unauthorized"
        );
    }
}
