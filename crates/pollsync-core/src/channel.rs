//! Channel capability consumed by the synchronization engine.
//!
//! The engine never owns a connection. It emits room membership events
//! through an [`EventSink`] and consumes a typed stream of [`ChannelSignal`]s
//! produced by whatever adapter owns the connection.

use pollsync_protocol::{ClientEvent, ServerEvent};
use serde::Serialize;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

/// Maximum poll identifier length.
pub const MAX_POLL_ID_LENGTH: usize = 256;

/// Validate a poll identifier.
///
/// # Errors
///
/// Returns an error message if the identifier is invalid.
pub fn validate_poll_id(poll_id: &str) -> Result<(), &'static str> {
    if poll_id.is_empty() {
        return Err("Poll id cannot be empty");
    }
    if poll_id.len() > MAX_POLL_ID_LENGTH {
        return Err("Poll id too long");
    }
    if poll_id.chars().any(char::is_control) {
        return Err("Poll id contains invalid characters");
    }
    Ok(())
}

/// Connection state reported by a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    /// Establishing a connection (first attempt or after a drop).
    Connecting,
    /// Handshake completed; events flow.
    Connected,
    /// Connection lost; the adapter may retry.
    Disconnected,
    /// Closed by its owner; no further retries.
    Closed,
}

impl ChannelState {
    /// Get the state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ChannelState::Connecting => "connecting",
            ChannelState::Connected => "connected",
            ChannelState::Disconnected => "disconnected",
            ChannelState::Closed => "closed",
        }
    }
}

/// Errors reported when emitting on a channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// No live connection to deliver on.
    #[error("Channel is not connected")]
    NotConnected,

    /// The channel was closed by its owner.
    #[error("Channel is closed")]
    Closed,
}

/// Outbound half of a channel: the capability to emit named events.
pub trait EventSink: Send + Sync {
    /// Emit an event to the server.
    ///
    /// Delivery is best-effort; an error means the event was dropped.
    fn emit(&self, event: ClientEvent) -> Result<(), ChannelError>;

    /// Current connection state.
    fn state(&self) -> ChannelState;

    /// Check if the channel is connected.
    fn is_connected(&self) -> bool {
        self.state() == ChannelState::Connected
    }
}

/// Inbound half of a channel: what the adapter delivers to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelSignal {
    /// A session was established, either for the first time or after a drop.
    Connected {
        /// Server-assigned session id.
        session_id: String,
    },
    /// The session was lost.
    Disconnected {
        /// Human-readable cause.
        reason: String,
    },
    /// A server event arrived.
    Event(ServerEvent),
}

/// An [`EventSink`] that records every emitted event.
///
/// Useful for driving the engine without a network.
#[derive(Debug)]
pub struct RecordingSink {
    emitted: Mutex<Vec<ClientEvent>>,
    state: Mutex<ChannelState>,
}

impl RecordingSink {
    /// Create a connected recording sink.
    #[must_use]
    pub fn new() -> Self {
        Self {
            emitted: Mutex::new(Vec::new()),
            state: Mutex::new(ChannelState::Connected),
        }
    }

    /// Change the reported state.
    pub fn set_state(&self, state: ChannelState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Take all events emitted so far.
    pub fn take(&self) -> Vec<ClientEvent> {
        std::mem::take(&mut *self.emitted.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: ClientEvent) -> Result<(), ChannelError> {
        match self.state() {
            ChannelState::Connected => {
                self.emitted
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(event);
                Ok(())
            }
            ChannelState::Closed => Err(ChannelError::Closed),
            ChannelState::Connecting | ChannelState::Disconnected => {
                Err(ChannelError::NotConnected)
            }
        }
    }

    fn state(&self) -> ChannelState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
