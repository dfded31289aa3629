//! # pollsync-transport
//!
//! Connection layer for the pollsync engine.
//!
//! - **Connector** - Dials the server and completes the Socket.IO handshake
//! - **WebSocket** - The connector used against real servers
//! - **Adapter** - Owns one reconnecting session and feeds the engine
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pollsync_transport::{ChannelAdapter, ReconnectConfig, WebSocketConfig, WebSocketConnector};
//!
//! let connector = WebSocketConnector::new(WebSocketConfig::default())?;
//! let (adapter, signals) = ChannelAdapter::open(Arc::new(connector), ReconnectConfig::default());
//! let engine = SyncEngine::new(adapter.sink(), cache, navigator);
//! let (handle, task) = engine.spawn(signals);
//! ```

pub mod adapter;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(all(test, feature = "websocket"))]
mod testing;

pub use adapter::{ChannelAdapter, ChannelHandle, ReconnectConfig};
pub use traits::{Connection, ConnectionId, Connector, PacketSink, PacketStream, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConfig, WebSocketConnector};
