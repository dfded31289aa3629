//! # pollsync-protocol
//!
//! Wire protocol definitions for realtime poll synchronization.
//!
//! This crate defines the poll domain model, the event taxonomy exchanged
//! with the poll server, and the Engine.IO/Socket.IO text codec that carries
//! those events over a WebSocket.
//!
//! ## Events
//!
//! - `join_poll` / `leave_poll` - Room membership (client to server)
//! - `poll_updated`, `vote_*`, `like_*`, `poll_deleted` - State changes
//! - `joined_poll` / `error` - Informational
//!
//! ## Example
//!
//! ```rust
//! use pollsync_protocol::{codec, Packet};
//!
//! let frame = codec::encode(&Packet::join("p1")).unwrap();
//! assert_eq!(frame, r#"42["join_poll","p1"]"#);
//! assert_eq!(codec::decode(&frame).unwrap(), Packet::join("p1"));
//! ```

pub mod codec;
pub mod events;
pub mod model;
pub mod version;

pub use codec::{decode, encode, Handshake, Packet, ProtocolError};
pub use events::{ClientEvent, EventKind, ServerEvent};
pub use model::{Like, Poll, PollId, PollList, PollOption, UpdatedCounts, Vote};
pub use version::{websocket_url, DEFAULT_SOCKET_PATH};
