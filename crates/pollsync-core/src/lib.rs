//! # pollsync-core
//!
//! Realtime synchronization of cached poll state with server events.
//!
//! This crate provides the client-side building blocks:
//!
//! - **Channel** - The emit capability and signal stream an adapter provides
//! - **Cache** - Injected key-value store the reconcilers patch
//! - **Patch** - Pure `(previous, event) -> next` transforms
//! - **Membership** - Reference-counted poll room joins, re-asserted on reconnect
//! - **Reconciler** - Per-view event filtering for detail and list views
//! - **Engine** - View registry and the single task that dispatches everything
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐ signals ┌─────────────┐     ┌─────────────┐
//! │   Adapter   │────────▶│   Engine    │────▶│ Reconcilers │
//! └─────────────┘         └─────────────┘     └─────────────┘
//!        ▲                       │                   │
//!        │ join/leave            ▼                   ▼
//!        └────────────────┌─────────────┐     ┌─────────────┐
//!                         │ Membership  │     │    Cache    │
//!                         └─────────────┘     └─────────────┘
//! ```

pub mod cache;
pub mod channel;
pub mod engine;
pub mod error;
pub mod membership;
pub mod metrics;
pub mod patch;
pub mod reconciler;

pub use cache::{CacheChange, CacheEntry, CacheKey, CacheStore, InMemoryCache};
pub use channel::{ChannelError, ChannelSignal, ChannelState, EventSink, RecordingSink};
pub use engine::{
    EngineConfig, EngineHandle, EngineStats, Navigator, SyncEngine, ViewCommand, ViewId,
    ViewSummary,
};
pub use error::EngineError;
pub use membership::{RoomMembership, Subscription};
pub use reconciler::{DetailReconciler, IgnoreReason, ListReconciler, Reconciled};
