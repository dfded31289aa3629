//! Room membership for poll update rooms.
//!
//! The server forgets room membership whenever a session drops, so the
//! manager keeps the authoritative set of rooms this client wants to be in
//! and re-asserts it on every new session.

use crate::channel::{validate_poll_id, EventSink};
use crate::error::EngineError;
use crate::metrics;
use pollsync_protocol::{ClientEvent, PollId};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Proof of a successful [`RoomMembership::subscribe`].
///
/// The token owns the poll id captured at subscribe time and is consumed by
/// [`RoomMembership::unsubscribe`], so each subscription is released exactly
/// once and always for the id it was taken for.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a subscription must be passed back to `unsubscribe`"]
pub struct Subscription {
    poll_id: PollId,
}

impl Subscription {
    /// The poll this subscription is for.
    #[must_use]
    pub fn poll_id(&self) -> &str {
        &self.poll_id
    }
}

/// Tracks joined rooms and emits `join_poll` / `leave_poll`.
///
/// Rooms are reference counted: only the first subscription to a poll emits a
/// join and only the last unsubscription emits a leave.
pub struct RoomMembership {
    sink: Arc<dyn EventSink>,
    /// Poll id -> number of live subscriptions.
    rooms: BTreeMap<PollId, usize>,
    /// Whether a session is up. Emits are deferred while offline.
    online: bool,
}

impl RoomMembership {
    /// Create a membership manager emitting on `sink`.
    ///
    /// The manager starts online if the sink reports a connection.
    #[must_use]
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        let online = sink.is_connected();
        Self {
            sink,
            rooms: BTreeMap::new(),
            online,
        }
    }

    /// Subscribe to a poll's room.
    ///
    /// # Errors
    ///
    /// Returns an error if the poll id is invalid.
    pub fn subscribe(&mut self, poll_id: &str) -> Result<Subscription, EngineError> {
        validate_poll_id(poll_id).map_err(EngineError::InvalidPollId)?;

        let count = self.rooms.entry(poll_id.to_string()).or_insert(0);
        *count += 1;
        let first = *count == 1;
        trace!(poll = %poll_id, subscriptions = *count, "Subscribed");

        if first {
            metrics::set_active_rooms(self.rooms.len());
            if self.online {
                self.send(ClientEvent::JoinPoll(poll_id.to_string()));
            }
        }

        Ok(Subscription {
            poll_id: poll_id.to_string(),
        })
    }

    /// Release a subscription.
    pub fn unsubscribe(&mut self, subscription: Subscription) {
        let Subscription { poll_id } = subscription;

        let remaining = match self.rooms.get_mut(&poll_id) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => return,
        };
        trace!(poll = %poll_id, subscriptions = remaining, "Unsubscribed");
        if remaining > 0 {
            return;
        }

        self.rooms.remove(&poll_id);
        metrics::set_active_rooms(self.rooms.len());
        if self.online {
            self.send(ClientEvent::LeavePoll(poll_id));
        }
    }

    /// Mark the session up and re-join every active room once.
    ///
    /// Returns the number of joins emitted.
    pub fn resubscribe_all(&mut self) -> usize {
        self.online = true;
        let rooms: Vec<PollId> = self.rooms.keys().cloned().collect();
        for poll_id in &rooms {
            self.send(ClientEvent::JoinPoll(poll_id.clone()));
        }
        debug!(rooms = rooms.len(), "Re-joined rooms");
        rooms.len()
    }

    /// Mark the session down. The server has dropped every membership.
    pub fn go_offline(&mut self) {
        self.online = false;
    }

    /// Whether a session is up.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.online
    }

    /// Check if the client wants to be in a poll's room.
    #[must_use]
    pub fn is_member(&self, poll_id: &str) -> bool {
        self.rooms.contains_key(poll_id)
    }

    /// Get all active rooms, sorted.
    #[must_use]
    pub fn active_rooms(&self) -> Vec<PollId> {
        self.rooms.keys().cloned().collect()
    }

    /// Number of active rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    fn send(&self, event: ClientEvent) {
        let join = matches!(event, ClientEvent::JoinPoll(_));
        let poll_id = event.poll_id().to_string();
        match self.sink.emit(event) {
            Ok(()) => {
                if join {
                    metrics::record_join();
                } else {
                    metrics::record_leave();
                }
                debug!(poll = %poll_id, join, "Room membership sent");
            }
            // Best-effort: the next session re-joins.
            Err(e) => debug!(poll = %poll_id, join, error = %e, "Room membership dropped"),
        }
    }
}
