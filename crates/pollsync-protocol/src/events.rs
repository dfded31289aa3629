//! Event taxonomy for poll synchronization.
//!
//! Inbound events are pushed by the server to every session in a poll's room
//! (and sometimes to every connected session). Outbound events manage room
//! membership.

use crate::model::{Like, Poll, PollId, SessionId, UpdatedCounts, Vote};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Event names known to the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    PollUpdated,
    VoteAdded,
    VoteChanged,
    VoteRemoved,
    LikeAdded,
    LikeRemoved,
    PollDeleted,
    JoinedPoll,
    Error,
    JoinPoll,
    LeavePoll,
}

impl EventKind {
    /// Every event kind, inbound first.
    pub const ALL: [EventKind; 11] = [
        EventKind::PollUpdated,
        EventKind::VoteAdded,
        EventKind::VoteChanged,
        EventKind::VoteRemoved,
        EventKind::LikeAdded,
        EventKind::LikeRemoved,
        EventKind::PollDeleted,
        EventKind::JoinedPoll,
        EventKind::Error,
        EventKind::JoinPoll,
        EventKind::LeavePoll,
    ];

    /// The wire name of the event.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            EventKind::PollUpdated => "poll_updated",
            EventKind::VoteAdded => "vote_added",
            EventKind::VoteChanged => "vote_changed",
            EventKind::VoteRemoved => "vote_removed",
            EventKind::LikeAdded => "like_added",
            EventKind::LikeRemoved => "like_removed",
            EventKind::PollDeleted => "poll_deleted",
            EventKind::JoinedPoll => "joined_poll",
            EventKind::Error => "error",
            EventKind::JoinPoll => "join_poll",
            EventKind::LeavePoll => "leave_poll",
        }
    }

    /// Whether the client sends this event (as opposed to receiving it).
    #[must_use]
    pub const fn is_outbound(self) -> bool {
        matches!(self, EventKind::JoinPoll | EventKind::LeavePoll)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// `poll_updated` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollUpdated {
    pub poll_id: PollId,
    pub poll: Poll,
}

/// `vote_added` and `vote_changed` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteCast {
    pub poll_id: PollId,
    pub vote: Vote,
    #[serde(default)]
    pub updated_counts: UpdatedCounts,
}

/// `vote_removed` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRemoved {
    pub poll_id: PollId,
    pub session_id: SessionId,
    #[serde(default)]
    pub updated_counts: UpdatedCounts,
}

/// `like_added` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeAdded {
    pub poll_id: PollId,
    pub like: Like,
    pub total_likes: u64,
}

/// `like_removed` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeRemoved {
    pub poll_id: PollId,
    pub session_id: SessionId,
    pub total_likes: u64,
}

/// Payload carrying only a poll identifier (`poll_deleted`, `joined_poll`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollRef {
    pub poll_id: PollId,
}

/// `error` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNotice {
    pub message: String,
}

/// An event pushed by the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    PollUpdated(PollUpdated),
    VoteAdded(VoteCast),
    VoteChanged(VoteCast),
    VoteRemoved(VoteRemoved),
    LikeAdded(LikeAdded),
    LikeRemoved(LikeRemoved),
    PollDeleted(PollRef),
    /// Acknowledges a `join_poll`; informational only.
    JoinedPoll(PollRef),
    /// Server-reported error; informational only.
    Error(ErrorNotice),
}

impl ServerEvent {
    /// Get the event kind.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            ServerEvent::PollUpdated(_) => EventKind::PollUpdated,
            ServerEvent::VoteAdded(_) => EventKind::VoteAdded,
            ServerEvent::VoteChanged(_) => EventKind::VoteChanged,
            ServerEvent::VoteRemoved(_) => EventKind::VoteRemoved,
            ServerEvent::LikeAdded(_) => EventKind::LikeAdded,
            ServerEvent::LikeRemoved(_) => EventKind::LikeRemoved,
            ServerEvent::PollDeleted(_) => EventKind::PollDeleted,
            ServerEvent::JoinedPoll(_) => EventKind::JoinedPoll,
            ServerEvent::Error(_) => EventKind::Error,
        }
    }

    /// The poll this event targets, if any.
    #[must_use]
    pub fn poll_id(&self) -> Option<&str> {
        match self {
            ServerEvent::PollUpdated(e) => Some(&e.poll_id),
            ServerEvent::VoteAdded(e) | ServerEvent::VoteChanged(e) => Some(&e.poll_id),
            ServerEvent::VoteRemoved(e) => Some(&e.poll_id),
            ServerEvent::LikeAdded(e) => Some(&e.poll_id),
            ServerEvent::LikeRemoved(e) => Some(&e.poll_id),
            ServerEvent::PollDeleted(e) | ServerEvent::JoinedPoll(e) => Some(&e.poll_id),
            ServerEvent::Error(_) => None,
        }
    }

    /// Build an event from its wire name and JSON payload.
    ///
    /// # Errors
    ///
    /// Returns the serde error if the payload does not have the shape the
    /// event requires, or a message if the name is not an inbound event.
    pub fn from_parts(kind: EventKind, data: serde_json::Value) -> Result<Self, EventShapeError> {
        let event = match kind {
            EventKind::PollUpdated => ServerEvent::PollUpdated(serde_json::from_value(data)?),
            EventKind::VoteAdded => ServerEvent::VoteAdded(serde_json::from_value(data)?),
            EventKind::VoteChanged => ServerEvent::VoteChanged(serde_json::from_value(data)?),
            EventKind::VoteRemoved => ServerEvent::VoteRemoved(serde_json::from_value(data)?),
            EventKind::LikeAdded => ServerEvent::LikeAdded(serde_json::from_value(data)?),
            EventKind::LikeRemoved => ServerEvent::LikeRemoved(serde_json::from_value(data)?),
            EventKind::PollDeleted => ServerEvent::PollDeleted(serde_json::from_value(data)?),
            EventKind::JoinedPoll => ServerEvent::JoinedPoll(serde_json::from_value(data)?),
            EventKind::Error => ServerEvent::Error(serde_json::from_value(data)?),
            EventKind::JoinPoll | EventKind::LeavePoll => {
                return Err(EventShapeError::WrongDirection(kind))
            }
        };
        Ok(event)
    }

    /// Serialize the payload to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn data(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            ServerEvent::PollUpdated(e) => serde_json::to_value(e),
            ServerEvent::VoteAdded(e) | ServerEvent::VoteChanged(e) => serde_json::to_value(e),
            ServerEvent::VoteRemoved(e) => serde_json::to_value(e),
            ServerEvent::LikeAdded(e) => serde_json::to_value(e),
            ServerEvent::LikeRemoved(e) => serde_json::to_value(e),
            ServerEvent::PollDeleted(e) | ServerEvent::JoinedPoll(e) => serde_json::to_value(e),
            ServerEvent::Error(e) => serde_json::to_value(e),
        }
    }
}

/// An event sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClientEvent {
    /// Join a poll's room.
    JoinPoll(PollId),
    /// Leave a poll's room.
    LeavePoll(PollId),
}

impl ClientEvent {
    /// Get the event kind.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            ClientEvent::JoinPoll(_) => EventKind::JoinPoll,
            ClientEvent::LeavePoll(_) => EventKind::LeavePoll,
        }
    }

    /// The poll this event targets.
    #[must_use]
    pub fn poll_id(&self) -> &str {
        match self {
            ClientEvent::JoinPoll(id) | ClientEvent::LeavePoll(id) => id,
        }
    }

    /// Build an event from its wire name and JSON payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a string or the name is not an
    /// outbound event.
    pub fn from_parts(kind: EventKind, data: serde_json::Value) -> Result<Self, EventShapeError> {
        let poll_id: PollId = serde_json::from_value(data)?;
        match kind {
            EventKind::JoinPoll => Ok(ClientEvent::JoinPoll(poll_id)),
            EventKind::LeavePoll => Ok(ClientEvent::LeavePoll(poll_id)),
            other => Err(EventShapeError::WrongDirection(other)),
        }
    }
}

/// An event payload that did not match its event's expected shape.
#[derive(Debug, thiserror::Error)]
pub enum EventShapeError {
    /// The payload JSON did not deserialize into the event's payload type.
    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// The event travels in the other direction.
    #[error("event {0} is not valid in this direction")]
    WrongDirection(EventKind),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_kind_names() {
        for kind in EventKind::ALL {
            assert_eq!(kind.as_str().parse::<EventKind>(), Ok(kind));
        }
        assert!("poll_created".parse::<EventKind>().is_err());
        assert!(EventKind::JoinPoll.is_outbound());
        assert!(!EventKind::VoteAdded.is_outbound());
    }

    #[test]
    fn test_vote_added_from_parts() {
        let event = ServerEvent::from_parts(
            EventKind::VoteAdded,
            json!({
                "pollId": "p1",
                "vote": {"id": "v1", "optionId": "b"},
                "updatedCounts": {"b": 3}
            }),
        )
        .unwrap();

        assert_eq!(event.kind(), EventKind::VoteAdded);
        assert_eq!(event.poll_id(), Some("p1"));
        match event {
            ServerEvent::VoteAdded(cast) => {
                assert_eq!(cast.vote.option_id, "b");
                assert_eq!(cast.updated_counts.get("b"), Some(&3));
            }
            other => panic!("Expected VoteAdded, got {:?}", other),
        }
    }

    #[test]
    fn test_wrong_shape_rejected() {
        let result = ServerEvent::from_parts(EventKind::LikeAdded, json!({"pollId": "p1"}));
        assert!(matches!(result, Err(EventShapeError::Payload(_))));

        let result = ServerEvent::from_parts(EventKind::JoinPoll, json!("p1"));
        assert!(matches!(result, Err(EventShapeError::WrongDirection(_))));
    }

    #[test]
    fn test_error_event_has_no_poll() {
        let event = ServerEvent::from_parts(EventKind::Error, json!({"message": "Poll not found"}))
            .unwrap();
        assert_eq!(event.poll_id(), None);
    }

    #[test]
    fn test_client_event_from_parts() {
        let event = ClientEvent::from_parts(EventKind::LeavePoll, json!("p9")).unwrap();
        assert_eq!(event, ClientEvent::LeavePoll("p9".to_string()));
        assert_eq!(event.poll_id(), "p9");
        assert!(ClientEvent::from_parts(EventKind::JoinPoll, json!({"pollId": "p9"})).is_err());
    }
}
