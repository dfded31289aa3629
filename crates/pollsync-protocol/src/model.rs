//! Poll domain model as it appears on the wire.
//!
//! Field names follow the server's camelCase JSON. Fields the synchronization
//! engine does not interpret (titles, descriptions, timestamps, ...) are kept
//! in `extra` so that they survive every patch untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// A poll identifier.
pub type PollId = String;

/// An option identifier, unique within its poll.
pub type OptionId = String;

/// A voting session identifier.
pub type SessionId = String;

/// Absolute per-option vote counts pushed by the server.
///
/// These are snapshot fragments, not deltas: each value replaces the
/// option's current count.
pub type UpdatedCounts = HashMap<OptionId, u64>;

/// A poll with its options and aggregate counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Poll {
    /// Poll identifier.
    pub poll_id: PollId,
    /// Options in display order.
    #[serde(default)]
    pub options: Vec<PollOption>,
    /// Number of votes cast.
    #[serde(default)]
    pub total_votes: u64,
    /// Number of likes.
    #[serde(default)]
    pub total_likes: u64,
    /// This session's own vote, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_vote: Option<Vote>,
    /// Whether this session liked the poll.
    #[serde(default)]
    pub session_liked: bool,
    /// Fields passed through verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Poll {
    /// Create an empty poll with the given identifier.
    #[must_use]
    pub fn new(poll_id: impl Into<PollId>) -> Self {
        Self {
            poll_id: poll_id.into(),
            options: Vec::new(),
            total_votes: 0,
            total_likes: 0,
            session_vote: None,
            session_liked: false,
            extra: Map::new(),
        }
    }

    /// Add an option.
    #[must_use]
    pub fn with_option(mut self, option_id: impl Into<OptionId>, vote_count: u64) -> Self {
        self.options.push(PollOption::new(option_id, vote_count));
        self
    }

    /// Set the vote total.
    #[must_use]
    pub fn with_total_votes(mut self, total_votes: u64) -> Self {
        self.total_votes = total_votes;
        self
    }

    /// Set the like total.
    #[must_use]
    pub fn with_total_likes(mut self, total_likes: u64) -> Self {
        self.total_likes = total_likes;
        self
    }

    /// Look up an option by identifier.
    #[must_use]
    pub fn option(&self, option_id: &str) -> Option<&PollOption> {
        self.options.iter().find(|o| o.option_id == option_id)
    }
}

/// A single poll option.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollOption {
    /// Option identifier.
    pub option_id: OptionId,
    /// Votes for this option.
    #[serde(default)]
    pub vote_count: u64,
    /// Fields passed through verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PollOption {
    /// Create an option with a vote count.
    #[must_use]
    pub fn new(option_id: impl Into<OptionId>, vote_count: u64) -> Self {
        Self {
            option_id: option_id.into(),
            vote_count,
            extra: Map::new(),
        }
    }
}

/// A vote cast by a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    /// Vote identifier.
    #[serde(alias = "voteId")]
    pub id: String,
    /// Owning session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// The option voted for.
    pub option_id: OptionId,
    /// The poll voted in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_id: Option<PollId>,
}

impl Vote {
    /// Create a vote for an option.
    #[must_use]
    pub fn new(id: impl Into<String>, option_id: impl Into<OptionId>) -> Self {
        Self {
            id: id.into(),
            session_id: None,
            option_id: option_id.into(),
            poll_id: None,
        }
    }
}

/// A like left by a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Like {
    /// Like identifier.
    #[serde(alias = "likeId")]
    pub id: String,
    /// Owning session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// The liked poll.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_id: Option<PollId>,
}

/// Pagination metadata attached to a poll list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    /// Current page (1-based).
    #[serde(default)]
    pub page: u64,
    /// Page size.
    #[serde(default)]
    pub limit: u64,
    /// Total number of polls.
    #[serde(default)]
    pub total: u64,
    /// Total number of pages.
    #[serde(default)]
    pub total_pages: u64,
}

/// The value cached for the poll list view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollList {
    /// Polls in display order.
    #[serde(default)]
    pub data: Vec<std::sync::Arc<Poll>>,
    /// Pagination metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

impl PollList {
    /// Create a list from polls.
    #[must_use]
    pub fn new(polls: impl IntoIterator<Item = Poll>) -> Self {
        Self {
            data: polls.into_iter().map(std::sync::Arc::new).collect(),
            pagination: None,
        }
    }

    /// Find a poll in the list.
    #[must_use]
    pub fn find(&self, poll_id: &str) -> Option<&std::sync::Arc<Poll>> {
        self.data.iter().find(|p| p.poll_id == poll_id)
    }

    /// Check if the list holds no polls.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
