//! Shared fixtures for pollsync benchmarks.

use pollsync_core::Navigator;
use pollsync_protocol::events::{LikeAdded, VoteCast};
use pollsync_protocol::{codec, Like, Packet, Poll, PollList, ServerEvent, Vote};

/// A poll with `options` options named `opt-0..`.
#[must_use]
pub fn poll(poll_id: &str, options: usize) -> Poll {
    (0..options).fold(
        Poll::new(poll_id).with_total_votes(options as u64 * 10),
        |poll, i| poll.with_option(format!("opt-{i}"), 10),
    )
}

/// A list of `len` polls named `poll-0..`.
#[must_use]
pub fn poll_list(len: usize, options: usize) -> PollList {
    PollList::new((0..len).map(|i| poll(&format!("poll-{i}"), options)))
}

/// A `vote_added` for `opt-0`.
#[must_use]
pub fn vote_added(poll_id: &str) -> ServerEvent {
    ServerEvent::VoteAdded(VoteCast {
        poll_id: poll_id.to_string(),
        vote: Vote::new("vote-1", "opt-0"),
        updated_counts: [("opt-0".to_string(), 11)].into_iter().collect(),
    })
}

/// A `like_added` setting the total to `total_likes`.
#[must_use]
pub fn like_added(poll_id: &str, total_likes: u64) -> ServerEvent {
    ServerEvent::LikeAdded(LikeAdded {
        poll_id: poll_id.to_string(),
        like: Like {
            id: "like-1".to_string(),
            session_id: None,
            poll_id: Some(poll_id.to_string()),
        },
        total_likes,
    })
}

/// Encode a server event as a wire frame.
///
/// # Errors
///
/// Returns an error if encoding fails.
pub fn frame(event: ServerEvent) -> Result<String, pollsync_protocol::ProtocolError> {
    codec::encode(&Packet::Event(event))
}

/// A navigator that goes nowhere.
#[derive(Debug, Default)]
pub struct NullNavigator;

impl Navigator for NullNavigator {
    fn navigate(&self, _location: &str) {}
}
