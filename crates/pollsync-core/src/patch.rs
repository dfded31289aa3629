//! Pure cache patches, one per event.
//!
//! Every function here maps `(previous, event)` to the next value without
//! touching `previous`. When an event changes nothing the very same `Arc` is
//! returned, and an absent previous value stays absent: a poll is never
//! fabricated from an event.

use pollsync_protocol::events::{LikeAdded, LikeRemoved, PollUpdated, VoteCast, VoteRemoved};
use pollsync_protocol::{Poll, PollList, PollOption, ServerEvent, UpdatedCounts};
use std::sync::Arc;

/// Overwrite option counts with the authoritative values in `counts`.
///
/// Options missing from `counts` keep their current count.
#[must_use]
pub fn apply_counts(options: &[PollOption], counts: &UpdatedCounts) -> Vec<PollOption> {
    options
        .iter()
        .map(|option| PollOption {
            vote_count: counts
                .get(&option.option_id)
                .copied()
                .unwrap_or(option.vote_count),
            ..option.clone()
        })
        .collect()
}

/// A vote was cast by this session.
#[must_use]
pub fn vote_added(poll: &Poll, event: &VoteCast) -> Poll {
    Poll {
        total_votes: poll.total_votes.saturating_add(1),
        options: apply_counts(&poll.options, &event.updated_counts),
        session_vote: Some(event.vote.clone()),
        ..poll.clone()
    }
}

/// This session moved its vote to another option.
#[must_use]
pub fn vote_changed(poll: &Poll, event: &VoteCast) -> Poll {
    Poll {
        options: apply_counts(&poll.options, &event.updated_counts),
        session_vote: Some(event.vote.clone()),
        ..poll.clone()
    }
}

/// This session withdrew its vote.
#[must_use]
pub fn vote_removed(poll: &Poll, event: &VoteRemoved) -> Poll {
    Poll {
        total_votes: poll.total_votes.saturating_sub(1),
        options: apply_counts(&poll.options, &event.updated_counts),
        session_vote: None,
        ..poll.clone()
    }
}

/// Set the like total and this session's like flag.
#[must_use]
pub fn likes(poll: &Poll, total_likes: u64, session_liked: bool) -> Poll {
    Poll {
        total_likes,
        session_liked,
        ..poll.clone()
    }
}

/// Patch a poll detail value.
///
/// Returns `None` when the poll was deleted (or was never cached). The caller
/// is responsible for checking that the event targets this poll.
#[must_use]
pub fn patch_poll(previous: Option<Arc<Poll>>, event: &ServerEvent) -> Option<Arc<Poll>> {
    let poll = previous?;

    let next = match event {
        ServerEvent::PollUpdated(PollUpdated { poll, .. }) => poll.clone(),
        ServerEvent::VoteAdded(cast) => vote_added(&poll, cast),
        ServerEvent::VoteChanged(cast) => vote_changed(&poll, cast),
        ServerEvent::VoteRemoved(removed) => vote_removed(&poll, removed),
        ServerEvent::LikeAdded(LikeAdded { total_likes, .. }) => likes(&poll, *total_likes, true),
        ServerEvent::LikeRemoved(LikeRemoved { total_likes, .. }) => {
            likes(&poll, *total_likes, false)
        }
        ServerEvent::PollDeleted(_) => return None,
        ServerEvent::JoinedPoll(_) | ServerEvent::Error(_) => return Some(poll),
    };

    Some(Arc::new(next))
}

/// Patch the poll list value.
///
/// Only the entry whose id matches the event changes; every other entry
/// keeps its allocation. The list ignores `vote_changed`, `vote_removed` and
/// `poll_deleted`, and never touches the per-session fields of its entries.
#[must_use]
pub fn patch_list(previous: Option<Arc<PollList>>, event: &ServerEvent) -> Option<Arc<PollList>> {
    let list = previous?;

    let next = match event {
        ServerEvent::PollUpdated(updated) => {
            map_entry(&list, &updated.poll_id, |_| updated.poll.clone())
        }
        ServerEvent::VoteAdded(cast) => map_entry(&list, &cast.poll_id, |poll| Poll {
            total_votes: poll.total_votes.saturating_add(1),
            options: apply_counts(&poll.options, &cast.updated_counts),
            ..poll.clone()
        }),
        ServerEvent::LikeAdded(LikeAdded {
            poll_id,
            total_likes,
            ..
        })
        | ServerEvent::LikeRemoved(LikeRemoved {
            poll_id,
            total_likes,
            ..
        }) => map_entry(&list, poll_id, |poll| Poll {
            total_likes: *total_likes,
            ..poll.clone()
        }),
        ServerEvent::VoteChanged(_)
        | ServerEvent::VoteRemoved(_)
        | ServerEvent::PollDeleted(_)
        | ServerEvent::JoinedPoll(_)
        | ServerEvent::Error(_) => list,
    };

    Some(next)
}

fn map_entry(list: &Arc<PollList>, poll_id: &str, f: impl Fn(&Poll) -> Poll) -> Arc<PollList> {
    if list.find(poll_id).is_none() {
        return Arc::clone(list);
    }

    Arc::new(PollList {
        data: list
            .data
            .iter()
            .map(|poll| {
                if poll.poll_id == poll_id {
                    Arc::new(f(poll))
                } else {
                    Arc::clone(poll)
                }
            })
            .collect(),
        pagination: list.pagination.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pollsync_protocol::events::PollRef;
    use pollsync_protocol::{Like, Vote};

    fn cached_poll() -> Arc<Poll> {
        Arc::new(
            Poll::new("p1")
                .with_option("a", 3)
                .with_option("b", 2)
                .with_total_votes(5),
        )
    }

    fn counts(pairs: &[(&str, u64)]) -> UpdatedCounts {
        pairs.iter().map(|(k, v)| ((*k).to_string(), *v)).collect()
    }

    fn vote_added_event(option: &str, updated: &[(&str, u64)]) -> ServerEvent {
        ServerEvent::VoteAdded(VoteCast {
            poll_id: "p1".into(),
            vote: Vote::new("v1", option),
            updated_counts: counts(updated),
        })
    }

    fn like_added_event(poll_id: &str, total_likes: u64) -> ServerEvent {
        ServerEvent::LikeAdded(LikeAdded {
            poll_id: poll_id.into(),
            like: Like {
                id: "l1".into(),
                session_id: Some("s1".into()),
                poll_id: Some(poll_id.into()),
            },
            total_likes,
        })
    }

    #[test]
    fn test_vote_added_scenario() {
        let next = patch_poll(Some(cached_poll()), &vote_added_event("b", &[("b", 3)])).unwrap();

        assert_eq!(next.total_votes, 6);
        assert_eq!(next.option("a").unwrap().vote_count, 3);
        assert_eq!(next.option("b").unwrap().vote_count, 3);
        assert_eq!(next.session_vote, Some(Vote::new("v1", "b")));
    }

    #[test]
    fn test_vote_removed_scenario() {
        let event = ServerEvent::VoteRemoved(VoteRemoved {
            poll_id: "p1".into(),
            session_id: "s1".into(),
            updated_counts: counts(&[("b", 2)]),
        });
        let mut poll = (*cached_poll()).clone();
        poll.session_vote = Some(Vote::new("v1", "b"));

        let next = patch_poll(Some(Arc::new(poll)), &event).unwrap();
        assert_eq!(next.total_votes, 4);
        assert_eq!(next.option("a").unwrap().vote_count, 3);
        assert_eq!(next.option("b").unwrap().vote_count, 2);
        assert!(next.session_vote.is_none());
    }

    #[test]
    fn test_vote_changed_keeps_total() {
        let event = ServerEvent::VoteChanged(VoteCast {
            poll_id: "p1".into(),
            vote: Vote::new("v1", "a"),
            updated_counts: counts(&[("a", 4), ("b", 1)]),
        });

        let next = patch_poll(Some(cached_poll()), &event).unwrap();
        assert_eq!(next.total_votes, 5);
        assert_eq!(next.option("a").unwrap().vote_count, 4);
        assert_eq!(next.option("b").unwrap().vote_count, 1);
        assert_eq!(next.session_vote.as_ref().unwrap().option_id, "a");
    }

    #[test]
    fn test_omitted_option_keeps_count_and_zero_is_applied() {
        let next = patch_poll(Some(cached_poll()), &vote_added_event("b", &[("a", 0)])).unwrap();
        assert_eq!(next.option("a").unwrap().vote_count, 0);
        assert_eq!(next.option("b").unwrap().vote_count, 2);

        let next = patch_poll(Some(cached_poll()), &vote_added_event("b", &[])).unwrap();
        assert_eq!(next.option("a").unwrap().vote_count, 3);
        assert_eq!(next.option("b").unwrap().vote_count, 2);
    }

    #[test]
    fn test_total_votes_never_negative() {
        let remove = ServerEvent::VoteRemoved(VoteRemoved {
            poll_id: "p1".into(),
            session_id: "s1".into(),
            updated_counts: UpdatedCounts::new(),
        });
        let change = ServerEvent::VoteChanged(VoteCast {
            poll_id: "p1".into(),
            vote: Vote::new("v1", "a"),
            updated_counts: UpdatedCounts::new(),
        });
        let add = vote_added_event("a", &[]);

        let sequence = [&remove, &remove, &add, &change, &remove, &remove, &remove, &add];
        let mut poll = Some(Arc::new(Poll::new("p1").with_option("a", 0).with_total_votes(1)));
        let mut totals = Vec::new();
        for event in sequence {
            poll = patch_poll(poll, event);
            totals.push(poll.as_ref().unwrap().total_votes);
        }

        assert_eq!(totals, vec![0, 0, 1, 1, 0, 0, 0, 1]);
    }

    #[test]
    fn test_likes_are_absolute() {
        let next = patch_poll(Some(cached_poll()), &like_added_event("p1", 7)).unwrap();
        assert_eq!(next.total_likes, 7);
        assert!(next.session_liked);

        let removed = ServerEvent::LikeRemoved(LikeRemoved {
            poll_id: "p1".into(),
            session_id: "s1".into(),
            total_likes: 6,
        });
        let next = patch_poll(Some(next), &removed).unwrap();
        assert_eq!(next.total_likes, 6);
        assert!(!next.session_liked);
    }

    #[test]
    fn test_poll_updated_replaces_wholesale() {
        let replacement = Poll::new("p1").with_option("c", 9).with_total_votes(9);
        let event = ServerEvent::PollUpdated(PollUpdated {
            poll_id: "p1".into(),
            poll: replacement.clone(),
        });

        let next = patch_poll(Some(cached_poll()), &event).unwrap();
        assert_eq!(*next, replacement);
    }

    #[test]
    fn test_absent_stays_absent() {
        assert!(patch_poll(None, &vote_added_event("a", &[("a", 1)])).is_none());
        assert!(patch_list(None, &like_added_event("p1", 1)).is_none());
    }

    #[test]
    fn test_deleted_and_informational() {
        let previous = cached_poll();
        let deleted = ServerEvent::PollDeleted(PollRef {
            poll_id: "p1".into(),
        });
        assert!(patch_poll(Some(previous.clone()), &deleted).is_none());

        let joined = ServerEvent::JoinedPoll(PollRef {
            poll_id: "p1".into(),
        });
        let next = patch_poll(Some(previous.clone()), &joined).unwrap();
        assert!(Arc::ptr_eq(&next, &previous));
    }

    #[test]
    fn test_previous_is_not_mutated() {
        let previous = cached_poll();
        let snapshot = (*previous).clone();
        let next = patch_poll(Some(previous.clone()), &vote_added_event("b", &[("b", 3)])).unwrap();

        assert!(!Arc::ptr_eq(&next, &previous));
        assert_eq!(*previous, snapshot);
    }

    #[test]
    fn test_list_like_added_scenario() {
        let list = Arc::new(PollList::new([
            Poll::new("p1").with_total_likes(2),
            Poll::new("p2").with_total_likes(0),
        ]));

        let next = patch_list(Some(list.clone()), &like_added_event("p2", 1)).unwrap();
        assert!(!Arc::ptr_eq(&next, &list));
        assert!(Arc::ptr_eq(&next.data[0], &list.data[0]));
        assert_eq!(next.data[0].total_likes, 2);
        assert_eq!(next.data[1].total_likes, 1);
        // The list does not track per-session likes.
        assert!(!next.data[1].session_liked);
    }

    #[test]
    fn test_list_vote_added_patches_matching_entry() {
        let list = Arc::new(PollList::new([
            (*cached_poll()).clone(),
            Poll::new("p2").with_option("a", 1).with_total_votes(1),
        ]));

        let next = patch_list(Some(list.clone()), &vote_added_event("b", &[("b", 3)])).unwrap();
        let p1 = next.find("p1").unwrap();
        assert_eq!(p1.total_votes, 6);
        assert_eq!(p1.option("b").unwrap().vote_count, 3);
        assert!(p1.session_vote.is_none());
        assert!(Arc::ptr_eq(&next.data[1], &list.data[1]));
    }

    #[test]
    fn test_list_unchanged_without_match_or_for_ignored_events() {
        let list = Arc::new(PollList::new([Poll::new("p1")]));

        let next = patch_list(Some(list.clone()), &like_added_event("p9", 1)).unwrap();
        assert!(Arc::ptr_eq(&next, &list));

        let removed = ServerEvent::VoteRemoved(VoteRemoved {
            poll_id: "p1".into(),
            session_id: "s1".into(),
            updated_counts: UpdatedCounts::new(),
        });
        let deleted = ServerEvent::PollDeleted(PollRef {
            poll_id: "p1".into(),
        });
        for event in [removed, deleted] {
            let next = patch_list(Some(list.clone()), &event).unwrap();
            assert!(Arc::ptr_eq(&next, &list));
        }
    }

    #[test]
    fn test_list_keeps_pagination() {
        let mut list = PollList::new([Poll::new("p1")]);
        list.pagination = Some(pollsync_protocol::model::Pagination {
            page: 2,
            limit: 10,
            total: 11,
            total_pages: 2,
        });
        let list = Arc::new(list);

        let next = patch_list(Some(list.clone()), &like_added_event("p1", 3)).unwrap();
        assert_eq!(next.pagination, list.pagination);
    }
}
