//! Event reconcilers for poll detail and poll list views.
//!
//! A reconciler decides whether an event is relevant to its view and, if so,
//! patches the cache through [`crate::patch`]. Each reconciler matches the
//! full event taxonomy exhaustively, so adding an event kind is a compile
//! error until every view decides what to do with it.

use crate::cache::{CacheEntry, CacheKey, CacheStore};
use crate::metrics;
use crate::patch::{patch_list, patch_poll};
use pollsync_protocol::{PollId, ServerEvent};
use std::sync::Arc;
use tracing::{debug, trace};

static POLLS_KEY: CacheKey = CacheKey::Polls;

/// Why an event left the cache untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IgnoreReason {
    /// The event targets a different poll.
    OtherPoll,
    /// Nothing is cached to patch yet.
    NotCached,
    /// The cached list has no entry for the event's poll.
    NoMatch,
    /// The view does not handle this event kind.
    NotHandled,
    /// Acknowledgements and server errors carry no state.
    Informational,
}

impl IgnoreReason {
    /// Get the reason name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            IgnoreReason::OtherPoll => "other_poll",
            IgnoreReason::NotCached => "not_cached",
            IgnoreReason::NoMatch => "no_match",
            IgnoreReason::NotHandled => "not_handled",
            IgnoreReason::Informational => "informational",
        }
    }
}

/// Result of reconciling one event against one view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciled {
    /// The cached value under the key was replaced.
    Applied(CacheKey),
    /// The poll was deleted; its key is gone and the consumer must leave the view.
    Deleted(PollId),
    /// Nothing changed.
    Ignored(IgnoreReason),
}

impl Reconciled {
    /// Get the outcome name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Reconciled::Applied(_) => "applied",
            Reconciled::Deleted(_) => "deleted",
            Reconciled::Ignored(reason) => reason.as_str(),
        }
    }
}

/// Reconciler for a view showing a single poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailReconciler {
    poll_id: PollId,
    key: CacheKey,
}

impl DetailReconciler {
    /// Create a reconciler bound to a poll.
    #[must_use]
    pub fn new(poll_id: impl Into<PollId>) -> Self {
        let poll_id = poll_id.into();
        Self {
            key: CacheKey::poll(poll_id.clone()),
            poll_id,
        }
    }

    /// The poll this reconciler is bound to.
    #[must_use]
    pub fn poll_id(&self) -> &str {
        &self.poll_id
    }

    /// The cache key this reconciler writes.
    #[must_use]
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Apply an event.
    pub fn reconcile(&self, cache: &dyn CacheStore, event: &ServerEvent) -> Reconciled {
        match event {
            ServerEvent::JoinedPoll(_) | ServerEvent::Error(_) => {
                Reconciled::Ignored(IgnoreReason::Informational)
            }
            ServerEvent::PollDeleted(deleted) => {
                if deleted.poll_id != self.poll_id {
                    return Reconciled::Ignored(IgnoreReason::OtherPoll);
                }
                if cache.remove(&self.key).is_some() {
                    metrics::record_cache_write("remove");
                }
                debug!(poll = %self.poll_id, "Poll deleted");
                Reconciled::Deleted(self.poll_id.clone())
            }
            ServerEvent::PollUpdated(_)
            | ServerEvent::VoteAdded(_)
            | ServerEvent::VoteChanged(_)
            | ServerEvent::VoteRemoved(_)
            | ServerEvent::LikeAdded(_)
            | ServerEvent::LikeRemoved(_) => self.patch(cache, event),
        }
    }

    fn patch(&self, cache: &dyn CacheStore, event: &ServerEvent) -> Reconciled {
        if event.poll_id() != Some(self.poll_id.as_str()) {
            return Reconciled::Ignored(IgnoreReason::OtherPoll);
        }

        let Some(previous) = cache.poll(&self.poll_id) else {
            trace!(poll = %self.poll_id, event = %event.kind(), "No cached poll");
            return Reconciled::Ignored(IgnoreReason::NotCached);
        };

        match patch_poll(Some(Arc::clone(&previous)), event) {
            Some(next) if Arc::ptr_eq(&next, &previous) => {
                Reconciled::Ignored(IgnoreReason::NotHandled)
            }
            Some(next) => {
                cache.set(self.key.clone(), CacheEntry::Poll(next));
                metrics::record_cache_write("set");
                debug!(poll = %self.poll_id, event = %event.kind(), "Patched poll");
                Reconciled::Applied(self.key.clone())
            }
            None => {
                cache.remove(&self.key);
                metrics::record_cache_write("remove");
                Reconciled::Deleted(self.poll_id.clone())
            }
        }
    }
}

/// Reconciler for the poll list view.
///
/// Handles `poll_updated`, `vote_added`, `like_added` and `like_removed`.
/// `vote_changed`, `vote_removed` and `poll_deleted` are deliberately left to
/// the detail view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListReconciler;

impl ListReconciler {
    /// Create a list reconciler.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// The cache key this reconciler writes.
    #[must_use]
    pub fn key(&self) -> &CacheKey {
        &POLLS_KEY
    }

    /// Apply an event.
    pub fn reconcile(&self, cache: &dyn CacheStore, event: &ServerEvent) -> Reconciled {
        match event {
            ServerEvent::JoinedPoll(_) | ServerEvent::Error(_) => {
                Reconciled::Ignored(IgnoreReason::Informational)
            }
            ServerEvent::VoteChanged(_)
            | ServerEvent::VoteRemoved(_)
            | ServerEvent::PollDeleted(_) => Reconciled::Ignored(IgnoreReason::NotHandled),
            ServerEvent::PollUpdated(_)
            | ServerEvent::VoteAdded(_)
            | ServerEvent::LikeAdded(_)
            | ServerEvent::LikeRemoved(_) => self.patch(cache, event),
        }
    }

    fn patch(&self, cache: &dyn CacheStore, event: &ServerEvent) -> Reconciled {
        let previous = match cache.polls() {
            Some(list) if !list.is_empty() => list,
            _ => return Reconciled::Ignored(IgnoreReason::NotCached),
        };

        match patch_list(Some(Arc::clone(&previous)), event) {
            Some(next) if !Arc::ptr_eq(&next, &previous) => {
                cache.set(CacheKey::Polls, CacheEntry::Polls(next));
                metrics::record_cache_write("set");
                debug!(poll = ?event.poll_id(), event = %event.kind(), "Patched poll list");
                Reconciled::Applied(CacheKey::Polls)
            }
            _ => Reconciled::Ignored(IgnoreReason::NoMatch),
        }
    }
}
