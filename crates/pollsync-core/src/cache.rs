//! Read-through cache store consumed by the reconcilers.
//!
//! The engine only needs `get`, `set`, `remove` and `invalidate` by key. An
//! updater is expressed as `get`, a pure patch, then `set`; dispatch is
//! single-threaded, so nothing can interleave between the read and the write.

use dashmap::DashMap;
use pollsync_protocol::{Poll, PollId, PollList};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

/// Default capacity of the change notification channel.
const DEFAULT_CHANGE_CAPACITY: usize = 256;

/// Key of a cached value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CacheKey {
    /// A single poll, `("poll", id)`.
    Poll(PollId),
    /// The poll list, `("polls")`.
    Polls,
}

impl CacheKey {
    /// Key of a single poll.
    #[must_use]
    pub fn poll(poll_id: impl Into<PollId>) -> Self {
        CacheKey::Poll(poll_id.into())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Poll(id) => write!(f, "poll:{id}"),
            CacheKey::Polls => f.write_str("polls"),
        }
    }
}

/// A cached value.
///
/// Values are shared immutable snapshots; a patch always installs a new
/// `Arc`, so consumers can detect changes by pointer identity.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEntry {
    /// Detail value for one poll.
    Poll(Arc<Poll>),
    /// List value.
    Polls(Arc<PollList>),
}

impl CacheEntry {
    /// Get the poll, if this is a poll entry.
    #[must_use]
    pub fn as_poll(&self) -> Option<&Arc<Poll>> {
        match self {
            CacheEntry::Poll(poll) => Some(poll),
            CacheEntry::Polls(_) => None,
        }
    }

    /// Get the list, if this is a list entry.
    #[must_use]
    pub fn as_polls(&self) -> Option<&Arc<PollList>> {
        match self {
            CacheEntry::Polls(list) => Some(list),
            CacheEntry::Poll(_) => None,
        }
    }

    /// Check whether two entries share the same allocation.
    #[must_use]
    pub fn ptr_eq(&self, other: &CacheEntry) -> bool {
        match (self, other) {
            (CacheEntry::Poll(a), CacheEntry::Poll(b)) => Arc::ptr_eq(a, b),
            (CacheEntry::Polls(a), CacheEntry::Polls(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// A change notification emitted by a cache store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheChange {
    /// The value under the key was written.
    Updated(CacheKey),
    /// The key was removed.
    Removed(CacheKey),
    /// The value under the key was marked stale and should be re-fetched.
    Invalidated(CacheKey),
}

impl CacheChange {
    /// The key that changed.
    #[must_use]
    pub fn key(&self) -> &CacheKey {
        match self {
            CacheChange::Updated(key)
            | CacheChange::Removed(key)
            | CacheChange::Invalidated(key) => key,
        }
    }
}

/// A key-value cache the reconcilers patch.
pub trait CacheStore: Send + Sync {
    /// Read the value under a key.
    fn get(&self, key: &CacheKey) -> Option<CacheEntry>;

    /// Write a value, notifying subscribers of the key.
    fn set(&self, key: CacheKey, value: CacheEntry);

    /// Remove a key, returning the previous value.
    fn remove(&self, key: &CacheKey) -> Option<CacheEntry>;

    /// Mark a key stale without dropping its value.
    fn invalidate(&self, key: &CacheKey);

    /// Read a poll detail value.
    fn poll(&self, poll_id: &str) -> Option<Arc<Poll>> {
        self.get(&CacheKey::poll(poll_id))
            .and_then(|entry| entry.as_poll().cloned())
    }

    /// Read the poll list value.
    fn polls(&self) -> Option<Arc<PollList>> {
        self.get(&CacheKey::Polls)
            .and_then(|entry| entry.as_polls().cloned())
    }
}

struct StoredEntry {
    value: CacheEntry,
    stale: bool,
}

/// Concurrent in-memory cache store with change notifications.
pub struct InMemoryCache {
    entries: DashMap<CacheKey, StoredEntry>,
    changes: broadcast::Sender<CacheChange>,
}

impl InMemoryCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANGE_CAPACITY)
    }

    /// Create an empty cache with a specific notification capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity);
        Self {
            entries: DashMap::new(),
            changes,
        }
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheChange> {
        self.changes.subscribe()
    }

    /// Get all keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<CacheKey> {
        let mut keys: Vec<CacheKey> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Check whether a key has been invalidated since it was last written.
    #[must_use]
    pub fn is_stale(&self, key: &CacheKey) -> bool {
        self.entries.get(key).map(|e| e.stale).unwrap_or(false)
    }

    /// Mark every key stale.
    pub fn invalidate_all(&self) {
        for key in self.keys() {
            self.invalidate(&key);
        }
    }

    /// Number of cached keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn notify(&self, change: CacheChange) {
        trace!(key = %change.key(), "Cache change");
        // No subscribers is fine.
        let _ = self.changes.send(change);
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore for InMemoryCache {
    fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.get(key).map(|e| e.value.clone())
    }

    fn set(&self, key: CacheKey, value: CacheEntry) {
        self.entries.insert(
            key.clone(),
            StoredEntry {
                value,
                stale: false,
            },
        );
        self.notify(CacheChange::Updated(key));
    }

    fn remove(&self, key: &CacheKey) -> Option<CacheEntry> {
        let removed = self.entries.remove(key).map(|(_, e)| e.value);
        if removed.is_some() {
            self.notify(CacheChange::Removed(key.clone()));
        }
        removed
    }

    fn invalidate(&self, key: &CacheKey) {
        let marked = match self.entries.get_mut(key) {
            Some(mut entry) => {
                entry.stale = true;
                true
            }
            None => false,
        };
        if marked {
            self.notify(CacheChange::Invalidated(key.clone()));
        }
    }
}
