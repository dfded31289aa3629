//! Cache seeding from a JSON snapshot.
//!
//! The engine only patches values that are already cached. A snapshot
//! provides those initial values:
//!
//! ```json
//! {
//!   "polls": [{ "pollId": "p1", "options": [], "totalVotes": 0, "totalLikes": 0 }],
//!   "list": { "data": [], "pagination": { "page": 1, "limit": 10, "total": 0, "totalPages": 0 } }
//! }
//! ```

use anyhow::{Context, Result};
use pollsync_core::{CacheEntry, CacheKey, CacheStore};
use pollsync_protocol::{Poll, PollList};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Initial cache contents.
#[derive(Debug, Default, Deserialize)]
pub struct Snapshot {
    /// Poll detail values.
    #[serde(default)]
    pub polls: Vec<Poll>,

    /// Poll list value.
    #[serde(default)]
    pub list: Option<PollList>,
}

impl Snapshot {
    /// Read a snapshot file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read snapshot: {}", path.display()))?;

        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse snapshot: {}", path.display()))
    }

    /// Write the snapshot into a cache, returning the number of keys written.
    pub fn seed(self, cache: &dyn CacheStore) -> usize {
        let mut written = 0;
        for poll in self.polls {
            debug!(poll = %poll.poll_id, "Seeding poll");
            cache.set(CacheKey::poll(poll.poll_id.clone()), CacheEntry::Poll(Arc::new(poll)));
            written += 1;
        }
        if let Some(list) = self.list {
            debug!(entries = list.data.len(), "Seeding poll list");
            cache.set(CacheKey::Polls, CacheEntry::Polls(Arc::new(list)));
            written += 1;
        }
        written
    }
}
