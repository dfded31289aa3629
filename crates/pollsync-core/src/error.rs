//! Errors reported to callers of the synchronization engine.

use crate::engine::ViewId;
use thiserror::Error;

/// Errors returned by the sync engine API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Invalid poll identifier.
    #[error("Invalid poll id: {0}")]
    InvalidPollId(&'static str),

    /// No mounted view with this id.
    #[error("View not found: {0}")]
    ViewNotFound(ViewId),

    /// The view is a list view and has no poll identifier.
    #[error("View {0} is not a poll detail view")]
    NotADetailView(ViewId),

    /// The engine task has stopped.
    #[error("Sync engine stopped")]
    EngineStopped,
}
