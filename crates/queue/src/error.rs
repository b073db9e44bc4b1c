//! Queue error taxonomy.

use thiserror::Error;

use postroom_core::{DomainError, EntryId};
use postroom_templates::RenderError;

use crate::repository::RepositoryError;

/// Errors surfaced by [`crate::MailQueue`] operations.
///
/// Repository failures are passed through unchanged; the queue never retries
/// or swallows them.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error(transparent)]
    Storage(#[from] RepositoryError),

    /// Backoff requested after the attempt budget is spent. Nothing was
    /// mutated; the caller must finalize the entry as an error.
    #[error("max send attempts exceeded ({attempts}/{max})")]
    MaxAttemptsExceeded { attempts: u32, max: u32 },

    /// Another worker holds the processing lock.
    #[error("queue entry {0} is already locked")]
    AlreadyLocked(EntryId),

    #[error("render failed: {0}")]
    Render(#[from] RenderError),

    #[error(transparent)]
    Invalid(#[from] DomainError),
}
