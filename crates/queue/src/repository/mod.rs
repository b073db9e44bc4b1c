//! Storage seam of the mail queue.
//!
//! The queue only needs the operations below. Implementations decide how they
//! persist; the contract they must honor is documented per method.

mod in_memory;

use std::sync::Arc;

use chrono::{DateTime, Utc};

use postroom_core::{CampaignId, EntryId, RecipientId};

use crate::model::{AuditEvent, NewAuditEvent, QueueEntry, RecipientResult};

pub use in_memory::InMemoryRepository;

/// Storage failure. Surfaced unchanged to the caller as
/// [`crate::QueueError::Storage`].
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl RepositoryError {
    pub fn entry_not_found(id: EntryId) -> Self {
        Self::NotFound(format!("queue entry {id}"))
    }
}

/// Persistence operations consumed by the queue.
pub trait Repository: Send + Sync {
    /// Store a freshly generated entry.
    ///
    /// Idempotent per recipient: when an entry for `entry.rid` already exists it
    /// is returned unchanged and `entry` is discarded.
    fn insert_entry(&self, entry: QueueEntry) -> Result<QueueEntry, RepositoryError>;

    fn get_entry(&self, id: EntryId) -> Result<Option<QueueEntry>, RepositoryError>;

    /// Entries with `send_date <= as_of`, not processing, and not finalized.
    /// Order is unspecified.
    fn find_due(&self, as_of: DateTime<Utc>) -> Result<Vec<QueueEntry>, RepositoryError>;

    /// Every entry of a campaign. Order is unspecified.
    fn find_by_campaign(&self, campaign_id: CampaignId)
    -> Result<Vec<QueueEntry>, RepositoryError>;

    /// Atomic compare-and-set of the processing flag.
    ///
    /// Sets the flag to `desired` only if it currently equals `expected`, in a
    /// single storage operation. Returns whether the swap happened.
    fn set_processing(
        &self,
        id: EntryId,
        desired: bool,
        expected: bool,
    ) -> Result<bool, RepositoryError>;

    /// Persist every mutable field of `entry` and, in the same critical
    /// section, mirror its status and send date onto the recipient result
    /// when one exists.
    fn update_entry(&self, entry: &QueueEntry) -> Result<(), RepositoryError>;

    /// Insert or replace a recipient result.
    fn upsert_result(&self, result: RecipientResult) -> Result<(), RepositoryError>;

    fn get_result(&self, rid: &RecipientId) -> Result<Option<RecipientResult>, RepositoryError>;

    /// Persist a terminal transition: `entry` exactly as `update_entry` would,
    /// plus its audit event, in one critical section. Either both are stored
    /// or neither is. Assigns the event id; events are never mutated.
    fn finalize_entry(
        &self,
        entry: &QueueEntry,
        event: NewAuditEvent,
    ) -> Result<AuditEvent, RepositoryError>;

    /// Campaign events in append order.
    fn events_for_campaign(&self, campaign_id: CampaignId)
    -> Result<Vec<AuditEvent>, RepositoryError>;

    /// Clear the processing flag on every entry, regardless of holder.
    /// Returns how many flags were cleared.
    fn release_all_processing_flags(&self) -> Result<usize, RepositoryError>;
}

impl<R: Repository + ?Sized> Repository for Arc<R> {
    fn insert_entry(&self, entry: QueueEntry) -> Result<QueueEntry, RepositoryError> {
        (**self).insert_entry(entry)
    }

    fn get_entry(&self, id: EntryId) -> Result<Option<QueueEntry>, RepositoryError> {
        (**self).get_entry(id)
    }

    fn find_due(&self, as_of: DateTime<Utc>) -> Result<Vec<QueueEntry>, RepositoryError> {
        (**self).find_due(as_of)
    }

    fn find_by_campaign(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Vec<QueueEntry>, RepositoryError> {
        (**self).find_by_campaign(campaign_id)
    }

    fn set_processing(
        &self,
        id: EntryId,
        desired: bool,
        expected: bool,
    ) -> Result<bool, RepositoryError> {
        (**self).set_processing(id, desired, expected)
    }

    fn update_entry(&self, entry: &QueueEntry) -> Result<(), RepositoryError> {
        (**self).update_entry(entry)
    }

    fn upsert_result(&self, result: RecipientResult) -> Result<(), RepositoryError> {
        (**self).upsert_result(result)
    }

    fn get_result(&self, rid: &RecipientId) -> Result<Option<RecipientResult>, RepositoryError> {
        (**self).get_result(rid)
    }

    fn finalize_entry(
        &self,
        entry: &QueueEntry,
        event: NewAuditEvent,
    ) -> Result<AuditEvent, RepositoryError> {
        (**self).finalize_entry(entry, event)
    }

    fn events_for_campaign(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Vec<AuditEvent>, RepositoryError> {
        (**self).events_for_campaign(campaign_id)
    }

    fn release_all_processing_flags(&self) -> Result<usize, RepositoryError> {
        (**self).release_all_processing_flags()
    }
}
