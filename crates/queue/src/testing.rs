//! Repository double that fails on demand.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};

use postroom_core::{CampaignId, EntryId, RecipientId};

use crate::model::{AuditEvent, NewAuditEvent, QueueEntry, RecipientResult};
use crate::repository::{InMemoryRepository, Repository, RepositoryError};

/// Delegates to an in-memory repository. `fail_writes` fails every write,
/// `fail_finalize` only terminal transitions, and `locks_left` is how many
/// more lock acquisitions succeed. Failures happen before delegating, so a
/// failed call never commits anything.
pub(crate) struct FlakyRepository {
    inner: InMemoryRepository,
    pub fail_writes: AtomicBool,
    pub fail_finalize: AtomicBool,
    pub locks_left: AtomicUsize,
}

impl Default for FlakyRepository {
    fn default() -> Self {
        Self {
            inner: InMemoryRepository::new(),
            fail_writes: AtomicBool::new(false),
            fail_finalize: AtomicBool::new(false),
            locks_left: AtomicUsize::new(usize::MAX),
        }
    }
}

pub(crate) fn disk_full() -> RepositoryError {
    RepositoryError::Storage("disk full".to_string())
}

impl FlakyRepository {
    fn check(&self) -> Result<(), RepositoryError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(disk_full())
        } else {
            Ok(())
        }
    }

    fn take_lock(&self) -> Result<(), RepositoryError> {
        self.locks_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .map(|_| ())
            .map_err(|_| disk_full())
    }
}

impl Repository for FlakyRepository {
    fn insert_entry(&self, entry: QueueEntry) -> Result<QueueEntry, RepositoryError> {
        self.check()?;
        self.inner.insert_entry(entry)
    }
    fn get_entry(&self, id: EntryId) -> Result<Option<QueueEntry>, RepositoryError> {
        self.inner.get_entry(id)
    }
    fn find_due(&self, as_of: DateTime<Utc>) -> Result<Vec<QueueEntry>, RepositoryError> {
        self.inner.find_due(as_of)
    }
    fn find_by_campaign(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Vec<QueueEntry>, RepositoryError> {
        self.inner.find_by_campaign(campaign_id)
    }
    fn set_processing(
        &self,
        id: EntryId,
        desired: bool,
        expected: bool,
    ) -> Result<bool, RepositoryError> {
        self.check()?;
        if desired {
            self.take_lock()?;
        }
        self.inner.set_processing(id, desired, expected)
    }
    fn update_entry(&self, entry: &QueueEntry) -> Result<(), RepositoryError> {
        self.check()?;
        self.inner.update_entry(entry)
    }
    fn finalize_entry(
        &self,
        entry: &QueueEntry,
        event: NewAuditEvent,
    ) -> Result<AuditEvent, RepositoryError> {
        self.check()?;
        if self.fail_finalize.load(Ordering::SeqCst) {
            return Err(disk_full());
        }
        self.inner.finalize_entry(entry, event)
    }
    fn upsert_result(&self, result: RecipientResult) -> Result<(), RepositoryError> {
        self.check()?;
        self.inner.upsert_result(result)
    }
    fn get_result(&self, rid: &RecipientId) -> Result<Option<RecipientResult>, RepositoryError> {
        self.inner.get_result(rid)
    }
    fn events_for_campaign(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Vec<AuditEvent>, RepositoryError> {
        self.inner.events_for_campaign(campaign_id)
    }
    fn release_all_processing_flags(&self) -> Result<usize, RepositoryError> {
        self.check()?;
        self.inner.release_all_processing_flags()
    }
}
