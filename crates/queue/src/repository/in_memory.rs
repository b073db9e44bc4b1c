use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use postroom_core::{CampaignId, Entity, EntryId, EventId, RecipientId};

use super::{Repository, RepositoryError};
use crate::model::{AuditEvent, NewAuditEvent, QueueEntry, RecipientResult};

#[derive(Debug, Default)]
struct Tables {
    entries: HashMap<EntryId, QueueEntry>,
    by_rid: HashMap<RecipientId, EntryId>,
    results: HashMap<RecipientId, RecipientResult>,
    events: Vec<AuditEvent>,
}

impl Tables {
    fn update(&mut self, entry: &QueueEntry) -> Result<(), RepositoryError> {
        let stored = self
            .entries
            .get_mut(&entry.id)
            .ok_or_else(|| RepositoryError::entry_not_found(entry.id))?;
        *stored = entry.clone();

        if let Some(result) = self.results.get_mut(&entry.rid) {
            result.status = entry.status;
            result.send_date = entry.send_date;
        }
        Ok(())
    }
}

/// In-memory repository for tests/dev.
///
/// All tables sit behind one lock, so `set_processing` is a true
/// compare-and-set, `update_entry` changes entry and result together, and
/// `finalize_entry` adds the audit event in the same write.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    tables: RwLock<Tables>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, RepositoryError> {
        self.tables
            .read()
            .map_err(|_| RepositoryError::Storage("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, RepositoryError> {
        self.tables
            .write()
            .map_err(|_| RepositoryError::Storage("lock poisoned".to_string()))
    }
}

impl Repository for InMemoryRepository {
    fn insert_entry(&self, entry: QueueEntry) -> Result<QueueEntry, RepositoryError> {
        let mut tables = self.write()?;

        if let Some(existing) = tables.by_rid.get(&entry.rid) {
            if let Some(existing) = tables.entries.get(existing) {
                return Ok(existing.clone());
            }
        }
        if tables.entries.contains_key(&entry.id) {
            return Err(RepositoryError::AlreadyExists(format!(
                "queue entry {}",
                entry.id
            )));
        }

        tables.by_rid.insert(entry.rid.clone(), entry.id);
        tables.entries.insert(*entry.id(), entry.clone());
        Ok(entry)
    }

    fn get_entry(&self, id: EntryId) -> Result<Option<QueueEntry>, RepositoryError> {
        Ok(self.read()?.entries.get(&id).cloned())
    }

    fn find_due(&self, as_of: DateTime<Utc>) -> Result<Vec<QueueEntry>, RepositoryError> {
        let tables = self.read()?;
        Ok(tables
            .entries
            .values()
            .filter(|e| e.is_due(as_of))
            .cloned()
            .collect())
    }

    fn find_by_campaign(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Vec<QueueEntry>, RepositoryError> {
        let tables = self.read()?;
        Ok(tables
            .entries
            .values()
            .filter(|e| e.campaign_id == campaign_id)
            .cloned()
            .collect())
    }

    fn set_processing(
        &self,
        id: EntryId,
        desired: bool,
        expected: bool,
    ) -> Result<bool, RepositoryError> {
        let mut tables = self.write()?;
        let entry = tables
            .entries
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::entry_not_found(id))?;

        if entry.processing != expected {
            return Ok(false);
        }
        entry.processing = desired;
        Ok(true)
    }

    fn update_entry(&self, entry: &QueueEntry) -> Result<(), RepositoryError> {
        self.write()?.update(entry)
    }

    fn finalize_entry(
        &self,
        entry: &QueueEntry,
        event: NewAuditEvent,
    ) -> Result<AuditEvent, RepositoryError> {
        let mut tables = self.write()?;
        tables.update(entry)?;

        let stored = AuditEvent::from_new(EventId::new(), event);
        tables.events.push(stored.clone());
        Ok(stored)
    }

    fn upsert_result(&self, result: RecipientResult) -> Result<(), RepositoryError> {
        self.write()?.results.insert(result.id().clone(), result);
        Ok(())
    }

    fn get_result(&self, rid: &RecipientId) -> Result<Option<RecipientResult>, RepositoryError> {
        Ok(self.read()?.results.get(rid).cloned())
    }

    fn events_for_campaign(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Vec<AuditEvent>, RepositoryError> {
        let tables = self.read()?;
        Ok(tables
            .events
            .iter()
            .filter(|e| e.campaign_id == campaign_id)
            .cloned()
            .collect())
    }

    fn release_all_processing_flags(&self) -> Result<usize, RepositoryError> {
        let mut tables = self.write()?;
        let mut released = 0;
        for entry in tables.entries.values_mut().filter(|e| e.processing) {
            entry.processing = false;
            released += 1;
        }
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AuditTag, Campaign, ResultStatus, Template};
    use chrono::Duration;
    use postroom_core::UserId;
    use postroom_templates::{PlaceholderRenderer, RecipientDetails, TemplateFields};

    fn campaign() -> Campaign {
        let user_id = UserId::new();
        let template = Template::new("t", user_id, TemplateFields::new("s", "t", "h"));
        Campaign::new(user_id, "c", "http://localhost/", template, Utc::now())
    }

    fn entry_for(campaign: &Campaign, email: &str) -> (RecipientResult, QueueEntry) {
        let result = RecipientResult::new(campaign, RecipientDetails::new(email));
        let entry = QueueEntry::generate(campaign, &result, &PlaceholderRenderer).unwrap();
        (result, entry)
    }

    #[test]
    fn insert_is_idempotent_per_recipient() {
        let repo = InMemoryRepository::new();
        let campaign = campaign();
        let (result, first) = entry_for(&campaign, "a@b.com");

        let stored = repo.insert_entry(first.clone()).unwrap();
        assert_eq!(stored, first);

        let again = QueueEntry::generate(&campaign, &result, &PlaceholderRenderer).unwrap();
        assert_ne!(again.id, first.id);
        let stored = repo.insert_entry(again).unwrap();

        assert_eq!(stored.id, first.id);
        assert_eq!(repo.find_by_campaign(campaign.id).unwrap().len(), 1);
    }

    #[test]
    fn compare_and_set_only_swaps_on_expected_value() {
        let repo = InMemoryRepository::new();
        let campaign = campaign();
        let (_, entry) = entry_for(&campaign, "a@b.com");
        repo.insert_entry(entry.clone()).unwrap();

        assert!(repo.set_processing(entry.id, true, false).unwrap());
        assert!(!repo.set_processing(entry.id, true, false).unwrap());
        assert!(repo.get_entry(entry.id).unwrap().unwrap().processing);

        assert!(repo.set_processing(entry.id, false, true).unwrap());
        assert!(!repo.get_entry(entry.id).unwrap().unwrap().processing);

        assert!(matches!(
            repo.set_processing(EntryId::new(), true, false),
            Err(RepositoryError::NotFound(_))
        ));
    }

    #[test]
    fn update_mirrors_status_onto_result() {
        let repo = InMemoryRepository::new();
        let campaign = campaign();
        let (result, mut entry) = entry_for(&campaign, "a@b.com");
        repo.upsert_result(result.clone()).unwrap();
        repo.insert_entry(entry.clone()).unwrap();

        entry.status = ResultStatus::Retry;
        entry.send_date += Duration::minutes(2);
        entry.send_attempt = 1;
        repo.update_entry(&entry).unwrap();

        let stored = repo.get_result(&result.rid).unwrap().unwrap();
        assert_eq!(stored.status, ResultStatus::Retry);
        assert_eq!(stored.send_date, entry.send_date);
        assert_eq!(repo.get_entry(entry.id).unwrap().unwrap(), entry);
    }

    #[test]
    fn update_of_unknown_entry_fails() {
        let repo = InMemoryRepository::new();
        let campaign = campaign();
        let (_, entry) = entry_for(&campaign, "a@b.com");

        assert!(matches!(
            repo.update_entry(&entry),
            Err(RepositoryError::NotFound(_))
        ));
    }

    #[test]
    fn find_due_skips_locked_future_and_finalized() {
        let repo = InMemoryRepository::new();
        let campaign = campaign();
        let now = campaign.launch_date;

        let (_, due) = entry_for(&campaign, "due@b.com");
        let (_, mut locked) = entry_for(&campaign, "locked@b.com");
        let (_, mut future) = entry_for(&campaign, "future@b.com");
        let (_, mut sent) = entry_for(&campaign, "sent@b.com");
        locked.processing = true;
        future.send_date = now + Duration::minutes(5);
        sent.status = ResultStatus::Sent;

        for e in [&due, &locked, &future, &sent] {
            repo.insert_entry(e.clone()).unwrap();
        }

        let found = repo.find_due(now).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, due.id);
    }

    #[test]
    fn release_all_clears_every_flag() {
        let repo = InMemoryRepository::new();
        let campaign = campaign();
        for email in ["a@b.com", "c@d.com", "e@f.com"] {
            let (_, mut entry) = entry_for(&campaign, email);
            entry.processing = email != "e@f.com";
            repo.insert_entry(entry).unwrap();
        }

        assert_eq!(repo.release_all_processing_flags().unwrap(), 2);
        assert!(
            repo.find_by_campaign(campaign.id)
                .unwrap()
                .iter()
                .all(|e| !e.processing)
        );
    }

    fn finalized(
        entry: &QueueEntry,
        status: ResultStatus,
        tag: AuditTag,
    ) -> (QueueEntry, NewAuditEvent) {
        let mut next = entry.clone();
        next.status = status;
        next.processing = false;
        let event = NewAuditEvent {
            campaign_id: entry.campaign_id,
            email: entry.email.clone(),
            tag,
            details: None,
            time: Utc::now(),
        };
        (next, event)
    }

    #[test]
    fn events_are_scoped_and_ordered() {
        let repo = InMemoryRepository::new();
        let a = campaign();
        let b = campaign();

        for (campaign, email, status, tag) in [
            (&a, "x@y.com", ResultStatus::Sent, AuditTag::Sent),
            (&b, "x@y.com", ResultStatus::Sent, AuditTag::Sent),
            (&a, "z@y.com", ResultStatus::Error, AuditTag::SendingError),
        ] {
            let (_, entry) = entry_for(campaign, email);
            repo.insert_entry(entry.clone()).unwrap();
            let (next, event) = finalized(&entry, status, tag);
            repo.finalize_entry(&next, event).unwrap();
        }

        let events = repo.events_for_campaign(a.id).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].tag, AuditTag::Sent);
        assert_eq!(events[1].tag, AuditTag::SendingError);
        assert_ne!(events[0].id, events[1].id);
    }

    #[test]
    fn finalize_writes_entry_result_and_event_together() {
        let repo = InMemoryRepository::new();
        let campaign = campaign();
        let (result, mut entry) = entry_for(&campaign, "a@b.com");
        repo.upsert_result(result.clone()).unwrap();
        repo.insert_entry(entry.clone()).unwrap();
        entry.processing = true;
        repo.update_entry(&entry).unwrap();

        let (next, event) = finalized(&entry, ResultStatus::Sent, AuditTag::Sent);
        let stored_event = repo.finalize_entry(&next, event).unwrap();

        assert_eq!(repo.get_entry(entry.id).unwrap().unwrap(), next);
        assert_eq!(
            repo.get_result(&result.rid).unwrap().unwrap().status,
            ResultStatus::Sent
        );
        assert_eq!(repo.events_for_campaign(campaign.id).unwrap(), vec![stored_event]);
    }

    #[test]
    fn finalize_of_unknown_entry_appends_nothing() {
        let repo = InMemoryRepository::new();
        let campaign = campaign();
        let (_, entry) = entry_for(&campaign, "a@b.com");
        let (next, event) = finalized(&entry, ResultStatus::Error, AuditTag::SendingError);

        assert!(matches!(
            repo.finalize_entry(&next, event),
            Err(RepositoryError::NotFound(_))
        ));
        assert!(repo.events_for_campaign(campaign.id).unwrap().is_empty());
    }
}
