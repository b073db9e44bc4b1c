//! Queries over the queue: what is due, what belongs to a campaign, and the
//! startup lock reset.

use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};

use postroom_core::{CampaignId, Clock};

use crate::error::QueueError;
use crate::machine::MailQueue;
use crate::model::QueueEntry;
use crate::repository::Repository;

impl<R: Repository, C: Clock> MailQueue<R, C> {
    /// Unlocked, unfinalized entries with `send_date <= as_of`, oldest first.
    pub fn due_entries(&self, as_of: DateTime<Utc>) -> Result<Vec<QueueEntry>, QueueError> {
        let mut entries = self.repository().find_due(as_of)?;
        entries.sort_by(|a, b| a.send_date.cmp(&b.send_date).then(a.id.cmp(&b.id)));
        Ok(entries)
    }

    /// [`MailQueue::due_entries`] at the queue clock's current time.
    pub fn due_now(&self) -> Result<Vec<QueueEntry>, QueueError> {
        self.due_entries(self.clock().now())
    }

    /// Every entry of a campaign, including locked and finalized ones.
    pub fn entries_for_campaign(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Vec<QueueEntry>, QueueError> {
        let mut entries = self.repository().find_by_campaign(campaign_id)?;
        entries.sort_by(|a, b| a.send_date.cmp(&b.send_date).then(a.id.cmp(&b.id)));
        Ok(entries)
    }

    /// Clear every processing flag.
    ///
    /// Only safe when no worker is running, i.e. at startup after a crash left
    /// entries locked.
    pub fn release_all_locks(&self) -> Result<usize, QueueError> {
        let released = self.repository().release_all_processing_flags()?;
        warn!(released, "released all queue entry locks");
        Ok(released)
    }

    /// Lock up to `limit` due entries and return them locked.
    ///
    /// Entries another worker locks between the scan and the claim are
    /// skipped. On any other failure the entries claimed so far are unlocked
    /// before the error is returned, so none stay locked with no owner.
    pub fn claim_due(
        &self,
        as_of: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueueEntry>, QueueError> {
        let mut claimed = Vec::new();
        for mut entry in self.due_entries(as_of)? {
            if claimed.len() >= limit {
                break;
            }
            match self.lock(&mut entry) {
                Ok(()) => claimed.push(entry),
                Err(QueueError::AlreadyLocked(id)) => {
                    debug!(entry_id = %id, "skipping entry claimed elsewhere");
                }
                Err(e) => {
                    for mut entry in claimed {
                        if let Err(unlock) = self.unlock(&mut entry) {
                            error!(
                                entry_id = %entry.id,
                                error = %unlock,
                                "failed to release claimed entry"
                            );
                        }
                    }
                    return Err(e);
                }
            }
        }
        Ok(claimed)
    }
}
