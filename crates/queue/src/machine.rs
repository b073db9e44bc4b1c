//! Queue entry state machine: generation, locking, backoff, finalization.
//!
//! ```text
//!   enqueue ──► Queued ──lock──► (processing) ──backoff──► Retry ──lock──► ...
//!                                    │
//!                                    ├──success──► Sent   (+ "sent" event)
//!                                    └──error────► Error  (+ "sending error" event)
//! ```
//!
//! Every transition is persisted through the repository before the caller's
//! in-memory copy is touched, so a storage failure leaves that copy as it was.
//! Backoff and finalization clear the lock in the same update; callers never
//! unlock after them. Finalization stores the terminal status and its audit
//! event in one repository call, so neither is ever visible without the other.

use std::fmt::Display;
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info, warn};

use postroom_core::{Clock, SystemClock};
use postroom_templates::{PlaceholderRenderer, Renderer};

use crate::backoff::BackoffPolicy;
use crate::error::QueueError;
use crate::model::{
    AuditEvent, AuditTag, Campaign, NewAuditEvent, QueueEntry, RecipientResult, ResultStatus,
};
use crate::repository::Repository;

/// Mail queue over an injected repository and clock.
///
/// Locking is strict: a lock held by anyone (including the caller) makes
/// [`MailQueue::lock`] fail with [`QueueError::AlreadyLocked`].
pub struct MailQueue<R, C = SystemClock> {
    repo: R,
    clock: C,
    policy: BackoffPolicy,
    renderer: Arc<dyn Renderer>,
}

impl<R: Repository> MailQueue<R> {
    pub fn new(repo: R) -> Self {
        Self {
            repo,
            clock: SystemClock,
            policy: BackoffPolicy::default(),
            renderer: Arc::new(PlaceholderRenderer),
        }
    }
}

impl<R: Repository, C: Clock> MailQueue<R, C> {
    pub fn with_clock<C2: Clock>(self, clock: C2) -> MailQueue<R, C2> {
        MailQueue {
            repo: self.repo,
            clock,
            policy: self.policy,
            renderer: self.renderer,
        }
    }

    pub fn with_policy(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn policy(&self) -> BackoffPolicy {
        self.policy
    }

    /// Generate and store the entry for one recipient.
    ///
    /// Idempotent per recipient id: a second call returns the stored entry.
    /// The result is marked `Queued` at the campaign launch date.
    pub fn enqueue(
        &self,
        campaign: &Campaign,
        result: &RecipientResult,
    ) -> Result<QueueEntry, QueueError> {
        let entry = QueueEntry::generate(campaign, result, self.renderer.as_ref())?;
        self.store_generated(result, entry)
    }

    /// Enqueue every recipient of a campaign.
    ///
    /// Renders all entries before storing any, so a render failure leaves no
    /// partial launch behind.
    pub fn launch(
        &self,
        campaign: &Campaign,
        results: &[RecipientResult],
    ) -> Result<Vec<QueueEntry>, QueueError> {
        campaign.validate()?;

        let generated = results
            .iter()
            .map(|r| QueueEntry::generate(campaign, r, self.renderer.as_ref()).map(|e| (r, e)))
            .collect::<Result<Vec<_>, _>>()?;

        let entries = generated
            .into_iter()
            .map(|(result, entry)| self.store_generated(result, entry))
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            campaign_id = %campaign.id,
            recipients = entries.len(),
            "campaign launched"
        );
        Ok(entries)
    }

    fn store_generated(
        &self,
        result: &RecipientResult,
        entry: QueueEntry,
    ) -> Result<QueueEntry, QueueError> {
        let stored = self.repo.insert_entry(entry)?;
        if stored.status == ResultStatus::Queued && stored.send_attempt == 0 {
            let mut result = result.clone();
            result.status = ResultStatus::Queued;
            result.send_date = stored.send_date;
            self.repo.upsert_result(result)?;
        }
        debug!(entry_id = %stored.id, rid = %stored.rid, "queue entry stored");
        Ok(stored)
    }

    /// Claim exclusive processing of `entry`.
    pub fn lock(&self, entry: &mut QueueEntry) -> Result<(), QueueError> {
        if !self.repo.set_processing(entry.id, true, false)? {
            debug!(entry_id = %entry.id, "lock contended");
            return Err(QueueError::AlreadyLocked(entry.id));
        }
        entry.processing = true;
        Ok(())
    }

    /// Release the lock without changing anything else.
    ///
    /// Unlocking an entry that is not locked is a no-op.
    pub fn unlock(&self, entry: &mut QueueEntry) -> Result<(), QueueError> {
        self.repo.set_processing(entry.id, false, true)?;
        entry.processing = false;
        Ok(())
    }

    /// Push the entry back after a transient failure.
    ///
    /// Fails with `MaxAttemptsExceeded`, mutating nothing, once the budget is
    /// spent; the caller must then finalize with [`MailQueue::error`]. Emits
    /// no audit event.
    pub fn backoff(&self, entry: &mut QueueEntry, cause: impl Display) -> Result<(), QueueError> {
        self.policy.check(entry.send_attempt)?;

        let mut next = entry.clone();
        next.send_date = self.policy.next_send_date(entry.send_date, entry.send_attempt);
        next.send_attempt += 1;
        next.status = ResultStatus::Retry;
        next.processing = false;

        self.repo.update_entry(&next)?;

        warn!(
            entry_id = %next.id,
            rid = %next.rid,
            campaign_id = %next.campaign_id,
            attempt = next.send_attempt,
            next_send_date = %next.send_date,
            error = %cause,
            "delivery deferred"
        );
        *entry = next;
        Ok(())
    }

    /// Finalize as delivered.
    pub fn success(&self, entry: &mut QueueEntry) -> Result<AuditEvent, QueueError> {
        let event = self.finalize(entry, ResultStatus::Sent, AuditTag::Sent, None)?;
        info!(entry_id = %entry.id, rid = %entry.rid, "email sent");
        Ok(event)
    }

    /// Finalize as failed. `cause` is kept verbatim in the event details.
    pub fn error(
        &self,
        entry: &mut QueueEntry,
        cause: impl Display,
    ) -> Result<AuditEvent, QueueError> {
        let cause = cause.to_string();
        let details = json!({ "error": cause });
        let event = self.finalize(
            entry,
            ResultStatus::Error,
            AuditTag::SendingError,
            Some(details),
        )?;
        warn!(entry_id = %entry.id, rid = %entry.rid, error = %cause, "email failed");
        Ok(event)
    }

    fn finalize(
        &self,
        entry: &mut QueueEntry,
        status: ResultStatus,
        tag: AuditTag,
        details: Option<serde_json::Value>,
    ) -> Result<AuditEvent, QueueError> {
        let mut next = entry.clone();
        next.status = status;
        next.processing = false;

        let event = self.repo.finalize_entry(
            &next,
            NewAuditEvent {
                campaign_id: next.campaign_id,
                email: next.email.clone(),
                tag,
                details,
                time: self.clock.now(),
            },
        )?;
        *entry = next;
        Ok(event)
    }
}
