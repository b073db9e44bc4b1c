//! Plain data records: campaigns, recipient results, queue entries, audit
//! events. No persistence methods live here; see [`crate::repository`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use postroom_core::{
    CampaignId, DomainError, DomainResult, Entity, EntryId, EventId, RecipientId, UserId,
};
use postroom_templates::{RecipientDetails, RenderContext, RenderError, Renderer, TemplateFields};

/// Per-recipient delivery status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    /// Campaign created, entry not yet generated.
    Scheduled,
    /// Entry generated, waiting for its first attempt.
    Queued,
    /// A transient failure pushed the entry back.
    Retry,
    Sent,
    Error,
}

impl ResultStatus {
    /// Sent and Error end the entry's life; the scanner never returns them.
    pub fn is_terminal(self) -> bool {
        matches!(self, ResultStatus::Sent | ResultStatus::Error)
    }
}

/// Message tag of an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditTag {
    #[serde(rename = "sent")]
    Sent,
    #[serde(rename = "sending error")]
    SendingError,
}

impl AuditTag {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditTag::Sent => "sent",
            AuditTag::SendingError => "sending error",
        }
    }
}

impl core::fmt::Display for AuditTag {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message template owned by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    pub user_id: UserId,
    pub fields: TemplateFields,
}

impl Template {
    pub fn new(name: impl Into<String>, user_id: UserId, fields: TemplateFields) -> Self {
        Self {
            name: name.into(),
            user_id,
            fields,
        }
    }
}

/// The campaign-level inputs of entry generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub user_id: UserId,
    pub name: String,
    pub launch_date: DateTime<Utc>,
    /// Base URL; may contain recipient placeholders such as `{{.Email}}`.
    pub url: String,
    pub from_address: String,
    pub template: Template,
}

impl Campaign {
    pub fn new(
        user_id: UserId,
        name: impl Into<String>,
        url: impl Into<String>,
        template: Template,
        launch_date: DateTime<Utc>,
    ) -> Self {
        Self {
            id: CampaignId::new(),
            user_id,
            name: name.into(),
            launch_date,
            url: url.into(),
            from_address: String::new(),
            template,
        }
    }

    pub fn with_from(mut self, from_address: impl Into<String>) -> Self {
        self.from_address = from_address.into();
        self
    }

    /// Checks required before any entry is generated.
    pub fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("campaign name not specified"));
        }
        if self.url.trim().is_empty() {
            return Err(DomainError::validation("campaign url not specified"));
        }
        if self.template.user_id != self.user_id {
            return Err(DomainError::validation(
                "template belongs to a different user",
            ));
        }
        Ok(())
    }
}

/// Per-recipient delivery record, mirrored by the recipient's queue entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientResult {
    pub rid: RecipientId,
    pub campaign_id: CampaignId,
    pub user_id: UserId,
    pub recipient: RecipientDetails,
    pub status: ResultStatus,
    pub send_date: DateTime<Utc>,
}

impl RecipientResult {
    /// A scheduled result with a fresh tracking id.
    pub fn new(campaign: &Campaign, recipient: RecipientDetails) -> Self {
        Self {
            rid: RecipientId::generate(),
            campaign_id: campaign.id,
            user_id: campaign.user_id,
            recipient,
            status: ResultStatus::Scheduled,
            send_date: campaign.launch_date,
        }
    }
}

impl Entity for RecipientResult {
    type Id = RecipientId;

    fn id(&self) -> &Self::Id {
        &self.rid
    }
}

/// One outbound message for one recipient of one campaign.
///
/// Rendered copies of the template are captured at generation time; later
/// template edits never reach an existing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: EntryId,
    pub rid: RecipientId,
    pub campaign_id: CampaignId,
    pub user_id: UserId,
    pub email: String,
    pub send_date: DateTime<Utc>,
    pub send_attempt: u32,
    pub processing: bool,
    pub status: ResultStatus,
    pub from: String,
    pub to: String,
    pub content: TemplateFields,
}

impl QueueEntry {
    /// Build the entry for `result`, rendering with `renderer`.
    ///
    /// Starts at the campaign launch date with zero attempts and no lock.
    pub fn generate(
        campaign: &Campaign,
        result: &RecipientResult,
        renderer: &dyn Renderer,
    ) -> Result<Self, RenderError> {
        let ctx = RenderContext::new(&campaign.url, result.rid.clone(), result.recipient.clone())
            .with_from(&campaign.from_address);

        let content = renderer.render(&campaign.template.fields, &ctx)?;
        let from = renderer.render_str(&campaign.from_address, &ctx)?;

        Ok(Self {
            id: EntryId::new(),
            rid: result.rid.clone(),
            campaign_id: campaign.id,
            user_id: campaign.user_id,
            email: result.recipient.email.clone(),
            send_date: campaign.launch_date,
            send_attempt: 0,
            processing: false,
            status: ResultStatus::Queued,
            from,
            to: format_address(&result.recipient),
            content,
        })
    }

    pub fn is_due(&self, as_of: DateTime<Utc>) -> bool {
        !self.processing && !self.status.is_terminal() && self.send_date <= as_of
    }

    /// Transport-facing view of the stored copies.
    pub fn message(&self) -> OutboundMessage {
        OutboundMessage {
            rid: self.rid.clone(),
            from: self.from.clone(),
            to: self.to.clone(),
            subject: self.content.subject.clone(),
            text: self.content.text.clone(),
            html: self.content.html.clone(),
        }
    }
}

impl Entity for QueueEntry {
    type Id = EntryId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// `First Last <email>`, or the bare address when no name is known.
fn format_address(recipient: &RecipientDetails) -> String {
    let name = format!("{} {}", recipient.first_name, recipient.last_name);
    let name = name.trim();
    if name.is_empty() {
        recipient.email.clone()
    } else {
        format!("{name} <{}>", recipient.email)
    }
}

/// What a transport needs to hand one message to a relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub rid: RecipientId,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

/// Audit event before the repository assigns id and time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAuditEvent {
    pub campaign_id: CampaignId,
    pub email: String,
    pub tag: AuditTag,
    pub details: Option<serde_json::Value>,
    pub time: DateTime<Utc>,
}

/// Append-only record of a terminal outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: EventId,
    pub campaign_id: CampaignId,
    pub email: String,
    pub tag: AuditTag,
    pub details: Option<serde_json::Value>,
    pub time: DateTime<Utc>,
}

impl AuditEvent {
    pub fn from_new(id: EventId, event: NewAuditEvent) -> Self {
        Self {
            id,
            campaign_id: event.campaign_id,
            email: event.email,
            tag: event.tag,
            details: event.details,
            time: event.time,
        }
    }
}

impl Entity for AuditEvent {
    type Id = EventId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
