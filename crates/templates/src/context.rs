//! Inputs and outputs of a render pass.

use serde::{Deserialize, Serialize};

use postroom_core::RecipientId;

/// The three renderable parts of a message.
///
/// Used both for the raw template and for the rendered copy stored on a queue
/// entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateFields {
    pub subject: String,
    pub text: String,
    pub html: String,
}

impl TemplateFields {
    pub fn new(
        subject: impl Into<String>,
        text: impl Into<String>,
        html: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            text: text.into(),
            html: html.into(),
        }
    }
}

/// Recipient values exposed to templates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientDetails {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub position: String,
}

impl RecipientDetails {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, first: impl Into<String>, last: impl Into<String>) -> Self {
        self.first_name = first.into();
        self.last_name = last.into();
        self
    }

    pub fn with_position(mut self, position: impl Into<String>) -> Self {
        self.position = position.into();
        self
    }
}

/// Everything a single recipient's render pass needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderContext {
    /// Campaign base URL. May itself contain recipient placeholders such as
    /// `{{.Email}}`.
    pub url: String,
    pub rid: RecipientId,
    pub from: String,
    pub recipient: RecipientDetails,
}

impl RenderContext {
    pub fn new(url: impl Into<String>, rid: RecipientId, recipient: RecipientDetails) -> Self {
        Self {
            url: url.into(),
            rid,
            from: String::new(),
            recipient,
        }
    }

    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = from.into();
        self
    }
}
