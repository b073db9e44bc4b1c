//! Outbound transport seam and failure classification.

use std::sync::{Arc, Mutex};

use thiserror::Error;

use postroom_queue::OutboundMessage;

/// Relay failure as reported by a transport.
///
/// `code` is the relay's reply code when there was one; connection-level
/// failures carry none.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{}", display(.code, .message))]
pub struct TransportError {
    pub code: Option<u16>,
    pub message: String,
}

fn display(code: &Option<u16>, message: &str) -> String {
    match code {
        Some(code) => format!("{code} {message}"),
        None => message.to_string(),
    }
}

impl TransportError {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }

    /// A failure below the reply level (dial, TLS, reset).
    pub fn connection(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    /// 4xx replies and connection failures are worth retrying; anything else
    /// is final.
    pub fn is_transient(&self) -> bool {
        match self.code {
            None => true,
            Some(code) => (400..500).contains(&code),
        }
    }
}

/// Hands one rendered message to a relay.
pub trait Transport: Send + Sync {
    fn send(&self, message: &OutboundMessage) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        (**self).send(message)
    }
}

type Reply = Box<dyn Fn(&OutboundMessage) -> Result<(), TransportError> + Send + Sync>;

/// Transport that records every message and answers through a closure.
///
/// Used for dry runs and tests.
pub struct RecordingTransport {
    reply: Reply,
    sent: Mutex<Vec<OutboundMessage>>,
}

impl RecordingTransport {
    /// Accepts everything.
    pub fn accepting() -> Self {
        Self::replying(|_| Ok(()))
    }

    pub fn replying<F>(reply: F) -> Self
    where
        F: Fn(&OutboundMessage) -> Result<(), TransportError> + Send + Sync + 'static,
    {
        Self {
            reply: Box::new(reply),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Every message offered so far, failed ones included.
    pub fn messages(&self) -> Vec<OutboundMessage> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl std::fmt::Debug for RecordingTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingTransport")
            .field("messages", &self.messages().len())
            .finish()
    }
}

impl Transport for RecordingTransport {
    fn send(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message.clone());
        (self.reply)(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use postroom_core::RecipientId;

    fn message() -> OutboundMessage {
        OutboundMessage {
            rid: RecipientId::generate(),
            from: "a@b.com".to_string(),
            to: "c@d.com".to_string(),
            subject: "s".to_string(),
            text: "t".to_string(),
            html: "h".to_string(),
        }
    }

    #[test]
    fn classification_follows_reply_class() {
        assert!(TransportError::new(421, "try later").is_transient());
        assert!(TransportError::new(450, "mailbox busy").is_transient());
        assert!(TransportError::connection("connection reset").is_transient());

        assert!(!TransportError::new(550, "no such user").is_transient());
        assert!(!TransportError::new(554, "rejected").is_transient());
        assert!(!TransportError::new(250, "odd").is_transient());
    }

    #[test]
    fn display_includes_code() {
        assert_eq!(
            TransportError::new(550, "no such user").to_string(),
            "550 no such user"
        );
        assert_eq!(TransportError::connection("dial failed").to_string(), "dial failed");
    }

    #[test]
    fn recording_transport_keeps_failed_messages() {
        let transport = RecordingTransport::replying(|_| Err(TransportError::new(550, "no")));
        let m = message();

        assert!(transport.send(&m).is_err());
        assert_eq!(transport.messages(), vec![m]);
    }
}
