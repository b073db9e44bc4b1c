//! Mail queue state machine.
//!
//! One [`QueueEntry`] per (campaign, recipient). Entries are claimed through
//! the processing-flag lock, pushed back with exponential backoff on transient
//! failures, and finalized as sent or errored. Terminal outcomes append exactly
//! one audit event to the campaign.
//!
//! All persistence goes through the injected [`Repository`]; nothing here holds
//! process-wide state.

pub mod backoff;
pub mod error;
pub mod machine;
pub mod model;
pub mod repository;
pub mod scanner;

#[cfg(test)]
mod testing;

pub use backoff::{BackoffPolicy, MAX_SEND_ATTEMPTS};
pub use error::QueueError;
pub use machine::MailQueue;
pub use model::{
    AuditEvent, AuditTag, Campaign, NewAuditEvent, OutboundMessage, QueueEntry, RecipientResult,
    ResultStatus, Template,
};
pub use repository::{InMemoryRepository, Repository, RepositoryError};
