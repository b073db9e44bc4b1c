//! `postroom-core`: foundation building blocks for the mail queue.
//!
//! Identifiers, the domain error type, and the injectable clock. No storage or
//! delivery concerns live here.

pub mod clock;
pub mod entity;
pub mod error;
pub mod id;

pub use clock::{Clock, FixedClock, SystemClock};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{CampaignId, EntryId, EventId, RecipientId, UserId};
