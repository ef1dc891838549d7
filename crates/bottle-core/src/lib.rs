//! # Bottlemail Core
//!
//! Shared building blocks for the deferred-delivery mailbox:
//! configuration, the error taxonomy, domain types and trait seams.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::BottleConfig;
pub use error::{BottleError, Result};
pub use traits::MailTransport;
pub use types::{
    DayEntry, Message, MessageDetail, MessageId, MessageState, MessageSummary, User, UserId,
    UserProfile,
};
