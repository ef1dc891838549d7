//! Domain types: messages, users and the read models handed to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type MessageId = i64;
pub type UserId = i64;

/// A message in any lifecycle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: MessageId,
    pub text: String,
    /// Attachment reference; empty string means none.
    pub media: String,
    pub sender: UserId,
    /// Unset while still a draft without recipient.
    pub recipient: Option<UserId>,
    /// Requested delivery time; unset for drafts.
    pub delivery_date: Option<DateTime<Utc>>,
    pub is_draft: bool,
    pub is_delivered: bool,
    pub is_read: bool,
    pub is_deleted: bool,
}

/// Lifecycle state derived from the message flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageState {
    Draft,
    Pending,
    Delivered,
    Read,
    Deleted,
}

impl Message {
    pub fn state(&self) -> MessageState {
        if self.is_draft {
            MessageState::Draft
        } else if self.is_deleted {
            MessageState::Deleted
        } else if self.is_read {
            MessageState::Read
        } else if self.is_delivered {
            MessageState::Delivered
        } else {
            MessageState::Pending
        }
    }
}

impl std::fmt::Display for MessageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageState::Draft => write!(f, "draft"),
            MessageState::Pending => write!(f, "pending"),
            MessageState::Delivered => write!(f, "delivered"),
            MessageState::Read => write!(f, "read"),
            MessageState::Deleted => write!(f, "deleted"),
        }
    }
}

/// The user fields the mailbox touches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub firstname: String,
    pub lastname: String,
    /// Points ledger balance.
    pub points: i64,
    pub is_active: bool,
}

impl User {
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id,
            email: self.email.clone(),
            firstname: self.firstname.clone(),
            lastname: self.lastname.clone(),
        }
    }
}

/// Public view of a user (no ledger, no status).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub email: String,
    pub firstname: String,
    pub lastname: String,
}

/// One row of a mailbox listing.
///
/// `counterpart` is the sender for received messages and the recipient for
/// sent messages and drafts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSummary {
    pub id_message: MessageId,
    pub text: String,
    pub media: String,
    pub counterpart: Option<UserProfile>,
    pub delivery_date: Option<DateTime<Utc>>,
    pub is_delivered: bool,
    pub is_read: bool,
}

impl MessageSummary {
    pub fn new(message: &Message, counterpart: Option<UserProfile>) -> Self {
        Self {
            id_message: message.message_id,
            text: message.text.clone(),
            media: message.media.clone(),
            counterpart,
            delivery_date: message.delivery_date,
            is_delivered: message.is_delivered,
            is_read: message.is_read,
        }
    }
}

/// A single message with both parties resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDetail {
    pub message: Message,
    pub state: MessageState,
    pub sender: Option<UserProfile>,
    pub recipient: Option<UserProfile>,
}

/// Calendar entry for one sent message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayEntry {
    #[serde(flatten)]
    pub summary: MessageSummary,
    /// Delivery time still ahead.
    pub future: bool,
    /// Still withdrawable through cancellation.
    pub can_cancel: bool,
}
