//! Delivery worker: the `deliver-message` job.
//!
//! Safe to run any number of times for the same message: only the first
//! flip of `is_delivered` has side effects.

use bottle_core::error::{BottleError, Result};
use bottle_core::types::MessageId;

use crate::context::MailboxContext;
use crate::notifications::{self, delivered_subject};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// This call flipped the message to delivered.
    Delivered,
    /// Someone (usually the sweeper) got there first.
    AlreadyDelivered,
    /// Gone or never scheduled; expected after a cancellation.
    Missing,
}

pub fn delivered_body(sender_email: &str) -> String {
    format!("You have a new message from {sender_email}. Open your Bottlemail inbox to read it.")
}

pub async fn deliver(
    ctx: &MailboxContext,
    message_id: MessageId,
    sender_email: &str,
    recipient_email: &str,
) -> Result<DeliveryOutcome> {
    if ctx.db.mark_delivered(message_id)? {
        tracing::info!("📬 Message {message_id} delivered to {recipient_email}");
        if !ctx.config.silent {
            notifications::enqueue(
                ctx,
                sender_email,
                recipient_email,
                &delivered_subject(sender_email),
                &delivered_body(sender_email),
            )
            .await;
        }
        return Ok(DeliveryOutcome::Delivered);
    }

    match ctx.db.get_message(message_id)? {
        Some(msg) if msg.is_delivered => {
            tracing::debug!("Message {message_id} already delivered, nothing to do");
            Ok(DeliveryOutcome::AlreadyDelivered)
        }
        // The row changed under the job: log and move on, never retry.
        Some(msg) => Ok(vanished(BottleError::Inconsistency(format!(
            "message {message_id} is {} and cannot be delivered",
            msg.state()
        )))),
        None => Ok(vanished(BottleError::Inconsistency(format!(
            "message {message_id} no longer exists (cancelled?)"
        )))),
    }
}

fn vanished(reason: BottleError) -> DeliveryOutcome {
    tracing::warn!("⚠️ {reason}");
    DeliveryOutcome::Missing
}
