//! Message lifecycle: the operations the web layer invokes.
//!
//! ```text
//! Draft ──send──▶ Pending ──deliver/sweep──▶ Delivered ──read──▶ Read ──delete──▶ Deleted
//!                    │
//!                    └──cancel (before delivery date, −penalty points)──▶ removed
//! ```
//!
//! Every operation takes the authenticated caller id. Request paths only
//! touch the store and enqueue tasks; they never wait on delivery or mail.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};

use bottle_core::error::{BottleError, Result};
use bottle_core::types::{
    DayEntry, Message, MessageDetail, MessageId, MessageSummary, User, UserId, UserProfile,
};
use bottle_scheduler::{Task, TaskAction};

use crate::context::MailboxContext;
use crate::db::{NewMessage, ReadTransition};
use crate::notifications::{self, READ_RECEIPT_SUBJECT};

/// The mailbox service, cheap to clone.
#[derive(Clone)]
pub struct Mailbox {
    ctx: Arc<MailboxContext>,
}

fn require_text(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(BottleError::validation("Message text cannot be empty"));
    }
    Ok(())
}

impl Mailbox {
    pub fn new(ctx: Arc<MailboxContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<MailboxContext> {
        &self.ctx
    }

    /// Resolve a caller id to an active user.
    pub fn caller(&self, user_id: UserId) -> Result<User> {
        match self.ctx.db.get_user(user_id)? {
            Some(user) if user.is_active => Ok(user),
            _ => Err(BottleError::Unauthenticated(format!(
                "No active user with id {user_id}"
            ))),
        }
    }

    fn active_user(&self, id: UserId) -> Result<User> {
        match self.ctx.db.get_user(id)? {
            Some(user) if user.is_active => Ok(user),
            _ => Err(BottleError::validation(format!("Unknown recipient {id}"))),
        }
    }

    // ── Drafts ──────────────────────────────

    /// Create a draft, or rewrite `draft_id` when given. Returns the draft id.
    pub fn create_or_update_draft(
        &self,
        sender: UserId,
        text: &str,
        recipient: Option<UserId>,
        draft_id: Option<MessageId>,
        attachment: Option<&str>,
    ) -> Result<MessageId> {
        require_text(text)?;
        if let Some(recipient) = recipient {
            self.active_user(recipient)?;
        }

        match draft_id {
            Some(id) => {
                if !self.ctx.db.update_draft(sender, id, text, recipient, attachment)? {
                    return Err(BottleError::not_found(format!("Draft {id} not found")));
                }
                tracing::debug!("📝 Draft {id} updated by user {sender}");
                Ok(id)
            }
            None => {
                let id = self.ctx.db.insert_message(&NewMessage {
                    text: text.to_string(),
                    media: attachment.unwrap_or_default().to_string(),
                    sender,
                    recipient,
                    delivery_date: None,
                    is_draft: true,
                })?;
                tracing::debug!("📝 Draft {id} created by user {sender}");
                Ok(id)
            }
        }
    }

    pub fn delete_draft(&self, sender: UserId, draft_id: MessageId) -> Result<()> {
        if !self.ctx.db.delete_draft(sender, draft_id)? {
            return Err(BottleError::not_found(format!("Draft {draft_id} not found")));
        }
        Ok(())
    }

    pub fn list_drafts(&self, user_id: UserId) -> Result<Vec<MessageSummary>> {
        let drafts = self.ctx.db.drafts_of(user_id)?;
        self.summaries(&drafts, |m| m.recipient)
    }

    // ── Sending ──────────────────────────────

    pub async fn send(
        &self,
        sender: UserId,
        recipients: &[UserId],
        text: &str,
        delivery_date: DateTime<Utc>,
        draft_id: Option<MessageId>,
        attachment: Option<&str>,
    ) -> Result<Vec<MessageId>> {
        self.send_at(sender, recipients, text, delivery_date, draft_id, attachment, Utc::now())
            .await
    }

    /// Persist one pending message per recipient and schedule its delivery.
    ///
    /// The draft, if any, becomes the first recipient's message. When the
    /// queue rejects a job the messages stay pending for the sweeper and the
    /// caller gets `BottleError::Scheduling`.
    #[allow(clippy::too_many_arguments)]
    pub async fn send_at(
        &self,
        sender: UserId,
        recipients: &[UserId],
        text: &str,
        delivery_date: DateTime<Utc>,
        draft_id: Option<MessageId>,
        attachment: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Vec<MessageId>> {
        require_text(text)?;
        if recipients.is_empty() {
            return Err(BottleError::validation("At least one recipient is required"));
        }
        if delivery_date <= now {
            return Err(BottleError::validation("Delivery date must be in the future"));
        }

        let sender_user = self
            .ctx
            .db
            .get_user(sender)?
            .ok_or_else(|| BottleError::validation(format!("Unknown sender {sender}")))?;
        let targets = recipients
            .iter()
            .map(|id| self.active_user(*id))
            .collect::<Result<Vec<_>>>()?;

        if let Some(id) = draft_id {
            let owned = self
                .ctx
                .db
                .get_message(id)?
                .is_some_and(|m| m.sender == sender && m.is_draft);
            if !owned {
                return Err(BottleError::not_found(format!("Draft {id} not found")));
            }
        }

        let mut ids = Vec::with_capacity(targets.len());
        let mut scheduling_error = None;
        for (i, recipient) in targets.iter().enumerate() {
            let id = match draft_id.filter(|_| i == 0) {
                Some(id) => {
                    if !self.ctx.db.promote_draft(
                        sender,
                        id,
                        text,
                        recipient.id,
                        &delivery_date,
                        attachment,
                    )? {
                        return Err(BottleError::not_found(format!("Draft {id} not found")));
                    }
                    id
                }
                None => self.ctx.db.insert_message(&NewMessage {
                    text: text.to_string(),
                    media: attachment.unwrap_or_default().to_string(),
                    sender,
                    recipient: Some(recipient.id),
                    delivery_date: Some(delivery_date),
                    is_draft: false,
                })?,
            };
            ids.push(id);

            if let Err(e) = self
                .schedule_delivery(id, delivery_date, &sender_user.email, &recipient.email)
                .await
            {
                tracing::error!("❌ Message {id} saved but delivery not scheduled: {e}");
                scheduling_error.get_or_insert(e);
            }
        }

        tracing::info!(
            "✉️ User {sender} sent {} message(s) for delivery at {delivery_date}",
            ids.len()
        );
        match scheduling_error {
            Some(e) => Err(e),
            None => Ok(ids),
        }
    }

    /// Submit exactly one `deliver-message` job firing at `at` (UTC).
    pub async fn schedule_delivery(
        &self,
        message_id: MessageId,
        at: DateTime<Utc>,
        sender_email: &str,
        recipient_email: &str,
    ) -> Result<String> {
        let task = Task::once(
            &format!("deliver message {message_id}"),
            at,
            TaskAction::DeliverMessage {
                message_id,
                sender_email: sender_email.to_string(),
                recipient_email: recipient_email.to_string(),
            },
        );
        let task_id = self.ctx.queue.submit(task).await?;
        tracing::debug!("⏳ Delivery of message {message_id} scheduled at {at} ({task_id})");
        Ok(task_id)
    }

    // ── Reading ──────────────────────────────

    pub fn get_received_metadata(&self, user_id: UserId) -> Result<Vec<MessageSummary>> {
        let messages = self.ctx.db.received_by(user_id)?;
        self.summaries(&messages, |m| Some(m.sender))
    }

    /// Pending and delivered messages sent by `user_id`.
    pub fn get_sent_metadata(&self, user_id: UserId) -> Result<Vec<MessageSummary>> {
        let messages = self.ctx.db.sent_by(user_id)?;
        self.summaries(&messages, |m| m.recipient)
    }

    pub fn get_received(&self, user_id: UserId, message_id: MessageId) -> Result<MessageDetail> {
        match self.ctx.db.get_message(message_id)? {
            Some(msg)
                if msg.recipient == Some(user_id)
                    && !msg.is_draft
                    && msg.is_delivered
                    && !msg.is_deleted =>
            {
                self.detail(msg)
            }
            _ => Err(BottleError::not_found(format!("Message {message_id} not found"))),
        }
    }

    pub fn get_sent(&self, user_id: UserId, message_id: MessageId) -> Result<MessageDetail> {
        match self.ctx.db.get_message(message_id)? {
            Some(msg) if msg.sender == user_id && !msg.is_draft => self.detail(msg),
            _ => Err(BottleError::not_found(format!("Message {message_id} not found"))),
        }
    }

    /// Mark a received message as read. The first read sends a receipt to
    /// the sender; later reads are no-ops.
    pub async fn mark_read(&self, user_id: UserId, message_id: MessageId) -> Result<()> {
        match self.ctx.db.mark_read(user_id, message_id)? {
            ReadTransition::NotFound => {
                Err(BottleError::not_found(format!("Message {message_id} not found")))
            }
            ReadTransition::AlreadyRead => Ok(()),
            ReadTransition::FirstRead => {
                tracing::debug!("👀 Message {message_id} read by user {user_id}");
                if !self.ctx.config.silent {
                    self.send_read_receipt(user_id, message_id).await;
                }
                Ok(())
            }
        }
    }

    async fn send_read_receipt(&self, reader: UserId, message_id: MessageId) {
        let parties = self.ctx.db.get_message(message_id).and_then(|msg| {
            let sender = msg.map(|m| m.sender);
            let sender_email = match sender {
                Some(id) => self.ctx.user_email(id)?,
                None => None,
            };
            Ok((self.ctx.user_email(reader)?, sender_email))
        });
        match parties {
            Ok((Some(reader_email), Some(sender_email))) => {
                notifications::enqueue(
                    &self.ctx,
                    &reader_email,
                    &sender_email,
                    READ_RECEIPT_SUBJECT,
                    &format!("{reader_email} has read your message."),
                )
                .await;
            }
            Ok(_) => tracing::warn!("⚠️ No read receipt for message {message_id}: unknown user"),
            Err(e) => tracing::warn!("⚠️ No read receipt for message {message_id}: {e}"),
        }
    }

    /// Discard a received message. Only messages already read qualify.
    pub fn delete(&self, user_id: UserId, message_id: MessageId) -> Result<()> {
        if !self.ctx.db.mark_deleted(user_id, message_id)? {
            return Err(BottleError::not_found(format!(
                "Message {message_id} not found or not read yet"
            )));
        }
        tracing::debug!("🗑️ Message {message_id} deleted by user {user_id}");
        Ok(())
    }

    // ── Cancellation ──────────────────────────────

    pub fn cancel_scheduled(&self, user_id: UserId, message_id: MessageId) -> bool {
        self.cancel_scheduled_at(user_id, message_id, Utc::now())
    }

    /// Withdraw a pending message before its delivery date, for a points
    /// penalty. The queued delivery job later finds nothing and no-ops.
    pub fn cancel_scheduled_at(
        &self,
        user_id: UserId,
        message_id: MessageId,
        now: DateTime<Utc>,
    ) -> bool {
        match self.ctx.db.delete_pending(user_id, message_id, &now) {
            Ok(true) => {}
            Ok(false) => return false,
            Err(e) => {
                tracing::error!("❌ Cancel of message {message_id} failed: {e}");
                return false;
            }
        }

        let penalty = self.ctx.config.cancel_penalty;
        match self.ctx.db.add_points(user_id, -penalty) {
            Ok(Some(balance)) => tracing::info!(
                "🚫 Message {message_id} cancelled by user {user_id} (-{penalty} points, balance {balance})"
            ),
            Ok(None) => tracing::warn!("⚠️ Message {message_id} cancelled but user {user_id} has no ledger"),
            Err(e) => tracing::error!("❌ Message {message_id} cancelled but penalty not applied: {e}"),
        }
        true
    }

    // ── Directory & calendar ──────────────────────────────

    pub fn list_recipients(&self, user_id: UserId) -> Result<Vec<UserProfile>> {
        self.ctx.db.list_recipients(user_id)
    }

    pub fn list_by_day(&self, user_id: UserId, day: u32, month: u32, year: i32) -> Result<Vec<DayEntry>> {
        self.list_by_day_at(user_id, day, month, year, Utc::now())
    }

    /// Messages sent by `user_id` with a delivery date on that UTC day.
    /// `month` is 1-based.
    pub fn list_by_day_at(
        &self,
        user_id: UserId,
        day: u32,
        month: u32,
        year: i32,
        now: DateTime<Utc>,
    ) -> Result<Vec<DayEntry>> {
        let start = NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|d| d.and_utc())
            .ok_or_else(|| BottleError::validation(format!("Invalid date {day}/{month}/{year}")))?;
        let end = start + Duration::days(1);

        let messages = self.ctx.db.sent_between(user_id, &start, &end)?;
        let summaries = self.summaries(&messages, |m| m.recipient)?;
        Ok(messages
            .iter()
            .zip(summaries)
            .map(|(msg, summary)| {
                let future = msg.delivery_date.is_some_and(|d| d > now);
                DayEntry {
                    summary,
                    future,
                    can_cancel: future && !msg.is_delivered,
                }
            })
            .collect())
    }

    // ── Helpers ──────────────────────────────

    fn summaries(
        &self,
        messages: &[Message],
        counterpart: impl Fn(&Message) -> Option<UserId>,
    ) -> Result<Vec<MessageSummary>> {
        let mut profiles: HashMap<UserId, Option<UserProfile>> = HashMap::new();
        let mut out = Vec::with_capacity(messages.len());
        for msg in messages {
            let profile = match counterpart(msg) {
                Some(id) => {
                    if !profiles.contains_key(&id) {
                        let profile = self.ctx.db.get_user(id)?.map(|u| u.profile());
                        profiles.insert(id, profile);
                    }
                    profiles.get(&id).cloned().flatten()
                }
                None => None,
            };
            out.push(MessageSummary::new(msg, profile));
        }
        Ok(out)
    }

    fn detail(&self, message: Message) -> Result<MessageDetail> {
        let sender = self.ctx.db.get_user(message.sender)?.map(|u| u.profile());
        let recipient = match message.recipient {
            Some(id) => self.ctx.db.get_user(id)?.map(|u| u.profile()),
            None => None,
        };
        Ok(MessageDetail {
            state: message.state(),
            message,
            sender,
            recipient,
        })
    }
}
