//! Notification dispatcher: best-effort email to the outside world.
//!
//! Notifications run as their own `send-notification` tasks on the
//! notification lane. A failure here never touches message state; transport
//! errors surface as `BottleError::Mail` and the runtime decides on retry.

use bottle_core::error::{BottleError, Result};
use bottle_scheduler::{NotificationLog, NotifyStatus, Task, TaskAction};

use crate::context::MailboxContext;

pub const READ_RECEIPT_SUBJECT: &str = "Bottlemail - Your message was read";
pub const LOTTERY_SUBJECT: &str = "Bottlemail - You won the monthly lottery";

pub fn delivered_subject(sender: &str) -> String {
    format!("Bottlemail - Message from {sender}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    Sent,
    /// Recipient unknown or deactivated; nothing was attempted.
    Skipped,
}

/// Send one notification now. Called by the `send-notification` job.
pub async fn notify(
    ctx: &MailboxContext,
    sender: &str,
    recipient: &str,
    subject: &str,
    body: &str,
) -> Result<NotifyOutcome> {
    let active = ctx
        .db
        .get_user_by_email(recipient)?
        .map(|u| u.is_active)
        .unwrap_or(false);
    if !active {
        tracing::debug!("🔕 Skipping notification to inactive or unknown {recipient}");
        ctx.record_notification(NotificationLog::create(
            sender,
            recipient,
            subject,
            body,
            NotifyStatus::Skipped,
        ));
        return Ok(NotifyOutcome::Skipped);
    }

    let send = ctx.transport.send(&ctx.mail_from, recipient, subject, body);
    let result = match tokio::time::timeout(ctx.mail_timeout, send).await {
        Ok(result) => result,
        Err(_) => Err(BottleError::Mail(format!(
            "{} transport timed out after {}s",
            ctx.transport.name(),
            ctx.mail_timeout.as_secs()
        ))),
    };

    let status = match &result {
        Ok(()) => NotifyStatus::Sent,
        Err(e) => NotifyStatus::Failed(e.to_string()),
    };
    ctx.record_notification(NotificationLog::create(sender, recipient, subject, body, status));

    result.map(|_| NotifyOutcome::Sent)
}

pub fn notification_task(sender: &str, recipient: &str, subject: &str, body: &str) -> Task {
    Task::immediate(
        &format!("notify {recipient}"),
        TaskAction::SendNotification {
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        },
    )
}

/// Fire-and-forget enqueue. Returns whether the task was accepted.
pub async fn enqueue(
    ctx: &MailboxContext,
    sender: &str,
    recipient: &str,
    subject: &str,
    body: &str,
) -> bool {
    match ctx
        .queue
        .submit(notification_task(sender, recipient, subject, body))
        .await
    {
        Ok(_) => true,
        Err(e) => {
            tracing::error!("❌ Could not enqueue notification to {recipient}: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Harness, SlowTransport};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_sends_to_active_recipient() {
        let h = Harness::new();
        h.user("bob@test.com");
        let outcome = notify(&h.ctx, "ada@test.com", "bob@test.com", "subj", "body")
            .await
            .unwrap();
        assert_eq!(outcome, NotifyOutcome::Sent);

        let sent = h.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].from, h.ctx.mail_from);
        assert_eq!(sent[0].to, "bob@test.com");
        assert_eq!(h.ctx.notification_history()[0].status, NotifyStatus::Sent);
    }

    #[tokio::test]
    async fn test_skips_inactive_and_unknown() {
        let h = Harness::new();
        let bob = h.user("bob@test.com");
        h.ctx.db.set_user_active(bob, false).unwrap();

        for to in ["bob@test.com", "ghost@test.com"] {
            let outcome = notify(&h.ctx, "ada@test.com", to, "s", "b").await.unwrap();
            assert_eq!(outcome, NotifyOutcome::Skipped);
        }
        assert!(h.transport.sent().is_empty());
        assert_eq!(h.ctx.notification_history().len(), 2);
        assert_eq!(h.ctx.notification_tally().skipped, 2);
    }

    #[tokio::test]
    async fn test_timeout_is_transient_mail_error() {
        let mut h = Harness::new();
        h.user("bob@test.com");
        let ctx = Arc::get_mut(&mut h.ctx).unwrap();
        ctx.transport = Arc::new(SlowTransport);
        ctx.mail_timeout = Duration::from_millis(10);

        let err = notify(&h.ctx, "ada@test.com", "bob@test.com", "s", "b")
            .await
            .unwrap_err();
        assert!(matches!(err, BottleError::Mail(_)));
        assert!(err.is_transient());
        assert!(matches!(
            h.ctx.notification_history()[0].status,
            NotifyStatus::Failed(_)
        ));
    }

    #[tokio::test]
    async fn test_enqueue_submits_notification_task() {
        let h = Harness::new();
        assert!(enqueue(&h.ctx, "a@x", "b@x", &delivered_subject("a@x"), "hi").await);
        let tasks = h.tasks().await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].action.kind(), "send-notification");
    }

    #[tokio::test]
    async fn test_enqueue_failure_is_swallowed() {
        let h = Harness::new();
        h.engine.lock().await.close();
        assert!(!enqueue(&h.ctx, "a@x", "b@x", "s", "b").await);
    }
}
