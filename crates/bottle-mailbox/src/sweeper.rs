//! Reconciliation sweeper: the `sweep-check` job.
//!
//! Force-delivers every pending message whose delivery time has passed.
//! Covers delivery jobs lost to restarts or a closed queue. Races with the
//! regular delivery job are harmless: `mark_delivered` only flips once.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use bottle_core::types::UserId;

use crate::context::MailboxContext;
use crate::delivery::delivered_body;
use crate::notifications::{self, delivered_subject};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub success: bool,
    /// Messages flipped to delivered by this pass.
    pub count: usize,
}

pub async fn sweep(ctx: &MailboxContext) -> SweepReport {
    sweep_at(ctx, Utc::now()).await
}

pub async fn sweep_at(ctx: &MailboxContext, now: DateTime<Utc>) -> SweepReport {
    let overdue = match ctx.db.overdue_undelivered(&now) {
        Ok(messages) => messages,
        Err(e) => {
            tracing::error!("❌ Sweep could not list overdue messages: {e}");
            return SweepReport {
                success: false,
                count: 0,
            };
        }
    };

    let mut success = true;
    let mut count = 0;
    let mut pairs: BTreeSet<(UserId, UserId)> = BTreeSet::new();
    for msg in &overdue {
        match ctx.db.mark_delivered(msg.message_id) {
            Ok(true) => {
                count += 1;
                if let Some(recipient) = msg.recipient {
                    pairs.insert((msg.sender, recipient));
                }
            }
            // Delivery job won the race.
            Ok(false) => {}
            Err(e) => {
                success = false;
                tracing::error!("❌ Sweep could not deliver message {}: {e}", msg.message_id);
            }
        }
    }

    if count > 0 {
        tracing::info!("🧹 Sweep delivered {count} overdue message(s)");
    } else {
        tracing::debug!("🧹 Sweep found nothing overdue");
    }

    if !ctx.config.silent {
        for (sender, recipient) in pairs {
            notify_pair(ctx, sender, recipient).await;
        }
    }

    SweepReport { success, count }
}

async fn notify_pair(ctx: &MailboxContext, sender: UserId, recipient: UserId) {
    let emails = ctx
        .user_email(sender)
        .and_then(|s| Ok((s, ctx.user_email(recipient)?)));
    match emails {
        Ok((Some(from), Some(to))) => {
            notifications::enqueue(ctx, &from, &to, &delivered_subject(&from), &delivered_body(&from))
                .await;
        }
        Ok(_) => tracing::warn!("⚠️ Sweep skipped notification {sender} → {recipient}: unknown user"),
        Err(e) => tracing::warn!("⚠️ Sweep skipped notification {sender} → {recipient}: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NewMessage;
    use crate::test_support::Harness;
    use bottle_scheduler::TaskAction;
    use chrono::Duration;

    fn insert(h: &Harness, sender: UserId, recipient: UserId, at: DateTime<Utc>) -> i64 {
        h.ctx
            .db
            .insert_message(&NewMessage {
                text: "Hello".into(),
                sender,
                recipient: Some(recipient),
                delivery_date: Some(at),
                is_draft: false,
                ..Default::default()
            })
            .unwrap()
    }

    #[tokio::test]
    async fn test_sweep_delivers_overdue() {
        let h = Harness::new();
        let a = h.user("a@test.com");
        let b = h.user("b@test.com");
        let now = Utc::now();
        let overdue: Vec<_> = (1..=5)
            .map(|d| insert(&h, a, b, now - Duration::days(d)))
            .collect();
        let future = insert(&h, a, b, now + Duration::days(1));

        let report = sweep_at(&h.ctx, now).await;
        assert_eq!(report, SweepReport { success: true, count: 5 });
        for id in overdue {
            assert!(h.ctx.db.get_message(id).unwrap().unwrap().is_delivered);
        }
        assert!(!h.ctx.db.get_message(future).unwrap().unwrap().is_delivered);
    }

    #[tokio::test]
    async fn test_one_notification_per_pair() {
        let h = Harness::new();
        let a = h.user("a@test.com");
        let b = h.user("b@test.com");
        let c = h.user("c@test.com");
        let past = Utc::now() - Duration::hours(1);
        insert(&h, a, b, past);
        insert(&h, a, b, past);
        insert(&h, a, c, past);

        let report = sweep_at(&h.ctx, Utc::now()).await;
        assert_eq!(report.count, 3);

        let mut recipients: Vec<_> = h
            .tasks()
            .await
            .into_iter()
            .filter_map(|t| match t.action {
                TaskAction::SendNotification { recipient, .. } => Some(recipient),
                _ => None,
            })
            .collect();
        recipients.sort();
        assert_eq!(recipients, vec!["b@test.com", "c@test.com"]);
    }

    #[tokio::test]
    async fn test_second_sweep_is_a_noop() {
        let h = Harness::new();
        insert(&h, 1, 2, Utc::now() - Duration::minutes(1));
        assert_eq!(sweep_at(&h.ctx, Utc::now()).await.count, 1);
        assert_eq!(
            sweep_at(&h.ctx, Utc::now()).await,
            SweepReport { success: true, count: 0 }
        );
    }

    #[tokio::test]
    async fn test_unknown_users_skip_notification() {
        let h = Harness::new();
        insert(&h, 98, 99, Utc::now() - Duration::minutes(1));
        let report = sweep_at(&h.ctx, Utc::now()).await;
        assert!(report.success);
        assert_eq!(report.count, 1);
        assert!(h.tasks().await.is_empty());
    }
}
