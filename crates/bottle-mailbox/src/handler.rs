//! Routes scheduler tasks to the mailbox jobs.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use bottle_core::config::SchedulerConfig;
use bottle_core::error::{BottleError, Result};
use bottle_scheduler::{JobHandler, SchedulerEngine, Task, TaskAction};

use crate::context::MailboxContext;
use crate::delivery::deliver;
use crate::lottery::run_lottery;
use crate::notifications::notify;
use crate::sweeper::sweep;

pub const SWEEP_TASK_ID: &str = "sweep-check";
pub const LOTTERY_TASK_ID: &str = "run-lottery";

pub struct MailboxJobs {
    ctx: Arc<MailboxContext>,
}

impl MailboxJobs {
    pub fn new(ctx: Arc<MailboxContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl JobHandler for MailboxJobs {
    async fn handle(&self, task: &Task) -> Result<String> {
        let ctx = self.ctx.as_ref();
        match &task.action {
            TaskAction::DeliverMessage {
                message_id,
                sender_email,
                recipient_email,
            } => {
                let outcome = deliver(ctx, *message_id, sender_email, recipient_email).await?;
                Ok(format!("message {message_id}: {outcome:?}"))
            }
            TaskAction::SendNotification {
                sender,
                recipient,
                subject,
                body,
            } => {
                let outcome = notify(ctx, sender, recipient, subject, body).await?;
                Ok(format!("{recipient}: {outcome:?}"))
            }
            TaskAction::SweepCheck => {
                let report = sweep(ctx).await;
                if report.success {
                    Ok(format!("{} message(s) delivered", report.count))
                } else {
                    Err(BottleError::Database(format!(
                        "sweep incomplete after {} message(s)",
                        report.count
                    )))
                }
            }
            TaskAction::RunLottery => {
                let outcome = run_lottery(ctx).await;
                Ok(if outcome.success {
                    format!("winner {}", outcome.winner_id)
                } else {
                    "no winner".to_string()
                })
            }
        }
    }
}

/// Register the periodic sweep and lottery under fixed ids, so repeated
/// starts replace rather than duplicate them. The sweep also runs right
/// away: messages that fell due while the process was down go out at start.
pub fn register_periodic(engine: &mut SchedulerEngine, config: &SchedulerConfig) {
    engine.upsert_task(
        Task::interval("reconciliation sweep", config.sweep_interval_secs, TaskAction::SweepCheck)
            .with_id(SWEEP_TASK_ID)
            .first_run_at(Utc::now()),
    );
    engine.upsert_task(
        Task::cron("monthly lottery", &config.lottery_cron, TaskAction::RunLottery)
            .with_id(LOTTERY_TASK_ID),
    );
}
