//! Monthly points lottery: the `run-lottery` job.

use rand::seq::SliceRandom;
use serde::Serialize;

use bottle_core::types::UserId;

use crate::context::MailboxContext;
use crate::notifications::{self, LOTTERY_SUBJECT};

/// `winner_id` is -1 when nobody could be rewarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LotteryOutcome {
    pub success: bool,
    pub winner_id: UserId,
}

impl LotteryOutcome {
    fn none() -> Self {
        Self {
            success: false,
            winner_id: -1,
        }
    }
}

pub async fn run_lottery(ctx: &MailboxContext) -> LotteryOutcome {
    let users = match ctx.db.list_active_users() {
        Ok(users) => users,
        Err(e) => {
            tracing::error!("❌ Lottery could not list participants: {e}");
            return LotteryOutcome::none();
        }
    };

    // ThreadRng is !Send, keep it out of any await.
    let winner = users.choose(&mut rand::thread_rng()).cloned();
    let Some(winner) = winner else {
        tracing::info!("🎲 Lottery skipped: no active users");
        return LotteryOutcome::none();
    };

    let reward = ctx.config.lottery_reward;
    let balance = match ctx.db.add_points(winner.id, reward) {
        Ok(Some(balance)) => balance,
        Ok(None) => {
            tracing::warn!("⚠️ Lottery winner {} vanished before payout", winner.id);
            return LotteryOutcome::none();
        }
        Err(e) => {
            tracing::error!("❌ Lottery payout to {} failed: {e}", winner.id);
            return LotteryOutcome::none();
        }
    };
    tracing::info!(
        "🎉 Lottery winner: {} (+{reward} points, balance {balance})",
        winner.email
    );

    notifications::enqueue(
        ctx,
        &ctx.mail_from,
        &winner.email,
        LOTTERY_SUBJECT,
        &format!(
            "Congratulations {}! You won {reward} points in this month's lottery. \
             Your balance is now {balance} points.",
            winner.firstname
        ),
    )
    .await;

    LotteryOutcome {
        success: true,
        winner_id: winner.id,
    }
}
