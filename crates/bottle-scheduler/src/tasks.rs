//! Task definitions: the core data model for scheduled work.
//!
//! Payloads carry only plain, serializable fields (ids, email addresses):
//! a task may execute after a restart, from a snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::lanes::Lane;

/// A scheduled task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task ID.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// What to do when triggered.
    pub action: TaskAction,
    /// When/how to trigger.
    pub task_type: TaskType,
    /// Named queue the task runs on.
    pub lane: Lane,
    /// Current status.
    pub status: TaskStatus,
    /// Created timestamp.
    pub created_at: DateTime<Utc>,
    /// Last triggered timestamp.
    pub last_run: Option<DateTime<Utc>>,
    /// Next scheduled run.
    pub next_run: Option<DateTime<Utc>>,
    /// How many times this task has run.
    pub run_count: u32,
    /// Failed attempts so far (one-shot tasks only).
    #[serde(default)]
    pub attempts: u32,
}

/// What the task does when triggered. One variant per job kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaskAction {
    /// Flip a pending message to delivered.
    DeliverMessage {
        message_id: i64,
        sender_email: String,
        recipient_email: String,
    },
    /// Send an email notification.
    SendNotification {
        sender: String,
        recipient: String,
        subject: String,
        body: String,
    },
    /// Reconciliation pass over overdue undelivered messages.
    SweepCheck,
    /// Monthly points lottery.
    RunLottery,
}

impl TaskAction {
    pub fn kind(&self) -> &'static str {
        match self {
            TaskAction::DeliverMessage { .. } => "deliver-message",
            TaskAction::SendNotification { .. } => "send-notification",
            TaskAction::SweepCheck => "sweep-check",
            TaskAction::RunLottery => "run-lottery",
        }
    }

    /// Queue this kind of work runs on.
    pub fn lane(&self) -> Lane {
        match self {
            TaskAction::DeliverMessage { .. } => Lane::Message,
            TaskAction::SendNotification { .. } => Lane::Notification,
            TaskAction::SweepCheck | TaskAction::RunLottery => Lane::Default,
        }
    }
}

/// How/when the task triggers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaskType {
    /// Run once at a specific time.
    Once { at: DateTime<Utc> },
    /// Run on a cron schedule.
    Cron { expression: String },
    /// Run every N seconds.
    Interval { every_secs: u64 },
}

impl TaskType {
    pub fn is_periodic(&self) -> bool {
        !matches!(self, TaskType::Once { .. })
    }
}

/// Task status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum TaskStatus {
    Pending,
    Running,
    /// Cron expression with no future match.
    Disabled,
}

/// Retry policy applied by the runtime to transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Base backoff; attempt N waits N × backoff.
    pub backoff_secs: u64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_secs: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_secs,
        }
    }

    /// Delay before the next attempt, or None once attempts are exhausted.
    pub fn next_delay(&self, attempts_so_far: u32) -> Option<chrono::Duration> {
        if attempts_so_far >= self.max_attempts {
            return None;
        }
        Some(chrono::Duration::seconds(
            (self.backoff_secs * attempts_so_far as u64) as i64,
        ))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, 30)
    }
}

impl Task {
    fn build(name: &str, action: TaskAction, task_type: TaskType, next_run: Option<DateTime<Utc>>) -> Self {
        Self {
            id: format!("task-{}", uuid::Uuid::new_v4()),
            name: name.to_string(),
            lane: action.lane(),
            action,
            task_type,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            last_run: None,
            next_run,
            run_count: 0,
            attempts: 0,
        }
    }

    /// Create a one-time task firing at an absolute UTC time.
    pub fn once(name: &str, at: DateTime<Utc>, action: TaskAction) -> Self {
        Self::build(name, action, TaskType::Once { at }, Some(at))
    }

    /// Create a one-time task due immediately.
    pub fn immediate(name: &str, action: TaskAction) -> Self {
        Self::once(name, Utc::now(), action)
    }

    /// Create a recurring interval task.
    pub fn interval(name: &str, every_secs: u64, action: TaskAction) -> Self {
        let next = Utc::now() + chrono::Duration::seconds(every_secs as i64);
        Self::build(name, action, TaskType::Interval { every_secs }, Some(next))
    }

    /// Create a cron-scheduled task.
    pub fn cron(name: &str, expression: &str, action: TaskAction) -> Self {
        Self::build(
            name,
            action,
            TaskType::Cron {
                expression: expression.to_string(),
            },
            None, // Computed by the engine
        )
    }

    /// Move the first run, e.g. to run an interval task at startup.
    pub fn first_run_at(mut self, at: DateTime<Utc>) -> Self {
        self.next_run = Some(at);
        self
    }

    /// Use a fixed id (periodic jobs registered on every start).
    pub fn with_id(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self
    }

    /// Check if this task should run at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if self.status == TaskStatus::Disabled {
            return false;
        }
        match &self.next_run {
            Some(next) => now >= *next,
            None => false,
        }
    }
}
