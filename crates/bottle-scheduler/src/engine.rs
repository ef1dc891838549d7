//! Scheduler Engine: holds pending and periodic tasks and hands out the due ones.
//! The engine never executes anything itself; `tick(now)` returns due tasks
//! and the runtime routes them onto lanes.

use chrono::{DateTime, Utc};
use serde::Serialize;

use bottle_core::config::SchedulerConfig;
use bottle_core::error::{BottleError, Result};

use crate::cron;
use crate::store::TaskStore;
use crate::tasks::{Task, TaskStatus, TaskType};

/// Execution counters maintained by the runtime.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetryStats {
    pub succeeded: u64,
    pub failed: u64,
    pub retried: u64,
    pub exhausted: u64,
}

/// The scheduler engine: manages tasks and releases them when due.
pub struct SchedulerEngine {
    tasks: Vec<Task>,
    store: Option<TaskStore>,
    max_pending: usize,
    closed: bool,
    stats: RetryStats,
}

impl SchedulerEngine {
    /// Create an in-memory engine.
    pub fn new(max_pending: usize) -> Self {
        Self {
            tasks: Vec::new(),
            store: None,
            max_pending,
            closed: false,
            stats: RetryStats::default(),
        }
    }

    /// Create an engine backed by a JSON snapshot, reloading pending tasks.
    pub fn with_store(store: TaskStore, max_pending: usize) -> Self {
        let tasks = store.load();
        if !tasks.is_empty() {
            tracing::info!("📂 Restored {} pending tasks from snapshot", tasks.len());
        }
        let mut engine = Self {
            tasks,
            store: Some(store),
            max_pending,
            closed: false,
            stats: RetryStats::default(),
        };
        engine.recompute_cron_times(Utc::now());
        engine
    }

    pub fn from_config(config: &SchedulerConfig) -> Result<Self> {
        match &config.snapshot_dir {
            Some(dir) => {
                let dir = bottle_core::config::expand_path(dir);
                let store = TaskStore::new(std::path::Path::new(&dir))?;
                Ok(Self::with_store(store, config.max_pending_tasks))
            }
            None => Ok(Self::new(config.max_pending_tasks)),
        }
    }

    /// Submit a new task. Fails when the engine is closed or full.
    pub fn submit(&mut self, task: Task) -> Result<String> {
        if self.closed {
            return Err(BottleError::Scheduling("task queue is closed".into()));
        }
        if self.tasks.len() >= self.max_pending {
            return Err(BottleError::Scheduling(format!(
                "task queue full ({} pending)",
                self.tasks.len()
            )));
        }
        let id = task.id.clone();
        tracing::debug!(
            "📅 Task queued: '{}' [{}] ({}) next_run={:?}",
            task.name,
            task.action.kind(),
            id,
            task.next_run
        );
        self.tasks.push(task);
        self.recompute_cron_times(Utc::now());
        self.save();
        Ok(id)
    }

    /// Insert or replace a task with the same id.
    /// When the schedule is unchanged the earlier pending run is kept, so a
    /// re-registration never skips a run that is already due.
    pub fn upsert_task(&mut self, mut task: Task) {
        tracing::info!("📅 Task registered: '{}' ({})", task.name, task.id);
        if let Some(existing) = self.tasks.iter().find(|t| t.id == task.id) {
            if existing.task_type == task.task_type {
                task.next_run = match (existing.next_run, task.next_run) {
                    (Some(kept), Some(new)) => Some(kept.min(new)),
                    (kept, new) => kept.or(new),
                };
                task.last_run = existing.last_run;
                task.run_count = existing.run_count;
            }
        }
        self.tasks.retain(|t| t.id != task.id);
        self.tasks.push(task);
        self.recompute_cron_times(Utc::now());
        self.save();
    }

    /// List all tasks.
    pub fn list_tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Stop accepting submissions.
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Whether submissions are refused.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Release every task due at `now`.
    /// One-shot tasks leave the engine; periodic tasks get their next run.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<Task> {
        let mut due = Vec::new();
        let mut keep = Vec::with_capacity(self.tasks.len());

        for mut task in self.tasks.drain(..) {
            if !task.is_due(now) {
                keep.push(task);
                continue;
            }

            tracing::debug!("🔔 Task due: '{}' [{}]", task.name, task.action.kind());
            task.last_run = Some(now);
            task.run_count += 1;

            let mut fired = task.clone();
            fired.status = TaskStatus::Running;
            due.push(fired);

            match &task.task_type {
                TaskType::Once { .. } => {}
                TaskType::Interval { every_secs } => {
                    task.next_run = Some(now + chrono::Duration::seconds(*every_secs as i64));
                    task.status = TaskStatus::Pending;
                    keep.push(task);
                }
                TaskType::Cron { expression } => {
                    task.next_run = cron::next_run_from_cron(expression, now);
                    if task.next_run.is_none() {
                        task.status = TaskStatus::Disabled;
                    }
                    keep.push(task);
                }
            }
        }

        self.tasks = keep;
        if !due.is_empty() {
            self.save();
        }
        due
    }

    /// Give newly registered cron tasks their first run. A cron task whose
    /// run is already due keeps it; `tick` fires it once and moves on.
    fn recompute_cron_times(&mut self, now: DateTime<Utc>) {
        for task in self.tasks.iter_mut() {
            if let TaskType::Cron { expression } = &task.task_type {
                if task.next_run.is_none() && task.status != TaskStatus::Disabled {
                    task.next_run = cron::next_run_from_cron(expression, now);
                }
            }
        }
    }

    /// Persist the snapshot, if one is configured.
    fn save(&self) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(&self.tasks) {
                tracing::warn!("⚠️ Failed to save tasks: {e}");
            }
        }
    }

    /// Earliest upcoming run among live tasks.
    pub fn next_wakeup(&self) -> Option<DateTime<Utc>> {
        self.tasks
            .iter()
            .filter(|t| t.status != TaskStatus::Disabled)
            .filter_map(|t| t.next_run)
            .min()
    }

    /// Get task count.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn stats(&self) -> &RetryStats {
        &self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut RetryStats {
        &mut self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::TaskAction;
    use chrono::Duration;

    fn deliver(id: i64) -> TaskAction {
        TaskAction::DeliverMessage {
            message_id: id,
            sender_email: "a@x".into(),
            recipient_email: "b@x".into(),
        }
    }

    #[test]
    fn test_once_fires_once_and_leaves() {
        let mut engine = SchedulerEngine::new(10);
        let now = Utc::now();
        let at = now + Duration::seconds(60);
        engine.submit(Task::once("deliver-1", at, deliver(1))).unwrap();

        assert!(engine.tick(now).is_empty());
        let fired = engine.tick(at);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].action, deliver(1));
        assert_eq!(fired[0].status, TaskStatus::Running);
        assert_eq!(engine.task_count(), 0);
        assert!(engine.tick(at + Duration::seconds(1)).is_empty());
    }

    #[test]
    fn test_interval_reschedules() {
        let mut engine = SchedulerEngine::new(10);
        let mut task = Task::interval("sweep", 900, TaskAction::SweepCheck);
        let now = Utc::now();
        task.next_run = Some(now - Duration::seconds(1));
        engine.upsert_task(task);

        assert_eq!(engine.tick(now).len(), 1);
        assert_eq!(engine.task_count(), 1);
        assert_eq!(engine.next_wakeup(), Some(now + Duration::seconds(900)));
        assert!(engine.tick(now + Duration::seconds(899)).is_empty());
        assert_eq!(engine.tick(now + Duration::seconds(900)).len(), 1);
    }

    #[test]
    fn test_cron_gets_next_run() {
        let mut engine = SchedulerEngine::new(10);
        engine.upsert_task(Task::cron("lottery", "0 0 1 * *", TaskAction::RunLottery));
        let next = engine.list_tasks()[0].next_run.unwrap();
        assert!(next > Utc::now());
    }

    #[test]
    fn test_upsert_replaces_same_id() {
        let mut engine = SchedulerEngine::new(10);
        engine.upsert_task(Task::interval("sweep", 900, TaskAction::SweepCheck).with_id("sweep-check"));
        engine.upsert_task(Task::interval("sweep", 60, TaskAction::SweepCheck).with_id("sweep-check"));
        assert_eq!(engine.task_count(), 1);
        assert_eq!(
            engine.list_tasks()[0].task_type,
            TaskType::Interval { every_secs: 60 }
        );
    }

    #[test]
    fn test_capacity_and_close() {
        let mut engine = SchedulerEngine::new(1);
        engine.submit(Task::immediate("a", deliver(1))).unwrap();
        let err = engine.submit(Task::immediate("b", deliver(2))).unwrap_err();
        assert!(matches!(err, BottleError::Scheduling(_)));

        assert_eq!(engine.tick(Utc::now() + Duration::seconds(1)).len(), 1);
        engine.close();
        assert!(engine.is_closed());
        assert!(engine.submit(Task::immediate("c", deliver(3))).is_err());
    }

    #[test]
    fn test_due_cron_survives_submission_before_tick() {
        let mut engine = SchedulerEngine::new(10);
        let now = Utc::now();
        let mut lottery = Task::cron("lottery", "0 0 1 * *", TaskAction::RunLottery);
        lottery.next_run = Some(now - Duration::seconds(1));
        engine.upsert_task(lottery);

        // A send lands between the fire time and the next tick.
        engine
            .submit(Task::once("deliver-1", now + Duration::hours(1), deliver(1)))
            .unwrap();

        let fired = engine.tick(now);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].action, TaskAction::RunLottery);
        let next = engine
            .list_tasks()
            .iter()
            .find(|t| t.action == TaskAction::RunLottery)
            .and_then(|t| t.next_run)
            .unwrap();
        assert!(next > now);
        assert!(engine.tick(now).is_empty());
    }

    #[test]
    fn test_reregistering_keeps_due_run() {
        let mut engine = SchedulerEngine::new(10);
        let now = Utc::now();
        let mut lottery = Task::cron("lottery", "0 0 1 * *", TaskAction::RunLottery).with_id("lottery");
        lottery.next_run = Some(now - Duration::minutes(5));
        engine.upsert_task(lottery);

        engine.upsert_task(Task::cron("lottery", "0 0 1 * *", TaskAction::RunLottery).with_id("lottery"));
        assert_eq!(engine.task_count(), 1);
        assert_eq!(engine.tick(now).len(), 1);

        // A changed expression starts a fresh schedule.
        engine.upsert_task(Task::cron("lottery", "0 12 * * *", TaskAction::RunLottery).with_id("lottery"));
        assert!(engine.list_tasks()[0].next_run.unwrap() > now);
    }

    #[test]
    fn test_snapshot_survives_restart() {
        let dir = std::env::temp_dir().join("bottlemail-test-engine-snapshot");
        std::fs::remove_dir_all(&dir).ok();
        {
            let mut engine = SchedulerEngine::with_store(TaskStore::new(&dir).unwrap(), 10);
            let at = Utc::now() + Duration::hours(1);
            engine.submit(Task::once("deliver-7", at, deliver(7))).unwrap();
        }
        let engine = SchedulerEngine::with_store(TaskStore::new(&dir).unwrap(), 10);
        assert_eq!(engine.task_count(), 1);
        assert_eq!(engine.list_tasks()[0].action, deliver(7));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_overdue_cron_fires_after_restart() {
        let dir = std::env::temp_dir().join("bottlemail-test-engine-cron-restart");
        std::fs::remove_dir_all(&dir).ok();
        let now = Utc::now();
        let due = now - Duration::hours(2);
        {
            let mut engine = SchedulerEngine::with_store(TaskStore::new(&dir).unwrap(), 10);
            let mut lottery = Task::cron("lottery", "0 0 1 * *", TaskAction::RunLottery);
            lottery.next_run = Some(due);
            engine.upsert_task(lottery);
        }
        let mut engine = SchedulerEngine::with_store(TaskStore::new(&dir).unwrap(), 10);
        assert_eq!(engine.list_tasks()[0].next_run, Some(due));
        assert_eq!(engine.tick(now).len(), 1);
        std::fs::remove_dir_all(&dir).ok();
    }
}
