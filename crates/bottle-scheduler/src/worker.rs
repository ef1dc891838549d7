//! Worker runtime: moves due tasks from the engine onto lanes and executes
//! them through a `JobHandler`.
//!
//! Execution is at-least-once: a task may run again after a transient
//! failure, so handlers must be idempotent. The runtime owns the only retry
//! loop in the system.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use bottle_core::error::{BottleError, Result};

use crate::engine::SchedulerEngine;
use crate::lanes::{LaneScheduler, LaneTask};
use crate::tasks::{RetryPolicy, Task, TaskStatus, TaskType};

/// Executes one task. Returns a short summary for the log.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, task: &Task) -> Result<String>;
}

/// The worker pool bound to one engine.
pub struct Runtime {
    engine: Arc<Mutex<SchedulerEngine>>,
    lanes: Arc<LaneScheduler>,
    handler: Arc<dyn JobHandler>,
    retry: RetryPolicy,
}

impl Runtime {
    pub fn new(
        engine: Arc<Mutex<SchedulerEngine>>,
        lanes: Arc<LaneScheduler>,
        handler: Arc<dyn JobHandler>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            engine,
            lanes,
            handler,
            retry,
        }
    }

    pub fn lanes(&self) -> &Arc<LaneScheduler> {
        &self.lanes
    }

    /// Move every task due at `now` onto its lane.
    pub async fn pump(&self, now: chrono::DateTime<Utc>) -> usize {
        let due = self.engine.lock().await.tick(now);
        let count = due.len();
        for task in due {
            self.lanes.submit(LaneTask::new(task)).await;
        }
        count
    }

    /// Run every queued task to completion, one at a time.
    pub async fn drain(&self) -> usize {
        let mut executed = 0;
        while let Some(lane_task) = self.lanes.next().await {
            self.execute(lane_task).await;
            executed += 1;
        }
        executed
    }

    /// `pump` then `drain`.
    pub async fn run_due(&self, now: chrono::DateTime<Utc>) -> usize {
        self.pump(now).await;
        self.drain().await
    }

    async fn execute(&self, lane_task: LaneTask) {
        let task = lane_task.task;
        tracing::debug!(
            "⚙️ Running '{}' [{}] on lane {} (queued {}ms)",
            task.name,
            task.action.kind(),
            task.lane,
            (Utc::now() - lane_task.queued_at).num_milliseconds()
        );
        let result = self.handler.handle(&task).await;
        self.lanes.complete(task.lane).await;
        self.record(task, result).await;
    }

    async fn record(&self, mut task: Task, result: Result<String>) {
        let mut engine = self.engine.lock().await;
        match result {
            Ok(summary) => {
                engine.stats_mut().succeeded += 1;
                tracing::info!("✅ [{}] {}: {}", task.action.kind(), task.name, summary);
            }
            Err(e) => {
                engine.stats_mut().failed += 1;
                if !e.is_transient() || task.task_type.is_periodic() {
                    tracing::warn!(
                        "⚠️ [{}] {} failed permanently: {}",
                        task.action.kind(),
                        task.name,
                        e
                    );
                    return;
                }

                task.attempts += 1;
                let Some(delay) = self.retry.next_delay(task.attempts) else {
                    engine.stats_mut().exhausted += 1;
                    tracing::error!(
                        "❌ [{}] {} gave up after {} attempts: {}",
                        task.action.kind(),
                        task.name,
                        task.attempts,
                        e
                    );
                    return;
                };

                let at = Utc::now() + delay;
                task.task_type = TaskType::Once { at };
                task.next_run = Some(at);
                task.status = TaskStatus::Pending;
                tracing::warn!(
                    "🔁 [{}] {} failed (attempt {}), retrying at {}: {}",
                    task.action.kind(),
                    task.name,
                    task.attempts,
                    at,
                    e
                );
                match engine.submit(task) {
                    Ok(_) => engine.stats_mut().retried += 1,
                    Err(BottleError::Scheduling(reason)) => {
                        engine.stats_mut().exhausted += 1;
                        tracing::error!("❌ Could not requeue task for retry: {reason}");
                    }
                    Err(other) => tracing::error!("❌ Could not requeue task for retry: {other}"),
                }
            }
        }
    }

    /// Spawn the background loop: tick the engine every `tick`, and execute
    /// lane tasks concurrently up to each lane's limit.
    pub fn spawn(self: Arc<Self>, tick: Duration) -> JoinHandle<()> {
        tracing::info!("⏰ Scheduler runtime started (tick every {}ms)", tick.as_millis());
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.pump(Utc::now()).await;
                    }
                    _ = self.lanes.wait() => {}
                }

                while let Some(lane_task) = self.lanes.next().await {
                    let runtime = self.clone();
                    tokio::spawn(async move {
                        runtime.execute(lane_task).await;
                    });
                }
            }
        })
    }
}
