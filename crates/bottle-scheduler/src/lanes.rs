//! Named queues ("lanes") with per-lane concurrency limits.
//!
//! Message delivery always drains first; notifications run on their own
//! lower-priority lane so a slow mail server never holds up delivery.

use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

use crate::tasks::Task;

/// Named queue: determines execution priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lane {
    /// deliver-message jobs: highest priority.
    Message,
    /// Periodic jobs (sweep, lottery).
    Default,
    /// send-notification jobs: best effort, lowest priority.
    Notification,
}

impl Lane {
    pub const ALL: [Lane; 3] = [Lane::Message, Lane::Default, Lane::Notification];

    /// Priority order (lower = higher priority).
    pub fn priority(&self) -> u8 {
        match self {
            Lane::Message => 0,
            Lane::Default => 1,
            Lane::Notification => 2,
        }
    }
}

impl std::fmt::Display for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Lane::Message => write!(f, "message"),
            Lane::Default => write!(f, "default"),
            Lane::Notification => write!(f, "notification"),
        }
    }
}

/// A task queued for execution.
#[derive(Debug, Clone)]
pub struct LaneTask {
    pub task: Task,
    /// When this task was queued.
    pub queued_at: chrono::DateTime<chrono::Utc>,
}

impl LaneTask {
    pub fn new(task: Task) -> Self {
        Self {
            task,
            queued_at: chrono::Utc::now(),
        }
    }

    pub fn lane(&self) -> Lane {
        self.task.lane
    }
}

/// Per-lane state.
struct LaneState {
    queue: VecDeque<LaneTask>,
    active: usize,
    max_concurrent: usize,
    total_processed: u64,
}

impl LaneState {
    fn new(max_concurrent: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            active: 0,
            max_concurrent: max_concurrent.max(1),
            total_processed: 0,
        }
    }

    fn can_run(&self) -> bool {
        self.active < self.max_concurrent && !self.queue.is_empty()
    }

    fn dequeue(&mut self) -> Option<LaneTask> {
        if self.active < self.max_concurrent {
            let task = self.queue.pop_front()?;
            self.active += 1;
            Some(task)
        } else {
            None
        }
    }

    fn complete(&mut self) {
        self.active = self.active.saturating_sub(1);
        self.total_processed += 1;
    }
}

/// Lane Scheduler: priority-ordered named queues.
pub struct LaneScheduler {
    lanes: [Arc<Mutex<LaneState>>; 3],
    /// Woken on submit and on completion.
    wakeup: Arc<Notify>,
}

impl LaneScheduler {
    /// Create with explicit per-lane concurrency (message, default, notification).
    pub fn new(message: usize, default: usize, notification: usize) -> Self {
        Self {
            lanes: [
                Arc::new(Mutex::new(LaneState::new(message))),
                Arc::new(Mutex::new(LaneState::new(default))),
                Arc::new(Mutex::new(LaneState::new(notification))),
            ],
            wakeup: Arc::new(Notify::new()),
        }
    }

    pub fn from_config(config: &bottle_core::config::SchedulerConfig) -> Self {
        Self::new(
            config.message_concurrency,
            config.default_concurrency,
            config.notification_concurrency,
        )
    }

    /// Submit a task to its lane.
    pub async fn submit(&self, task: LaneTask) {
        let idx = task.lane().priority() as usize;
        let mut lane = self.lanes[idx].lock().await;
        tracing::debug!(
            "📥 Lane[{}] enqueue: {} (queue: {}, active: {})",
            task.lane(),
            task.task.id,
            lane.queue.len(),
            lane.active
        );
        lane.queue.push_back(task);
        self.wakeup.notify_one();
    }

    /// Pop the next task to execute, respecting lane priorities.
    /// Returns None if no tasks are available or all lanes are at capacity.
    pub async fn next(&self) -> Option<LaneTask> {
        for lane in &self.lanes {
            let mut state = lane.lock().await;
            if state.can_run() {
                return state.dequeue();
            }
        }
        None
    }

    /// Mark a lane task as complete (frees a concurrency slot).
    pub async fn complete(&self, lane: Lane) {
        let idx = lane.priority() as usize;
        let mut state = self.lanes[idx].lock().await;
        state.complete();
        self.wakeup.notify_one();
    }

    /// Wait until something was submitted or completed.
    pub async fn wait(&self) {
        self.wakeup.notified().await;
    }

    /// Get statistics for all lanes.
    pub async fn stats(&self) -> Vec<LaneStats> {
        let mut result = Vec::with_capacity(Lane::ALL.len());
        for lane in Lane::ALL {
            let state = self.lanes[lane.priority() as usize].lock().await;
            result.push(LaneStats {
                lane,
                queued: state.queue.len(),
                active: state.active,
                max_concurrent: state.max_concurrent,
                total_processed: state.total_processed,
            });
        }
        result
    }

    /// Total queued + running tasks across all lanes.
    pub async fn total_pending(&self) -> usize {
        let mut total = 0;
        for lane in &self.lanes {
            let state = lane.lock().await;
            total += state.queue.len() + state.active;
        }
        total
    }
}

impl Default for LaneScheduler {
    fn default() -> Self {
        Self::new(4, 2, 2)
    }
}

/// Statistics for a single lane.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LaneStats {
    pub lane: Lane,
    pub queued: usize,
    pub active: usize,
    pub max_concurrent: usize,
    pub total_processed: u64,
}
