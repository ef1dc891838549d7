//! Task submission seam.
//!
//! Producers (the mailbox, running jobs) only ever see `TaskQueue`; the
//! engine behind it can be swapped or made to fail in tests.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use bottle_core::error::Result;

use crate::engine::SchedulerEngine;
use crate::tasks::Task;

#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Submit a task; returns its id. Fails with `BottleError::Scheduling`
    /// when the queue cannot accept work.
    async fn submit(&self, task: Task) -> Result<String>;
}

/// Engine-backed queue handle, cheap to clone.
#[derive(Clone)]
pub struct QueueHandle {
    engine: Arc<Mutex<SchedulerEngine>>,
}

impl QueueHandle {
    pub fn new(engine: Arc<Mutex<SchedulerEngine>>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<Mutex<SchedulerEngine>> {
        &self.engine
    }
}

#[async_trait]
impl TaskQueue for QueueHandle {
    async fn submit(&self, task: Task) -> Result<String> {
        self.engine.lock().await.submit(task)
    }
}
