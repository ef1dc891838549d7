//! File-based snapshot of pending tasks.
//! Tasks saved as JSON: reloaded when the engine starts.
//! Only written on task changes, never on idle ticks.

use crate::tasks::Task;
use bottle_core::error::Result;
use std::path::{Path, PathBuf};

/// File-based task store.
pub struct TaskStore {
    path: PathBuf,
}

impl TaskStore {
    /// Create a new task store at the given directory.
    pub fn new(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            path: dir.to_path_buf(),
        })
    }

    fn file(&self) -> PathBuf {
        self.path.join("tasks.json")
    }

    /// Save all tasks to disk.
    pub fn save(&self, tasks: &[Task]) -> Result<()> {
        let file = self.file();
        let json = serde_json::to_string_pretty(tasks)?;
        std::fs::write(&file, &json)?;
        tracing::debug!("💾 Saved {} tasks to {}", tasks.len(), file.display());
        Ok(())
    }

    /// Load tasks from disk. A missing or unreadable snapshot yields no tasks.
    pub fn load(&self) -> Vec<Task> {
        let file = self.file();
        if !file.exists() {
            return Vec::new();
        }
        match std::fs::read_to_string(&file) {
            Ok(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
                tracing::warn!("⚠️ Failed to parse tasks.json: {e}");
                Vec::new()
            }),
            Err(e) => {
                tracing::warn!("⚠️ Failed to read tasks.json: {e}");
                Vec::new()
            }
        }
    }
}
