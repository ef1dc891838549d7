//! Notification log: what the notification dispatcher attempted and how it went.
//! In-memory ring buffer, no persistence: notifications are best effort.

use serde::{Deserialize, Serialize};

const HISTORY_LIMIT: usize = 100;

/// One notification attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub sender: String,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub status: NotifyStatus,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Outcome of an attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum NotifyStatus {
    Sent,
    /// Recipient inactive or unknown.
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NotifyTally {
    pub sent: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Recent notification history.
pub struct NotificationLog {
    history: Vec<Notification>,
}

impl NotificationLog {
    pub fn new() -> Self {
        Self {
            history: Vec::new(),
        }
    }

    /// Record an attempt.
    pub fn record(&mut self, notification: Notification) {
        self.history.push(notification);
        // Ring buffer: keep last 100
        if self.history.len() > HISTORY_LIMIT {
            self.history.remove(0);
        }
    }

    /// Get notification history.
    pub fn history(&self) -> &[Notification] {
        &self.history
    }

    /// Outcome counts over the retained history.
    pub fn tally(&self) -> NotifyTally {
        let mut tally = NotifyTally::default();
        for n in &self.history {
            match n.status {
                NotifyStatus::Sent => tally.sent += 1,
                NotifyStatus::Skipped => tally.skipped += 1,
                NotifyStatus::Failed(_) => tally.failed += 1,
            }
        }
        tally
    }

    /// Create a notification record.
    pub fn create(
        sender: &str,
        recipient: &str,
        subject: &str,
        body: &str,
        status: NotifyStatus,
    ) -> Notification {
        Notification {
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            status,
            timestamp: chrono::Utc::now(),
        }
    }
}

impl Default for NotificationLog {
    fn default() -> Self {
        Self::new()
    }
}
