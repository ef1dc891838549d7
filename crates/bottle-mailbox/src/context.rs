//! Explicit job context handed to every mailbox component.
//!
//! Bundles the store, the task queue, the mail transport and the mailbox
//! settings. Built once per process; jobs never reach for globals.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bottle_core::config::{BottleConfig, MailboxConfig};
use bottle_core::error::Result;
use bottle_core::traits::MailTransport;
use bottle_core::types::UserId;
use bottle_scheduler::{Notification, NotificationLog, NotifyTally, TaskQueue};

use crate::db::MailboxDb;

pub struct MailboxContext {
    pub db: Arc<MailboxDb>,
    pub queue: Arc<dyn TaskQueue>,
    pub transport: Arc<dyn MailTransport>,
    pub config: MailboxConfig,
    /// Envelope sender for notification mail.
    pub mail_from: String,
    /// Upper bound on one transport call.
    pub mail_timeout: Duration,
    log: Mutex<NotificationLog>,
}

impl MailboxContext {
    pub fn new(
        db: Arc<MailboxDb>,
        queue: Arc<dyn TaskQueue>,
        transport: Arc<dyn MailTransport>,
        config: &BottleConfig,
    ) -> Self {
        Self {
            db,
            queue,
            transport,
            config: config.mailbox.clone(),
            mail_from: config.mail.from_address.clone(),
            mail_timeout: Duration::from_secs(config.mail.timeout_secs),
            log: Mutex::new(NotificationLog::new()),
        }
    }

    pub fn record_notification(&self, notification: Notification) {
        if let Ok(mut log) = self.log.lock() {
            log.record(notification);
        }
    }

    /// Outcome counts of recent notification attempts.
    pub fn notification_tally(&self) -> NotifyTally {
        self.log.lock().map(|log| log.tally()).unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn notification_history(&self) -> Vec<Notification> {
        self.log
            .lock()
            .map(|log| log.history().to_vec())
            .unwrap_or_default()
    }

    pub fn user_email(&self, id: UserId) -> Result<Option<String>> {
        Ok(self.db.get_user(id)?.map(|u| u.email))
    }
}
