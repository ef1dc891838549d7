//! # Bottlemail Scheduler
//!
//! Delayed task queue and worker runtime for deferred message delivery.
//!
//! ## Design Principles
//! - No external broker: tokio timers plus an in-process engine
//! - At-least-once execution: handlers must be idempotent
//! - Optional JSON snapshot of pending tasks, reloaded on start
//! - Named lanes so slow mail never blocks delivery
//!
//! ## Architecture
//! ```text
//! TaskQueue::submit(Task)
//!   └── SchedulerEngine (pending one-shot + periodic tasks)
//!         └── tick(now) → due tasks
//!               └── LaneScheduler
//!                     ├── message       (deliver-message)
//!                     ├── default       (sweep-check, run-lottery)
//!                     └── notification  (send-notification)
//!                           └── Runtime → JobHandler::handle(task)
//!                                 └── on transient failure → RetryPolicy → resubmit
//! ```

pub mod cron;
pub mod dispatch;
pub mod engine;
pub mod lanes;
pub mod notify;
pub mod queue;
pub mod store;
pub mod tasks;
pub mod worker;

pub use dispatch::{LogMailer, RecordingTransport, SentMail, SmtpMailer, transport_from_config};
pub use engine::{RetryStats, SchedulerEngine};
pub use lanes::{Lane, LaneScheduler, LaneStats, LaneTask};
pub use notify::{Notification, NotificationLog, NotifyStatus, NotifyTally};
pub use queue::{QueueHandle, TaskQueue};
pub use store::TaskStore;
pub use tasks::{RetryPolicy, Task, TaskAction, TaskStatus, TaskType};
pub use worker::{JobHandler, Runtime};
