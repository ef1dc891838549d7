//! # Bottlemail Mailbox
//!
//! The deferred-delivery core: messages written now, delivered at a
//! user-chosen time later.
//!
//! - `db`: SQLite message store and points ledger
//! - `lifecycle`: draft → pending → delivered → read → deleted, plus cancel
//! - `delivery` / `sweeper`: the two idempotent paths to "delivered"
//! - `notifications`: best-effort mail, on its own lane
//! - `lottery`: monthly points draw sharing the ledger with cancellation
//! - `handler`: `JobHandler` wiring the scheduler to all of the above

pub mod context;
pub mod db;
pub mod delivery;
pub mod handler;
pub mod lifecycle;
pub mod lottery;
pub mod notifications;
pub mod sweeper;

pub use context::MailboxContext;
pub use db::{MailboxDb, NewMessage, ReadTransition};
pub use delivery::DeliveryOutcome;
pub use handler::{MailboxJobs, register_periodic};
pub use lifecycle::Mailbox;
pub use lottery::LotteryOutcome;
pub use notifications::NotifyOutcome;
pub use sweeper::SweepReport;
