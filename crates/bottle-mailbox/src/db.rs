//! Mailbox SQLite database: messages and the points ledger.
//!
//! Every mutation is a single auto-committing statement scoped to one row.
//! State flips are conditional `UPDATE`s, so re-applying a transition that
//! already happened changes nothing and reports `false`.
//!
//! Timestamps are fixed-width RFC 3339 UTC strings (microseconds, `Z`), so
//! comparing them as text compares them as instants.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use bottle_core::error::{BottleError, Result};
use bottle_core::types::{Message, MessageId, User, UserId, UserProfile};

const MESSAGE_COLUMNS: &str = "message_id, text, media, sender, recipient, delivery_date, \
                               is_draft, is_delivered, is_read, is_deleted";
const USER_COLUMNS: &str = "id, email, firstname, lastname, points, is_active";

/// Mailbox database: message store plus user ledger.
pub struct MailboxDb {
    conn: Mutex<Connection>,
}

/// Fields of a message about to be inserted.
#[derive(Debug, Clone, Default)]
pub struct NewMessage {
    pub text: String,
    pub media: String,
    pub sender: UserId,
    pub recipient: Option<UserId>,
    pub delivery_date: Option<DateTime<Utc>>,
    pub is_draft: bool,
}

/// Result of a read attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadTransition {
    FirstRead,
    AlreadyRead,
    NotFound,
}

pub fn format_ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

fn row_to_message(row: &Row) -> rusqlite::Result<Message> {
    let delivery_date: Option<String> = row.get(5)?;
    Ok(Message {
        message_id: row.get(0)?,
        text: row.get(1)?,
        media: row.get(2)?,
        sender: row.get(3)?,
        recipient: row.get(4)?,
        delivery_date: delivery_date.as_deref().and_then(parse_ts),
        is_draft: row.get(6)?,
        is_delivered: row.get(7)?,
        is_read: row.get(8)?,
        is_deleted: row.get(9)?,
    })
}

fn row_to_user(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        firstname: row.get(2)?,
        lastname: row.get(3)?,
        points: row.get(4)?,
        is_active: row.get(5)?,
    })
}

impl MailboxDb {
    /// Open or create the mailbox database.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| BottleError::Database(format!("Mailbox DB open error: {e}")))?;

        // WAL for concurrent readers; a no-op for in-memory databases.
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(Path::new(":memory:"))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| BottleError::Database(format!("Lock: {e}")))
    }

    /// Run schema migrations.
    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL UNIQUE,
                firstname TEXT NOT NULL DEFAULT '',
                lastname TEXT NOT NULL DEFAULT '',
                points INTEGER NOT NULL DEFAULT 0,
                is_active INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS messages (
                message_id INTEGER PRIMARY KEY AUTOINCREMENT,
                text TEXT NOT NULL DEFAULT '',
                media TEXT NOT NULL DEFAULT '',
                sender INTEGER NOT NULL,
                recipient INTEGER,
                delivery_date TEXT,              -- RFC 3339 UTC, fixed width
                is_draft INTEGER NOT NULL DEFAULT 1,
                is_delivered INTEGER NOT NULL DEFAULT 0,
                is_read INTEGER NOT NULL DEFAULT 0,
                is_deleted INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_messages_undelivered
                ON messages (is_delivered, delivery_date);
            CREATE INDEX IF NOT EXISTS idx_messages_recipient ON messages (recipient);
            CREATE INDEX IF NOT EXISTS idx_messages_sender ON messages (sender);
            ",
        )?;
        Ok(())
    }

    // ── Users & points ledger ──────────────────────────────

    /// Register a user. Emails are unique.
    pub fn create_user(&self, email: &str, firstname: &str, lastname: &str) -> Result<UserId> {
        let conn = self.lock()?;
        match conn.execute(
            "INSERT INTO users (email, firstname, lastname) VALUES (?1, ?2, ?3)",
            params![email, firstname, lastname],
        ) {
            Ok(_) => Ok(conn.last_insert_rowid()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(BottleError::validation(format!(
                    "Email '{email}' is already registered"
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_user(&self, id: UserId) -> Result<Option<User>> {
        let conn = self.lock()?;
        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let conn = self.lock()?;
        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
                params![email],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    pub fn list_active_users(&self) -> Result<Vec<User>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE is_active = 1 ORDER BY id"
        ))?;
        let users = stmt
            .query_map([], row_to_user)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users)
    }

    /// Active users other than `excluding`.
    pub fn list_recipients(&self, excluding: UserId) -> Result<Vec<UserProfile>> {
        Ok(self
            .list_active_users()?
            .into_iter()
            .filter(|u| u.id != excluding)
            .map(|u| u.profile())
            .collect())
    }

    /// Activate or deactivate a user. Returns false if the user does not exist.
    pub fn set_user_active(&self, id: UserId, active: bool) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE users SET is_active = ?1 WHERE id = ?2",
            params![active, id],
        )?;
        Ok(changed == 1)
    }

    /// Atomically add `delta` (may be negative) to a user's points.
    /// Returns the new balance, or None when the user does not exist.
    pub fn add_points(&self, id: UserId, delta: i64) -> Result<Option<i64>> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE users SET points = points + ?1 WHERE id = ?2",
            params![delta, id],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        let balance = conn.query_row(
            "SELECT points FROM users WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(Some(balance))
    }

    // ── Messages ──────────────────────────────

    pub fn insert_message(&self, msg: &NewMessage) -> Result<MessageId> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO messages (text, media, sender, recipient, delivery_date, is_draft)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                msg.text,
                msg.media,
                msg.sender,
                msg.recipient,
                msg.delivery_date.as_ref().map(format_ts),
                msg.is_draft,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_message(&self, id: MessageId) -> Result<Option<Message>> {
        let conn = self.lock()?;
        let msg = conn
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE message_id = ?1"),
                params![id],
                row_to_message,
            )
            .optional()?;
        Ok(msg)
    }

    /// Rewrite a draft owned by `sender`. `media = None` keeps the attachment.
    pub fn update_draft(
        &self,
        sender: UserId,
        id: MessageId,
        text: &str,
        recipient: Option<UserId>,
        media: Option<&str>,
    ) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE messages SET text = ?1, recipient = ?2, media = COALESCE(?3, media)
             WHERE message_id = ?4 AND sender = ?5 AND is_draft = 1",
            params![text, recipient, media, id, sender],
        )?;
        Ok(changed == 1)
    }

    /// Turn a draft of `sender` into a pending message.
    pub fn promote_draft(
        &self,
        sender: UserId,
        id: MessageId,
        text: &str,
        recipient: UserId,
        delivery_date: &DateTime<Utc>,
        media: Option<&str>,
    ) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE messages
             SET is_draft = 0, text = ?1, recipient = ?2, delivery_date = ?3,
                 media = COALESCE(?4, media)
             WHERE message_id = ?5 AND sender = ?6 AND is_draft = 1",
            params![text, recipient, format_ts(delivery_date), media, id, sender],
        )?;
        Ok(changed == 1)
    }

    pub fn delete_draft(&self, sender: UserId, id: MessageId) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "DELETE FROM messages WHERE message_id = ?1 AND sender = ?2 AND is_draft = 1",
            params![id, sender],
        )?;
        Ok(changed == 1)
    }

    /// Remove a pending message of `sender` whose delivery time is after `now`.
    pub fn delete_pending(&self, sender: UserId, id: MessageId, now: &DateTime<Utc>) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "DELETE FROM messages
             WHERE message_id = ?1 AND sender = ?2 AND is_draft = 0 AND is_delivered = 0
               AND delivery_date IS NOT NULL AND delivery_date > ?3",
            params![id, sender, format_ts(now)],
        )?;
        Ok(changed == 1)
    }

    /// Flip a pending message to delivered. True only on the first flip.
    pub fn mark_delivered(&self, id: MessageId) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE messages SET is_delivered = 1
             WHERE message_id = ?1 AND is_draft = 0 AND is_delivered = 0",
            params![id],
        )?;
        Ok(changed == 1)
    }

    /// Mark a delivered, not deleted message of `recipient` as read.
    pub fn mark_read(&self, recipient: UserId, id: MessageId) -> Result<ReadTransition> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE messages SET is_read = 1
             WHERE message_id = ?1 AND recipient = ?2 AND is_delivered = 1
               AND is_deleted = 0 AND is_read = 0",
            params![id, recipient],
        )?;
        if changed == 1 {
            return Ok(ReadTransition::FirstRead);
        }
        let visible: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages
             WHERE message_id = ?1 AND recipient = ?2 AND is_delivered = 1 AND is_deleted = 0",
            params![id, recipient],
            |row| row.get(0),
        )?;
        Ok(if visible > 0 {
            ReadTransition::AlreadyRead
        } else {
            ReadTransition::NotFound
        })
    }

    /// Soft-delete a read message of `recipient`.
    pub fn mark_deleted(&self, recipient: UserId, id: MessageId) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE messages SET is_deleted = 1
             WHERE message_id = ?1 AND recipient = ?2 AND is_read = 1 AND is_deleted = 0",
            params![id, recipient],
        )?;
        Ok(changed == 1)
    }

    fn query_messages(&self, filter: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<Message>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("SELECT {MESSAGE_COLUMNS} FROM messages {filter}"))?;
        let messages = stmt
            .query_map(args, row_to_message)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(messages)
    }

    /// Pending messages whose delivery time is before `now`.
    pub fn overdue_undelivered(&self, now: &DateTime<Utc>) -> Result<Vec<Message>> {
        let now = format_ts(now);
        self.query_messages(
            "WHERE is_draft = 0 AND is_delivered = 0
               AND delivery_date IS NOT NULL AND delivery_date < ?1
             ORDER BY delivery_date",
            &[&now],
        )
    }

    pub fn drafts_of(&self, sender: UserId) -> Result<Vec<Message>> {
        self.query_messages(
            "WHERE sender = ?1 AND is_draft = 1 ORDER BY message_id",
            &[&sender],
        )
    }

    /// Delivered, not deleted messages addressed to `recipient`.
    pub fn received_by(&self, recipient: UserId) -> Result<Vec<Message>> {
        self.query_messages(
            "WHERE recipient = ?1 AND is_draft = 0 AND is_delivered = 1 AND is_deleted = 0
             ORDER BY delivery_date DESC, message_id DESC",
            &[&recipient],
        )
    }

    /// Non-draft messages of `sender`, pending ones included.
    pub fn sent_by(&self, sender: UserId) -> Result<Vec<Message>> {
        self.query_messages(
            "WHERE sender = ?1 AND is_draft = 0
             ORDER BY delivery_date DESC, message_id DESC",
            &[&sender],
        )
    }

    /// Non-draft messages of `sender` with `start <= delivery_date < end`.
    pub fn sent_between(
        &self,
        sender: UserId,
        start: &DateTime<Utc>,
        end: &DateTime<Utc>,
    ) -> Result<Vec<Message>> {
        let (start, end) = (format_ts(start), format_ts(end));
        self.query_messages(
            "WHERE sender = ?1 AND is_draft = 0
               AND delivery_date >= ?2 AND delivery_date < ?3
             ORDER BY delivery_date, message_id",
            &[&sender, &start, &end],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;

    fn temp_db() -> MailboxDb {
        MailboxDb::open_in_memory().unwrap()
    }

    fn pending(sender: UserId, recipient: UserId, at: DateTime<Utc>) -> NewMessage {
        NewMessage {
            text: "Hello".into(),
            sender,
            recipient: Some(recipient),
            delivery_date: Some(at),
            is_draft: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_users_and_unique_email() {
        let db = temp_db();
        let a = db.create_user("a@test.com", "Ada", "Lovelace").unwrap();
        let b = db.create_user("b@test.com", "Bob", "Builder").unwrap();
        assert_ne!(a, b);
        assert!(matches!(
            db.create_user("a@test.com", "x", "y"),
            Err(BottleError::Validation(_))
        ));
        assert_eq!(db.get_user_by_email("b@test.com").unwrap().unwrap().id, b);
        assert!(db.get_user(999).unwrap().is_none());
    }

    #[test]
    fn test_recipients_exclude_self_and_inactive() {
        let db = temp_db();
        let a = db.create_user("a@test.com", "", "").unwrap();
        let b = db.create_user("b@test.com", "", "").unwrap();
        let c = db.create_user("c@test.com", "", "").unwrap();
        assert!(db.set_user_active(c, false).unwrap());
        assert!(!db.set_user_active(999, false).unwrap());

        let recipients = db.list_recipients(a).unwrap();
        assert_eq!(recipients.len(), 1);
        assert_eq!(recipients[0].id, b);
    }

    #[test]
    fn test_add_points() {
        let db = temp_db();
        let a = db.create_user("a@test.com", "", "").unwrap();
        assert_eq!(db.add_points(a, 20).unwrap(), Some(20));
        assert_eq!(db.add_points(a, -60).unwrap(), Some(-40));
        assert_eq!(db.add_points(999, 20).unwrap(), None);
    }

    #[test]
    fn test_add_points_concurrent() {
        let db = Arc::new(temp_db());
        let a = db.create_user("a@test.com", "", "").unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let db = db.clone();
                std::thread::spawn(move || {
                    let delta = if i % 2 == 0 { 20 } else { -60 };
                    for _ in 0..50 {
                        db.add_points(a, delta).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let user = db.get_user(a).unwrap().unwrap();
        assert_eq!(user.points, 4 * 50 * 20 - 4 * 50 * 60);
    }

    #[test]
    fn test_timestamp_roundtrip_and_ordering() {
        let early = DateTime::parse_from_rfc3339("2026-01-02T03:04:05.123456Z")
            .unwrap()
            .with_timezone(&Utc);
        let late = early + Duration::microseconds(1);
        assert_eq!(parse_ts(&format_ts(&early)), Some(early));
        assert!(format_ts(&early) < format_ts(&late));
    }

    #[test]
    fn test_draft_update_and_promote() {
        let db = temp_db();
        let id = db
            .insert_message(&NewMessage {
                text: "draft".into(),
                sender: 1,
                is_draft: true,
                ..Default::default()
            })
            .unwrap();

        assert!(db.update_draft(1, id, "edited", Some(2), Some("pic.png")).unwrap());
        assert!(!db.update_draft(2, id, "hijack", None, None).unwrap());
        let msg = db.get_message(id).unwrap().unwrap();
        assert_eq!(msg.text, "edited");
        assert_eq!(msg.media, "pic.png");

        let at = Utc::now() + Duration::minutes(5);
        assert!(db.promote_draft(1, id, "final", 2, &at, None).unwrap());
        assert!(!db.promote_draft(1, id, "again", 2, &at, None).unwrap());
        let msg = db.get_message(id).unwrap().unwrap();
        assert!(!msg.is_draft);
        assert_eq!(msg.media, "pic.png");
        assert_eq!(msg.delivery_date.map(|d| d.timestamp_micros()), Some(at.timestamp_micros()));
    }

    #[test]
    fn test_mark_delivered_is_idempotent() {
        let db = temp_db();
        let id = db.insert_message(&pending(1, 2, Utc::now())).unwrap();
        assert!(db.mark_delivered(id).unwrap());
        assert!(!db.mark_delivered(id).unwrap());
        assert!(db.get_message(id).unwrap().unwrap().is_delivered);
        assert!(!db.mark_delivered(12345).unwrap());
    }

    #[test]
    fn test_read_gate() {
        let db = temp_db();
        let id = db.insert_message(&pending(1, 2, Utc::now())).unwrap();

        // Not delivered yet: invisible to the recipient.
        assert_eq!(db.mark_read(2, id).unwrap(), ReadTransition::NotFound);
        db.mark_delivered(id).unwrap();

        assert!(!db.mark_deleted(2, id).unwrap());
        assert_eq!(db.mark_read(3, id).unwrap(), ReadTransition::NotFound);
        assert_eq!(db.mark_read(2, id).unwrap(), ReadTransition::FirstRead);
        assert_eq!(db.mark_read(2, id).unwrap(), ReadTransition::AlreadyRead);
        assert!(db.mark_deleted(2, id).unwrap());
        assert!(!db.mark_deleted(2, id).unwrap());
        assert_eq!(db.mark_read(2, id).unwrap(), ReadTransition::NotFound);
    }

    #[test]
    fn test_overdue_and_listings() {
        let db = temp_db();
        let now = Utc::now();
        let past = db.insert_message(&pending(1, 2, now - Duration::days(3))).unwrap();
        let future = db.insert_message(&pending(1, 2, now + Duration::days(3))).unwrap();
        db.insert_message(&NewMessage {
            text: "draft".into(),
            sender: 1,
            is_draft: true,
            ..Default::default()
        })
        .unwrap();

        let overdue = db.overdue_undelivered(&now).unwrap();
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].message_id, past);

        assert_eq!(db.sent_by(1).unwrap().len(), 2);
        assert_eq!(db.drafts_of(1).unwrap().len(), 1);
        assert!(db.received_by(2).unwrap().is_empty());
        db.mark_delivered(past).unwrap();
        assert_eq!(db.received_by(2).unwrap()[0].message_id, past);

        let window = db
            .sent_between(1, &(now + Duration::days(2)), &(now + Duration::days(4)))
            .unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].message_id, future);
    }

    #[test]
    fn test_delete_pending_only_before_delivery_date() {
        let db = temp_db();
        let now = Utc::now();
        let future = db.insert_message(&pending(1, 2, now + Duration::hours(1))).unwrap();
        let past = db.insert_message(&pending(1, 2, now - Duration::hours(1))).unwrap();

        assert!(!db.delete_pending(2, future, &now).unwrap());
        assert!(!db.delete_pending(1, past, &now).unwrap());
        assert!(db.delete_pending(1, future, &now).unwrap());
        assert!(db.get_message(future).unwrap().is_none());
        assert!(db.get_message(past).unwrap().is_some());
    }
}
