//! SQLite-backed reminder store.
//!
//! The claim primitive is a single conditional `UPDATE ... WHERE status =
//! 'pending'` — SQLite serializes writers, so under concurrent engine
//! instances sharing the file exactly one claim flips the row.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{Connection, Row, params};

use nudgebot_core::types::{Platform, Recurrence, Reminder, ReminderStatus, User};

use crate::{AuditAction, AuditSink, ReminderStore, StoreResult};

/// SQLite-backed store for reminders, users, and the audit log.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Open a private in-memory database. Test use.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create tables and the polling index.
    fn migrate(&self) -> StoreResult<()> {
        self.conn().execute_batch(
            "
            CREATE TABLE IF NOT EXISTS reminders (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                text TEXT NOT NULL,
                original_text TEXT NOT NULL,
                scheduled_at TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                early_alert_minutes INTEGER,
                early_alert_sent INTEGER NOT NULL DEFAULT 0,
                retry_count INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL DEFAULT 3,
                recurrence_type TEXT,
                recurrence_interval INTEGER,
                last_triggered_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Polling queries filter on status then scheduled_at
            CREATE INDEX IF NOT EXISTS idx_reminders_status_scheduled
                ON reminders(status, scheduled_at);

            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                platform TEXT NOT NULL,
                platform_id TEXT NOT NULL,
                name TEXT,
                language TEXT NOT NULL DEFAULT 'en',
                banned INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                UNIQUE (platform, platform_id)
            );

            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                action TEXT NOT NULL,
                details TEXT NOT NULL DEFAULT '',
                timestamp TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    fn get_with(&self, conn: &Connection, id: &str) -> StoreResult<Option<Reminder>> {
        let mut stmt = conn.prepare(&format!("{SELECT_REMINDER} WHERE id = ?1"))?;
        let mut rows = stmt.query_map(params![id], row_to_reminder)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }
}

const SELECT_REMINDER: &str = "SELECT id, user_id, text, original_text, scheduled_at, status, \
     early_alert_minutes, early_alert_sent, retry_count, max_retries, \
     recurrence_type, recurrence_interval, last_triggered_at, created_at \
     FROM reminders";

impl ReminderStore for SqliteStore {
    fn insert(&self, reminder: &Reminder) -> StoreResult<()> {
        let now = ts(Utc::now());
        self.conn().execute(
            "INSERT INTO reminders (id, user_id, text, original_text, scheduled_at, status, \
             early_alert_minutes, early_alert_sent, retry_count, max_retries, \
             recurrence_type, recurrence_interval, last_triggered_at, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                reminder.id,
                reminder.user_id,
                reminder.text,
                reminder.original_text,
                ts(reminder.scheduled_at),
                reminder.status.as_str(),
                reminder.early_alert_minutes,
                reminder.early_alert_sent,
                reminder.retry_count,
                reminder.max_retries,
                reminder.recurrence.as_ref().map(Recurrence::kind),
                reminder.recurrence.as_ref().and_then(Recurrence::interval_days),
                reminder.last_triggered_at.map(ts),
                ts(reminder.created_at),
                now,
            ],
        )?;
        Ok(())
    }

    fn get(&self, id: &str) -> StoreResult<Option<Reminder>> {
        let conn = self.conn();
        self.get_with(&conn, id)
    }

    fn save(&self, reminder: &Reminder) -> StoreResult<()> {
        self.conn().execute(
            "UPDATE reminders SET text = ?2, scheduled_at = ?3, status = ?4, \
             early_alert_minutes = ?5, early_alert_sent = ?6, retry_count = ?7, \
             max_retries = ?8, recurrence_type = ?9, recurrence_interval = ?10, \
             last_triggered_at = ?11, updated_at = ?12 \
             WHERE id = ?1",
            params![
                reminder.id,
                reminder.text,
                ts(reminder.scheduled_at),
                reminder.status.as_str(),
                reminder.early_alert_minutes,
                reminder.early_alert_sent,
                reminder.retry_count,
                reminder.max_retries,
                reminder.recurrence.as_ref().map(Recurrence::kind),
                reminder.recurrence.as_ref().and_then(Recurrence::interval_days),
                reminder.last_triggered_at.map(ts),
                ts(Utc::now()),
            ],
        )?;
        Ok(())
    }

    fn find_due(&self, now: DateTime<Utc>) -> StoreResult<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id FROM reminders WHERE status = 'pending' AND scheduled_at <= ?1",
        )?;
        let ids = stmt
            .query_map(params![ts(now)], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn claim(&self, id: &str, now: DateTime<Utc>) -> StoreResult<Option<Reminder>> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE reminders SET status = 'processing', updated_at = ?2 \
             WHERE id = ?1 AND status = 'pending'",
            params![id, ts(now)],
        )?;
        if changed == 0 {
            // Lost the race, or the row no longer qualifies.
            return Ok(None);
        }
        self.get_with(&conn, id)
    }

    fn find_early_alert_candidates(&self) -> StoreResult<Vec<Reminder>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "{SELECT_REMINDER} WHERE status = 'pending' \
             AND early_alert_minutes > 0 AND early_alert_sent = 0"
        ))?;
        let reminders = stmt
            .query_map([], row_to_reminder)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(reminders)
    }

    fn release_stuck(&self, now: DateTime<Utc>, older_than: Duration) -> StoreResult<u64> {
        let cutoff = ts(now - older_than);
        let changed = self.conn().execute(
            "UPDATE reminders SET status = 'pending', updated_at = ?1 \
             WHERE status = 'processing' AND updated_at < ?2",
            params![ts(now), cutoff],
        )?;
        Ok(changed as u64)
    }

    fn user(&self, id: &str) -> StoreResult<Option<User>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("{SELECT_USER} WHERE id = ?1"))?;
        let mut rows = stmt.query_map(params![id], row_to_user)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    fn find_user_by_address(
        &self,
        platform: Platform,
        platform_id: &str,
    ) -> StoreResult<Option<User>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare(&format!("{SELECT_USER} WHERE platform = ?1 AND platform_id = ?2"))?;
        let mut rows = stmt.query_map(params![platform.as_str(), platform_id], row_to_user)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    fn upsert_user(&self, user: &User) -> StoreResult<()> {
        self.conn().execute(
            "INSERT INTO users (id, platform, platform_id, name, language, banned, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
             ON CONFLICT(platform, platform_id) DO UPDATE SET \
             name = excluded.name, language = excluded.language, banned = excluded.banned",
            params![
                user.id,
                user.platform.as_str(),
                user.platform_id,
                user.name,
                user.language,
                user.banned,
                ts(user.created_at),
            ],
        )?;
        Ok(())
    }

    fn recent(&self, limit: u32) -> StoreResult<Vec<Reminder>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare(&format!("{SELECT_REMINDER} ORDER BY created_at DESC LIMIT ?1"))?;
        let reminders = stmt
            .query_map(params![limit], row_to_reminder)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(reminders)
    }
}

const SELECT_USER: &str =
    "SELECT id, platform, platform_id, name, language, banned, created_at FROM users";

impl AuditSink for SqliteStore {
    fn record(&self, action: AuditAction, details: &str) -> StoreResult<()> {
        self.conn().execute(
            "INSERT INTO audit_log (action, details, timestamp) VALUES (?1, ?2, ?3)",
            params![action.as_str(), details, ts(Utc::now())],
        )?;
        Ok(())
    }
}

/// Fixed-width RFC 3339 so timestamps compare correctly as text.
fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn bad_column(idx: usize, reason: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        reason.into(),
    )
}

fn row_to_reminder(row: &Row<'_>) -> rusqlite::Result<Reminder> {
    let status_raw: String = row.get(5)?;
    let status = ReminderStatus::parse(&status_raw)
        .ok_or_else(|| bad_column(5, format!("unknown status '{status_raw}'")))?;

    let recurrence = match row.get::<_, Option<String>>(10)? {
        Some(kind) => Recurrence::from_parts(&kind, row.get(11)?),
        None => None,
    };

    let scheduled_raw: String = row.get(4)?;
    let created_raw: String = row.get(13)?;
    let last_triggered = row
        .get::<_, Option<String>>(12)?
        .map(|raw| parse_ts(12, &raw))
        .transpose()?;

    Ok(Reminder {
        id: row.get(0)?,
        user_id: row.get(1)?,
        text: row.get(2)?,
        original_text: row.get(3)?,
        scheduled_at: parse_ts(4, &scheduled_raw)?,
        status,
        early_alert_minutes: row.get(6)?,
        early_alert_sent: row.get(7)?,
        retry_count: row.get(8)?,
        max_retries: row.get(9)?,
        recurrence,
        last_triggered_at: last_triggered,
        created_at: parse_ts(13, &created_raw)?,
    })
}

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    let platform_raw: String = row.get(1)?;
    let platform = Platform::parse(&platform_raw)
        .ok_or_else(|| bad_column(1, format!("unknown platform '{platform_raw}'")))?;
    let created_raw: String = row.get(6)?;

    Ok(User {
        id: row.get(0)?,
        platform,
        platform_id: row.get(2)?,
        name: row.get(3)?,
        language: row.get(4)?,
        banned: row.get(5)?,
        created_at: parse_ts(6, &created_raw)?,
    })
}
