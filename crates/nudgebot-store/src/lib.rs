//! # Nudgebot Store
//!
//! The reminder repository. Its one concurrency-safety primitive is
//! [`ReminderStore::claim`]: an atomic conditional transition of a
//! reminder from `pending` to `processing`. Everything the engine does
//! across concurrent instances hinges on exactly one claim succeeding per
//! reminder per due occurrence; there is no lock service and no leader.
//!
//! Two backends: [`SqliteStore`] for shared-file deployments and
//! [`MemoryStore`] for single-instance runs and tests.

pub mod memory;
pub mod sqlite;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use nudgebot_core::types::{Platform, Reminder, User};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Store-level errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A persisted row no longer maps onto the domain model.
    #[error("corrupt row {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Repository for reminders and their owners.
///
/// `claim` must be implemented as one atomic conditional update so that
/// under N concurrent callers exactly one receives the record.
pub trait ReminderStore: Send + Sync {
    fn insert(&self, reminder: &Reminder) -> StoreResult<()>;

    fn get(&self, id: &str) -> StoreResult<Option<Reminder>>;

    /// Persist status, schedule, counters, and flags for an existing row.
    fn save(&self, reminder: &Reminder) -> StoreResult<()>;

    /// Ids of reminders with `status = pending` and `scheduled_at <= now`.
    fn find_due(&self, now: DateTime<Utc>) -> StoreResult<Vec<String>>;

    /// Atomically transition `pending -> processing` for this id.
    /// Returns the post-transition record, or `None` on a lost race.
    fn claim(&self, id: &str, now: DateTime<Utc>) -> StoreResult<Option<Reminder>>;

    /// Pending reminders with an early-alert window configured and no
    /// alert sent yet. The caller decides whether the window has opened.
    fn find_early_alert_candidates(&self) -> StoreResult<Vec<Reminder>>;

    /// Return `processing` rows untouched for longer than `older_than`
    /// back to `pending`. Heals claims orphaned by a crashed instance.
    fn release_stuck(&self, now: DateTime<Utc>, older_than: Duration) -> StoreResult<u64>;

    fn user(&self, id: &str) -> StoreResult<Option<User>>;

    fn find_user_by_address(&self, platform: Platform, platform_id: &str)
    -> StoreResult<Option<User>>;

    fn upsert_user(&self, user: &User) -> StoreResult<()>;

    /// Most recently created reminders, newest first. Inspection surface.
    fn recent(&self, limit: u32) -> StoreResult<Vec<Reminder>>;
}

/// Actions recorded to the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    EarlyAlertSent,
    ReminderSent,
    ReminderFailed,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::EarlyAlertSent => "EARLY_ALERT_SENT",
            AuditAction::ReminderSent => "REMINDER_SENT",
            AuditAction::ReminderFailed => "REMINDER_FAILED",
        }
    }
}

/// One appended audit record.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub action: AuditAction,
    pub details: String,
    pub timestamp: DateTime<Utc>,
}

/// Write-only audit sink. The engine never reads it back.
pub trait AuditSink: Send + Sync {
    fn record(&self, action: AuditAction, details: &str) -> StoreResult<()>;
}
