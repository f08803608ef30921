//! In-memory reminder store — single-instance deployments and tests.
//!
//! The claim primitive holds the map mutex across the test-and-set, which
//! makes it atomic with respect to every other accessor in this process.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};

use nudgebot_core::types::{Platform, Reminder, ReminderStatus, User};

use crate::{AuditAction, AuditEntry, AuditSink, ReminderStore, StoreResult};

#[derive(Default)]
struct Inner {
    reminders: HashMap<String, Reminder>,
    /// Last claim/save instant per reminder, for stuck-claim release.
    touched: HashMap<String, DateTime<Utc>>,
    users: HashMap<String, User>,
    audit: Vec<AuditEntry>,
}

/// Mutex-guarded in-memory store.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of the audit log. Test accessor.
    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        self.lock().audit.clone()
    }
}

impl ReminderStore for MemoryStore {
    fn insert(&self, reminder: &Reminder) -> StoreResult<()> {
        let mut inner = self.lock();
        inner.touched.insert(reminder.id.clone(), Utc::now());
        inner.reminders.insert(reminder.id.clone(), reminder.clone());
        Ok(())
    }

    fn get(&self, id: &str) -> StoreResult<Option<Reminder>> {
        Ok(self.lock().reminders.get(id).cloned())
    }

    fn save(&self, reminder: &Reminder) -> StoreResult<()> {
        let mut inner = self.lock();
        if inner.reminders.contains_key(&reminder.id) {
            inner.touched.insert(reminder.id.clone(), Utc::now());
            inner.reminders.insert(reminder.id.clone(), reminder.clone());
        }
        Ok(())
    }

    fn find_due(&self, now: DateTime<Utc>) -> StoreResult<Vec<String>> {
        Ok(self
            .lock()
            .reminders
            .values()
            .filter(|r| r.is_due(now))
            .map(|r| r.id.clone())
            .collect())
    }

    fn claim(&self, id: &str, now: DateTime<Utc>) -> StoreResult<Option<Reminder>> {
        let mut inner = self.lock();
        let Some(reminder) = inner.reminders.get_mut(id) else {
            return Ok(None);
        };
        if reminder.status != ReminderStatus::Pending {
            return Ok(None);
        }
        reminder.status = ReminderStatus::Processing;
        let claimed = reminder.clone();
        inner.touched.insert(id.to_string(), now);
        Ok(Some(claimed))
    }

    fn find_early_alert_candidates(&self) -> StoreResult<Vec<Reminder>> {
        Ok(self
            .lock()
            .reminders
            .values()
            .filter(|r| {
                r.status == ReminderStatus::Pending
                    && r.early_alert_minutes.is_some_and(|m| m > 0)
                    && !r.early_alert_sent
            })
            .cloned()
            .collect())
    }

    fn release_stuck(&self, now: DateTime<Utc>, older_than: Duration) -> StoreResult<u64> {
        let mut inner = self.lock();
        let cutoff = now - older_than;
        let stuck: Vec<String> = inner
            .reminders
            .values()
            .filter(|r| r.status == ReminderStatus::Processing)
            .filter(|r| {
                inner
                    .touched
                    .get(&r.id)
                    .is_none_or(|touched| *touched < cutoff)
            })
            .map(|r| r.id.clone())
            .collect();

        for id in &stuck {
            if let Some(reminder) = inner.reminders.get_mut(id) {
                reminder.status = ReminderStatus::Pending;
            }
            inner.touched.insert(id.clone(), now);
        }
        Ok(stuck.len() as u64)
    }

    fn user(&self, id: &str) -> StoreResult<Option<User>> {
        Ok(self.lock().users.get(id).cloned())
    }

    fn find_user_by_address(
        &self,
        platform: Platform,
        platform_id: &str,
    ) -> StoreResult<Option<User>> {
        Ok(self
            .lock()
            .users
            .values()
            .find(|u| u.platform == platform && u.platform_id == platform_id)
            .cloned())
    }

    fn upsert_user(&self, user: &User) -> StoreResult<()> {
        self.lock().users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    fn recent(&self, limit: u32) -> StoreResult<Vec<Reminder>> {
        let inner = self.lock();
        let mut reminders: Vec<Reminder> = inner.reminders.values().cloned().collect();
        reminders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        reminders.truncate(limit as usize);
        Ok(reminders)
    }
}

impl AuditSink for MemoryStore {
    fn record(&self, action: AuditAction, details: &str) -> StoreResult<()> {
        self.lock().audit.push(AuditEntry {
            action,
            details: details.to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_claim_is_exclusive() {
        let store = MemoryStore::new();
        let reminder = Reminder::once("u1", "stretch", now() - Duration::minutes(1));
        store.insert(&reminder).unwrap();

        assert!(store.claim(&reminder.id, now()).unwrap().is_some());
        assert!(store.claim(&reminder.id, now()).unwrap().is_none());
    }

    #[test]
    fn test_claim_exactly_one_winner_across_threads() {
        let store = Arc::new(MemoryStore::new());
        let reminder = Reminder::once("u1", "stretch", now() - Duration::minutes(1));
        store.insert(&reminder).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let id = reminder.id.clone();
                std::thread::spawn(move || store.claim(&id, Utc::now()).unwrap().is_some())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_claim_missing_id_is_none() {
        let store = MemoryStore::new();
        assert!(store.claim("nope", now()).unwrap().is_none());
    }

    #[test]
    fn test_release_stuck_uses_claim_instant() {
        let store = MemoryStore::new();
        let reminder = Reminder::once("u1", "stretch", now() - Duration::minutes(1));
        store.insert(&reminder).unwrap();
        store.claim(&reminder.id, now()).unwrap().unwrap();

        let released = store
            .release_stuck(now() + Duration::minutes(20), Duration::minutes(10))
            .unwrap();
        assert_eq!(released, 1);
        assert_eq!(
            store.get(&reminder.id).unwrap().unwrap().status,
            ReminderStatus::Pending
        );
    }

    #[test]
    fn test_save_ignores_unknown_id() {
        let store = MemoryStore::new();
        let reminder = Reminder::once("u1", "ghost", now());
        store.save(&reminder).unwrap();
        assert!(store.get(&reminder.id).unwrap().is_none());
    }
}
