//! The tick engine — early alerts, claimed due deliveries, retry, recurrence.
//!
//! Correctness across concurrent engine instances rests on one primitive:
//! the store's atomic `claim`. A lost claim race is not an error; the other
//! instance owns that reminder for this occurrence. Every other failure is
//! contained per reminder so one bad row never aborts the tick, and the
//! tick itself never propagates an error to the host.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use nudgebot_channels::DeliveryPort;
use nudgebot_core::types::{Reminder, ReminderStatus, User};
use nudgebot_store::{AuditAction, AuditSink, ReminderStore, StoreError};

use crate::compose::Composer;
use crate::recurrence;

/// What one tick did. Zero everywhere means a quiet tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    /// Stuck `processing` claims returned to `pending`.
    pub reclaimed: u64,
    /// Early alerts delivered.
    pub alerts_sent: u32,
    /// Reminders delivered.
    pub delivered: u32,
    /// Delivered reminders rescheduled by their recurrence policy.
    pub rescheduled: u32,
    /// Failed deliveries left eligible for another attempt.
    pub retried: u32,
    /// Reminders that reached a terminal `failed`.
    pub failed: u32,
}

impl TickStats {
    pub fn is_quiet(&self) -> bool {
        *self == Self::default()
    }
}

/// The reminder delivery and scheduling engine.
pub struct ReminderEngine {
    store: Arc<dyn ReminderStore>,
    audit: Arc<dyn AuditSink>,
    port: Arc<dyn DeliveryPort>,
    composer: Arc<dyn Composer>,
    reclaim_after: Duration,
}

impl ReminderEngine {
    pub fn new(
        store: Arc<dyn ReminderStore>,
        audit: Arc<dyn AuditSink>,
        port: Arc<dyn DeliveryPort>,
        composer: Arc<dyn Composer>,
        reclaim_after_mins: i64,
    ) -> Self {
        Self {
            store,
            audit,
            port,
            composer,
            reclaim_after: Duration::minutes(reclaim_after_mins.max(1)),
        }
    }

    /// Run one tick: heal stuck claims, then the early-alert pass, then the
    /// due-delivery pass. Never returns an error; per-reminder failures are
    /// logged and contained.
    pub async fn tick(&self, now: DateTime<Utc>) -> TickStats {
        let mut stats = TickStats::default();

        match self.store.release_stuck(now, self.reclaim_after) {
            Ok(released) if released > 0 => {
                tracing::warn!("♻️ released {released} stuck processing reminders");
                stats.reclaimed = released;
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("stuck-claim release failed: {e}"),
        }

        self.run_early_alerts(now, &mut stats).await;
        self.run_due_deliveries(now, &mut stats).await;
        stats
    }

    /// Drive ticks forever on a fixed cadence. Ticks are serialized: a slow
    /// tick delays the next one instead of overlapping it.
    pub async fn run(self: Arc<Self>, tick_secs: u64) {
        tracing::info!("⏰ reminder engine started (tick every {tick_secs}s)");
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(tick_secs.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let stats = self.tick(Utc::now()).await;
            if !stats.is_quiet() {
                tracing::info!(
                    "tick: {} alerts, {} delivered ({} rescheduled), {} retried, {} failed, {} reclaimed",
                    stats.alerts_sent,
                    stats.delivered,
                    stats.rescheduled,
                    stats.retried,
                    stats.failed,
                    stats.reclaimed,
                );
            }
        }
    }

    async fn run_early_alerts(&self, now: DateTime<Utc>, stats: &mut TickStats) {
        let candidates = match self.store.find_early_alert_candidates() {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!("early-alert scan failed: {e}");
                return;
            }
        };

        for reminder in candidates {
            if !reminder.early_alert_due(now) {
                continue;
            }
            match self.send_early_alert(&reminder).await {
                Ok(true) => stats.alerts_sent += 1,
                Ok(false) => {}
                // No retry bound here: the next tick tries again, and the
                // due-delivery path remains the authoritative notification.
                Err(e) => tracing::warn!("early alert for {} not sent: {e}", reminder.id),
            }
        }
    }

    /// Returns Ok(true) when the alert went out and was recorded.
    async fn send_early_alert(&self, reminder: &Reminder) -> Result<bool, StoreError> {
        let Some(user) = self.store.user(&reminder.user_id)? else {
            tracing::warn!("early alert for {} skipped: owner missing", reminder.id);
            return Ok(false);
        };
        if user.platform_id.is_empty() {
            return Ok(false);
        }
        let minutes = reminder.early_alert_minutes.unwrap_or_default();
        let text = format!(
            "🔔 *Early Alert*: \"{}\" is in {} mins.",
            reminder.text, minutes
        );

        match self.port.send(user.platform, &user.platform_id, &text).await {
            Ok(true) => {}
            Ok(false) | Err(_) => {
                tracing::warn!("early alert delivery failed for {}", reminder.id);
                return Ok(false);
            }
        }

        let mut updated = reminder.clone();
        updated.early_alert_sent = true;
        self.store.save(&updated)?;
        self.audit_record(
            AuditAction::EarlyAlertSent,
            &format!("To: {}, Reminder: {}", user.display_name(), reminder.id),
        );
        Ok(true)
    }

    async fn run_due_deliveries(&self, now: DateTime<Utc>, stats: &mut TickStats) {
        let ids = match self.store.find_due(now) {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!("due scan failed: {e}");
                return;
            }
        };
        if !ids.is_empty() {
            tracing::info!("⏰ {} due reminders to process", ids.len());
        }

        for id in ids {
            let claimed = match self.store.claim(&id, now) {
                Ok(Some(reminder)) => reminder,
                // Lost the race to another instance, or the row was
                // resolved in the meantime. Not an error.
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!("claim failed for {id}: {e}");
                    continue;
                }
            };
            if let Err(e) = self.process_claimed(claimed, now, stats).await {
                // Last durable state wins; this reminder is re-evaluated
                // from it on the next tick.
                tracing::error!("❌ reminder {id} not persisted: {e}");
            }
        }
    }

    async fn process_claimed(
        &self,
        mut reminder: Reminder,
        now: DateTime<Utc>,
        stats: &mut TickStats,
    ) -> Result<(), StoreError> {
        let user = self
            .store
            .user(&reminder.user_id)?
            .filter(|u| !u.platform_id.is_empty());
        let Some(user) = user else {
            // Data-integrity defect, not a transient fault: no retry.
            tracing::error!("❌ reminder {} has no deliverable owner", reminder.id);
            reminder.status = ReminderStatus::Failed;
            self.store.save(&reminder)?;
            stats.failed += 1;
            return Ok(());
        };

        let text = self.composer.rewrite(&reminder.text).await;
        let delivered = match self.port.send(user.platform, &user.platform_id, &text).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!("delivery failed for {}: {e}", reminder.id);
                false
            }
        };

        if delivered {
            self.on_delivered(&mut reminder, &user, now, stats);
        } else {
            self.on_failed(&mut reminder, stats);
        }
        self.store.save(&reminder)?;
        Ok(())
    }

    fn on_delivered(
        &self,
        reminder: &mut Reminder,
        user: &User,
        now: DateTime<Utc>,
        stats: &mut TickStats,
    ) {
        reminder.last_triggered_at = Some(now);
        stats.delivered += 1;
        self.audit_record(
            AuditAction::ReminderSent,
            &format!("To: {}, ID: {}", user.display_name(), reminder.id),
        );

        let next = reminder
            .recurrence
            .as_ref()
            .and_then(|policy| recurrence::next_occurrence(reminder.scheduled_at, policy));
        match next {
            Some(next) => {
                // In-place reset: same row, new occurrence.
                tracing::info!("🔁 reminder {} rescheduled for {next}", reminder.id);
                reminder.scheduled_at = next;
                reminder.status = ReminderStatus::Pending;
                reminder.early_alert_sent = false;
                reminder.retry_count = 0;
                stats.rescheduled += 1;
            }
            // One-shot, or a policy with no next occurrence.
            None => reminder.status = ReminderStatus::Sent,
        }
    }

    fn on_failed(&self, reminder: &mut Reminder, stats: &mut TickStats) {
        reminder.retry_count += 1;
        if reminder.retry_count >= reminder.max_retries {
            reminder.status = ReminderStatus::Failed;
            stats.failed += 1;
            tracing::error!(
                "💀 reminder {} marked failed after {} retries",
                reminder.id,
                reminder.retry_count
            );
            self.audit_record(
                AuditAction::ReminderFailed,
                &format!("ID: {}, Retries: {}", reminder.id, reminder.retry_count),
            );
        } else {
            // Back to pending: eligible again next tick. Backoff
            // granularity is the tick cadence.
            reminder.status = ReminderStatus::Pending;
            stats.retried += 1;
            tracing::warn!(
                "⚠️ reminder {} delivery failed, retry {} of {}",
                reminder.id,
                reminder.retry_count,
                reminder.max_retries
            );
        }
    }

    fn audit_record(&self, action: AuditAction, details: &str) {
        // Fire-and-forget: an audit miss never blocks the pipeline.
        if let Err(e) = self.audit.record(action, details) {
            tracing::warn!("audit write failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::TemplateComposer;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use nudgebot_core::error::{NudgeError, Result};
    use nudgebot_core::types::{Platform, Recurrence};
    use nudgebot_store::MemoryStore;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Delivery port with scripted outcomes; records every send.
    #[derive(Default)]
    struct MockPort {
        /// Outcomes consumed per send; empty means success.
        outcomes: Mutex<VecDeque<Result<bool>>>,
        sent: Mutex<Vec<(Platform, String, String)>>,
    }

    impl MockPort {
        fn failing(times: usize) -> Self {
            let port = Self::default();
            {
                let mut outcomes = port.outcomes.lock().unwrap();
                for _ in 0..times {
                    outcomes.push_back(Err(NudgeError::Channel("provider down".into())));
                }
            }
            port
        }

        fn sent_texts(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().map(|s| s.2.clone()).collect()
        }
    }

    #[async_trait]
    impl DeliveryPort for MockPort {
        async fn send(&self, platform: Platform, address: &str, text: &str) -> Result<bool> {
            let outcome = self.outcomes.lock().unwrap().pop_front();
            match outcome {
                Some(Err(e)) => Err(e),
                Some(Ok(ok)) => {
                    if ok {
                        self.sent.lock().unwrap().push((
                            platform,
                            address.to_string(),
                            text.to_string(),
                        ));
                    }
                    Ok(ok)
                }
                None => {
                    self.sent.lock().unwrap().push((
                        platform,
                        address.to_string(),
                        text.to_string(),
                    ));
                    Ok(true)
                }
            }
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        port: Arc<MockPort>,
        engine: ReminderEngine,
    }

    fn fixture(port: MockPort) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let port = Arc::new(port);
        let engine = ReminderEngine::new(
            store.clone(),
            store.clone(),
            port.clone(),
            Arc::new(TemplateComposer),
            10,
        );
        Fixture { store, port, engine }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
    }

    fn seed_user(store: &MemoryStore) -> User {
        let user = User::new(Platform::Telegram, "555001").with_name("Asha");
        store.upsert_user(&user).unwrap();
        user
    }

    fn audit_count(store: &MemoryStore, action: AuditAction) -> usize {
        store
            .audit_entries()
            .iter()
            .filter(|e| e.action == action)
            .count()
    }

    #[tokio::test]
    async fn test_one_shot_due_reminder_is_sent() {
        let f = fixture(MockPort::default());
        let user = seed_user(&f.store);
        let reminder = Reminder::once(&user.id, "drink water", now() - Duration::minutes(1));
        f.store.insert(&reminder).unwrap();

        let stats = f.engine.tick(now()).await;

        assert_eq!(stats.delivered, 1);
        let loaded = f.store.get(&reminder.id).unwrap().unwrap();
        assert_eq!(loaded.status, ReminderStatus::Sent);
        assert_eq!(loaded.last_triggered_at, Some(now()));
        assert_eq!(audit_count(&f.store, AuditAction::ReminderSent), 1);
        assert_eq!(f.port.sent_texts(), vec!["*Reminder*: drink water"]);
    }

    #[tokio::test]
    async fn test_future_reminder_is_untouched() {
        let f = fixture(MockPort::default());
        let user = seed_user(&f.store);
        let reminder = Reminder::once(&user.id, "later", now() + Duration::hours(1));
        f.store.insert(&reminder).unwrap();

        let stats = f.engine.tick(now()).await;

        assert!(stats.is_quiet());
        let loaded = f.store.get(&reminder.id).unwrap().unwrap();
        assert_eq!(loaded.status, ReminderStatus::Pending);
    }

    #[tokio::test]
    async fn test_recurring_success_resets_in_place() {
        let f = fixture(MockPort::default());
        let user = seed_user(&f.store);
        let mut reminder =
            Reminder::recurring(&user.id, "standup", now() - Duration::minutes(1), Recurrence::Daily)
                .with_early_alert(10);
        reminder.early_alert_sent = true;
        reminder.retry_count = 2;
        let scheduled = reminder.scheduled_at;
        f.store.insert(&reminder).unwrap();

        let stats = f.engine.tick(now()).await;

        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.rescheduled, 1);
        let loaded = f.store.get(&reminder.id).unwrap().unwrap();
        assert_eq!(loaded.status, ReminderStatus::Pending);
        assert_eq!(loaded.scheduled_at, scheduled + Duration::hours(24));
        assert_eq!(loaded.retry_count, 0);
        assert!(!loaded.early_alert_sent);
        assert_eq!(audit_count(&f.store, AuditAction::ReminderSent), 1);
    }

    #[tokio::test]
    async fn test_retry_bound_reaches_terminal_failed() {
        let f = fixture(MockPort::failing(3));
        let user = seed_user(&f.store);
        let reminder =
            Reminder::recurring(&user.id, "standup", now() - Duration::minutes(1), Recurrence::Daily);
        f.store.insert(&reminder).unwrap();

        for tick in 1..=3u32 {
            let tick_now = now() + Duration::minutes(tick as i64);
            f.engine.tick(tick_now).await;
            let loaded = f.store.get(&reminder.id).unwrap().unwrap();
            assert_eq!(loaded.retry_count, tick);
        }

        let loaded = f.store.get(&reminder.id).unwrap().unwrap();
        assert_eq!(loaded.status, ReminderStatus::Failed);
        assert_eq!(loaded.retry_count, 3);
        assert_eq!(audit_count(&f.store, AuditAction::ReminderFailed), 1);
        assert_eq!(audit_count(&f.store, AuditAction::ReminderSent), 0);

        // Terminal: further ticks leave it alone.
        f.engine.tick(now() + Duration::hours(1)).await;
        let after = f.store.get(&reminder.id).unwrap().unwrap();
        assert_eq!(after.status, ReminderStatus::Failed);
        assert_eq!(after.retry_count, 3);
    }

    #[tokio::test]
    async fn test_failure_then_success_recovers() {
        let f = fixture(MockPort::failing(1));
        let user = seed_user(&f.store);
        let reminder = Reminder::once(&user.id, "call mom", now() - Duration::minutes(1));
        f.store.insert(&reminder).unwrap();

        let stats = f.engine.tick(now()).await;
        assert_eq!(stats.retried, 1);
        assert_eq!(
            f.store.get(&reminder.id).unwrap().unwrap().status,
            ReminderStatus::Pending
        );

        let stats = f.engine.tick(now() + Duration::minutes(1)).await;
        assert_eq!(stats.delivered, 1);
        let loaded = f.store.get(&reminder.id).unwrap().unwrap();
        assert_eq!(loaded.status, ReminderStatus::Sent);
        assert_eq!(loaded.retry_count, 1);
    }

    #[tokio::test]
    async fn test_missing_owner_address_fails_without_retry() {
        let f = fixture(MockPort::default());
        let mut user = User::new(Platform::Telegram, "");
        user.name = Some("Ghost".into());
        f.store.upsert_user(&user).unwrap();
        let reminder = Reminder::once(&user.id, "orphaned", now() - Duration::minutes(1));
        f.store.insert(&reminder).unwrap();

        let stats = f.engine.tick(now()).await;

        assert_eq!(stats.failed, 1);
        let loaded = f.store.get(&reminder.id).unwrap().unwrap();
        assert_eq!(loaded.status, ReminderStatus::Failed);
        assert_eq!(loaded.retry_count, 0);
        assert!(f.port.sent_texts().is_empty());
    }

    #[tokio::test]
    async fn test_early_alert_fires_once_inside_window() {
        let f = fixture(MockPort::default());
        let user = seed_user(&f.store);
        let reminder = Reminder::once(&user.id, "meeting", now() + Duration::minutes(5))
            .with_early_alert(10);
        f.store.insert(&reminder).unwrap();

        // Before the window: nothing.
        let stats = f.engine.tick(now() - Duration::minutes(10)).await;
        assert_eq!(stats.alerts_sent, 0);

        // Inside the window: exactly one alert.
        let stats = f.engine.tick(now()).await;
        assert_eq!(stats.alerts_sent, 1);
        assert!(f.store.get(&reminder.id).unwrap().unwrap().early_alert_sent);
        assert_eq!(audit_count(&f.store, AuditAction::EarlyAlertSent), 1);
        assert_eq!(
            f.port.sent_texts(),
            vec!["🔔 *Early Alert*: \"meeting\" is in 10 mins."]
        );

        // Idempotent on the next tick.
        let stats = f.engine.tick(now() + Duration::minutes(1)).await;
        assert_eq!(stats.alerts_sent, 0);
        assert_eq!(audit_count(&f.store, AuditAction::EarlyAlertSent), 1);
    }

    #[tokio::test]
    async fn test_early_alert_failure_leaves_state_for_next_tick() {
        let f = fixture(MockPort::failing(1));
        let user = seed_user(&f.store);
        let reminder = Reminder::once(&user.id, "meeting", now() + Duration::minutes(5))
            .with_early_alert(10);
        f.store.insert(&reminder).unwrap();

        let stats = f.engine.tick(now()).await;
        assert_eq!(stats.alerts_sent, 0);
        assert!(!f.store.get(&reminder.id).unwrap().unwrap().early_alert_sent);

        // Unbounded retry: the next tick delivers the alert.
        let stats = f.engine.tick(now() + Duration::minutes(1)).await;
        assert_eq!(stats.alerts_sent, 1);
        assert!(f.store.get(&reminder.id).unwrap().unwrap().early_alert_sent);
    }

    #[tokio::test]
    async fn test_already_claimed_reminder_is_skipped() {
        let f = fixture(MockPort::default());
        let user = seed_user(&f.store);
        let reminder = Reminder::once(&user.id, "taken", now() - Duration::minutes(1));
        f.store.insert(&reminder).unwrap();
        // Another instance holds the claim.
        f.store.claim(&reminder.id, now()).unwrap().unwrap();

        let stats = f.engine.tick(now()).await;

        assert_eq!(stats.delivered, 0);
        assert!(f.port.sent_texts().is_empty());
        assert_eq!(
            f.store.get(&reminder.id).unwrap().unwrap().status,
            ReminderStatus::Processing
        );
    }

    #[tokio::test]
    async fn test_stuck_claim_is_reclaimed_and_delivered() {
        let f = fixture(MockPort::default());
        let user = seed_user(&f.store);
        let reminder = Reminder::once(&user.id, "orphan claim", now() - Duration::minutes(1));
        f.store.insert(&reminder).unwrap();
        // A crashed instance claimed it long ago.
        f.store.claim(&reminder.id, now()).unwrap().unwrap();

        let stats = f.engine.tick(now() + Duration::minutes(20)).await;

        assert_eq!(stats.reclaimed, 1);
        assert_eq!(stats.delivered, 1);
        assert_eq!(
            f.store.get(&reminder.id).unwrap().unwrap().status,
            ReminderStatus::Sent
        );
    }

    #[tokio::test]
    async fn test_one_bad_reminder_does_not_abort_the_tick() {
        let f = fixture(MockPort::failing(1));
        let user = seed_user(&f.store);
        let first = Reminder::once(&user.id, "first", now() - Duration::minutes(2));
        let second = Reminder::once(&user.id, "second", now() - Duration::minutes(1));
        f.store.insert(&first).unwrap();
        f.store.insert(&second).unwrap();

        let stats = f.engine.tick(now()).await;

        // One delivery failed, the other went through regardless.
        assert_eq!(stats.retried + stats.delivered, 2);
        assert_eq!(stats.delivered, 1);
    }
}
