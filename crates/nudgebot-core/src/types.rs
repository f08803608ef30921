//! Domain types — the reminder data model and its owning user.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Chat platform a user is reachable on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Telegram,
    Whatsapp,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Telegram => "telegram",
            Platform::Whatsapp => "whatsapp",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "telegram" => Some(Platform::Telegram),
            "whatsapp" => Some(Platform::Whatsapp),
            _ => None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reminder lifecycle status.
///
/// `Processing` is transient: it marks a claimed reminder between the
/// claim and the final write-back of the delivery outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderStatus {
    Pending,
    Processing,
    Sent,
    Failed,
}

impl ReminderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderStatus::Pending => "pending",
            ReminderStatus::Processing => "processing",
            ReminderStatus::Sent => "sent",
            ReminderStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ReminderStatus::Pending),
            "processing" => Some(ReminderStatus::Processing),
            "sent" => Some(ReminderStatus::Sent),
            "failed" => Some(ReminderStatus::Failed),
            _ => None,
        }
    }

    /// Terminal statuses are never mutated again for one-shot reminders.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReminderStatus::Sent | ReminderStatus::Failed)
    }
}

impl fmt::Display for ReminderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How `scheduled_at` advances after a successful recurring delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Recurrence {
    Daily,
    Weekly,
    Monthly,
    Interval { days: i64 },
}

impl Recurrence {
    /// Rebuild a policy from its storage columns.
    /// Unknown kinds or non-positive intervals load as "no recurrence".
    pub fn from_parts(kind: &str, interval: Option<i64>) -> Option<Self> {
        match kind {
            "daily" => Some(Recurrence::Daily),
            "weekly" => Some(Recurrence::Weekly),
            "monthly" => Some(Recurrence::Monthly),
            "interval" => match interval {
                Some(days) if days > 0 => Some(Recurrence::Interval { days }),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Recurrence::Daily => "daily",
            Recurrence::Weekly => "weekly",
            Recurrence::Monthly => "monthly",
            Recurrence::Interval { .. } => "interval",
        }
    }

    pub fn interval_days(&self) -> Option<i64> {
        match self {
            Recurrence::Interval { days } => Some(*days),
            _ => None,
        }
    }
}

/// A scheduled reminder — the unit of work the engine processes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    /// Unique reminder ID.
    pub id: String,
    /// Owning user ID. Never empty once created.
    pub user_id: String,
    /// Message to deliver.
    pub text: String,
    /// Untouched source text, kept for audit and recurrence copies.
    pub original_text: String,
    /// When the reminder is due. Advanced in place on each recurrence.
    pub scheduled_at: DateTime<Utc>,
    pub status: ReminderStatus,
    /// Minutes before `scheduled_at` to send a pre-notification.
    pub early_alert_minutes: Option<i64>,
    /// Idempotency flag for the early alert. Reset only when a new
    /// recurrence cycle begins.
    pub early_alert_sent: bool,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Absent means one-shot.
    pub recurrence: Option<Recurrence>,
    /// Last successful delivery, for audit.
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

pub const DEFAULT_MAX_RETRIES: u32 = 3;

impl Reminder {
    /// Create a one-shot reminder in `pending`.
    pub fn once(user_id: &str, text: &str, at: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            text: text.to_string(),
            original_text: text.to_string(),
            scheduled_at: at,
            status: ReminderStatus::Pending,
            early_alert_minutes: None,
            early_alert_sent: false,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            recurrence: None,
            last_triggered_at: None,
            created_at: Utc::now(),
        }
    }

    /// Create a recurring reminder in `pending`.
    pub fn recurring(user_id: &str, text: &str, at: DateTime<Utc>, policy: Recurrence) -> Self {
        let mut reminder = Self::once(user_id, text, at);
        reminder.recurrence = Some(policy);
        reminder
    }

    /// Attach an early-alert window. Values below 1 minute are ignored.
    pub fn with_early_alert(mut self, minutes: i64) -> Self {
        if minutes > 0 {
            self.early_alert_minutes = Some(minutes);
        }
        self
    }

    /// Whether this reminder is due for delivery.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ReminderStatus::Pending && self.scheduled_at <= now
    }

    /// Whether the early-alert window has opened and no alert went out yet.
    pub fn early_alert_due(&self, now: DateTime<Utc>) -> bool {
        if self.status != ReminderStatus::Pending || self.early_alert_sent {
            return false;
        }
        match self.early_alert_minutes {
            Some(minutes) if minutes > 0 => now >= self.scheduled_at - Duration::minutes(minutes),
            _ => false,
        }
    }
}

/// A chat user. The engine only ever reads this; intake owns mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub platform: Platform,
    /// Platform-specific address: Telegram chat id or WhatsApp phone number.
    pub platform_id: String,
    pub name: Option<String>,
    pub language: String,
    pub banned: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(platform: Platform, platform_id: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            platform,
            platform_id: platform_id.to_string(),
            name: None,
            language: "en".to_string(),
            banned: false,
            created_at: Utc::now(),
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Display name for audit entries.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unknown")
    }
}
