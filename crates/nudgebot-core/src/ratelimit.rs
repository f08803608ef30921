//! Intake rate limiter — a bounded, time-windowed map per user.
//!
//! Injected into the intake path; not a global. The host owns the lifecycle
//! and calls [`RateLimiter::sweep`] periodically to drop idle users.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Limited,
}

struct LastMessage {
    text: String,
    at: DateTime<Utc>,
}

/// Per-user rolling-window rate limiter with duplicate suppression.
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    duplicate_window: Duration,
    timestamps: HashMap<String, Vec<DateTime<Utc>>>,
    last_message: HashMap<String, LastMessage>,
}

impl RateLimiter {
    pub fn new(limit: u32, window_secs: i64, duplicate_secs: i64) -> Self {
        Self {
            limit,
            window: Duration::seconds(window_secs.max(1)),
            duplicate_window: Duration::seconds(duplicate_secs.max(1)),
            timestamps: HashMap::new(),
            last_message: HashMap::new(),
        }
    }

    /// Record one inbound message and decide whether it is allowed.
    pub fn check(&mut self, user_id: &str, now: DateTime<Utc>) -> RateDecision {
        let stamps = self.timestamps.entry(user_id.to_string()).or_default();
        stamps.retain(|t| now - *t < self.window);

        if stamps.len() >= self.limit as usize {
            return RateDecision::Limited;
        }
        stamps.push(now);
        RateDecision::Allowed
    }

    /// Whether `text` repeats the user's previous message inside the
    /// duplicate window. Records the message either way.
    pub fn is_duplicate(&mut self, user_id: &str, text: &str, now: DateTime<Utc>) -> bool {
        let duplicate = self
            .last_message
            .get(user_id)
            .is_some_and(|last| last.text == text && now - last.at < self.duplicate_window);

        self.last_message.insert(
            user_id.to_string(),
            LastMessage {
                text: text.to_string(),
                at: now,
            },
        );
        duplicate
    }

    /// Drop users with no activity in the last hour. Keeps the maps bounded.
    pub fn sweep(&mut self, now: DateTime<Utc>) {
        let idle = Duration::hours(1);
        self.timestamps
            .retain(|_, stamps| stamps.last().is_some_and(|t| now - *t < idle));
        self.last_message.retain(|_, last| now - last.at < idle);
    }

    /// Number of users currently tracked.
    pub fn tracked_users(&self) -> usize {
        self.timestamps.len()
    }
}
