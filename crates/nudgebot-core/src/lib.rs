//! # Nudgebot Core
//!
//! Shared foundation for the reminder engine: domain types, configuration,
//! the workspace error type, and the intake rate limiter.

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod types;

pub use config::NudgebotConfig;
pub use error::{NudgeError, Result};
pub use ratelimit::RateLimiter;
pub use types::{Platform, Recurrence, Reminder, ReminderStatus, User};
