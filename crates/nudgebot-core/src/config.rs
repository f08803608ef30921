//! Nudgebot configuration system.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{NudgeError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NudgebotConfig {
    /// Path to the SQLite database.
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
    #[serde(default)]
    pub personality: PersonalityConfig,
    #[serde(default)]
    pub intake: IntakeConfig,
}

fn default_database() -> String {
    "~/.nudgebot/nudgebot.db".into()
}

impl Default for NudgebotConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            scheduler: SchedulerConfig::default(),
            telegram: TelegramConfig::default(),
            whatsapp: WhatsAppConfig::default(),
            personality: PersonalityConfig::default(),
            intake: IntakeConfig::default(),
        }
    }
}

/// Tick loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between ticks.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// Minutes after which a `processing` reminder is considered stuck
    /// and released back to `pending`.
    #[serde(default = "default_reclaim_after_mins")]
    pub reclaim_after_mins: i64,
}

fn default_tick_secs() -> u64 {
    60
}
fn default_reclaim_after_mins() -> i64 {
    10
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            reclaim_after_mins: default_reclaim_after_mins(),
        }
    }
}

/// Telegram Bot API settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot token. Falls back to the TELEGRAM_BOT_TOKEN env var when empty.
    #[serde(default)]
    pub bot_token: String,
}

impl TelegramConfig {
    pub fn resolved_token(&self) -> Option<String> {
        if !self.bot_token.is_empty() {
            return Some(self.bot_token.clone());
        }
        std::env::var("TELEGRAM_BOT_TOKEN").ok().filter(|t| !t.is_empty())
    }
}

/// WhatsApp Business Cloud API settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    /// Graph API access token. Falls back to WHATSAPP_ACCESS_TOKEN.
    #[serde(default)]
    pub access_token: String,
    /// Phone Number ID. Falls back to WHATSAPP_PHONE_NUMBER_ID.
    #[serde(default)]
    pub phone_number_id: String,
}

impl WhatsAppConfig {
    pub fn resolved(&self) -> Option<(String, String)> {
        let token = if self.access_token.is_empty() {
            std::env::var("WHATSAPP_ACCESS_TOKEN").ok()?
        } else {
            self.access_token.clone()
        };
        let phone_id = if self.phone_number_id.is_empty() {
            std::env::var("WHATSAPP_PHONE_NUMBER_ID").ok()?
        } else {
            self.phone_number_id.clone()
        };
        if token.is_empty() || phone_id.is_empty() {
            return None;
        }
        Some((token, phone_id))
    }
}

/// Message composition (friendly rewrite) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonalityConfig {
    /// API key for the OpenAI-compatible endpoint. Falls back to
    /// GROQ_API_KEY. Empty disables the rewrite hook.
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_personality_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_personality_model")]
    pub model: String,
}

fn default_personality_endpoint() -> String {
    "https://api.groq.com/openai/v1".into()
}
fn default_personality_model() -> String {
    "llama-3.1-8b-instant".into()
}

impl Default for PersonalityConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: default_personality_endpoint(),
            model: default_personality_model(),
        }
    }
}

impl PersonalityConfig {
    pub fn resolved_key(&self) -> Option<String> {
        if !self.api_key.is_empty() {
            return Some(self.api_key.clone());
        }
        std::env::var("GROQ_API_KEY").ok().filter(|k| !k.is_empty())
    }
}

/// Intake rate limiting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntakeConfig {
    /// Max accepted messages per user per window.
    #[serde(default = "default_intake_limit")]
    pub limit: u32,
    /// Rolling window length in seconds.
    #[serde(default = "default_intake_window_secs")]
    pub window_secs: i64,
    /// Identical texts inside this window are dropped as duplicates.
    #[serde(default = "default_duplicate_secs")]
    pub duplicate_secs: i64,
}

fn default_intake_limit() -> u32 {
    10
}
fn default_intake_window_secs() -> i64 {
    60
}
fn default_duplicate_secs() -> i64 {
    10
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            limit: default_intake_limit(),
            window_secs: default_intake_window_secs(),
            duplicate_secs: default_duplicate_secs(),
        }
    }
}

impl NudgebotConfig {
    /// Load config from the default path (~/.nudgebot/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| NudgeError::Config(format!("failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| NudgeError::Config(format!("failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| NudgeError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Default config path (~/.nudgebot/config.toml).
    pub fn default_path() -> PathBuf {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(".nudgebot").join("config.toml")
    }
}
