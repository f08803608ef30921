//! # Nudgebot
//!
//! Chat reminder engine over Telegram and WhatsApp.
//!
//! Usage:
//!   nudgebot run                          # Start the tick loop
//!   nudgebot add --platform telegram --address 555001 \
//!       --text "drink water" --at "2026-03-10T12:00:00Z"
//!   nudgebot inspect                      # Dump recent reminders

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, NaiveDateTime, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use nudgebot_channels::{ChannelRouter, TelegramChannel, WhatsAppChannel};
use nudgebot_core::NudgebotConfig;
use nudgebot_core::ratelimit::{RateDecision, RateLimiter};
use nudgebot_core::types::{Platform, Recurrence, Reminder, User};
use nudgebot_engine::{Composer, LlmComposer, ReminderEngine, TemplateComposer};
use nudgebot_store::{ReminderStore, SqliteStore};

#[derive(Parser)]
#[command(name = "nudgebot", version, about = "⏰ Nudgebot — chat reminder engine")]
struct Cli {
    /// Config file path (default: ~/.nudgebot/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the reminder tick loop
    Run,
    /// Create a reminder (minimal intake surface)
    Add {
        /// Chat platform: telegram or whatsapp
        #[arg(long)]
        platform: String,
        /// Platform address: Telegram chat id or WhatsApp phone number
        #[arg(long)]
        address: String,
        /// Reminder text
        #[arg(long)]
        text: String,
        /// Due time, RFC 3339 ("2026-03-10T12:00:00Z") or "YYYY-MM-DD HH:MM" UTC
        #[arg(long)]
        at: String,
        /// Recurrence: daily, weekly, monthly, or a day count
        #[arg(long)]
        recur: Option<String>,
        /// Minutes before the due time to send an early alert
        #[arg(long)]
        early_alert: Option<i64>,
        /// Display name for the user
        #[arg(long)]
        name: Option<String>,
    },
    /// Show recent reminders
    Inspect {
        #[arg(long, default_value = "20")]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "nudgebot=debug"
    } else {
        "nudgebot=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => NudgebotConfig::load_from(Path::new(path))?,
        None => NudgebotConfig::load()?,
    };

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Add {
            platform,
            address,
            text,
            at,
            recur,
            early_alert,
            name,
        } => add(config, &platform, &address, &text, &at, recur, early_alert, name),
        Command::Inspect { limit } => inspect(config, limit),
    }
}

fn open_store(config: &NudgebotConfig) -> Result<Arc<SqliteStore>> {
    let path = PathBuf::from(shellexpand::tilde(&config.database).to_string());
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = SqliteStore::open(&path)
        .with_context(|| format!("failed to open database at {}", path.display()))?;
    Ok(Arc::new(store))
}

async fn run(config: NudgebotConfig) -> Result<()> {
    let store = open_store(&config)?;

    let mut router = ChannelRouter::new();
    if let Some(token) = config.telegram.resolved_token() {
        router = router.with_telegram(TelegramChannel::new(token));
        tracing::info!("📨 Telegram channel configured");
    }
    if let Some((token, phone_id)) = config.whatsapp.resolved() {
        router = router.with_whatsapp(WhatsAppChannel::new(token, phone_id));
        tracing::info!("📨 WhatsApp channel configured");
    }
    if router.is_empty() {
        tracing::warn!("⚠️ no chat channels configured — deliveries will fail until one is");
    }

    let composer: Arc<dyn Composer> = match config.personality.resolved_key() {
        Some(key) => {
            tracing::info!("💬 friendly rewrite enabled ({})", config.personality.model);
            Arc::new(LlmComposer::new(
                key,
                config.personality.endpoint.clone(),
                config.personality.model.clone(),
            ))
        }
        None => Arc::new(TemplateComposer),
    };

    let engine = Arc::new(ReminderEngine::new(
        store.clone(),
        store.clone(),
        Arc::new(router),
        composer,
        config.scheduler.reclaim_after_mins,
    ));
    engine.run(config.scheduler.tick_secs).await;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn add(
    config: NudgebotConfig,
    platform: &str,
    address: &str,
    text: &str,
    at: &str,
    recur: Option<String>,
    early_alert: Option<i64>,
    name: Option<String>,
) -> Result<()> {
    let platform = Platform::parse(platform)
        .with_context(|| format!("unknown platform '{platform}' (telegram or whatsapp)"))?;
    let scheduled_at = parse_when(at)?;
    let recurrence = recur.as_deref().map(parse_recurrence).transpose()?;

    let store = open_store(&config)?;

    let user = match store.find_user_by_address(platform, address)? {
        Some(existing) => existing,
        None => {
            let mut user = User::new(platform, address);
            user.name = name.clone();
            store.upsert_user(&user)?;
            user
        }
    };
    if user.banned {
        bail!("user {} is banned", user.display_name());
    }

    // Same gate the inbound chat path applies before accepting a message.
    let mut limiter = RateLimiter::new(
        config.intake.limit,
        config.intake.window_secs,
        config.intake.duplicate_secs,
    );
    let now = Utc::now();
    if limiter.check(&user.id, now) == RateDecision::Limited {
        bail!("rate limit exceeded for {}", user.display_name());
    }
    if limiter.is_duplicate(&user.id, text, now) {
        bail!("duplicate message dropped");
    }

    let mut reminder = match recurrence {
        Some(policy) => Reminder::recurring(&user.id, text, scheduled_at, policy),
        None => Reminder::once(&user.id, text, scheduled_at),
    };
    if let Some(minutes) = early_alert {
        reminder = reminder.with_early_alert(minutes);
    }
    store.insert(&reminder)?;

    println!(
        "Created reminder {} for {} ({platform}) at {}",
        reminder.id,
        user.display_name(),
        reminder.scheduled_at.to_rfc3339()
    );
    Ok(())
}

fn inspect(config: NudgebotConfig, limit: u32) -> Result<()> {
    let store = open_store(&config)?;
    let now = Utc::now();
    let reminders = store.recent(limit)?;
    println!("Current time (UTC): {}", now.to_rfc3339());
    println!("Found {} recent reminders:", reminders.len());

    for reminder in reminders {
        let owner = store
            .user(&reminder.user_id)?
            .map(|u| format!("{} ({})", u.display_name(), u.platform))
            .unwrap_or_else(|| "Unknown".to_string());
        let due_in = (reminder.scheduled_at - now).num_seconds();
        println!("------------------------------------------------");
        println!("ID: {}", reminder.id);
        println!("Text: {}", reminder.text);
        println!("Status: {}", reminder.status);
        println!("Scheduled (UTC): {}", reminder.scheduled_at.to_rfc3339());
        println!("Due in: {due_in} seconds");
        println!("User: {owner}");
    }
    Ok(())
}

fn parse_when(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M")
        .with_context(|| format!("cannot parse time '{raw}' (RFC 3339 or YYYY-MM-DD HH:MM)"))?;
    Ok(DateTime::from_naive_utc_and_offset(naive, Utc))
}

fn parse_recurrence(raw: &str) -> Result<Recurrence> {
    match raw {
        "daily" => Ok(Recurrence::Daily),
        "weekly" => Ok(Recurrence::Weekly),
        "monthly" => Ok(Recurrence::Monthly),
        other => {
            let days: i64 = other
                .parse()
                .with_context(|| format!("unknown recurrence '{other}'"))?;
            if days < 1 {
                bail!("recurrence interval must be at least 1 day");
            }
            Ok(Recurrence::Interval { days })
        }
    }
}
