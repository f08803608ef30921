//! Telegram Bot API channel — message sending via `sendMessage`.

use serde::Deserialize;

use nudgebot_core::error::{NudgeError, Result};

/// Telegram Bot API channel.
pub struct TelegramChannel {
    bot_token: String,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(bot_token: String) -> Self {
        Self {
            bot_token,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{}", self.bot_token, method)
    }

    /// Send a text message to a chat.
    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<()> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "Markdown",
        });

        let response = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await
            .map_err(classify_reqwest)?;

        let result: TelegramApiResponse<TelegramMessage> = response
            .json()
            .await
            .map_err(|e| NudgeError::Channel(format!("invalid Telegram response: {e}")))?;

        if !result.ok {
            return Err(NudgeError::Channel(format!(
                "Telegram sendMessage failed: {}",
                result.description.unwrap_or_default()
            )));
        }

        if let Some(message) = result.result {
            tracing::info!(
                "✅ Telegram message delivered: chat_id={chat_id}, message_id={}",
                message.message_id
            );
        }
        Ok(())
    }
}

fn classify_reqwest(e: reqwest::Error) -> NudgeError {
    if e.is_connect() || e.is_timeout() {
        NudgeError::Transport(format!("Telegram request failed: {e}"))
    } else {
        NudgeError::Channel(format!("Telegram request failed: {e}"))
    }
}

/// Standard Bot API envelope.
#[derive(Debug, Deserialize)]
struct TelegramApiResponse<T> {
    ok: bool,
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct TelegramMessage {
    message_id: i64,
}
