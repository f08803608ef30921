//! WhatsApp Business Cloud API channel.
//!
//! Sends through the official Cloud API. Requires an access token and a
//! Phone Number ID from Meta Business Suite.

use nudgebot_core::error::{NudgeError, Result};

/// WhatsApp Business channel.
pub struct WhatsAppChannel {
    access_token: String,
    phone_number_id: String,
    client: reqwest::Client,
}

impl WhatsAppChannel {
    pub fn new(access_token: String, phone_number_id: String) -> Self {
        Self {
            access_token,
            phone_number_id,
            client: reqwest::Client::new(),
        }
    }

    /// Send a text message to a phone number.
    pub async fn send_text(&self, to: &str, text: &str) -> Result<()> {
        let url = format!(
            "https://graph.facebook.com/v21.0/{}/messages",
            self.phone_number_id
        );

        let body = serde_json::json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
            "type": "text",
            "text": { "preview_url": false, "body": text }
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await
            .map_err(classify_reqwest)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(NudgeError::Channel(format!(
                "WhatsApp API error {status}: {error_text}"
            )));
        }

        tracing::info!("✅ WhatsApp message delivered: to={to}");
        Ok(())
    }
}

fn classify_reqwest(e: reqwest::Error) -> NudgeError {
    if e.is_connect() || e.is_timeout() {
        NudgeError::Transport(format!("WhatsApp request failed: {e}"))
    } else {
        NudgeError::Channel(format!("WhatsApp request failed: {e}"))
    }
}
