//! Message composition hook — optional friendly rewrite of reminder text.
//!
//! The hook must never block or fail the pipeline: whatever happens, it
//! returns at least a usable rendering of the original text.

use async_trait::async_trait;

use nudgebot_core::error::{NudgeError, Result};

/// Rewrites reminder text before delivery.
#[async_trait]
pub trait Composer: Send + Sync {
    async fn rewrite(&self, text: &str) -> String;
}

/// Default composer — plain template, no network.
pub struct TemplateComposer;

#[async_trait]
impl Composer for TemplateComposer {
    async fn rewrite(&self, text: &str) -> String {
        format!("*Reminder*: {text}")
    }
}

/// LLM-backed composer against an OpenAI-compatible chat endpoint.
/// Any error falls back to the template output.
pub struct LlmComposer {
    api_key: String,
    endpoint: String,
    model: String,
    client: reqwest::Client,
}

const SYSTEM_PROMPT: &str = "You rewrite reminder messages to be warm, friendly, and short. \
     Keep the meaning intact. Reply with the rewritten message only, no preamble.";

impl LlmComposer {
    pub fn new(api_key: String, endpoint: String, model: String) -> Self {
        Self {
            api_key,
            endpoint,
            model,
            client: reqwest::Client::new(),
        }
    }

    async fn generate(&self, text: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.endpoint.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": text },
            ],
            "temperature": 0.7,
            "max_tokens": 120,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| NudgeError::Channel(format!("compose request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(NudgeError::Channel(format!(
                "compose endpoint returned {}",
                response.status()
            )));
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| NudgeError::Channel(format!("invalid compose response: {e}")))?;
        let content = value["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .trim()
            .to_string();
        if content.is_empty() {
            return Err(NudgeError::Channel("empty compose reply".to_string()));
        }
        Ok(content)
    }
}

#[async_trait]
impl Composer for LlmComposer {
    async fn rewrite(&self, text: &str) -> String {
        // Not worth a round trip for system-like stubs.
        if text.chars().count() < 3 {
            return text.to_string();
        }
        match self.generate(text).await {
            Ok(friendly) => friendly,
            Err(e) => {
                tracing::warn!("compose fallback for \"{text}\": {e}");
                TemplateComposer.rewrite(text).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_template_output() {
        assert_eq!(
            TemplateComposer.rewrite("drink water").await,
            "*Reminder*: drink water"
        );
    }

    #[tokio::test]
    async fn test_llm_passes_short_text_through() {
        let composer = LlmComposer::new(
            "key".into(),
            "http://127.0.0.1:9".into(),
            "test-model".into(),
        );
        assert_eq!(composer.rewrite("hi").await, "hi");
    }

    #[tokio::test]
    async fn test_llm_falls_back_on_unreachable_endpoint() {
        // Port 9 (discard) refuses connections, so generate() errors out.
        let composer = LlmComposer::new(
            "key".into(),
            "http://127.0.0.1:9".into(),
            "test-model".into(),
        );
        assert_eq!(composer.rewrite("drink water").await, "*Reminder*: drink water");
    }
}
