//! # Nudgebot Channels
//!
//! Chat platform delivery. [`DeliveryPort`] is the seam the engine sends
//! through; [`ChannelRouter`] is the concrete port, dispatching by platform
//! to the configured channel implementations.

pub mod telegram;
pub mod whatsapp;

use async_trait::async_trait;

use nudgebot_core::error::{NudgeError, Result};
use nudgebot_core::types::Platform;

pub use telegram::TelegramChannel;
pub use whatsapp::WhatsAppChannel;

/// Outbound message delivery.
///
/// `Ok(false)` and `Err(_)` both mean the delivery did not happen; callers
/// must treat them identically. Implementations may retry transport-level
/// hiccups internally but must eventually surface a failure so the
/// caller's retry accounting advances.
#[async_trait]
pub trait DeliveryPort: Send + Sync {
    async fn send(&self, platform: Platform, address: &str, text: &str) -> Result<bool>;
}

/// Immediate attempts per send before a transport failure surfaces.
const TRANSPORT_ATTEMPTS: u32 = 3;

/// Platform-keyed delivery router.
#[derive(Default)]
pub struct ChannelRouter {
    telegram: Option<TelegramChannel>,
    whatsapp: Option<WhatsAppChannel>,
}

impl ChannelRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_telegram(mut self, channel: TelegramChannel) -> Self {
        self.telegram = Some(channel);
        self
    }

    pub fn with_whatsapp(mut self, channel: WhatsAppChannel) -> Self {
        self.whatsapp = Some(channel);
        self
    }

    /// True when no channel is configured at all.
    pub fn is_empty(&self) -> bool {
        self.telegram.is_none() && self.whatsapp.is_none()
    }

    async fn send_once(&self, platform: Platform, address: &str, text: &str) -> Result<()> {
        match platform {
            Platform::Telegram => match &self.telegram {
                Some(channel) => channel.send_message(address, text).await,
                None => Err(NudgeError::ChannelUnavailable(platform.to_string())),
            },
            Platform::Whatsapp => match &self.whatsapp {
                Some(channel) => channel.send_text(address, text).await,
                None => Err(NudgeError::ChannelUnavailable(platform.to_string())),
            },
        }
    }
}

#[async_trait]
impl DeliveryPort for ChannelRouter {
    async fn send(&self, platform: Platform, address: &str, text: &str) -> Result<bool> {
        let mut last_transport_err = None;
        for attempt in 1..=TRANSPORT_ATTEMPTS {
            match self.send_once(platform, address, text).await {
                Ok(()) => return Ok(true),
                Err(err @ NudgeError::Transport(_)) => {
                    tracing::debug!(
                        "transport hiccup on {platform} attempt {attempt}/{TRANSPORT_ATTEMPTS}: {err}"
                    );
                    last_transport_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_transport_err
            .unwrap_or_else(|| NudgeError::Channel("delivery failed".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconfigured_platform_is_hard_error() {
        let router = ChannelRouter::new();
        let err = router
            .send(Platform::Telegram, "12345", "hello")
            .await
            .unwrap_err();
        assert!(matches!(err, NudgeError::ChannelUnavailable(_)));
    }

    #[test]
    fn test_empty_router() {
        assert!(ChannelRouter::new().is_empty());
        let router =
            ChannelRouter::new().with_telegram(TelegramChannel::new("123:abc".to_string()));
        assert!(!router.is_empty());
    }
}
