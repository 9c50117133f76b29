//! Telegram channel: webhook update parsing, sendMessage and setWebhook via Bot API.

use crate::channels::inbound::{InboundDelivery, ParsedInbound};
use crate::channels::registry::{Transport, TransportError};
use crate::identity::{ChannelKind, ChannelRecord};
use async_trait::async_trait;
use serde::Deserialize;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Telegram update payload (webhook POST body).
#[derive(Debug, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    pub chat: TelegramChat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
}

impl TelegramUpdate {
    /// Text messages become deliveries; edits, stickers, joins and the like are no-ops.
    /// Message ids are only unique per chat, so the external id is `"{chat_id}:{message_id}"`.
    pub fn into_inbound(self) -> ParsedInbound {
        let Some(msg) = self.message else {
            return ParsedInbound::NotText;
        };
        match msg.text {
            Some(text) if !text.trim().is_empty() => ParsedInbound::Text(InboundDelivery {
                sender_id: msg.chat.id.to_string(),
                external_message_id: format!("{}:{}", msg.chat.id, msg.message_id),
                text,
            }),
            _ => ParsedInbound::NotText,
        }
    }
}

/// Sends replies through the Telegram Bot API using each channel's bot token.
pub struct TelegramTransport {
    api_base: String,
    client: reqwest::Client,
}

impl Default for TelegramTransport {
    fn default() -> Self {
        Self::new(telegram_api_base())
    }
}

impl TelegramTransport {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn token<'a>(&self, channel: &'a ChannelRecord) -> Result<&'a str, TransportError> {
        channel
            .bot_token()
            .ok_or_else(|| TransportError::MissingCredential(channel.id.clone()))
    }

    /// Set webhook URL. Telegram then POSTs updates to the URL.
    pub async fn set_webhook(
        &self,
        channel: &ChannelRecord,
        url: &str,
    ) -> Result<(), TransportError> {
        let token = self.token(channel)?;
        let api_url = format!("{}/bot{}/setWebhook", self.api_base, token);
        let body = serde_json::json!({ "url": url, "allowed_updates": ["message"] });
        let res = self.client.post(&api_url).json(&body).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(TransportError::Api(format!(
                "setWebhook failed: {} {}",
                status, body
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Telegram
    }

    /// Send a text message to a chat via sendMessage API.
    async fn send_message(
        &self,
        channel: &ChannelRecord,
        chat_id: &str,
        text: &str,
    ) -> Result<(), TransportError> {
        let token = self.token(channel)?;
        let url = format!("{}/bot{}/sendMessage", self.api_base, token);
        let body = serde_json::json!({ "chat_id": chat_id, "text": text });
        let res = self.client.post(&url).json(&body).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(TransportError::Api(format!(
                "sendMessage failed: {} {}",
                status, body
            )));
        }
        Ok(())
    }
}

/// Resolve Telegram bot API base URL (for tests or custom endpoints).
pub fn telegram_api_base() -> String {
    std::env::var("TELEGRAM_API_BASE").unwrap_or_else(|_| TELEGRAM_API_BASE.to_string())
}
