//! WhatsApp Cloud API: webhook payload parsing and text sends through the Graph API.

use crate::channels::inbound::{InboundDelivery, ParsedInbound};
use crate::channels::registry::{Transport, TransportError};
use crate::identity::{ChannelKind, ChannelRecord};
use async_trait::async_trait;
use serde::Deserialize;

const WHATSAPP_API_BASE: &str = "https://graph.facebook.com/v19.0";

/// Webhook body: `entry[].changes[].value` carries the business metadata and messages.
#[derive(Debug, Default, Deserialize)]
pub struct WhatsAppPayload {
    #[serde(default)]
    pub entry: Vec<WhatsAppEntry>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WhatsAppEntry {
    #[serde(default)]
    pub changes: Vec<WhatsAppChange>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WhatsAppChange {
    #[serde(default)]
    pub value: WhatsAppValue,
}

#[derive(Debug, Default, Deserialize)]
pub struct WhatsAppValue {
    #[serde(default)]
    pub metadata: Option<WhatsAppMetadata>,
    #[serde(default)]
    pub messages: Vec<WhatsAppMessage>,
}

#[derive(Debug, Deserialize)]
pub struct WhatsAppMetadata {
    pub phone_number_id: String,
}

#[derive(Debug, Deserialize)]
pub struct WhatsAppMessage {
    pub from: String,
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub text: Option<WhatsAppText>,
}

#[derive(Debug, Deserialize)]
pub struct WhatsAppText {
    pub body: String,
}

impl WhatsAppPayload {
    fn first_value(&self) -> Option<&WhatsAppValue> {
        self.entry.first()?.changes.first().map(|c| &c.value)
    }

    /// Business phone-number id the delivery was addressed to; selects the channel.
    pub fn phone_number_id(&self) -> Option<&str> {
        self.first_value()?
            .metadata
            .as_ref()
            .map(|m| m.phone_number_id.as_str())
    }

    /// Only the first message of the first change is considered. Status callbacks
    /// (no messages) and non-text types are no-ops.
    pub fn into_inbound(self) -> ParsedInbound {
        let Some(msg) = self
            .entry
            .into_iter()
            .next()
            .and_then(|e| e.changes.into_iter().next())
            .and_then(|c| c.value.messages.into_iter().next())
        else {
            return ParsedInbound::NotText;
        };
        if msg.kind != "text" {
            return ParsedInbound::NotText;
        }
        match msg.text {
            Some(t) if !t.body.trim().is_empty() => ParsedInbound::Text(InboundDelivery {
                sender_id: msg.from,
                external_message_id: msg.id,
                text: t.body,
            }),
            _ => ParsedInbound::NotText,
        }
    }
}

/// Sends replies with the channel's phone-number id and Graph access token.
pub struct WhatsAppTransport {
    api_base: String,
    client: reqwest::Client,
}

impl Default for WhatsAppTransport {
    fn default() -> Self {
        Self::new(whatsapp_api_base())
    }
}

impl WhatsAppTransport {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Transport for WhatsAppTransport {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Whatsapp
    }

    async fn send_message(
        &self,
        channel: &ChannelRecord,
        recipient: &str,
        text: &str,
    ) -> Result<(), TransportError> {
        let missing = || TransportError::MissingCredential(channel.id.clone());
        let phone_number_id = channel.phone_number_id().ok_or_else(missing)?;
        let access_token = channel.access_token().ok_or_else(missing)?;
        let url = format!("{}/{}/messages", self.api_base, phone_number_id);
        let body = serde_json::json!({
            "messaging_product": "whatsapp",
            "to": recipient,
            "type": "text",
            "text": { "body": text },
        });
        let res = self
            .client
            .post(&url)
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(TransportError::Api(format!(
                "messages failed: {} {}",
                status, body
            )));
        }
        Ok(())
    }
}

/// Resolve Graph API base URL (for tests or a pinned API version).
pub fn whatsapp_api_base() -> String {
    std::env::var("WHATSAPP_API_BASE").unwrap_or_else(|_| WHATSAPP_API_BASE.to_string())
}
