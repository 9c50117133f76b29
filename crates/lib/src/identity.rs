//! Channel records and bot identity resolution.
//!
//! Several channel records can front the same external bot (one WhatsApp phone-number id or
//! one Telegram bot token). Conversations and feedback are scoped by the derived
//! [`BotIdentityId`], not by channel id, so history stays visible across those records.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Messaging platform behind a channel record.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Telegram,
    Whatsapp,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Telegram => f.write_str("telegram"),
            ChannelKind::Whatsapp => f.write_str("whatsapp"),
        }
    }
}

/// External credential a channel uses to talk to its vendor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelCredential {
    /// WhatsApp Cloud API business phone-number id.
    Phone(String),
    /// Telegram bot token.
    BotToken(String),
}

/// A configured channel (CRUD and validation happen elsewhere; records are given).
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelRecord {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub kind: ChannelKind,
    #[serde(default)]
    pub bot_token: Option<String>,
    #[serde(default)]
    pub phone_number_id: Option<String>,
    /// WhatsApp Graph API access token used for sending.
    #[serde(default)]
    pub access_token: Option<String>,
}

impl fmt::Debug for ChannelRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelRecord")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("bot_token", &self.bot_token.as_ref().map(|_| "<redacted>"))
            .field("phone_number_id", &self.phone_number_id)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl ChannelRecord {
    /// The channel's external credential: phone-number id wins over bot token.
    pub fn credential(&self) -> Option<ChannelCredential> {
        if let Some(phone) = non_empty(&self.phone_number_id) {
            return Some(ChannelCredential::Phone(phone.to_string()));
        }
        non_empty(&self.bot_token).map(|t| ChannelCredential::BotToken(t.to_string()))
    }

    pub fn bot_token(&self) -> Option<&str> {
        non_empty(&self.bot_token)
    }

    pub fn phone_number_id(&self) -> Option<&str> {
        non_empty(&self.phone_number_id)
    }

    pub fn access_token(&self) -> Option<&str> {
        non_empty(&self.access_token)
    }
}

/// Key grouping every channel that shares one external credential.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BotIdentityId(String);

impl BotIdentityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BotIdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Short SHA-256 fingerprint of a bot token so the secret never lands in stored rows or logs.
pub fn token_fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    digest.iter().take(8).map(|b| format!("{:02x}", b)).collect()
}

/// Resolve the bot identity for a channel: phone-number id, else bot token, else the
/// channel's own id (single-channel identity).
pub fn resolve_identity(channel: &ChannelRecord) -> BotIdentityId {
    match channel.credential() {
        Some(ChannelCredential::Phone(id)) => BotIdentityId(format!("wa:{}", id)),
        Some(ChannelCredential::BotToken(token)) => {
            BotIdentityId(format!("tg:{}", token_fingerprint(&token)))
        }
        None => BotIdentityId(format!("channel:{}", channel.id)),
    }
}

/// Identity context handed to the orchestrator and its tools for one inbound message.
#[derive(Debug, Clone)]
pub struct IdentityContext {
    pub bot_identity: BotIdentityId,
    pub channel_id: Option<String>,
    pub sender: String,
    /// Stored inbound message that triggered this turn.
    pub conversation_message_id: Option<u64>,
}

/// Read-only directory of configured channel records.
#[derive(Debug, Clone, Default)]
pub struct ChannelDirectory {
    channels: Vec<ChannelRecord>,
}

impl ChannelDirectory {
    pub fn new(channels: Vec<ChannelRecord>) -> Self {
        Self { channels }
    }

    pub fn all(&self) -> &[ChannelRecord] {
        &self.channels
    }

    pub fn get(&self, id: &str) -> Option<&ChannelRecord> {
        self.channels.iter().find(|c| c.id == id)
    }

    /// First Telegram channel using this bot token.
    pub fn by_bot_token(&self, token: &str) -> Option<&ChannelRecord> {
        let token = token.trim();
        self.channels
            .iter()
            .find(|c| c.kind == ChannelKind::Telegram && c.bot_token() == Some(token))
    }

    /// First WhatsApp channel using this business phone-number id.
    pub fn by_phone_number_id(&self, phone_number_id: &str) -> Option<&ChannelRecord> {
        let phone_number_id = phone_number_id.trim();
        self.channels.iter().find(|c| {
            c.kind == ChannelKind::Whatsapp && c.phone_number_id() == Some(phone_number_id)
        })
    }

    /// All channel records resolving to the same bot identity as `channel_id` (itself included).
    pub fn same_identity_channels(&self, channel_id: &str) -> Vec<&ChannelRecord> {
        let Some(channel) = self.get(channel_id) else {
            return Vec::new();
        };
        let identity = resolve_identity(channel);
        self.channels
            .iter()
            .filter(|c| resolve_identity(c) == identity)
            .collect()
    }
}
