//! Transport registry: outbound senders keyed by channel kind.

use crate::identity::{ChannelKind, ChannelRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("transport api error: {0}")]
    Api(String),
    #[error("channel {0} has no credential for this transport")]
    MissingCredential(String),
    #[error("no transport registered for {0}")]
    Unsupported(ChannelKind),
}

/// Sends text to an end user through one vendor API.
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// Send `text` to `recipient` using the channel's credentials.
    async fn send_message(
        &self,
        channel: &ChannelRecord,
        recipient: &str,
        text: &str,
    ) -> Result<(), TransportError>;
}

/// Registry of transports. Shared across the gateway.
pub struct TransportRegistry {
    inner: Arc<RwLock<HashMap<ChannelKind, Arc<dyn Transport>>>>,
}

impl Default for TransportRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn register(&self, transport: Arc<dyn Transport>) {
        let mut g = self.inner.write().await;
        if g.insert(transport.kind(), transport).is_some() {
            log::debug!("channels: replaced an existing transport");
        }
    }

    pub async fn get(&self, kind: ChannelKind) -> Option<Arc<dyn Transport>> {
        let g = self.inner.read().await;
        g.get(&kind).cloned()
    }

    /// Send through the transport for the channel's kind.
    pub async fn send(
        &self,
        channel: &ChannelRecord,
        recipient: &str,
        text: &str,
    ) -> Result<(), TransportError> {
        let transport = self
            .get(channel.kind)
            .await
            .ok_or(TransportError::Unsupported(channel.kind))?;
        transport.send_message(channel, recipient, text).await
    }
}
