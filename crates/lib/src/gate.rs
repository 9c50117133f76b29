//! Inbound message gate: identity resolution, redelivery dedup, and the reply pipeline.
//!
//! Dedup relies on the store's unique `(bot identity, external id)` key: the lookup is a fast
//! path, and a conflict on insert is treated the same as a hit.

use crate::agent::Orchestrator;
use crate::channels::{InboundDelivery, TransportRegistry};
use crate::identity::{resolve_identity, ChannelRecord, IdentityContext};
use crate::llm::ChatMessage;
use crate::store::{Direction, FeedbackEntry, Message, NewMessage, Store, StoreError};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub enum Acceptance {
    Accepted(Message),
    Duplicate,
}

#[derive(Debug, Clone)]
pub enum Handled {
    Duplicate,
    Replied {
        inbound: Message,
        reply: String,
        feedback: Option<FeedbackEntry>,
        /// False when the vendor send failed (already logged).
        delivered: bool,
    },
}

pub struct InboundGate {
    store: Arc<dyn Store>,
    orchestrator: Arc<Orchestrator>,
    transports: Arc<TransportRegistry>,
    history_window: usize,
}

impl InboundGate {
    pub fn new(
        store: Arc<dyn Store>,
        orchestrator: Arc<Orchestrator>,
        transports: Arc<TransportRegistry>,
        history_window: usize,
    ) -> Self {
        Self {
            store,
            orchestrator,
            transports,
            history_window,
        }
    }

    /// Persist the delivery as an inbound message unless this bot identity already has it.
    pub async fn accept_inbound(
        &self,
        channel: &ChannelRecord,
        delivery: &InboundDelivery,
    ) -> Result<Acceptance, GateError> {
        let identity = resolve_identity(channel);
        if self
            .store
            .find_message_by_external_id(&identity, &delivery.external_message_id)
            .await?
            .is_some()
        {
            log::info!(
                "gate: {} duplicate delivery {}",
                identity,
                delivery.external_message_id
            );
            return Ok(Acceptance::Duplicate);
        }
        let new = NewMessage::inbound(
            identity.clone(),
            Some(channel.id.clone()),
            &delivery.sender_id,
            &delivery.text,
            Some(delivery.external_message_id.clone()),
        );
        match self.store.insert_message(new).await {
            Ok(message) => Ok(Acceptance::Accepted(message)),
            Err(StoreError::Conflict(_)) => {
                log::info!(
                    "gate: {} concurrent duplicate {}",
                    identity,
                    delivery.external_message_id
                );
                Ok(Acceptance::Duplicate)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Full pipeline for one delivery: accept, build history, ask the orchestrator,
    /// persist the reply and send it. Send failures are logged, not returned.
    pub async fn handle_delivery(
        &self,
        channel: &ChannelRecord,
        delivery: &InboundDelivery,
    ) -> Result<Handled, GateError> {
        let inbound = match self.accept_inbound(channel, delivery).await? {
            Acceptance::Duplicate => return Ok(Handled::Duplicate),
            Acceptance::Accepted(m) => m,
        };
        let identity = inbound.bot_identity.clone();

        let history = match self.history_for(&inbound).await {
            Ok(history) => history,
            Err(e) => {
                log::warn!("gate: {} history unavailable, replying without it: {}", identity, e);
                Vec::new()
            }
        };
        let ctx = IdentityContext {
            bot_identity: identity.clone(),
            channel_id: Some(channel.id.clone()),
            sender: inbound.sender.clone(),
            conversation_message_id: Some(inbound.id),
        };
        let reply = self
            .orchestrator
            .respond(&inbound.body, &history, &ctx)
            .await;

        let outbound = NewMessage::outbound(
            identity.clone(),
            Some(channel.id.clone()),
            &inbound.sender,
            &reply.text,
        );
        if let Err(e) = self.store.insert_message(outbound).await {
            log::error!("gate: {} failed to store reply: {}", identity, e);
        }

        let delivered = match self
            .transports
            .send(channel, &inbound.sender, &reply.text)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                log::warn!(
                    "gate: {} reply to {} via {} not delivered: {}",
                    identity,
                    inbound.sender,
                    channel.kind,
                    e
                );
                false
            }
        };

        Ok(Handled::Replied {
            inbound,
            reply: reply.text,
            feedback: reply.created_feedback,
            delivered,
        })
    }

    /// Last `history_window` messages with this sender before `current`, as chat turns.
    async fn history_for(&self, current: &Message) -> Result<Vec<ChatMessage>, GateError> {
        let recent = self
            .store
            .recent_messages(
                &current.bot_identity,
                &current.sender,
                self.history_window + 1,
            )
            .await?;
        let mut turns: Vec<ChatMessage> = recent
            .into_iter()
            .filter(|m| m.id != current.id)
            .map(|m| match m.direction {
                Direction::Inbound => ChatMessage::user(m.body),
                Direction::Outbound => ChatMessage::assistant(m.body),
            })
            .collect();
        if turns.len() > self.history_window {
            turns.drain(..turns.len() - self.history_window);
        }
        Ok(turns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{Transport, TransportError};
    use crate::config::ProposalPolicy;
    use crate::identity::{BotIdentityId, ChannelKind};
    use crate::llm::testing::{Scripted, ScriptedBackend};
    use crate::llm::Role;
    use crate::store::{
        ConversationSummary, DailySummary, DateRange, FeedbackFilter, MemoryStore, NewFeedback,
    };
    use crate::tools::FeedbackTools;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Outbox {
        sent: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl Transport for Outbox {
        fn kind(&self) -> ChannelKind {
            ChannelKind::Telegram
        }

        async fn send_message(
            &self,
            _channel: &ChannelRecord,
            recipient: &str,
            text: &str,
        ) -> Result<(), TransportError> {
            if self.fail {
                return Err(TransportError::Api("502 bad gateway".to_string()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((recipient.to_string(), text.to_string()));
            Ok(())
        }
    }

    fn telegram(id: &str, token: &str) -> ChannelRecord {
        ChannelRecord {
            id: id.to_string(),
            name: id.to_string(),
            kind: ChannelKind::Telegram,
            bot_token: Some(token.to_string()),
            phone_number_id: None,
            access_token: None,
        }
    }

    fn delivery(sender: &str, ext: &str, text: &str) -> InboundDelivery {
        InboundDelivery {
            sender_id: sender.to_string(),
            external_message_id: ext.to_string(),
            text: text.to_string(),
        }
    }

    async fn gate_over(
        store: Arc<dyn Store>,
        script: Vec<Scripted>,
        outbox: Arc<Outbox>,
    ) -> (Arc<ScriptedBackend>, InboundGate) {
        let backend = Arc::new(ScriptedBackend::new(script));
        let tools = Arc::new(FeedbackTools::new(store.clone(), ProposalPolicy::Advisory));
        let orchestrator = Arc::new(Orchestrator::new(backend.clone(), "m", tools));
        let transports = Arc::new(TransportRegistry::new());
        transports.register(outbox).await;
        let gate = InboundGate::new(store, orchestrator, transports, 20);
        (backend, gate)
    }

    async fn gate(
        script: Vec<Scripted>,
        outbox: Arc<Outbox>,
    ) -> (Arc<ScriptedBackend>, Arc<MemoryStore>, InboundGate) {
        let store = Arc::new(MemoryStore::new());
        let (backend, gate) = gate_over(store.clone(), script, outbox).await;
        (backend, store, gate)
    }

    /// Memory store whose dedup lookup always misses, and whose sender history can be made to fail.
    #[derive(Default)]
    struct LossyStore {
        inner: MemoryStore,
        fail_history: bool,
    }

    #[async_trait]
    impl Store for LossyStore {
        async fn insert_message(&self, message: NewMessage) -> Result<Message, StoreError> {
            self.inner.insert_message(message).await
        }

        async fn find_message_by_external_id(
            &self,
            _identity: &BotIdentityId,
            _external_id: &str,
        ) -> Result<Option<Message>, StoreError> {
            Ok(None)
        }

        async fn recent_messages(
            &self,
            identity: &BotIdentityId,
            sender: &str,
            limit: usize,
        ) -> Result<Vec<Message>, StoreError> {
            if self.fail_history {
                return Err(StoreError::Persist("disk unavailable".to_string()));
            }
            self.inner.recent_messages(identity, sender, limit).await
        }

        async fn messages_in_range(
            &self,
            identity: &BotIdentityId,
            range: DateRange,
        ) -> Result<Vec<Message>, StoreError> {
            self.inner.messages_in_range(identity, range).await
        }

        async fn count_messages_in_range(
            &self,
            identity: &BotIdentityId,
            range: DateRange,
        ) -> Result<usize, StoreError> {
            self.inner.count_messages_in_range(identity, range).await
        }

        async fn latest_messages_in_range(
            &self,
            identity: &BotIdentityId,
            range: DateRange,
            limit: usize,
        ) -> Result<Vec<Message>, StoreError> {
            self.inner.latest_messages_in_range(identity, range, limit).await
        }

        async fn search_messages_in_range(
            &self,
            identity: &BotIdentityId,
            range: DateRange,
            keywords: &[String],
            limit: usize,
        ) -> Result<Vec<Message>, StoreError> {
            self.inner
                .search_messages_in_range(identity, range, keywords, limit)
                .await
        }

        async fn insert_feedback(&self, entry: NewFeedback) -> Result<FeedbackEntry, StoreError> {
            self.inner.insert_feedback(entry).await
        }

        async fn feedback_in_range(
            &self,
            identity: &BotIdentityId,
            range: DateRange,
        ) -> Result<Vec<FeedbackEntry>, StoreError> {
            self.inner.feedback_in_range(identity, range).await
        }

        async fn list_feedback(
            &self,
            identity: &BotIdentityId,
            filter: &FeedbackFilter,
        ) -> Result<Vec<FeedbackEntry>, StoreError> {
            self.inner.list_feedback(identity, filter).await
        }

        async fn conversations(
            &self,
            identity: &BotIdentityId,
        ) -> Result<Vec<ConversationSummary>, StoreError> {
            self.inner.conversations(identity).await
        }

        async fn messages_for_sender(
            &self,
            identity: &BotIdentityId,
            sender: &str,
        ) -> Result<Vec<Message>, StoreError> {
            self.inner.messages_for_sender(identity, sender).await
        }

        async fn get_daily_summary(
            &self,
            identity: &BotIdentityId,
            date: NaiveDate,
        ) -> Result<Option<DailySummary>, StoreError> {
            self.inner.get_daily_summary(identity, date).await
        }

        async fn insert_daily_summary(&self, summary: DailySummary) -> Result<(), StoreError> {
            self.inner.insert_daily_summary(summary).await
        }
    }

    #[tokio::test]
    async fn redelivery_is_a_noop() {
        let outbox = Arc::new(Outbox::default());
        let (backend, store, gate) = gate(
            vec![ScriptedBackend::text("Olá!"), ScriptedBackend::text("de novo")],
            outbox.clone(),
        )
        .await;
        let channel = telegram("c1", "123:abc");
        let d = delivery("42", "42:1", "oi");

        let first = gate.handle_delivery(&channel, &d).await.unwrap();
        assert!(matches!(first, Handled::Replied { delivered: true, .. }));
        let second = gate.handle_delivery(&channel, &d).await.unwrap();
        assert!(matches!(second, Handled::Duplicate));

        assert_eq!(backend.call_count(), 1);
        assert_eq!(outbox.sent.lock().unwrap().len(), 1);
        let identity = resolve_identity(&channel);
        assert_eq!(store.messages_for_sender(&identity, "42").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn channels_sharing_a_token_share_history() {
        let outbox = Arc::new(Outbox::default());
        let (backend, _store, gate) = gate(
            vec![ScriptedBackend::text("Olá!"), ScriptedBackend::text("Lembro de você")],
            outbox,
        )
        .await;
        gate.handle_delivery(&telegram("old", "123:abc"), &delivery("42", "42:1", "oi"))
            .await
            .unwrap();
        gate.handle_delivery(&telegram("new", "123:abc"), &delivery("42", "42:2", "voltei"))
            .await
            .unwrap();

        let requests = backend.requests.lock().unwrap();
        let second = &requests[1];
        let turns: Vec<(Role, &str)> = second
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| (m.role, m.content.as_str()))
            .collect();
        assert_eq!(
            turns,
            vec![
                (Role::User, "oi"),
                (Role::Assistant, "Olá!"),
                (Role::User, "voltei")
            ]
        );
    }

    #[tokio::test]
    async fn different_tokens_do_not_share_history_or_dedup() {
        let outbox = Arc::new(Outbox::default());
        let (backend, _store, gate) = gate(
            vec![ScriptedBackend::text("a"), ScriptedBackend::text("b")],
            outbox,
        )
        .await;
        let d = delivery("42", "42:1", "oi");
        gate.handle_delivery(&telegram("c1", "111:aaa"), &d).await.unwrap();
        let other = gate.handle_delivery(&telegram("c2", "222:bbb"), &d).await.unwrap();
        assert!(matches!(other, Handled::Replied { .. }));

        let requests = backend.requests.lock().unwrap();
        let non_system = requests[1].iter().filter(|m| m.role != Role::System).count();
        assert_eq!(non_system, 1);
    }

    #[tokio::test]
    async fn failed_send_is_logged_and_reply_still_stored() {
        let outbox = Arc::new(Outbox {
            fail: true,
            ..Outbox::default()
        });
        let (_backend, store, gate) = gate(vec![ScriptedBackend::text("Olá!")], outbox).await;
        let channel = telegram("c1", "123:abc");
        let handled = gate
            .handle_delivery(&channel, &delivery("42", "42:1", "oi"))
            .await
            .unwrap();
        assert!(matches!(handled, Handled::Replied { delivered: false, .. }));
        let messages = store
            .messages_for_sender(&resolve_identity(&channel), "42")
            .await
            .unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].direction, Direction::Outbound);
        assert!(messages[1].ai_generated);
    }

    #[tokio::test]
    async fn insert_conflict_counts_as_duplicate_when_lookup_misses() {
        let outbox = Arc::new(Outbox::default());
        let store = Arc::new(LossyStore::default());
        let (backend, gate) = gate_over(
            store.clone(),
            vec![ScriptedBackend::text("Olá!"), ScriptedBackend::text("de novo")],
            outbox.clone(),
        )
        .await;
        let channel = telegram("c1", "123:abc");
        let d = delivery("42", "42:1", "oi");

        gate.handle_delivery(&channel, &d).await.unwrap();
        let second = gate.handle_delivery(&channel, &d).await.unwrap();
        assert!(matches!(second, Handled::Duplicate));

        assert_eq!(backend.call_count(), 1);
        assert_eq!(outbox.sent.lock().unwrap().len(), 1);
        let messages = store
            .messages_for_sender(&resolve_identity(&channel), "42")
            .await
            .unwrap();
        let inbound = messages
            .iter()
            .filter(|m| m.direction == Direction::Inbound)
            .count();
        assert_eq!(inbound, 1);
    }

    #[tokio::test]
    async fn history_failure_still_answers_the_message() {
        let outbox = Arc::new(Outbox::default());
        let store = Arc::new(LossyStore {
            fail_history: true,
            ..LossyStore::default()
        });
        let (backend, gate) =
            gate_over(store, vec![ScriptedBackend::text("Olá!")], outbox.clone()).await;
        let handled = gate
            .handle_delivery(&telegram("c1", "123:abc"), &delivery("42", "42:1", "oi"))
            .await
            .unwrap();
        assert!(matches!(handled, Handled::Replied { delivered: true, .. }));

        let requests = backend.requests.lock().unwrap();
        let turns: Vec<&str> = requests[0]
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(turns, vec!["oi"]);
        assert_eq!(outbox.sent.lock().unwrap()[0].1, "Olá!");
    }
}
