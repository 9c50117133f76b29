//! In-memory store with optional JSON snapshot persistence.
//!
//! All tables live behind one lock, so the uniqueness checks and the inserts they guard are
//! atomic within the process. When a path is set, every write rewrites the snapshot file; a
//! write whose snapshot cannot be saved is rolled back.

use super::{
    ConversationSummary, DailySummary, DateRange, FeedbackEntry, FeedbackFilter, Message,
    NewFeedback, NewMessage, Store, StoreError,
};
use crate::identity::BotIdentityId;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Tables {
    next_message_id: u64,
    next_feedback_id: u64,
    messages: Vec<Message>,
    feedback: Vec<FeedbackEntry>,
    daily_summaries: Vec<DailySummary>,
}

pub struct MemoryStore {
    path: Option<PathBuf>,
    tables: RwLock<Tables>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Empty store without persistence.
    pub fn new() -> Self {
        Self {
            path: None,
            tables: RwLock::new(Tables::default()),
        }
    }

    /// Load a snapshot from path; a missing file starts empty, an unreadable one is an error.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let tables = match tokio::fs::read_to_string(&path).await {
            Ok(s) => serde_json::from_str(&s).map_err(|e| {
                StoreError::Persist(format!("parsing {}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("store snapshot not found, starting empty: {}", path.display());
                Tables::default()
            }
            Err(e) => {
                return Err(StoreError::Persist(format!(
                    "reading {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        Ok(Self {
            path: Some(path),
            tables: RwLock::new(tables),
        })
    }

    async fn save(&self, tables: &Tables) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json =
            serde_json::to_string_pretty(tables).map_err(|e| StoreError::Persist(e.to_string()))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Persist(e.to_string()))?;
        }
        tokio::fs::write(path, json)
            .await
            .map_err(|e| StoreError::Persist(format!("writing {}: {}", path.display(), e)))
    }
}

fn in_scope<'a>(
    messages: &'a [Message],
    identity: &'a BotIdentityId,
    range: DateRange,
) -> impl Iterator<Item = &'a Message> + 'a {
    messages
        .iter()
        .filter(move |m| &m.bot_identity == identity && range.contains(&m.created_at))
}

fn sort_chronological(messages: &mut [Message]) {
    messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        let mut tables = self.tables.write().await;
        if let Some(external_id) = &message.external_id {
            let exists = tables.messages.iter().any(|m| {
                m.bot_identity == message.bot_identity
                    && m.external_id.as_deref() == Some(external_id.as_str())
            });
            if exists {
                return Err(StoreError::Conflict(format!(
                    "message {} already stored for {}",
                    external_id, message.bot_identity
                )));
            }
        }
        tables.next_message_id += 1;
        let stored = Message {
            id: tables.next_message_id,
            bot_identity: message.bot_identity,
            channel_id: message.channel_id,
            sender: message.sender,
            body: message.body,
            direction: message.direction,
            external_id: message.external_id,
            created_at: message.created_at,
            ai_generated: message.ai_generated,
        };
        tables.messages.push(stored.clone());
        if let Err(e) = self.save(&tables).await {
            tables.messages.pop();
            tables.next_message_id -= 1;
            return Err(e);
        }
        Ok(stored)
    }

    async fn find_message_by_external_id(
        &self,
        identity: &BotIdentityId,
        external_id: &str,
    ) -> Result<Option<Message>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .messages
            .iter()
            .find(|m| &m.bot_identity == identity && m.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn recent_messages(
        &self,
        identity: &BotIdentityId,
        sender: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let mut out = self.messages_for_sender(identity, sender).await?;
        let skip = out.len().saturating_sub(limit);
        Ok(out.split_off(skip))
    }

    async fn messages_in_range(
        &self,
        identity: &BotIdentityId,
        range: DateRange,
    ) -> Result<Vec<Message>, StoreError> {
        let tables = self.tables.read().await;
        let mut out: Vec<Message> = in_scope(&tables.messages, identity, range).cloned().collect();
        sort_chronological(&mut out);
        Ok(out)
    }

    async fn count_messages_in_range(
        &self,
        identity: &BotIdentityId,
        range: DateRange,
    ) -> Result<usize, StoreError> {
        let tables = self.tables.read().await;
        Ok(in_scope(&tables.messages, identity, range).count())
    }

    async fn latest_messages_in_range(
        &self,
        identity: &BotIdentityId,
        range: DateRange,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let mut out = self.messages_in_range(identity, range).await?;
        let skip = out.len().saturating_sub(limit);
        Ok(out.split_off(skip))
    }

    async fn search_messages_in_range(
        &self,
        identity: &BotIdentityId,
        range: DateRange,
        keywords: &[String],
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let needles: Vec<String> = keywords
            .iter()
            .map(|k| k.to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        if needles.is_empty() {
            return Ok(Vec::new());
        }
        let tables = self.tables.read().await;
        Ok(in_scope(&tables.messages, identity, range)
            .filter(|m| {
                let body = m.body.to_lowercase();
                needles.iter().any(|k| body.contains(k.as_str()))
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn insert_feedback(&self, entry: NewFeedback) -> Result<FeedbackEntry, StoreError> {
        let mut tables = self.tables.write().await;
        tables.next_feedback_id += 1;
        let stored = FeedbackEntry {
            id: tables.next_feedback_id,
            bot_identity: entry.bot_identity,
            channel_id: entry.channel_id,
            conversation_message_id: entry.conversation_message_id,
            kind: entry.kind,
            title: entry.title,
            description: entry.description,
            sender: entry.sender,
            status: entry.status,
            created_at: entry.created_at,
        };
        tables.feedback.push(stored.clone());
        if let Err(e) = self.save(&tables).await {
            tables.feedback.pop();
            tables.next_feedback_id -= 1;
            return Err(e);
        }
        Ok(stored)
    }

    async fn feedback_in_range(
        &self,
        identity: &BotIdentityId,
        range: DateRange,
    ) -> Result<Vec<FeedbackEntry>, StoreError> {
        let tables = self.tables.read().await;
        let mut out: Vec<FeedbackEntry> = tables
            .feedback
            .iter()
            .filter(|f| &f.bot_identity == identity && range.contains(&f.created_at))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn list_feedback(
        &self,
        identity: &BotIdentityId,
        filter: &FeedbackFilter,
    ) -> Result<Vec<FeedbackEntry>, StoreError> {
        let tables = self.tables.read().await;
        let mut out: Vec<FeedbackEntry> = tables
            .feedback
            .iter()
            .filter(|f| &f.bot_identity == identity)
            .filter(|f| filter.kind.map_or(true, |k| f.kind == k))
            .filter(|f| filter.status.map_or(true, |s| f.status == s))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(out)
    }

    async fn conversations(
        &self,
        identity: &BotIdentityId,
    ) -> Result<Vec<ConversationSummary>, StoreError> {
        let tables = self.tables.read().await;
        let mut by_sender: HashMap<&str, ConversationSummary> = HashMap::new();
        for m in tables.messages.iter().filter(|m| &m.bot_identity == identity) {
            let entry = by_sender
                .entry(m.sender.as_str())
                .or_insert_with(|| ConversationSummary {
                    sender: m.sender.clone(),
                    last_body: m.body.clone(),
                    last_at: m.created_at,
                    message_count: 0,
                });
            entry.message_count += 1;
            if m.created_at >= entry.last_at {
                entry.last_at = m.created_at;
                entry.last_body = m.body.clone();
            }
        }
        let mut out: Vec<ConversationSummary> = by_sender.into_values().collect();
        out.sort_by(|a, b| b.last_at.cmp(&a.last_at).then(a.sender.cmp(&b.sender)));
        Ok(out)
    }

    async fn messages_for_sender(
        &self,
        identity: &BotIdentityId,
        sender: &str,
    ) -> Result<Vec<Message>, StoreError> {
        let tables = self.tables.read().await;
        let mut out: Vec<Message> = tables
            .messages
            .iter()
            .filter(|m| &m.bot_identity == identity && m.sender == sender)
            .cloned()
            .collect();
        sort_chronological(&mut out);
        Ok(out)
    }

    async fn get_daily_summary(
        &self,
        identity: &BotIdentityId,
        date: NaiveDate,
    ) -> Result<Option<DailySummary>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .daily_summaries
            .iter()
            .find(|s| &s.bot_identity == identity && s.date == date)
            .cloned())
    }

    async fn insert_daily_summary(&self, summary: DailySummary) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let exists = tables
            .daily_summaries
            .iter()
            .any(|s| s.bot_identity == summary.bot_identity && s.date == summary.date);
        if exists {
            return Err(StoreError::Conflict(format!(
                "daily summary for {} already stored",
                summary.date
            )));
        }
        tables.daily_summaries.push(summary);
        if let Err(e) = self.save(&tables).await {
            tables.daily_summaries.pop();
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{resolve_identity, ChannelKind, ChannelRecord};
    use crate::store::{Direction, FeedbackKind, FeedbackStatus};
    use chrono::{Duration, TimeZone, Utc};

    fn identity(phone: &str) -> BotIdentityId {
        resolve_identity(&ChannelRecord {
            id: format!("ch-{}", phone),
            name: String::new(),
            kind: ChannelKind::Whatsapp,
            bot_token: None,
            phone_number_id: Some(phone.to_string()),
            access_token: None,
        })
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    fn msg_at(
        id: &BotIdentityId,
        sender: &str,
        body: &str,
        ts: chrono::DateTime<Utc>,
    ) -> NewMessage {
        let mut m = NewMessage::inbound(id.clone(), Some("ch".to_string()), sender, body, None);
        m.created_at = ts;
        m
    }

    #[tokio::test]
    async fn duplicate_external_id_conflicts_within_identity_only() {
        let store = MemoryStore::new();
        let a = identity("111");
        let b = identity("222");
        let first = NewMessage::inbound(a.clone(), None, "u1", "oi", Some("wamid.1".to_string()));
        store.insert_message(first.clone()).await.unwrap();
        let err = store.insert_message(first).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        let other = NewMessage::inbound(b.clone(), None, "u1", "oi", Some("wamid.1".to_string()));
        assert!(store.insert_message(other).await.is_ok());
        assert!(store
            .find_message_by_external_id(&a, "wamid.1")
            .await
            .unwrap()
            .is_some());
        assert!(store
            .find_message_by_external_id(&a, "wamid.2")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn range_queries_respect_days_and_identity() {
        let store = MemoryStore::new();
        let a = identity("111");
        let b = identity("222");
        let base = Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap();
        for i in 0..5 {
            let body = if i == 1 { "Sem INTERNET de novo" } else { "oi" };
            store
                .insert_message(msg_at(&a, "u1", body, base + Duration::hours(i)))
                .await
                .unwrap();
        }
        store
            .insert_message(msg_at(&a, "u1", "ontem", base - Duration::days(1)))
            .await
            .unwrap();
        store
            .insert_message(msg_at(&b, "u9", "internet", base))
            .await
            .unwrap();

        let range = DateRange::day(day(10));
        assert_eq!(store.count_messages_in_range(&a, range).await.unwrap(), 5);
        let latest = store.latest_messages_in_range(&a, range, 2).await.unwrap();
        assert_eq!(latest.len(), 2);
        assert!(latest[0].created_at < latest[1].created_at);
        assert_eq!(latest[1].created_at, base + Duration::hours(4));

        let hits = store
            .search_messages_in_range(&a, range, &["internet".to_string()], 50)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].body, "Sem INTERNET de novo");
        assert!(store
            .search_messages_in_range(&a, range, &[], 50)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn recent_messages_keep_the_tail_in_order() {
        let store = MemoryStore::new();
        let a = identity("111");
        let base = Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap();
        for i in 0..6 {
            store
                .insert_message(msg_at(&a, "u1", &format!("m{}", i), base + Duration::minutes(i)))
                .await
                .unwrap();
        }
        store
            .insert_message(msg_at(&a, "u2", "outro", base))
            .await
            .unwrap();
        let recent = store.recent_messages(&a, "u1", 3).await.unwrap();
        let bodies: Vec<&str> = recent.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["m3", "m4", "m5"]);

        let convs = store.conversations(&a).await.unwrap();
        assert_eq!(convs.len(), 2);
        assert_eq!(convs[0].sender, "u1");
        assert_eq!(convs[0].last_body, "m5");
        assert_eq!(convs[0].message_count, 6);
    }

    #[tokio::test]
    async fn daily_summary_is_write_once_per_identity_and_date() {
        let store = MemoryStore::new();
        let a = identity("111");
        let row = DailySummary {
            bot_identity: a.clone(),
            date: day(9),
            summary_text: "resumo".to_string(),
            token_estimate: 2,
            created_at: Utc::now(),
        };
        store.insert_daily_summary(row.clone()).await.unwrap();
        assert!(matches!(
            store.insert_daily_summary(row.clone()).await,
            Err(StoreError::Conflict(_))
        ));
        let other = DailySummary {
            bot_identity: identity("222"),
            ..row
        };
        assert!(store.insert_daily_summary(other).await.is_ok());
        assert_eq!(
            store
                .get_daily_summary(&a, day(9))
                .await
                .unwrap()
                .map(|s| s.summary_text),
            Some("resumo".to_string())
        );
    }

    #[tokio::test]
    async fn feedback_listing_filters_and_orders_newest_first() {
        let store = MemoryStore::new();
        let a = identity("111");
        let base = Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap();
        for (i, kind) in [FeedbackKind::Demand, FeedbackKind::Opinion, FeedbackKind::Demand]
            .into_iter()
            .enumerate()
        {
            store
                .insert_feedback(NewFeedback {
                    bot_identity: a.clone(),
                    channel_id: None,
                    conversation_message_id: None,
                    kind,
                    title: None,
                    description: format!("d{}", i),
                    sender: Some("u1".to_string()),
                    status: FeedbackStatus::Pending,
                    created_at: base + Duration::minutes(i as i64),
                })
                .await
                .unwrap();
        }
        let filter = FeedbackFilter {
            kind: Some(FeedbackKind::Demand),
            status: None,
        };
        let demands = store.list_feedback(&a, &filter).await.unwrap();
        let descs: Vec<&str> = demands.iter().map(|f| f.description.as_str()).collect();
        assert_eq!(descs, vec!["d2", "d0"]);
        assert!(store
            .list_feedback(&identity("222"), &FeedbackFilter::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn snapshot_round_trips_through_disk() {
        let dir = std::env::temp_dir().join(format!("pulsar-store-test-{}", uuid::Uuid::new_v4()));
        let path = dir.join("store.json");
        let a = identity("111");
        {
            let store = MemoryStore::load(&path).await.unwrap();
            let first = NewMessage::inbound(a.clone(), None, "u1", "oi", Some("x".to_string()));
            store.insert_message(first).await.unwrap();
        }
        let reloaded = MemoryStore::load(&path).await.unwrap();
        let found = reloaded.find_message_by_external_id(&a, "x").await.unwrap();
        assert_eq!(found.map(|m| m.direction), Some(Direction::Inbound));
        let next = reloaded
            .insert_message(NewMessage::inbound(a, None, "u1", "de novo", None))
            .await
            .unwrap();
        assert_eq!(next.id, 2);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn failed_snapshot_write_leaves_no_row_behind() {
        let dir = std::env::temp_dir().join(format!("pulsar-store-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let store = MemoryStore::load(dir.join("data").join("store.json"))
            .await
            .unwrap();
        // A regular file where the data directory should be makes every save fail.
        std::fs::write(dir.join("data"), "not a directory").unwrap();
        let a = identity("111");

        let inbound = NewMessage::inbound(a.clone(), None, "u1", "oi", Some("wamid.9".to_string()));
        assert!(matches!(
            store.insert_message(inbound.clone()).await,
            Err(StoreError::Persist(_))
        ));
        assert!(store
            .find_message_by_external_id(&a, "wamid.9")
            .await
            .unwrap()
            .is_none());

        let entry = NewFeedback {
            bot_identity: a.clone(),
            channel_id: None,
            conversation_message_id: None,
            kind: FeedbackKind::Demand,
            title: None,
            description: "Problema na internet".to_string(),
            sender: Some("u1".to_string()),
            status: FeedbackStatus::Pending,
            created_at: Utc::now(),
        };
        assert!(store.insert_feedback(entry.clone()).await.is_err());
        assert!(store
            .list_feedback(&a, &FeedbackFilter::default())
            .await
            .unwrap()
            .is_empty());

        let summary = DailySummary {
            bot_identity: a.clone(),
            date: day(9),
            summary_text: "resumo".to_string(),
            token_estimate: 2,
            created_at: Utc::now(),
        };
        assert!(store.insert_daily_summary(summary.clone()).await.is_err());
        assert!(store.get_daily_summary(&a, day(9)).await.unwrap().is_none());

        // Once the disk recovers, the redelivered message and the retried entry land once.
        std::fs::remove_file(dir.join("data")).unwrap();
        let stored = store.insert_message(inbound).await.unwrap();
        assert_eq!(stored.id, 1);
        let created = store.insert_feedback(entry).await.unwrap();
        assert_eq!(created.id, 1);
        store.insert_daily_summary(summary).await.unwrap();
        let _ = std::fs::remove_dir_all(dir);
    }
}
