//! Durable records (messages, feedback entries, daily summaries) and the store seam.
//!
//! Everything is scoped by [`BotIdentityId`]. The bundled [`MemoryStore`] enforces the two
//! uniqueness rules the rest of the crate relies on: `(bot identity, external id)` for
//! messages and `(bot identity, date)` for daily summaries.

mod memory;

pub use memory::MemoryStore;

use crate::identity::BotIdentityId;
use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A unique key already exists; callers treat this as the duplicate signal.
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("store persistence failed: {0}")]
    Persist(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// One stored chat message. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: u64,
    pub bot_identity: BotIdentityId,
    pub channel_id: Option<String>,
    pub sender: String,
    pub body: String,
    pub direction: Direction,
    pub external_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub ai_generated: bool,
}

/// Message to insert; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub bot_identity: BotIdentityId,
    pub channel_id: Option<String>,
    pub sender: String,
    pub body: String,
    pub direction: Direction,
    pub external_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub ai_generated: bool,
}

impl NewMessage {
    pub fn inbound(
        bot_identity: BotIdentityId,
        channel_id: Option<String>,
        sender: impl Into<String>,
        body: impl Into<String>,
        external_id: Option<String>,
    ) -> Self {
        Self {
            bot_identity,
            channel_id,
            sender: sender.into(),
            body: body.into(),
            direction: Direction::Inbound,
            external_id,
            created_at: Utc::now(),
            ai_generated: false,
        }
    }

    /// Assistant reply, stored under the end user's sender id so the conversation groups.
    pub fn outbound(
        bot_identity: BotIdentityId,
        channel_id: Option<String>,
        sender: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            bot_identity,
            channel_id,
            sender: sender.into(),
            body: body.into(),
            direction: Direction::Outbound,
            external_id: None,
            created_at: Utc::now(),
            ai_generated: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    Demand,
    Suggestion,
    Opinion,
}

impl FeedbackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackKind::Demand => "demand",
            FeedbackKind::Suggestion => "suggestion",
            FeedbackKind::Opinion => "opinion",
        }
    }
}

impl fmt::Display for FeedbackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedbackKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "demand" => Ok(FeedbackKind::Demand),
            "suggestion" => Ok(FeedbackKind::Suggestion),
            "opinion" => Ok(FeedbackKind::Opinion),
            other => Err(format!("unknown feedback kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackStatus {
    Pending,
    InReview,
    Resolved,
    Cancelled,
}

impl FeedbackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackStatus::Pending => "pending",
            FeedbackStatus::InReview => "in_review",
            FeedbackStatus::Resolved => "resolved",
            FeedbackStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FeedbackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedbackStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(FeedbackStatus::Pending),
            "in_review" => Ok(FeedbackStatus::InReview),
            "resolved" => Ok(FeedbackStatus::Resolved),
            "cancelled" => Ok(FeedbackStatus::Cancelled),
            other => Err(format!("unknown feedback status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackEntry {
    pub id: u64,
    pub bot_identity: BotIdentityId,
    pub channel_id: Option<String>,
    pub conversation_message_id: Option<u64>,
    pub kind: FeedbackKind,
    pub title: Option<String>,
    pub description: String,
    pub sender: Option<String>,
    pub status: FeedbackStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewFeedback {
    pub bot_identity: BotIdentityId,
    pub channel_id: Option<String>,
    pub conversation_message_id: Option<u64>,
    pub kind: FeedbackKind,
    pub title: Option<String>,
    pub description: String,
    pub sender: Option<String>,
    pub status: FeedbackStatus,
    pub created_at: DateTime<Utc>,
}

/// Cached narrative for one closed calendar day.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailySummary {
    pub bot_identity: BotIdentityId,
    pub date: NaiveDate,
    pub summary_text: String,
    pub token_estimate: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct FeedbackFilter {
    pub kind: Option<FeedbackKind>,
    pub status: Option<FeedbackStatus>,
}

/// One row of the conversation list: a sender and their latest message.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub sender: String,
    pub last_body: String,
    pub last_at: DateTime<Utc>,
    pub message_count: usize,
}

/// Inclusive range of UTC calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn day(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    pub fn contains_date(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// True if the timestamp falls on one of the range's days.
    pub fn contains(&self, ts: &DateTime<Utc>) -> bool {
        self.contains_date(ts.date_naive())
    }

    /// First instant of the start day.
    pub fn start_at(&self) -> DateTime<Utc> {
        Utc.from_utc_datetime(&self.start.and_time(NaiveTime::MIN))
    }

    /// Days of the range in ascending order.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        std::iter::successors(Some(self.start), |d| d.checked_add_days(Days::new(1)))
            .take_while(move |d| *d <= end)
    }
}

/// Persistence seam for conversations, feedback and the daily-summary cache.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a message. Fails with [`StoreError::Conflict`] when `(bot_identity, external_id)` exists.
    async fn insert_message(&self, message: NewMessage) -> Result<Message, StoreError>;

    async fn find_message_by_external_id(
        &self,
        identity: &BotIdentityId,
        external_id: &str,
    ) -> Result<Option<Message>, StoreError>;

    /// Last `limit` messages exchanged with one sender, oldest first.
    async fn recent_messages(
        &self,
        identity: &BotIdentityId,
        sender: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError>;

    /// All messages in the range, oldest first.
    async fn messages_in_range(
        &self,
        identity: &BotIdentityId,
        range: DateRange,
    ) -> Result<Vec<Message>, StoreError>;

    async fn count_messages_in_range(
        &self,
        identity: &BotIdentityId,
        range: DateRange,
    ) -> Result<usize, StoreError>;

    /// The `limit` most recent messages in the range, oldest first.
    async fn latest_messages_in_range(
        &self,
        identity: &BotIdentityId,
        range: DateRange,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError>;

    /// Up to `limit` messages whose body contains any keyword (case-insensitive).
    async fn search_messages_in_range(
        &self,
        identity: &BotIdentityId,
        range: DateRange,
        keywords: &[String],
        limit: usize,
    ) -> Result<Vec<Message>, StoreError>;

    async fn insert_feedback(&self, entry: NewFeedback) -> Result<FeedbackEntry, StoreError>;

    async fn feedback_in_range(
        &self,
        identity: &BotIdentityId,
        range: DateRange,
    ) -> Result<Vec<FeedbackEntry>, StoreError>;

    /// Feedback for an identity, newest first.
    async fn list_feedback(
        &self,
        identity: &BotIdentityId,
        filter: &FeedbackFilter,
    ) -> Result<Vec<FeedbackEntry>, StoreError>;

    /// One summary per sender, most recently active first.
    async fn conversations(
        &self,
        identity: &BotIdentityId,
    ) -> Result<Vec<ConversationSummary>, StoreError>;

    async fn messages_for_sender(
        &self,
        identity: &BotIdentityId,
        sender: &str,
    ) -> Result<Vec<Message>, StoreError>;

    async fn get_daily_summary(
        &self,
        identity: &BotIdentityId,
        date: NaiveDate,
    ) -> Result<Option<DailySummary>, StoreError>;

    /// Insert a cache row. Fails with [`StoreError::Conflict`] when the date already has one.
    async fn insert_daily_summary(&self, summary: DailySummary) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_range_days_are_inclusive() {
        let r = DateRange::new(
            NaiveDate::from_ymd_opt(2025, 12, 30).unwrap(),
            NaiveDate::from_ymd_opt(2026, 1, 2).unwrap(),
        );
        let days: Vec<String> = r.days().map(|d| d.to_string()).collect();
        assert_eq!(
            days,
            vec!["2025-12-30", "2025-12-31", "2026-01-01", "2026-01-02"]
        );
    }

    #[test]
    fn inverted_range_is_empty() {
        let r = DateRange::new(
            NaiveDate::from_ymd_opt(2026, 1, 2).unwrap(),
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
        );
        assert!(r.is_empty());
        assert_eq!(r.days().count(), 0);
    }

    #[test]
    fn kind_and_status_parse() {
        assert_eq!("Demand".parse::<FeedbackKind>(), Ok(FeedbackKind::Demand));
        assert!("elogio".parse::<FeedbackKind>().is_err());
        assert_eq!(
            "in_review".parse::<FeedbackStatus>(),
            Ok(FeedbackStatus::InReview)
        );
    }
}
