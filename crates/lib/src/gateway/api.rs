//! Manager-facing HTTP API: analysis, conversation browsing and feedback listing.
//!
//! Every request names a channel id; data is scoped by that channel's bot identity, so
//! channels sharing a credential see the same conversations and feedback.

use super::server::GatewayState;
use crate::analysis::AnalysisError;
use crate::identity::{resolve_identity, BotIdentityId};
use crate::store::{DateRange, FeedbackFilter, FeedbackKind, FeedbackStatus, StoreError};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;

/// Error answer: status code plus `{ "error": message }`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        log::error!("gateway: store error: {}", e);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
}

impl From<AnalysisError> for ApiError {
    fn from(e: AnalysisError) -> Self {
        match e {
            AnalysisError::Store(e) => e.into(),
            AnalysisError::Model(e) => {
                log::warn!("gateway: analysis model call failed: {}", e);
                Self::new(StatusCode::BAD_GATEWAY, e.to_string())
            }
        }
    }
}

type ApiResult = Result<Json<serde_json::Value>, ApiError>;

fn identity_for(state: &GatewayState, channel_id: &str) -> Result<BotIdentityId, ApiError> {
    state
        .directory
        .get(channel_id)
        .map(resolve_identity)
        .ok_or_else(|| {
            ApiError::new(
                StatusCode::NOT_FOUND,
                format!("unknown channel: {}", channel_id),
            )
        })
}

fn date_range(start: NaiveDate, end: Option<NaiveDate>) -> Result<DateRange, ApiError> {
    let range = DateRange::new(start, end.unwrap_or_else(|| Utc::now().date_naive()));
    if range.is_empty() {
        return Err(ApiError::bad_request("endDate is before startDate"));
    }
    Ok(range)
}

fn default_include_today() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryRequest {
    pub channel_id: String,
    pub start_date: NaiveDate,
    /// Defaults to today.
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default = "default_include_today")]
    pub include_today: bool,
}

/// POST /analysis/summary: executive report for a date range.
pub async fn summary(
    State(state): State<GatewayState>,
    Json(req): Json<SummaryRequest>,
) -> ApiResult {
    let identity = identity_for(&state, &req.channel_id)?;
    let range = date_range(req.start_date, req.end_date)?;
    let today = Utc::now().date_naive();
    let report = state
        .analysis
        .summarize(&identity, range, req.include_today, today)
        .await?;
    Ok(Json(json!({ "summary": report })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub channel_id: String,
    pub question: String,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

/// POST /analysis/chat: answer a question about the range's conversations and feedback.
pub async fn chat(
    State(state): State<GatewayState>,
    Json(req): Json<ChatRequest>,
) -> ApiResult {
    let identity = identity_for(&state, &req.channel_id)?;
    if req.question.trim().is_empty() {
        return Err(ApiError::bad_request("question is empty"));
    }
    let range = date_range(req.start_date, req.end_date)?;
    let answer = state.analysis.answer(&identity, &req.question, range).await?;
    Ok(Json(json!({ "answer": answer })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelQuery {
    pub channel_id: String,
}

/// GET /conversations?channelId=: one row per sender, most recent first.
pub async fn conversations(
    State(state): State<GatewayState>,
    Query(q): Query<ChannelQuery>,
) -> ApiResult {
    let identity = identity_for(&state, &q.channel_id)?;
    let rows = state.store.conversations(&identity).await?;
    let channels: Vec<&str> = state
        .directory
        .same_identity_channels(&q.channel_id)
        .into_iter()
        .map(|c| c.id.as_str())
        .collect();
    Ok(Json(json!({
        "botIdentity": identity,
        "channels": channels,
        "conversations": rows,
    })))
}

/// GET /conversations/:sender/messages?channelId=: full history with one sender.
pub async fn sender_messages(
    State(state): State<GatewayState>,
    Path(sender): Path<String>,
    Query(q): Query<ChannelQuery>,
) -> ApiResult {
    let identity = identity_for(&state, &q.channel_id)?;
    let messages = state.store.messages_for_sender(&identity, &sender).await?;
    Ok(Json(json!({ "sender": sender, "messages": messages })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackQuery {
    pub channel_id: String,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// GET /feedback?channelId=&kind=&status=: entries for the identity, newest first.
pub async fn feedback(
    State(state): State<GatewayState>,
    Query(q): Query<FeedbackQuery>,
) -> ApiResult {
    let identity = identity_for(&state, &q.channel_id)?;
    let filter = FeedbackFilter {
        kind: q
            .kind
            .as_deref()
            .map(str::parse::<FeedbackKind>)
            .transpose()
            .map_err(ApiError::bad_request)?,
        status: q
            .status
            .as_deref()
            .map(str::parse::<FeedbackStatus>)
            .transpose()
            .map_err(ApiError::bad_request)?,
    };
    let entries = state.store.list_feedback(&identity, &filter).await?;
    Ok(Json(json!({ "feedback": entries })))
}
