//! Manager-facing analysis: cached daily summaries and context-bounded analyst chat.
//!
//! Both paths only read conversations and feedback. Closed days are summarized once and cached
//! per `(bot identity, date)`; today is always recomputed and labelled partial.

mod context;

pub use context::{
    estimate_tokens, extract_keywords, merge_messages, render_context, render_feedback,
    render_transcript, NO_DATA_MESSAGE, PRUNING_NOTE,
};

use crate::config::AnalysisConfig;
use crate::identity::BotIdentityId;
use crate::llm::{complete, LlmBackend, LlmError};
use crate::store::{DailySummary, DateRange, Message, Store, StoreError};
use chrono::{Days, NaiveDate, Utc};
use std::sync::Arc;

const ANALYST_PERSONA: &str = "Você é um ANALISTA DE DADOS da ouvidoria. Responda com base \
exclusivamente nos registros e conversas fornecidos, de forma objetiva e em português. \
Quando os dados não permitirem uma conclusão, diga isso claramente.";

const SUMMARY_PROMPT: &str = "Resuma as seguintes conversas de forma concisa, destacando os \
principais tópicos, problemas relatados e sentimentos gerais dos usuários.";

const CONSOLIDATION_PROMPT: &str = "Consolide os seguintes resumos diários em um único \
relatório executivo do período. Destaque tendências.";

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("model error: {0}")]
    Model(#[from] LlmError),
}

/// Assembled analyst-chat context.
#[derive(Debug, Clone)]
pub struct ChatContext {
    pub text: String,
    /// Messages in the range, before pruning.
    pub total_messages: usize,
    /// Messages actually rendered.
    pub included_messages: usize,
    pub pruned: bool,
}

/// Full transcript below the threshold; otherwise the most recent messages plus keyword
/// matches for the question, merged chronologically. Returns `(selection, count in range, pruned)`.
pub async fn select_context_messages(
    store: &dyn Store,
    identity: &BotIdentityId,
    range: DateRange,
    question: &str,
    settings: &AnalysisConfig,
) -> Result<(Vec<Message>, usize, bool), StoreError> {
    let total = store.count_messages_in_range(identity, range).await?;
    if total < settings.full_context_threshold {
        let all = store.messages_in_range(identity, range).await?;
        return Ok((all, total, false));
    }
    let recent = store
        .latest_messages_in_range(identity, range, settings.recent_window)
        .await?;
    let keywords = extract_keywords(question);
    let matches = if keywords.is_empty() {
        Vec::new()
    } else {
        store
            .search_messages_in_range(identity, range, &keywords, settings.keyword_limit)
            .await?
    };
    log::debug!(
        "analysis: {} pruning {} messages ({} recent, {} keyword matches)",
        identity,
        total,
        recent.len(),
        matches.len()
    );
    Ok((merge_messages(recent, matches), total, true))
}

pub struct AnalysisService {
    store: Arc<dyn Store>,
    backend: Arc<dyn LlmBackend>,
    model: String,
    settings: AnalysisConfig,
}

impl AnalysisService {
    pub fn new(
        store: Arc<dyn Store>,
        backend: Arc<dyn LlmBackend>,
        model: impl Into<String>,
        settings: AnalysisConfig,
    ) -> Self {
        Self {
            store,
            backend,
            model: model.into(),
            settings,
        }
    }

    /// One model call: persona plus context as the system instruction, `prompt` as the user turn.
    async fn ask(&self, prompt: &str, context: &str) -> Result<String, LlmError> {
        let system = format!(
            "{}\n\nContexto adicional e instruções específicas:\n{}",
            ANALYST_PERSONA, context
        );
        complete(self.backend.as_ref(), &self.model, &system, prompt).await
    }

    /// Rendered feedback and transcript for one day, or `None` if the day is empty.
    async fn day_context(
        &self,
        identity: &BotIdentityId,
        date: NaiveDate,
    ) -> Result<Option<String>, StoreError> {
        let day = DateRange::day(date);
        let entries = self.store.feedback_in_range(identity, day).await?;
        let messages = self.store.messages_in_range(identity, day).await?;
        Ok(render_context(&entries, &messages))
    }

    /// Cached summary for a closed day, computing and storing it on a miss.
    async fn closed_day_summary(
        &self,
        identity: &BotIdentityId,
        date: NaiveDate,
    ) -> Result<Option<String>, AnalysisError> {
        if let Some(cached) = self.store.get_daily_summary(identity, date).await? {
            log::debug!("analysis: {} summary cache hit for {}", identity, date);
            return Ok(Some(cached.summary_text));
        }
        let Some(context) = self.day_context(identity, date).await? else {
            return Ok(None);
        };
        let text = self.ask(SUMMARY_PROMPT, &context).await?;
        let row = DailySummary {
            bot_identity: identity.clone(),
            date,
            token_estimate: estimate_tokens(&text),
            summary_text: text.clone(),
            created_at: Utc::now(),
        };
        match self.store.insert_daily_summary(row).await {
            Ok(()) => log::info!("analysis: {} cached summary for {}", identity, date),
            Err(StoreError::Conflict(_)) => {
                log::debug!("analysis: {} summary for {} already cached", identity, date)
            }
            Err(e) => log::warn!("analysis: {} could not cache {}: {}", identity, date, e),
        }
        Ok(Some(text))
    }

    /// Executive report for `range`. Days before `today` use the cache; `today` is only
    /// included when asked for and is never cached.
    pub async fn summarize(
        &self,
        identity: &BotIdentityId,
        range: DateRange,
        include_today: bool,
        today: NaiveDate,
    ) -> Result<String, AnalysisError> {
        let mut parts = Vec::new();
        if let Some(yesterday) = today.checked_sub_days(Days::new(1)) {
            let past = DateRange::new(range.start, range.end.min(yesterday));
            for date in past.days() {
                if let Some(text) = self.closed_day_summary(identity, date).await? {
                    parts.push(format!("Dia {}: {}", date.format("%d/%m/%Y"), text));
                }
            }
        }
        if include_today && range.contains_date(today) {
            if let Some(context) = self.day_context(identity, today).await? {
                let text = self.ask(SUMMARY_PROMPT, &context).await?;
                parts.push(format!(
                    "HOJE ({}) [Parcial]: {}",
                    today.format("%d/%m/%Y"),
                    text
                ));
            }
        }
        if parts.is_empty() {
            return Ok(NO_DATA_MESSAGE.to_string());
        }
        Ok(self
            .ask(CONSOLIDATION_PROMPT, &parts.join("\n\n"))
            .await?)
    }

    /// Feedback-first context for the analyst chat, pruned when the range is large.
    pub async fn build_chat_context(
        &self,
        identity: &BotIdentityId,
        question: &str,
        range: DateRange,
    ) -> Result<ChatContext, StoreError> {
        let entries = self.store.feedback_in_range(identity, range).await?;
        let (messages, total, pruned) =
            select_context_messages(self.store.as_ref(), identity, range, question, &self.settings)
                .await?;
        let mut text =
            render_context(&entries, &messages).unwrap_or_else(|| NO_DATA_MESSAGE.to_string());
        if pruned {
            text.push_str("\n\n");
            text.push_str(PRUNING_NOTE);
        }
        Ok(ChatContext {
            text,
            total_messages: total,
            included_messages: messages.len(),
            pruned,
        })
    }

    /// Answer a manager question about `range` in a single tool-less model call.
    pub async fn answer(
        &self,
        identity: &BotIdentityId,
        question: &str,
        range: DateRange,
    ) -> Result<String, AnalysisError> {
        let ctx = self.build_chat_context(identity, question, range).await?;
        log::info!(
            "analysis: {} chat over {} of {} messages",
            identity,
            ctx.included_messages,
            ctx.total_messages
        );
        let system = format!("{}\n\nCONTEXTO (LOGS):\n{}", ANALYST_PERSONA, ctx.text);
        Ok(complete(self.backend.as_ref(), &self.model, &system, question).await?)
    }
}
