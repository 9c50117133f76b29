//! Plain-text context rendering for the analyst prompts.
//!
//! Feedback entries come first (the official record), then the conversation transcript.
//! Every free-text field passes through [`redact`] before it lands in a prompt.

use crate::redact::redact;
use crate::store::{Direction, FeedbackEntry, Message};
use chrono::{DateTime, Utc};
use std::collections::HashSet;

pub const FEEDBACK_HEADER: &str = "=== REGISTROS OFICIAIS (FEEDBACKS) ===";
pub const TRANSCRIPT_HEADER: &str = "=== HISTÓRICO DE CONVERSAS ===";
pub const PRUNING_NOTE: &str = "[NOTA: Devido ao alto volume, este contexto é uma seleção das \
mensagens mais recentes e relevantes à sua pergunta.]";
pub const NO_DATA_MESSAGE: &str = "Nenhuma conversa encontrada no período.";

fn stamp(ts: &DateTime<Utc>) -> String {
    ts.format("%d/%m %H:%M").to_string()
}

/// Words longer than three characters, stripped of surrounding punctuation, lowercased, first occurrence kept.
pub fn extract_keywords(question: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    question
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| w.chars().count() > 3)
        .filter(|w| seen.insert(w.clone()))
        .collect()
}

/// Union of two selections, deduplicated by id, in chronological order.
pub fn merge_messages(recent: Vec<Message>, matches: Vec<Message>) -> Vec<Message> {
    let mut seen = HashSet::new();
    let mut merged: Vec<Message> = recent
        .into_iter()
        .chain(matches)
        .filter(|m| seen.insert(m.id))
        .collect();
    merged.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    merged
}

/// One block per entry, separated by `---`.
pub fn render_feedback(entries: &[FeedbackEntry]) -> String {
    entries
        .iter()
        .map(|e| {
            let mut block = format!(
                "[{}] TIPO: {} | STATUS: {}\n",
                stamp(&e.created_at),
                e.kind,
                e.status
            );
            if let Some(title) = &e.title {
                block.push_str(&format!("TÍTULO: {}\n", redact(title)));
            }
            block.push_str(&format!("DESCRIÇÃO: {}", redact(&e.description)));
            block
        })
        .collect::<Vec<_>>()
        .join("\n---\n")
}

/// One `[dd/mm HH:MM] Usuário|Atendente: body` line per message.
pub fn render_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| {
            let who = match m.direction {
                Direction::Inbound => "Usuário",
                Direction::Outbound => "Atendente",
            };
            format!("[{}] {}: {}", stamp(&m.created_at), who, redact(&m.body))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Feedback section then transcript section; `None` when there is nothing to render.
pub fn render_context(entries: &[FeedbackEntry], messages: &[Message]) -> Option<String> {
    let mut sections = Vec::with_capacity(2);
    if !entries.is_empty() {
        sections.push(format!("{}\n{}", FEEDBACK_HEADER, render_feedback(entries)));
    }
    if !messages.is_empty() {
        sections.push(format!("{}\n{}", TRANSCRIPT_HEADER, render_transcript(messages)));
    }
    if sections.is_empty() {
        None
    } else {
        Some(sections.join("\n\n"))
    }
}

/// Rough token count: one token per four characters, rounded up.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}
