//! `propose_entry` / `confirm_entry` executor and the per-sender proposal arena.
//!
//! The model drives the propose/confirm conversation; the arena keeps the server's own record
//! of what was last proposed to each `(bot identity, sender)` so a confirmation can be checked
//! (or completed) even when the history window no longer holds the proposal.

use super::{CONFIRM_ENTRY, PROPOSE_ENTRY};
use crate::agent::{ToolEffect, ToolExecutor, ToolOutcome};
use crate::config::ProposalPolicy;
use crate::identity::{BotIdentityId, IdentityContext};
use crate::llm::ToolDefinition;
use crate::store::{FeedbackKind, FeedbackStatus, NewFeedback, Store};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Content the model proposed and the user has not yet confirmed or cancelled.
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    pub kind: FeedbackKind,
    pub title: Option<String>,
    pub description: String,
    pub proposed_at: DateTime<Utc>,
}

type ArenaKey = (BotIdentityId, String);

/// Proposals older than this are dropped the next time any proposal is recorded.
pub const PROPOSAL_TTL_HOURS: i64 = 24;

/// Pending proposal per `(bot identity, sender)`. A newer proposal replaces the older one.
#[derive(Debug, Default)]
pub struct ProposalArena {
    pending: Mutex<HashMap<ArenaKey, Proposal>>,
}

impl ProposalArena {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ArenaKey, Proposal>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record(&self, identity: &BotIdentityId, sender: &str, proposal: Proposal) {
        let cutoff = proposal.proposed_at - Duration::hours(PROPOSAL_TTL_HOURS);
        let mut pending = self.lock();
        let before = pending.len();
        pending.retain(|_, p| p.proposed_at >= cutoff);
        if pending.len() < before {
            log::debug!("tools: dropped {} stale proposal(s)", before - pending.len());
        }
        pending.insert((identity.clone(), sender.to_string()), proposal);
    }

    pub fn pending(&self, identity: &BotIdentityId, sender: &str) -> Option<Proposal> {
        self.lock()
            .get(&(identity.clone(), sender.to_string()))
            .cloned()
    }

    pub fn take(&self, identity: &BotIdentityId, sender: &str) -> Option<Proposal> {
        self.lock().remove(&(identity.clone(), sender.to_string()))
    }
}

/// Executes the feedback tools against the store.
pub struct FeedbackTools {
    store: Arc<dyn Store>,
    arena: ProposalArena,
    policy: ProposalPolicy,
}

impl FeedbackTools {
    pub fn new(store: Arc<dyn Store>, policy: ProposalPolicy) -> Self {
        Self {
            store,
            arena: ProposalArena::new(),
            policy,
        }
    }

    pub fn arena(&self) -> &ProposalArena {
        &self.arena
    }

    fn propose(&self, args: &Value, ctx: &IdentityContext) -> ToolOutcome {
        let kind = match required_kind(args) {
            Ok(k) => k,
            Err(msg) => return ToolOutcome::error(msg),
        };
        let Some(description) = str_arg(args, "description") else {
            return ToolOutcome::error("description is required");
        };
        let title = str_arg(args, "title");
        log::info!(
            "tools: {} proposed {} for sender {}",
            ctx.bot_identity,
            kind,
            ctx.sender
        );
        self.arena.record(
            &ctx.bot_identity,
            &ctx.sender,
            Proposal {
                kind,
                title: title.clone(),
                description: description.clone(),
                proposed_at: Utc::now(),
            },
        );
        ToolOutcome {
            response: json!({
                "status": "awaiting_confirmation",
                "kind": kind.as_str(),
                "title": title,
                "description": description,
            }),
            effect: ToolEffect::Proposed,
        }
    }

    async fn confirm(&self, args: &Value, ctx: &IdentityContext) -> ToolOutcome {
        let Some(confirm) = bool_arg(args, "confirm") else {
            return ToolOutcome::error("confirm is required");
        };
        if !confirm {
            self.arena.take(&ctx.bot_identity, &ctx.sender);
            log::info!(
                "tools: {} entry cancelled by sender {}",
                ctx.bot_identity,
                ctx.sender
            );
            return ToolOutcome {
                response: json!({ "status": "cancelled" }),
                effect: ToolEffect::Cancelled,
            };
        }

        let pending = self.arena.pending(&ctx.bot_identity, &ctx.sender);
        if pending.is_none() {
            match self.policy {
                ProposalPolicy::Enforced => {
                    return ToolOutcome::error(
                        "no pending proposal for this sender; call propose_entry first",
                    )
                }
                ProposalPolicy::Advisory => log::warn!(
                    "tools: {} confirm without a pending proposal (sender {})",
                    ctx.bot_identity,
                    ctx.sender
                ),
            }
        }

        let kind = match str_arg(args, "kind") {
            Some(raw) => match raw.parse::<FeedbackKind>() {
                Ok(k) => k,
                Err(e) => return ToolOutcome::error(e),
            },
            None => match &pending {
                Some(p) => p.kind,
                None => return ToolOutcome::error("kind is required"),
            },
        };
        let description = match str_arg(args, "description")
            .or_else(|| pending.as_ref().map(|p| p.description.clone()))
        {
            Some(d) => d,
            None => return ToolOutcome::error("description is required"),
        };
        let title = str_arg(args, "title").or_else(|| pending.and_then(|p| p.title));

        let entry = NewFeedback {
            bot_identity: ctx.bot_identity.clone(),
            channel_id: ctx.channel_id.clone(),
            conversation_message_id: ctx.conversation_message_id,
            kind,
            title: title.clone(),
            description: description.clone(),
            sender: Some(ctx.sender.clone()),
            status: FeedbackStatus::Pending,
            created_at: Utc::now(),
        };
        match self.store.insert_feedback(entry).await {
            Ok(created) => {
                self.arena.take(&ctx.bot_identity, &ctx.sender);
                log::info!(
                    "tools: {} registered {} #{} for sender {}",
                    ctx.bot_identity,
                    kind,
                    created.id,
                    ctx.sender
                );
                ToolOutcome {
                    response: json!({
                        "status": "effected",
                        "kind": kind.as_str(),
                        "title": title,
                        "description": description,
                        "entryRef": format!("#{}", created.id),
                    }),
                    effect: ToolEffect::Created(created),
                }
            }
            Err(e) => {
                log::error!("tools: failed to store feedback entry: {}", e);
                ToolOutcome::error("could not register the entry, try again later")
            }
        }
    }
}

#[async_trait]
impl ToolExecutor for FeedbackTools {
    fn declarations(&self) -> Vec<ToolDefinition> {
        super::declarations()
    }

    async fn execute(&self, name: &str, args: &Value, ctx: &IdentityContext) -> ToolOutcome {
        match name {
            PROPOSE_ENTRY => self.propose(args, ctx),
            CONFIRM_ENTRY => self.confirm(args, ctx).await,
            other => {
                log::warn!("tools: model requested unknown tool {}", other);
                ToolOutcome::error(format!("unknown tool: {}", other))
            }
        }
    }
}

fn str_arg(args: &Value, key: &str) -> Option<String> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Booleans, plus the strings "true"/"false" some models send.
fn bool_arg(args: &Value, key: &str) -> Option<bool> {
    match args.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn required_kind(args: &Value) -> Result<FeedbackKind, String> {
    str_arg(args, "kind")
        .ok_or_else(|| "kind is required".to_string())?
        .parse()
}
