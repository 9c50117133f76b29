//! Agent turn: one user message in, one assistant reply out, with at most one round of tool calls.
//! When the model returns tool calls we execute them in order, send every result back on the same
//! session, and use the second reply as the final text.

use crate::identity::IdentityContext;
use crate::llm::{
    normalize_arguments, ChatMessage, ChatSession, LlmBackend, ToolDefinition, ToolResult,
};
use crate::store::FeedbackEntry;
use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, LazyLock};

pub const APOLOGY: &str =
    "Desculpe, não consegui processar sua solicitação no momento. Tente novamente mais tarde.";
pub const CREATED_ACK: &str = "Perfeito! Sua solicitação foi registrada com sucesso no sistema de ouvidoria. \
Nossa equipe irá analisar e retornar em breve. Obrigado pelo seu feedback!";
pub const CANCELLED_ACK: &str = "Tudo certo! O registro foi cancelado. Se precisar de algo mais, é só chamar.";
pub const GENERIC_ACK: &str = "Entendi! Posso ajudar com mais alguma coisa?";

pub const SYSTEM_INSTRUCTION: &str = "\
Você é o assistente virtual da ouvidoria. Atenda o cidadão com cordialidade, em português, \
com respostas curtas e claras.

Seu trabalho é entender o relato e registrá-lo como demanda (problema ou pedido), sugestão \
ou opinião.

REGRAS OBRIGATÓRIAS DE USO DAS FERRAMENTAS:
1. Quando tiver informação suficiente, chame propose_entry com o tipo, a descrição e, se \
possível, um título curto. Depois resuma o registro ao usuário e pergunte se pode registrar.
2. Só chame confirm_entry com confirm=true depois que o usuário disser claramente que sim. \
Se o usuário desistir, chame confirm_entry com confirm=false.
3. Nunca diga que registrou algo sem ter chamado confirm_entry.
4. Nunca escreva código, nomes de funções ou chamadas de ferramentas no texto da resposta.
5. Se faltar informação, faça uma pergunta de cada vez.";

/// Code-like fragments that mean the model narrated a tool call instead of answering.
static TOOL_LEAK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"print\(|default_api|\b(?:propose|confirm)_entry\s*\(")
        .unwrap_or_else(|e| panic!("invalid leak pattern: {}", e))
});

/// What a tool call did, beyond the JSON handed back to the model.
#[derive(Debug, Clone)]
pub enum ToolEffect {
    None,
    Proposed,
    Cancelled,
    Created(FeedbackEntry),
}

/// Structured tool result plus its side effect.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub response: serde_json::Value,
    pub effect: ToolEffect,
}

impl ToolOutcome {
    /// `{status: "error", message}`, fed back to the model so it can recover.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            response: serde_json::json!({ "status": "error", "message": message.into() }),
            effect: ToolEffect::None,
        }
    }
}

/// Executes declared tools by name with JSON arguments, scoped to the caller's identity.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    fn declarations(&self) -> Vec<ToolDefinition>;

    async fn execute(
        &self,
        name: &str,
        args: &serde_json::Value,
        ctx: &IdentityContext,
    ) -> ToolOutcome;
}

/// Result of one orchestrator turn.
#[derive(Debug, Clone)]
pub struct Reply {
    pub text: String,
    /// Prior history plus the turns added by this call (no system instruction).
    pub history: Vec<ChatMessage>,
    /// Last feedback entry created during this turn, if any.
    pub created_feedback: Option<FeedbackEntry>,
}

impl Reply {
    fn apology(history: &[ChatMessage]) -> Self {
        Self {
            text: APOLOGY.to_string(),
            history: history.to_vec(),
            created_feedback: None,
        }
    }
}

/// Most recent terminal tool state in a turn; picks the canned reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LastOutcome {
    Generic,
    Created,
    Cancelled,
}

impl LastOutcome {
    fn canned(self) -> &'static str {
        match self {
            LastOutcome::Generic => GENERIC_ACK,
            LastOutcome::Created => CREATED_ACK,
            LastOutcome::Cancelled => CANCELLED_ACK,
        }
    }
}

/// True if the reply is empty or contains code-like tool narration.
pub fn leaks_tool_syntax(text: &str) -> bool {
    text.trim().is_empty() || TOOL_LEAK.is_match(text)
}

/// Conversational orchestrator: persona, model backend and tool executor.
pub struct Orchestrator {
    backend: Arc<dyn LlmBackend>,
    model: String,
    tools: Arc<dyn ToolExecutor>,
    system_instruction: String,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn LlmBackend>,
        model: impl Into<String>,
        tools: Arc<dyn ToolExecutor>,
    ) -> Self {
        Self {
            backend,
            model: model.into(),
            tools,
            system_instruction: SYSTEM_INSTRUCTION.to_string(),
        }
    }

    /// Produce the reply for `user_message`. Never fails: model errors degrade to a fixed
    /// apology (first call) or a templated acknowledgement (second call, writes kept).
    pub async fn respond(
        &self,
        user_message: &str,
        history: &[ChatMessage],
        ctx: &IdentityContext,
    ) -> Reply {
        let declarations = self.tools.declarations();
        let mut session = ChatSession::new(
            self.backend.as_ref(),
            &self.model,
            &self.system_instruction,
            history,
            &declarations,
        );

        let first = match session.send_message(user_message).await {
            Ok(reply) => reply,
            Err(e) => {
                log::warn!("agent: {} call failed: {}", self.backend.name(), e);
                return Reply::apology(history);
            }
        };

        if first.tool_calls.is_empty() {
            return Reply {
                text: first.text,
                history: session.turns(),
                created_feedback: None,
            };
        }

        let mut last = LastOutcome::Generic;
        let mut created_feedback = None;
        let mut results = Vec::with_capacity(first.tool_calls.len());
        for call in &first.tool_calls {
            let args = normalize_arguments(&call.arguments);
            log::debug!("agent: executing tool {} for {}", call.name, ctx.bot_identity);
            let outcome = self.tools.execute(&call.name, &args, ctx).await;
            match outcome.effect {
                ToolEffect::Created(entry) => {
                    last = LastOutcome::Created;
                    created_feedback = Some(entry);
                }
                ToolEffect::Cancelled => last = LastOutcome::Cancelled,
                ToolEffect::Proposed | ToolEffect::None => {}
            }
            results.push(ToolResult {
                name: call.name.clone(),
                response: outcome.response,
            });
        }

        let second = session.send_tool_results(results.clone()).await;
        let mut turns = session.turns();
        let text = match second {
            Ok(reply) => {
                if !reply.tool_calls.is_empty() {
                    log::debug!(
                        "agent: ignoring {} tool call(s) in the final reply",
                        reply.tool_calls.len()
                    );
                }
                let text = if leaks_tool_syntax(&reply.text) {
                    log::warn!("agent: final reply narrated a tool call, using canned text");
                    last.canned().to_string()
                } else {
                    reply.text
                };
                if let Some(final_turn) = turns.last_mut() {
                    final_turn.content = text.clone();
                    final_turn.tool_calls.clear();
                }
                text
            }
            Err(e) => {
                log::warn!(
                    "agent: {} call after tools failed: {}",
                    self.backend.name(),
                    e
                );
                let text = last.canned().to_string();
                turns.push(ChatMessage::tool_results(results));
                turns.push(ChatMessage::assistant(text.clone()));
                text
            }
        };

        Reply {
            text,
            history: turns,
            created_feedback,
        }
    }
}
