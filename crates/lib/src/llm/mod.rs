//! LLM abstraction: backend trait, chat session with tool calling, and clients.
//!
//! Backends are stateless request/response clients; [`ChatSession`] layers the
//! "send message, then send tool results on the same session" protocol on top.

mod ollama;
mod openai;

pub use ollama::OllamaClient;
pub use openai::OpenAiClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One tool/function invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    /// Arguments as a JSON object (some models send a JSON-encoded string instead).
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// Structured result of one tool call, fed back to the model keyed by tool name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub name: String,
    pub response: serde_json::Value,
}

/// A turn in the conversation. A `Tool` turn carries every result of one round of calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResult>,
}

impl ChatMessage {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    pub fn tool_results(results: Vec<ToolResult>) -> Self {
        Self {
            tool_results: results,
            ..Self::with_role(Role::Tool, "")
        }
    }
}

/// Function declaration exposed to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema object for the arguments.
    pub parameters: serde_json::Value,
}

/// What the model answered: free text and any tool calls, in the order returned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelReply {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("llm request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("llm api error: {0}")]
    Api(String),
    #[error("llm response could not be decoded: {0}")]
    Decode(String),
}

/// A chat-completion backend with function calling.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Backend name for logs (e.g. "ollama").
    fn name(&self) -> &str;

    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ModelReply, LlmError>;
}

/// Chat session: system instruction, prior turns and declared tools, grown turn by turn.
pub struct ChatSession<'a> {
    backend: &'a dyn LlmBackend,
    model: &'a str,
    tools: &'a [ToolDefinition],
    messages: Vec<ChatMessage>,
}

impl<'a> ChatSession<'a> {
    pub fn new(
        backend: &'a dyn LlmBackend,
        model: &'a str,
        system_instruction: &str,
        history: &[ChatMessage],
        tools: &'a [ToolDefinition],
    ) -> Self {
        let mut messages = Vec::with_capacity(history.len() + 3);
        if !system_instruction.trim().is_empty() {
            messages.push(ChatMessage::system(system_instruction));
        }
        messages.extend(history.iter().cloned());
        Self {
            backend,
            model,
            tools,
            messages,
        }
    }

    /// Send a user message. On failure the session is left as it was.
    pub async fn send_message(&mut self, text: &str) -> Result<ModelReply, LlmError> {
        self.exchange(ChatMessage::user(text)).await
    }

    /// Send one turn carrying all tool results of the previous reply.
    pub async fn send_tool_results(
        &mut self,
        results: Vec<ToolResult>,
    ) -> Result<ModelReply, LlmError> {
        self.exchange(ChatMessage::tool_results(results)).await
    }

    async fn exchange(&mut self, turn: ChatMessage) -> Result<ModelReply, LlmError> {
        self.messages.push(turn);
        match self.backend.chat(self.model, &self.messages, self.tools).await {
            Ok(reply) => {
                self.messages.push(ChatMessage {
                    tool_calls: reply.tool_calls.clone(),
                    ..ChatMessage::assistant(reply.text.clone())
                });
                Ok(reply)
            }
            Err(e) => {
                self.messages.pop();
                Err(e)
            }
        }
    }

    /// Conversation turns without the system instruction.
    pub fn turns(&self) -> Vec<ChatMessage> {
        self.messages
            .iter()
            .filter(|m| m.role != Role::System)
            .cloned()
            .collect()
    }
}

/// One-shot completion without tools: system context plus a single prompt.
pub async fn complete(
    backend: &dyn LlmBackend,
    model: &str,
    system: &str,
    prompt: &str,
) -> Result<String, LlmError> {
    let mut session = ChatSession::new(backend, model, system, &[], &[]);
    let reply = session.send_message(prompt).await?;
    Ok(reply.text)
}

/// Normalize tool arguments: JSON-encoded strings become objects, null becomes `{}`.
pub fn normalize_arguments(args: &serde_json::Value) -> serde_json::Value {
    match args {
        serde_json::Value::String(s) => {
            serde_json::from_str(s).unwrap_or_else(|_| serde_json::json!({}))
        }
        serde_json::Value::Null => serde_json::json!({}),
        other => other.clone(),
    }
}
