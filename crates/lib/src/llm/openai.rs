//! OpenAI-compatible chat completions client (LM Studio, vLLM, hosted APIs).
//!
//! Uses /v1/chat/completions with function tools. Tool results are matched to the preceding
//! assistant tool calls by order, since internal turns carry no call ids.

use super::{ChatMessage, LlmBackend, LlmError, ModelReply, Role, ToolCall, ToolDefinition};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:1234/v1";

#[derive(Clone)]
pub struct OpenAiClient {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(base_url: Option<String>, api_key: Option<String>) -> Self {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            base_url,
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LlmBackend for OpenAiClient {
    fn name(&self) -> &str {
        "openai"
    }

    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ModelReply, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = OpenAiChatRequest {
            model: model.to_string(),
            messages: messages_to_openai(messages),
            stream: false,
            tools: if tools.is_empty() {
                None
            } else {
                Some(tools.iter().map(OpenAiTool::from).collect())
            },
        };
        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let res = req.send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("{} {}", status, body)));
        }
        let data: OpenAiChatResponse = res.json().await?;
        openai_response_to_reply(data)
    }
}

#[derive(Debug, Serialize)]
struct OpenAiChatRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAiTool>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "role", rename_all = "snake_case")]
enum OpenAiMessage {
    System { content: String },
    User { content: String },
    Assistant {
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<OpenAiToolCallRef>>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

#[derive(Debug, Serialize)]
struct OpenAiToolCallRef {
    id: String,
    #[serde(rename = "type")]
    typ: &'static str,
    function: OpenAiToolCallFunctionRef,
}

#[derive(Debug, Serialize)]
struct OpenAiToolCallFunctionRef {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct OpenAiTool {
    #[serde(rename = "type")]
    typ: &'static str,
    function: OpenAiToolFunction,
}

#[derive(Debug, Serialize)]
struct OpenAiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

impl From<&ToolDefinition> for OpenAiTool {
    fn from(t: &ToolDefinition) -> Self {
        Self {
            typ: "function",
            function: OpenAiToolFunction {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.parameters.clone(),
            },
        }
    }
}

/// Convert internal turns to OpenAI format. Assigns `call_N` ids to assistant tool calls and
/// hands them out in order to the results of the following tool turn.
fn messages_to_openai(messages: &[ChatMessage]) -> Vec<OpenAiMessage> {
    let mut out = Vec::with_capacity(messages.len());
    let mut pending_ids: Vec<String> = Vec::new();
    let mut next_id = 0usize;

    for m in messages {
        match m.role {
            Role::System => out.push(OpenAiMessage::System {
                content: m.content.clone(),
            }),
            Role::User => {
                out.push(OpenAiMessage::User {
                    content: m.content.clone(),
                });
                pending_ids.clear();
            }
            Role::Assistant => {
                let tool_calls = if m.tool_calls.is_empty() {
                    None
                } else {
                    pending_ids.clear();
                    let refs = m
                        .tool_calls
                        .iter()
                        .map(|tc| {
                            let id = format!("call_{}", next_id);
                            next_id += 1;
                            pending_ids.push(id.clone());
                            OpenAiToolCallRef {
                                id,
                                typ: "function",
                                function: OpenAiToolCallFunctionRef {
                                    name: tc.name.clone(),
                                    arguments: serde_json::to_string(&tc.arguments)
                                        .unwrap_or_else(|_| "{}".to_string()),
                                },
                            }
                        })
                        .collect();
                    Some(refs)
                };
                out.push(OpenAiMessage::Assistant {
                    content: m.content.clone(),
                    tool_calls,
                });
            }
            Role::Tool => {
                for r in &m.tool_results {
                    let id = if pending_ids.is_empty() {
                        let fallback = format!("call_{}", next_id);
                        next_id += 1;
                        fallback
                    } else {
                        pending_ids.remove(0)
                    };
                    out.push(OpenAiMessage::Tool {
                        tool_call_id: id,
                        content: serde_json::to_string(&r.response)
                            .unwrap_or_else(|_| "{}".to_string()),
                    });
                }
            }
        }
    }
    out
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    choices: Option<Vec<OpenAiChoice>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: Option<OpenAiResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiResponseToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseToolCall {
    function: Option<OpenAiResponseToolCallFunction>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseToolCallFunction {
    name: Option<String>,
    arguments: Option<String>,
}

fn openai_response_to_reply(data: OpenAiChatResponse) -> Result<ModelReply, LlmError> {
    let message = data
        .choices
        .and_then(|c| c.into_iter().next())
        .and_then(|c| c.message)
        .ok_or_else(|| LlmError::Decode("response has no choices".to_string()))?;
    let tool_calls = message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .filter_map(|tc| {
            let f = tc.function?;
            let name = f.name?;
            let arguments = f
                .arguments
                .as_deref()
                .and_then(|s| serde_json::from_str(s).ok())
                .unwrap_or(serde_json::Value::Null);
            Some(ToolCall { name, arguments })
        })
        .collect();
    Ok(ModelReply {
        text: message.content.unwrap_or_default(),
        tool_calls,
    })
}
