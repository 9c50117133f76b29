//! Integration test: drive Telegram webhooks through the router with a scripted model and a
//! recording transport, then read the registered feedback back through the manager API.

use async_trait::async_trait;
use pulsar::channels::{Transport, TransportError, TransportRegistry};
use pulsar::config::Config;
use pulsar::gateway::{router, GatewayState};
use pulsar::identity::{resolve_identity, ChannelKind, ChannelRecord};
use pulsar::llm::{ChatMessage, LlmBackend, LlmError, ModelReply, ToolCall, ToolDefinition};
use pulsar::store::{FeedbackFilter, FeedbackStatus, MemoryStore, Store};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

const BOT_TOKEN: &str = "123456:flow-token";

/// Model stand-in answering from a fixed script.
struct ScriptedModel {
    replies: Mutex<VecDeque<ModelReply>>,
}

impl ScriptedModel {
    fn new(replies: Vec<ModelReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
        }
    }
}

#[async_trait]
impl LlmBackend for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat(
        &self,
        _model: &str,
        _messages: &[ChatMessage],
        _tools: &[ToolDefinition],
    ) -> Result<ModelReply, LlmError> {
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LlmError::Api("script exhausted".to_string()))
    }
}

/// Telegram stand-in that records every outbound text.
#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl Transport for RecordingTransport {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Telegram
    }

    async fn send_message(
        &self,
        _channel: &ChannelRecord,
        recipient: &str,
        text: &str,
    ) -> Result<(), TransportError> {
        self.sent
            .lock()
            .unwrap()
            .push((recipient.to_string(), text.to_string()));
        Ok(())
    }
}

fn telegram_channel(id: &str) -> ChannelRecord {
    ChannelRecord {
        id: id.to_string(),
        name: id.to_string(),
        kind: ChannelKind::Telegram,
        bot_token: Some(BOT_TOKEN.to_string()),
        phone_number_id: None,
        access_token: None,
    }
}

fn update(message_id: i64, text: &str) -> serde_json::Value {
    json!({
        "update_id": message_id,
        "message": {
            "message_id": message_id,
            "chat": { "id": 4242 },
            "text": text,
        }
    })
}

async fn serve(state: GatewayState) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router(state)).await;
    });
    format!("http://{}", addr)
}

async fn post_update(client: &reqwest::Client, base: &str, body: &serde_json::Value) -> String {
    let res = client
        .post(format!("{}/webhook/telegram/{}", base, BOT_TOKEN))
        .json(body)
        .send()
        .await
        .expect("webhook request");
    assert!(res.status().is_success());
    let json: serde_json::Value = res.json().await.expect("webhook json");
    json["status"].as_str().unwrap_or_default().to_string()
}

#[tokio::test]
async fn demand_is_registered_after_confirmation() {
    let model = Arc::new(ScriptedModel::new(vec![
        ModelReply {
            text: "Entendi. Quer que eu registre uma demanda sobre a internet?".to_string(),
            tool_calls: Vec::new(),
        },
        ModelReply {
            text: String::new(),
            tool_calls: vec![ToolCall {
                name: "confirm_entry".to_string(),
                arguments: json!({
                    "kind": "demand",
                    "title": "Internet",
                    "description": "Problema na internet",
                    "confirm": true,
                }),
            }],
        },
        ModelReply {
            text: "Pronto, sua demanda foi registrada.".to_string(),
            tool_calls: Vec::new(),
        },
    ]));
    let transport = Arc::new(RecordingTransport::default());
    let transports = Arc::new(TransportRegistry::new());
    transports.register(transport.clone()).await;

    let mut config = Config::default();
    config.channels = vec![telegram_channel("tg-a"), telegram_channel("tg-b")];
    let identity = resolve_identity(&config.channels[0]);
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let state = GatewayState::new(config, store.clone(), model, transports);
    let base = serve(state).await;
    let client = reqwest::Client::new();

    assert_eq!(
        post_update(&client, &base, &update(1, "Problema na internet")).await,
        "success"
    );
    let none = store
        .list_feedback(&identity, &FeedbackFilter::default())
        .await
        .unwrap();
    assert!(none.is_empty());

    assert_eq!(post_update(&client, &base, &update(2, "Sim")).await, "success");
    // Vendor redelivery of the same update is a no-op.
    assert_eq!(post_update(&client, &base, &update(2, "Sim")).await, "duplicate");

    let entries = store
        .list_feedback(&identity, &FeedbackFilter::default())
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, FeedbackStatus::Pending);
    assert_eq!(entries[0].description, "Problema na internet");
    assert_eq!(entries[0].sender.as_deref(), Some("4242"));

    let sent = transport.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|(to, _)| to == "4242"));
    assert_eq!(sent[1].1, "Pronto, sua demanda foi registrada.");

    // The second channel on the same bot token sees the same feedback.
    let res: serde_json::Value = client
        .get(format!("{}/feedback?channelId=tg-b&kind=demand", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(res["feedback"].as_array().map(Vec::len), Some(1));

    let res: serde_json::Value = client
        .get(format!("{}/conversations?channelId=tg-a", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(res["channels"], json!(["tg-a", "tg-b"]));
    assert_eq!(res["conversations"][0]["messageCount"], json!(4));
}

#[tokio::test]
async fn unknown_bot_and_unknown_channel_are_rejected() {
    let model = Arc::new(ScriptedModel::new(Vec::new()));
    let mut config = Config::default();
    config.channels = vec![telegram_channel("tg-a")];
    let state = GatewayState::new(
        config,
        Arc::new(MemoryStore::new()),
        model,
        Arc::new(TransportRegistry::new()),
    );
    let base = serve(state).await;
    let client = reqwest::Client::new();

    let res: serde_json::Value = client
        .post(format!("{}/webhook/telegram/other-token", base))
        .json(&update(1, "oi"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(res["status"], "ignored");

    let res = client
        .get(format!("{}/feedback?channelId=missing", base))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), reqwest::StatusCode::NOT_FOUND);

    let res = client
        .post(format!("{}/analysis/summary", base))
        .json(&json!({
            "channelId": "tg-a",
            "startDate": "2024-05-10",
            "endDate": "2024-05-01",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), reqwest::StatusCode::BAD_REQUEST);
}
