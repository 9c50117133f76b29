//! Gateway HTTP server: vendor webhooks plus the analysis and browsing API (single port).

use crate::agent::Orchestrator;
use crate::analysis::AnalysisService;
use crate::channels::{
    InboundDelivery, ParsedInbound, TelegramTransport, TelegramUpdate, TransportRegistry,
    WhatsAppPayload, WhatsAppTransport,
};
use crate::config::{self, BackendKind, Config};
use crate::gate::{Handled, InboundGate};
use crate::gateway::api;
use crate::identity::{ChannelDirectory, ChannelKind, ChannelRecord};
use crate::init;
use crate::llm::{LlmBackend, OllamaClient, OpenAiClient};
use crate::store::{MemoryStore, Store};
use crate::tools::FeedbackTools;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

const PROTOCOL_VERSION: u32 = 1;

/// Shared state for every handler.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    pub directory: Arc<ChannelDirectory>,
    pub store: Arc<dyn Store>,
    pub gate: Arc<InboundGate>,
    pub analysis: Arc<AnalysisService>,
}

impl GatewayState {
    /// Wire the orchestrator, gate and analysis service around one store and one model backend.
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        backend: Arc<dyn LlmBackend>,
        transports: Arc<TransportRegistry>,
    ) -> Self {
        let model = config::resolve_model(&config);
        let tools = Arc::new(FeedbackTools::new(
            store.clone(),
            config.agents.proposal_policy,
        ));
        let orchestrator = Arc::new(Orchestrator::new(backend.clone(), model.clone(), tools));
        let gate = Arc::new(InboundGate::new(
            store.clone(),
            orchestrator,
            transports,
            config.agents.history_window,
        ));
        let analysis = Arc::new(AnalysisService::new(
            store.clone(),
            backend,
            model,
            config.analysis.clone(),
        ));
        Self {
            directory: Arc::new(ChannelDirectory::new(config.channels.clone())),
            config: Arc::new(config),
            store,
            gate,
            analysis,
        }
    }
}

/// Backend client for `agents.defaultBackend`.
pub fn build_backend(config: &Config) -> Arc<dyn LlmBackend> {
    let base_url = config.agents.base_url.clone();
    match config.agents.default_backend {
        BackendKind::Ollama => Arc::new(OllamaClient::new(base_url)),
        BackendKind::Openai => Arc::new(OpenAiClient::new(
            base_url,
            config::resolve_api_key(config),
        )),
    }
}

/// All routes, without binding.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(health_http))
        .route("/webhook/telegram/:bot_token", post(telegram_webhook))
        .route("/webhook/whatsapp", post(whatsapp_webhook))
        .route("/analysis/summary", post(api::summary))
        .route("/analysis/chat", post(api::chat))
        .route("/conversations", get(api::conversations))
        .route("/conversations/:sender/messages", get(api::sender_messages))
        .route("/feedback", get(api::feedback))
        .with_state(state)
}

pub async fn run_gateway(config: Config, config_path: PathBuf) -> Result<()> {
    init::require_initialized(&config_path, &config)?;
    let bind = config.gateway.bind.trim().to_string();
    if !config::is_loopback_bind(&bind) && config.gateway.public_url.is_none() {
        anyhow::bail!(
            "refusing to bind gateway to {} without gateway.publicUrl (vendor webhooks need a public address)",
            bind
        );
    }

    let store: Arc<dyn Store> = match config::resolve_store_path(&config, &config_path) {
        Some(path) => Arc::new(
            MemoryStore::load(&path)
                .await
                .with_context(|| format!("loading store from {}", path.display()))?,
        ),
        None => {
            log::warn!("store.path not set; conversations are kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let backend = build_backend(&config);
    log::info!(
        "agent backend {} with model {}",
        backend.name(),
        config::resolve_model(&config)
    );

    let telegram = Arc::new(TelegramTransport::default());
    let transports = Arc::new(TransportRegistry::new());
    transports.register(telegram.clone()).await;
    transports
        .register(Arc::new(WhatsAppTransport::default()))
        .await;

    let state = GatewayState::new(config.clone(), store, backend, transports);
    log::info!("{} channel(s) configured", state.directory.all().len());

    if let Some(public_url) = &config.gateway.public_url {
        register_telegram_webhooks(&telegram, state.directory.all(), public_url).await;
    }

    let app = router(state);
    let bind_addr = if bind.contains(':') && !bind.starts_with('[') {
        format!("[{}]:{}", bind, config.gateway.port)
    } else {
        format!("{}:{}", bind, config.gateway.port)
    };
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

/// Point every Telegram bot at `{public_url}/webhook/telegram/{token}`. Failures are logged.
async fn register_telegram_webhooks(
    telegram: &TelegramTransport,
    channels: &[ChannelRecord],
    public_url: &str,
) {
    let base = public_url.trim_end_matches('/');
    for channel in channels.iter().filter(|c| c.kind == ChannelKind::Telegram) {
        let Some(token) = channel.bot_token() else {
            log::warn!("telegram channel {} has no bot token", channel.id);
            continue;
        };
        let url = format!("{}/webhook/telegram/{}", base, token);
        match telegram.set_webhook(channel, &url).await {
            Ok(()) => log::info!("telegram webhook registered for channel {}", channel.id),
            Err(e) => log::warn!("telegram setWebhook for channel {} failed: {}", channel.id, e),
        }
    }
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, draining connections");
}

/// Webhook answer. Vendors always get 200 so they keep the endpoint enabled.
fn webhook_status(status: &str) -> Json<serde_json::Value> {
    Json(json!({ "status": status }))
}

async fn dispatch(
    state: &GatewayState,
    channel: &ChannelRecord,
    delivery: InboundDelivery,
) -> Json<serde_json::Value> {
    match state.gate.handle_delivery(channel, &delivery).await {
        Ok(Handled::Duplicate) => webhook_status("duplicate"),
        Ok(Handled::Replied { feedback, .. }) => {
            if let Some(entry) = feedback {
                log::info!("gateway: channel {} registered feedback #{}", channel.id, entry.id);
            }
            webhook_status("success")
        }
        Err(e) => {
            log::error!("gateway: channel {} delivery failed: {}", channel.id, e);
            webhook_status("error")
        }
    }
}

/// POST /webhook/telegram/:bot_token: Telegram update for the bot owning the token.
async fn telegram_webhook(
    State(state): State<GatewayState>,
    Path(bot_token): Path<String>,
    body: Bytes,
) -> Json<serde_json::Value> {
    let Some(channel) = state.directory.by_bot_token(&bot_token).cloned() else {
        log::warn!("gateway: telegram update for an unknown bot");
        return webhook_status("ignored");
    };
    let update: TelegramUpdate = match serde_json::from_slice(&body) {
        Ok(u) => u,
        Err(e) => {
            log::debug!("gateway: unparseable telegram update: {}", e);
            return webhook_status("ignored");
        }
    };
    match update.into_inbound() {
        ParsedInbound::Text(delivery) => dispatch(&state, &channel, delivery).await,
        ParsedInbound::NotText => webhook_status("ignored"),
    }
}

/// POST /webhook/whatsapp: Cloud API notification; the business phone-number id selects the channel.
async fn whatsapp_webhook(
    State(state): State<GatewayState>,
    body: Bytes,
) -> Json<serde_json::Value> {
    let payload: WhatsAppPayload = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => {
            log::debug!("gateway: unparseable whatsapp payload: {}", e);
            return webhook_status("ignored");
        }
    };
    let Some(channel) = payload
        .phone_number_id()
        .and_then(|id| state.directory.by_phone_number_id(id))
        .cloned()
    else {
        log::warn!("gateway: whatsapp payload for an unknown phone number id");
        return webhook_status("ignored");
    };
    match payload.into_inbound() {
        ParsedInbound::Text(delivery) => dispatch(&state, &channel, delivery).await,
        ParsedInbound::NotText => webhook_status("ignored"),
    }
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "protocol": PROTOCOL_VERSION,
        "port": state.config.gateway.port,
        "channels": state.directory.all().len(),
    }))
}
