//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.pulsar/config.json`) and environment.

use crate::identity::ChannelRecord;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Gateway server settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Channel records (Telegram bots, WhatsApp numbers).
    #[serde(default)]
    pub channels: Vec<ChannelRecord>,

    /// Model backend and conversation defaults.
    #[serde(default)]
    pub agents: AgentsConfig,

    /// Analyst chat context limits.
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Bundled store persistence.
    #[serde(default)]
    pub store: StoreConfig,
}

/// Gateway bind, port and public address.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for HTTP (default 15151).
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,

    /// Public base URL (e.g. "https://ouvidoria.example.org"). Required for a non-loopback bind;
    /// when set, Telegram webhooks are registered at startup.
    #[serde(default)]
    pub public_url: Option<String>,
}

fn default_gateway_port() -> u16 {
    15151
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
            public_url: None,
        }
    }
}

/// True if the bind address is loopback (127.0.0.1, ::1, etc.).
pub fn is_loopback_bind(bind: &str) -> bool {
    let b = bind.trim();
    b == "127.0.0.1" || b == "::1" || b == "localhost"
}

/// Which model backend serves the orchestrator and the analyst.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Ollama,
    /// Any OpenAI-compatible chat completions endpoint (LM Studio, vLLM, hosted).
    Openai,
}

/// What `confirm_entry` requires from the server-side proposal record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalPolicy {
    /// Confirm without a recorded proposal is allowed and logged.
    #[default]
    Advisory,
    /// Confirm without a recorded proposal is rejected with an error result.
    Enforced,
}

/// Agent defaults (backend, model, history window).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentsConfig {
    #[serde(default)]
    pub default_backend: BackendKind,
    /// Model id for the backend (e.g. "llama3.2:latest" for Ollama). Overridden by PULSAR_MODEL.
    #[serde(default)]
    pub default_model: Option<String>,
    /// Backend base URL; each client has its own default.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Bearer key for OpenAI-compatible backends. Overridden by PULSAR_LLM_API_KEY.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Prior messages with the sender handed to the model each turn.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    #[serde(default)]
    pub proposal_policy: ProposalPolicy,
}

fn default_history_window() -> usize {
    20
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            default_backend: BackendKind::default(),
            default_model: None,
            base_url: None,
            api_key: None,
            history_window: default_history_window(),
            proposal_policy: ProposalPolicy::default(),
        }
    }
}

/// Analyst chat pruning limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalysisConfig {
    /// Below this many messages in range the full transcript is used.
    pub full_context_threshold: usize,
    /// Most recent messages kept when pruning.
    pub recent_window: usize,
    /// Maximum keyword matches added when pruning.
    pub keyword_limit: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            full_context_threshold: 1000,
            recent_window: 50,
            keyword_limit: 50,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    /// JSON snapshot file. Relative paths resolve against the config file's parent.
    /// Absent means the store lives only in memory.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

fn trimmed(value: &Option<String>) -> Option<String> {
    value
        .as_ref()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Resolve the backend API key: env PULSAR_LLM_API_KEY overrides config.
pub fn resolve_api_key(config: &Config) -> Option<String> {
    env_non_empty("PULSAR_LLM_API_KEY").or_else(|| trimmed(&config.agents.api_key))
}

/// Resolve the model id: env PULSAR_MODEL overrides config, then a per-backend fallback.
pub fn resolve_model(config: &Config) -> String {
    env_non_empty("PULSAR_MODEL")
        .or_else(|| trimmed(&config.agents.default_model))
        .unwrap_or_else(|| match config.agents.default_backend {
            BackendKind::Ollama => "llama3.2:latest".to_string(),
            BackendKind::Openai => "gpt-4o-mini".to_string(),
        })
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("PULSAR_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".pulsar").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

fn config_parent(config_path: &Path) -> &Path {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Resolve the store snapshot path (relative paths against the config file's parent).
pub fn resolve_store_path(config: &Config, config_path: &Path) -> Option<PathBuf> {
    match &config.store.path {
        Some(p) if !p.as_os_str().is_empty() => {
            if p.is_absolute() {
                Some(p.clone())
            } else {
                Some(config_parent(config_path).join(p))
            }
        }
        _ => None,
    }
}

/// Load config from the given path, or the default path (or PULSAR_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used (for resolving the config directory).
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
