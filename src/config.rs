//! Configuration types for vllm-gateway.
//!
//! Config is loaded once at startup from an optional TOML file, then a small
//! set of environment variables is layered on top. The result is validated
//! before the server opens its port and is immutable for the life of the
//! process.
//!
//! # Example
//! ```toml
//! [gateway]
//! port          = 8080
//! default_model = "Qwen/Qwen2.5-7B-Instruct"
//! title         = "Chat Completion"
//!
//! [upstream]
//! base_url    = "http://localhost:8000/v1"
//! api_key_env = "OPENAI_API_KEY"
//!
//! [observability]
//! sink        = "webhook"
//! webhook_url = "http://collector:4000/ingest"
//! ```

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Top-level gateway configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// The OpenAI-compatible server every request is forwarded to.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Where request/response snapshots are sent.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load and validate the config at `path`.
    ///
    /// A missing file is not an error: the built-in defaults are used, so a
    /// bare `DEFAULT_MODEL=... vllm-gateway` works without any TOML at all.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            toml::from_str(&content).context("parsing config TOML")?
        } else {
            Self::default()
        };
        config.apply_env(|var| std::env::var(var).ok());
        config.validate()?;
        Ok(config)
    }

    /// Layer environment overrides on top of the file values.
    ///
    /// Empty values are treated as unset.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        let var = |name: &str| var(name).filter(|v| !v.is_empty());

        if let Some(model) = var("DEFAULT_MODEL") {
            self.gateway.default_model = Some(model);
        }
        if let Some(title) = var("TITLE") {
            self.gateway.title = Some(title);
        }
        if let Some(base_url) = var("OPENAI_BASE_URL") {
            self.upstream.base_url = base_url;
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        reqwest::Url::parse(&self.upstream.base_url)
            .with_context(|| format!("upstream base_url `{}` is not a valid URL", self.upstream.base_url))?;

        if self.observability.sink == SinkKind::Webhook {
            let url = self
                .observability
                .webhook_url
                .as_deref()
                .context("observability sink `webhook` requires `webhook_url`")?;
            reqwest::Url::parse(url)
                .with_context(|| format!("observability webhook_url `{url}` is not a valid URL"))?;
        }

        Ok(())
    }

    /// The model used when a request omits `model`.
    pub fn default_model(&self) -> Option<&str> {
        self.gateway.default_model.as_deref()
    }
}

/// Core gateway settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    /// Interface to bind (default: `0.0.0.0`).
    #[serde(default = "defaults::bind")]
    pub bind: String,

    /// Port for the chat completions API (default: 8080).
    #[serde(default = "defaults::port")]
    pub port: u16,

    /// Model name substituted when a request omits `model`.
    ///
    /// Leave unset to require every request to name its model.
    #[serde(default)]
    pub default_model: Option<String>,

    /// Display title, reported by `/healthz` and in the startup log.
    #[serde(default)]
    pub title: Option<String>,

    /// Where `GET /` redirects to.
    #[serde(default = "defaults::docs_url")]
    pub docs_url: String,

    /// Log output format (also see `RUST_LOG` for the level filter).
    #[serde(default)]
    pub log_format: LogFormat,

    /// Largest accepted request body in bytes. Unset means no limit, so long
    /// contexts and inline images are left for upstream to judge.
    #[serde(default)]
    pub max_request_bytes: Option<usize>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: defaults::bind(),
            port: defaults::port(),
            default_model: None,
            title: None,
            docs_url: defaults::docs_url(),
            log_format: LogFormat::default(),
            max_request_bytes: None,
        }
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable single-line output.
    #[default]
    Text,
    /// One JSON object per line, for log shippers.
    Json,
}

/// The upstream inference server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    /// Base URL including the API version prefix, e.g. `http://vllm:8000/v1`.
    /// `/chat/completions` is appended per request.
    #[serde(default = "defaults::base_url")]
    pub base_url: String,

    /// Environment variable name whose value is the upstream API key.
    ///
    /// A missing or empty variable means no `Authorization` header is sent,
    /// which is what an unsecured local vLLM expects.
    #[serde(default = "defaults::api_key_env")]
    pub api_key_env: Option<String>,

    /// Total timeout for non-streaming requests in milliseconds (default: 300 000).
    ///
    /// Streaming requests are not bounded by this; they only honour
    /// `connect_timeout_ms`.
    #[serde(default = "defaults::timeout_ms")]
    pub timeout_ms: u64,

    /// TCP connect timeout in milliseconds (default: 10 000).
    #[serde(default = "defaults::connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl UpstreamConfig {
    /// Resolve the API key from the configured environment variable.
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.is_empty())
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::base_url(),
            api_key_env: defaults::api_key_env(),
            timeout_ms: defaults::timeout_ms(),
            connect_timeout_ms: defaults::connect_timeout_ms(),
        }
    }
}

/// Which observability sink receives request/response snapshots.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    /// Discard snapshots.
    #[default]
    None,
    /// Emit snapshots as `tracing` events.
    Log,
    /// POST snapshots as JSON to `webhook_url`.
    Webhook,
}

impl std::fmt::Display for SinkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Log => "log",
            Self::Webhook => "webhook",
        })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub sink: SinkKind,

    /// Collector endpoint for the `webhook` sink.
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// Per-snapshot delivery timeout in milliseconds (default: 5 000).
    #[serde(default = "defaults::sink_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            sink: SinkKind::default(),
            webhook_url: None,
            timeout_ms: defaults::sink_timeout_ms(),
        }
    }
}

mod defaults {
    pub fn bind() -> String {
        "0.0.0.0".into()
    }

    pub fn port() -> u16 {
        8080
    }

    pub fn docs_url() -> String {
        "https://docs.vllm.ai/en/latest/serving/openai_compatible_server.html#chat-api".into()
    }

    pub fn base_url() -> String {
        "http://localhost:8000/v1".into()
    }

    pub fn api_key_env() -> Option<String> {
        Some("OPENAI_API_KEY".into())
    }

    pub fn timeout_ms() -> u64 {
        300_000
    }

    pub fn connect_timeout_ms() -> u64 {
        10_000
    }

    pub fn sink_timeout_ms() -> u64 {
        5_000
    }
}
