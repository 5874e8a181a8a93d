//! Side-channel observability for completions.
//!
//! The proxy calls an [`ObservabilityTap`] at two points per request: once
//! before the upstream call ([`StartSnapshot`]) and once when the reply has
//! been fully delivered or has failed ([`EndSnapshot`]). Taps run on detached
//! tasks through [`Observer`]; their errors and panics are logged at `debug`
//! and dropped, so a broken collector can never change what the caller sees.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::{ObservabilityConfig, SinkKind};

/// Request headers whose values never leave the gateway.
const REDACTED_HEADERS: &[&str] = &["authorization", "proxy-authorization", "cookie", "x-api-key"];

/// Recorded before the upstream call is made.
#[derive(Debug, Clone, Serialize)]
pub struct StartSnapshot {
    pub trace_id: String,
    /// `"streaming response"` or `"non-streaming response"`.
    pub name: &'static str,
    pub started_at: DateTime<Utc>,
    /// The resolved model, after default substitution.
    pub model: String,
    /// The request payload as the caller sent it.
    pub input: Value,
    /// Parameters forwarded upstream besides model/messages/stream.
    pub model_parameters: Map<String, Value>,
    pub headers: BTreeMap<String, String>,
}

/// Recorded once the reply is complete (or has failed).
#[derive(Debug, Clone, Serialize)]
pub struct EndSnapshot {
    pub trace_id: String,
    pub ended_at: DateTime<Utc>,
    /// Full generated text; for streams, the concatenation of every delta seen.
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Flatten request headers for a snapshot, masking credentials.
pub fn snapshot_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            let value = if REDACTED_HEADERS.contains(&name.as_str()) {
                "[redacted]".to_string()
            } else {
                String::from_utf8_lossy(value.as_bytes()).into_owned()
            };
            (name.as_str().to_string(), value)
        })
        .collect()
}

/// A sink for completion snapshots.
///
/// Implementations may fail freely; the caller discards errors.
#[async_trait]
pub trait ObservabilityTap: Send + Sync {
    async fn record_start(&self, snapshot: &StartSnapshot) -> anyhow::Result<()>;
    async fn record_end(&self, snapshot: &EndSnapshot) -> anyhow::Result<()>;
}

/// Discards every snapshot.
pub struct NoopTap;

#[async_trait]
impl ObservabilityTap for NoopTap {
    async fn record_start(&self, _snapshot: &StartSnapshot) -> anyhow::Result<()> {
        Ok(())
    }

    async fn record_end(&self, _snapshot: &EndSnapshot) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Emits snapshots as structured `tracing` events.
pub struct TracingTap;

#[async_trait]
impl ObservabilityTap for TracingTap {
    async fn record_start(&self, snapshot: &StartSnapshot) -> anyhow::Result<()> {
        let params = Value::Object(snapshot.model_parameters.clone());
        info!(
            trace_id = %snapshot.trace_id,
            name = snapshot.name,
            model = %snapshot.model,
            input = %snapshot.input,
            model_parameters = %params,
            "completion started"
        );
        Ok(())
    }

    async fn record_end(&self, snapshot: &EndSnapshot) -> anyhow::Result<()> {
        info!(
            trace_id = %snapshot.trace_id,
            status = snapshot.status,
            error = snapshot.error.as_deref(),
            output_chars = snapshot.output.chars().count(),
            output = %snapshot.output,
            "completion finished"
        );
        Ok(())
    }
}

/// Wire shape posted by [`WebhookTap`].
#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum WebhookEvent<'a> {
    Start(&'a StartSnapshot),
    End(&'a EndSnapshot),
}

/// POSTs each snapshot as JSON to a collector endpoint.
pub struct WebhookTap {
    client: reqwest::Client,
    url: String,
}

impl WebhookTap {
    pub fn new(url: String, timeout_ms: u64) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .context("building webhook reqwest client")?;
        Ok(Self { client, url })
    }

    async fn post(&self, event: WebhookEvent<'_>) -> anyhow::Result<()> {
        self.client
            .post(&self.url)
            .json(&event)
            .send()
            .await
            .with_context(|| format!("POST {}", self.url))?
            .error_for_status()
            .context("collector rejected snapshot")?;
        Ok(())
    }
}

#[async_trait]
impl ObservabilityTap for WebhookTap {
    async fn record_start(&self, snapshot: &StartSnapshot) -> anyhow::Result<()> {
        self.post(WebhookEvent::Start(snapshot)).await
    }

    async fn record_end(&self, snapshot: &EndSnapshot) -> anyhow::Result<()> {
        self.post(WebhookEvent::End(snapshot)).await
    }
}

/// Build the tap selected by configuration.
pub fn build_tap(cfg: &ObservabilityConfig) -> anyhow::Result<Arc<dyn ObservabilityTap>> {
    Ok(match cfg.sink {
        SinkKind::None => Arc::new(NoopTap),
        SinkKind::Log => Arc::new(TracingTap),
        SinkKind::Webhook => {
            let url = cfg
                .webhook_url
                .clone()
                .context("observability sink `webhook` requires `webhook_url`")?;
            Arc::new(WebhookTap::new(url, cfg.timeout_ms)?)
        }
    })
}

/// Dispatches snapshots to a tap without blocking the request path.
#[derive(Clone)]
pub struct Observer {
    tap: Arc<dyn ObservabilityTap>,
}

impl Observer {
    pub fn new(tap: Arc<dyn ObservabilityTap>) -> Self {
        Self { tap }
    }

    pub fn noop() -> Self {
        Self::new(Arc::new(NoopTap))
    }

    /// Record the start of a completion and return the handle used to end it.
    pub fn begin(&self, snapshot: StartSnapshot) -> Observation {
        let trace_id = snapshot.trace_id.clone();
        let tap = Arc::clone(&self.tap);
        let start = tokio::spawn(async move {
            if let Err(e) = tap.record_start(&snapshot).await {
                debug!(trace_id = %snapshot.trace_id, error = %e, "start snapshot dropped");
            }
        });
        Observation {
            tap: Arc::clone(&self.tap),
            trace_id,
            start,
        }
    }
}

/// One in-flight completion. Ending it consumes the handle; dropping it
/// without ending (caller went away) simply records nothing further.
pub struct Observation {
    tap: Arc<dyn ObservabilityTap>,
    trace_id: String,
    start: JoinHandle<()>,
}

impl Observation {
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// The reply was delivered in full.
    pub fn finish(self, output: String, status: u16) {
        self.end(output, Some(status), None);
    }

    /// The reply failed; `partial` is whatever output was seen before.
    pub fn fail(self, partial: String, status: Option<u16>, error: String) {
        self.end(partial, status, Some(error));
    }

    fn end(self, output: String, status: Option<u16>, error: Option<String>) {
        let Self { tap, trace_id, start } = self;
        let snapshot = EndSnapshot {
            trace_id,
            ended_at: Utc::now(),
            output,
            status,
            error,
        };
        tokio::spawn(async move {
            // End never overtakes start for the same request.
            if let Err(e) = start.await {
                debug!(trace_id = %snapshot.trace_id, error = %e, "start snapshot task failed");
            }
            if let Err(e) = tap.record_end(&snapshot).await {
                debug!(trace_id = %snapshot.trace_id, error = %e, "end snapshot dropped");
            }
        });
    }
}
