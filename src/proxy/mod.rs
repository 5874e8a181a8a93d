//! Chat completion proxying: the path from a decoded request body to the
//! response handed back to axum.
//!
//! ```text
//! raw JSON ─▶ ChatCompletionRequest ─▶ UpstreamCallParameters ─▶ upstream
//!                                              │                     │
//!                                       start snapshot     complete / stream
//!                                                                    │
//!                          reconstruct::into_response ◀── buffered ──┤
//!                          relay::into_response       ◀── live ──────┘
//! ```
//!
//! Validation failures return before anything is sent upstream. Non-2xx
//! upstream replies are relayed exactly as received; only transport failures
//! become gateway errors.

pub mod reconstruct;
pub mod relay;

use std::sync::Arc;

use axum::{http::HeaderMap, response::Response};
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    config::Config,
    error::AppError,
    observe::{self, Observation, Observer, StartSnapshot},
    request::{ChatCompletionRequest, UpstreamCallParameters},
    upstream::{CompletedExchange, Exchange, UpstreamClient},
};

/// Shared application state injected into every handler via
/// [`axum::extract::State`]. Built once at startup and never mutated.
pub struct GatewayState {
    pub config: Arc<Config>,
    pub upstream: UpstreamClient,
    pub observer: Observer,
}

impl GatewayState {
    pub fn new(config: Arc<Config>, upstream: UpstreamClient, observer: Observer) -> Self {
        Self {
            config,
            upstream,
            observer,
        }
    }

    /// Build the upstream client and observability tap described by `config`.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let upstream = UpstreamClient::new(&config.upstream)?;
        let observer = Observer::new(observe::build_tap(&config.observability)?);
        Ok(Self::new(Arc::new(config), upstream, observer))
    }
}

/// Forward one chat completion request and build the caller's response.
///
/// `trace_id` correlates the two observability snapshots; `headers` are the
/// inbound request headers, recorded (redacted) in the start snapshot.
#[tracing::instrument(
    skip(state, headers, raw),
    fields(model = tracing::field::Empty, stream = tracing::field::Empty)
)]
pub async fn proxy_chat_completion(
    state: &GatewayState,
    trace_id: String,
    headers: &HeaderMap,
    raw: Value,
) -> Result<Response, AppError> {
    let request = ChatCompletionRequest::from_value(raw.clone())?;
    let params = request.upstream_params(state.config.default_model())?;

    let span = tracing::Span::current();
    span.record("model", params.model.as_str());
    span.record("stream", params.stream);

    let observation = state.observer.begin(StartSnapshot {
        trace_id,
        name: if params.stream {
            "streaming response"
        } else {
            "non-streaming response"
        },
        started_at: Utc::now(),
        model: params.model.clone(),
        input: raw,
        model_parameters: params.extra_parameters.clone(),
        headers: observe::snapshot_headers(headers),
    });

    if params.stream {
        stream_completion(state, &params, observation).await
    } else {
        buffered_completion(state, &params, observation).await
    }
}

/// Non-streaming mode: read the whole upstream reply, then answer with it.
async fn buffered_completion(
    state: &GatewayState,
    params: &UpstreamCallParameters,
    observation: Observation,
) -> Result<Response, AppError> {
    let exchange = match state.upstream.complete(params).await {
        Ok(exchange) => exchange,
        Err(e) => {
            observation.fail(String::new(), None, e.to_string());
            return Err(e.into());
        }
    };

    report_completed(&exchange, observation);
    Ok(reconstruct::into_response(exchange))
}

/// Streaming mode: relay the upstream line stream as it arrives.
async fn stream_completion(
    state: &GatewayState,
    params: &UpstreamCallParameters,
    observation: Observation,
) -> Result<Response, AppError> {
    match state.upstream.stream(params).await {
        Ok(Exchange::Streaming(live)) => {
            debug!(status = %live.status, "relaying upstream stream");
            Ok(relay::into_response(live, observation))
        }
        Ok(Exchange::Completed(exchange)) => {
            report_completed(&exchange, observation);
            Ok(reconstruct::into_response(exchange))
        }
        Err(e) => {
            observation.fail(String::new(), None, e.to_string());
            Err(e.into())
        }
    }
}

/// End the observation for a closed exchange.
fn report_completed(exchange: &CompletedExchange, observation: Observation) {
    let status = exchange.status();
    let output = message_text(exchange.body());
    if status.is_success() {
        observation.finish(output, status.as_u16());
    } else {
        warn!(%status, "upstream answered with an error status");
        observation.fail(
            output,
            Some(status.as_u16()),
            format!("upstream returned {status}"),
        );
    }
}

/// `choices[0].message.content` of a completion body, or `""` if the body has
/// none (error payloads, tool calls, non-JSON).
pub fn message_text(body: &[u8]) -> String {
    serde_json::from_slice::<Value>(body)
        .ok()
        .as_ref()
        .and_then(|v| v.pointer("/choices/0/message/content"))
        .and_then(Value::as_str)
        .map(str::to_owned)
        .unwrap_or_default()
}
