//! Client-facing API: the OpenAI-compatible surface callers talk to.
//!
//! This is intentionally a thin layer: all proxy logic lives in [`crate::proxy`].
//! Handlers translate HTTP concerns (extractors, raw bodies) into a call to
//! the proxy and hand its response straight back to axum.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::HeaderMap,
    response::{Redirect, Response},
    routing::{get, post},
    Extension, Router,
};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    api::request_id::RequestId,
    error::AppError,
    proxy::{self, GatewayState},
    request::ValidationError,
};

/// Build the client-facing axum router.
///
/// axum's default 2 MiB body cap is replaced by `gateway.max_request_bytes`,
/// which is unlimited unless configured.
pub fn router(state: Arc<GatewayState>) -> Router {
    let body_limit = match state.config.gateway.max_request_bytes {
        Some(max) => DefaultBodyLimit::max(max),
        None => DefaultBodyLimit::disable(),
    };

    Router::new()
        .route("/", get(docs_redirect))
        .route("/healthz", get(crate::api::health::healthz))
        .route("/chat/completions", post(chat_completions))
        .route("/v1/chat/completions", post(chat_completions))
        .layer(body_limit)
        .with_state(state)
}

/// `GET /`: redirect to the API documentation.
pub async fn docs_redirect(State(state): State<Arc<GatewayState>>) -> Redirect {
    Redirect::temporary(&state.config.gateway.docs_url)
}

/// `POST /chat/completions` (and its `/v1` alias): proxy a chat completion.
///
/// The body is taken as raw bytes rather than `Json<_>` so that malformed
/// JSON and a missing content type produce the same structured 422 as any
/// other validation failure.
pub async fn chat_completions(
    State(state): State<Arc<GatewayState>>,
    request_id: Option<Extension<RequestId>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let trace_id = request_id
        .map(|Extension(RequestId(id))| id)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let raw: Value =
        serde_json::from_slice(&body).map_err(|e| ValidationError::malformed(&e))?;
    proxy::proxy_chat_completion(&state, trace_id, &headers, raw).await
}
