//! Liveness probe endpoint.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::proxy::GatewayState;

/// `GET /healthz`: always 200 OK with `{"status": "ok", "title": ...}`.
///
/// Never contacts upstream, so it is safe as a Docker / Kubernetes liveness
/// probe even while the inference server is still loading.
pub async fn healthz(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "title": state.config.gateway.title })),
    )
}
