//! Unified HTTP error type for axum request handlers.
//!
//! [`AppError`] collects the failures a handler can produce and converts them
//! into OpenAI-style error responses via [`IntoResponse`], so handlers return
//! `Result<T, AppError>` and propagate with `?`.
//!
//! Upstream replies with a non-2xx status are *not* errors here: they are
//! relayed to the caller as-is. Only requests the gateway refuses to forward
//! and upstream servers it cannot reach end up in this type.
//!
//! # Example
//!
//! ```rust,ignore
//! async fn my_handler(
//!     State(state): State<Arc<GatewayState>>,
//!     body: Bytes,
//! ) -> Result<Response, AppError> {
//!     let raw = serde_json::from_slice(&body).map_err(|e| ValidationError::malformed(&e))?;
//!     proxy_chat_completion(&state, id, &headers, raw).await
//! }
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::{request::ValidationError, upstream::UpstreamError};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// The request body failed decoding or validation. Nothing was sent upstream.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The upstream server could not be reached or its reply could not be read.
    #[error("upstream request failed: {0}")]
    Upstream(#[from] UpstreamError),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Upstream(e) if e.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        tracing::warn!(%status, error = %self, "handler error");

        let body = match &self {
            Self::Validation(e) => json!({
                "error": {
                    "type": "invalid_request_error",
                    "message": self.to_string(),
                    "fields": e.errors,
                }
            }),
            Self::Upstream(_) => json!({
                "error": {
                    "type": "upstream_error",
                    "message": self.to_string(),
                }
            }),
        };

        (status, Json(body)).into_response()
    }
}
