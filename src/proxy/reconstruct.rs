//! Rebuild a local HTTP response from a completed upstream exchange.
//!
//! Status, headers and body are copied from the transport layer as-is. Nothing
//! is derived from the JSON payload, so upstream error bodies and custom
//! headers reach the caller untouched.

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue},
    response::Response,
};

use crate::upstream::CompletedExchange;

/// Content type used when upstream omits one on a buffered reply.
pub const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// Headers that describe the upstream connection rather than the payload.
/// `content-length` is recomputed by the local server.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

fn should_forward_header(name: &str) -> bool {
    !HOP_BY_HOP_HEADERS.contains(&name)
}

/// Copy end-to-end headers, adding `fallback_content_type` if upstream sent none.
pub fn copy_headers(upstream: &HeaderMap, fallback_content_type: &'static str) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(upstream.len() + 1);
    for (name, value) in upstream {
        if should_forward_header(name.as_str()) {
            headers.append(name.clone(), value.clone());
        }
    }
    if !headers.contains_key(header::CONTENT_TYPE) {
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(fallback_content_type),
        );
    }
    headers
}

/// Turn a closed upstream exchange into the outbound response.
pub fn into_response(exchange: CompletedExchange) -> Response {
    let (status, upstream_headers, body) = exchange.into_parts();
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    *response.headers_mut() = copy_headers(&upstream_headers, DEFAULT_CONTENT_TYPE);
    response
}
