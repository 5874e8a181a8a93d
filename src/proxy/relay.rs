//! Streaming relay: upstream lines out to the caller, one at a time.
//!
//! The relay is pull-driven. A line is read from upstream only when the
//! outbound body asks for the next frame, so the caller's backpressure reaches
//! the upstream socket and at most one line is held in between. Each non-empty
//! line is forwarded as `line + "\n\n"`; blank separator lines are dropped and
//! re-created by that framing.
//!
//! Lines are forwarded as raw bytes. Alongside forwarding, a
//! [`TextAccumulator`] reads a lossily decoded copy of each line and collects
//! the `delta.content` fragments for the end-of-stream observability snapshot.
//! Lines it cannot interpret (`[DONE]`, keep-alives, other event shapes,
//! invalid UTF-8) are skipped; the forwarded bytes never depend on it.

use std::io;

use axum::{body::Body, response::Response};
use bytes::{BufMut as _, Bytes, BytesMut};
use futures_util::{Stream, StreamExt as _};
use serde_json::Value;
use tracing::{debug, warn};

use super::reconstruct::copy_headers;
use crate::{
    observe::Observation,
    upstream::{LineStream, StreamingExchange},
};

/// Content type used when upstream omits one on a stream.
pub const DEFAULT_STREAM_CONTENT_TYPE: &str = "text/event-stream";

/// SSE payload prefix, stripped before parsing a line as JSON.
const DATA_PREFIX: &str = "data: ";

/// Appended to every forwarded line.
const FRAME_TERMINATOR: &[u8] = b"\n\n";

/// Concatenates the `choices[0].delta.content` text of streamed chunks.
#[derive(Debug, Default)]
pub struct TextAccumulator {
    text: String,
}

impl TextAccumulator {
    /// Feed one forwarded line. Lines without delta text are ignored.
    pub fn observe(&mut self, line: &str) {
        let payload = line.strip_prefix(DATA_PREFIX).unwrap_or(line);
        let Ok(chunk) = serde_json::from_str::<Value>(payload) else {
            return;
        };
        if let Some(delta) = chunk.pointer("/choices/0/delta/content").and_then(Value::as_str) {
            self.text.push_str(delta);
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

/// Relay progress. Before the first poll the relay has not touched upstream.
enum RelayState {
    Forwarding {
        lines: LineStream,
        text: TextAccumulator,
        observation: Observation,
        status: u16,
        frames: usize,
    },
    Completed,
}

/// Lazily forward `lines` as outbound frames, reporting the accumulated text
/// to `observation` when the stream ends.
///
/// A read error is yielded once and ends the relay; frames already sent stay
/// sent. Dropping the relay (caller disconnected) drops the upstream body and
/// skips the end snapshot.
pub fn relay(
    lines: LineStream,
    observation: Observation,
    status: u16,
) -> impl Stream<Item = io::Result<Bytes>> + Send {
    let state = RelayState::Forwarding {
        lines,
        text: TextAccumulator::default(),
        observation,
        status,
        frames: 0,
    };

    futures_util::stream::unfold(state, |state| async move {
        let RelayState::Forwarding {
            mut lines,
            mut text,
            observation,
            status,
            frames,
        } = state
        else {
            return None;
        };

        loop {
            match lines.next().await {
                Some(Ok(line)) if line.is_empty() => continue,
                Some(Ok(line)) => {
                    text.observe(&String::from_utf8_lossy(&line));
                    let mut frame = BytesMut::with_capacity(line.len() + FRAME_TERMINATOR.len());
                    frame.put_slice(&line);
                    frame.put_slice(FRAME_TERMINATOR);
                    let frame = frame.freeze();
                    let next = RelayState::Forwarding {
                        lines,
                        text,
                        observation,
                        status,
                        frames: frames + 1,
                    };
                    return Some((Ok(frame), next));
                }
                Some(Err(e)) => {
                    warn!(
                        trace_id = observation.trace_id(),
                        frames,
                        error = %e,
                        "upstream stream aborted"
                    );
                    observation.fail(text.into_text(), Some(status), e.to_string());
                    return Some((Err(e), RelayState::Completed));
                }
                None => {
                    debug!(
                        trace_id = observation.trace_id(),
                        frames,
                        chars = text.as_str().chars().count(),
                        "stream relayed"
                    );
                    observation.finish(text.into_text(), status);
                    return None;
                }
            }
        }
    })
}

/// Build the outbound streaming response for a live upstream exchange.
pub fn into_response(exchange: StreamingExchange, observation: Observation) -> Response {
    let StreamingExchange {
        status,
        headers: upstream_headers,
        lines,
    } = exchange;

    let mut response = Response::new(Body::from_stream(relay(lines, observation, status.as_u16())));
    *response.status_mut() = status;
    *response.headers_mut() = copy_headers(&upstream_headers, DEFAULT_STREAM_CONTENT_TYPE);
    response
}
