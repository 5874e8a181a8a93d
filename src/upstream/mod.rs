//! HTTP client for the upstream OpenAI-compatible inference server.
//!
//! The client returns the raw HTTP exchange rather than a parsed completion:
//! status, headers and either the complete body bytes or a live stream of
//! protocol lines. Non-2xx replies are ordinary exchanges, not errors; only
//! failing to reach the server (or to read a buffered body) is an
//! [`UpstreamError`].
//!
//! One [`UpstreamClient`] is built at startup and cloned into every request.
//! [`reqwest::Client`] holds its connection pool behind an `Arc`, so clones
//! share pooled connections and need no locking.

use std::{io, pin::Pin, time::Duration};

use anyhow::Context;
use bytes::{Buf as _, Bytes, BytesMut};
use futures_util::{Stream, TryStreamExt as _};
use reqwest::{
    header::{self, HeaderMap},
    Client, StatusCode,
};
use tokio_util::{
    codec::{Decoder, FramedRead},
    io::StreamReader,
};
use tracing::debug;

use crate::{config::UpstreamConfig, request::UpstreamCallParameters};

/// Longest single protocol line accepted from upstream.
const MAX_LINE_BYTES: usize = 8 * 1024 * 1024;

/// Single-pass source of raw upstream lines, delimiters stripped.
///
/// Lines are bytes, not text: nothing is decoded on the forwarding path.
pub type LineStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Connection-level failures talking to the upstream server.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("POST {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("reading upstream response body: {source}")]
    Body {
        #[source]
        source: reqwest::Error,
    },
}

impl UpstreamError {
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Request { source, .. } | Self::Body { source } => source.is_timeout(),
        }
    }
}

/// An upstream exchange whose body has been read to the end.
///
/// The only way to obtain one outside tests is [`CompletedExchange::read`],
/// which consumes the response, so holding a value means the exchange is
/// closed and its status, headers and body are final.
#[derive(Debug)]
pub struct CompletedExchange {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl CompletedExchange {
    async fn read(response: reqwest::Response) -> Result<Self, UpstreamError> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|source| UpstreamError::Body { source })?;
        Ok(Self { status, headers, body })
    }

    #[cfg(test)]
    pub(crate) fn from_parts(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_parts(self) -> (StatusCode, HeaderMap, Bytes) {
        (self.status, self.headers, self.body)
    }
}

/// A live upstream exchange; the body is consumed line by line.
pub struct StreamingExchange {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub lines: LineStream,
}

/// What a streaming call produced.
pub enum Exchange {
    /// Upstream accepted the request and is streaming.
    Streaming(StreamingExchange),
    /// Upstream answered with a non-2xx status; the (error) body is materialized.
    Completed(CompletedExchange),
}

/// Shared client for the configured upstream `/chat/completions` endpoint.
#[derive(Clone)]
pub struct UpstreamClient {
    /// Buffered requests, bounded by the configured request timeout.
    client: Client,
    /// Streaming requests: connect timeout only, generation may run long.
    stream_client: Client,
    url: String,
}

impl UpstreamClient {
    /// Build the client pair for the given upstream.
    ///
    /// Resolves the API key from the environment variable named in
    /// `cfg.api_key_env` (if any) and injects it as `Authorization: Bearer ...`.
    pub fn new(cfg: &UpstreamConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(key) = cfg.api_key() {
            let mut value = header::HeaderValue::from_str(&format!("Bearer {key}"))
                .context("invalid API key value for Authorization header")?;
            value.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, value);
        }

        let connect_timeout = Duration::from_millis(cfg.connect_timeout_ms);

        let client = Client::builder()
            .default_headers(headers.clone())
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .connect_timeout(connect_timeout)
            .build()
            .context("building reqwest client")?;

        let stream_client = Client::builder()
            .default_headers(headers)
            .connect_timeout(connect_timeout)
            .build()
            .context("building streaming reqwest client")?;

        Ok(Self {
            client,
            stream_client,
            url: format!("{}/chat/completions", cfg.base_url.trim_end_matches('/')),
        })
    }

    /// The full upstream endpoint URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Forward a non-streaming request and read the whole reply.
    pub async fn complete(
        &self,
        params: &UpstreamCallParameters,
    ) -> Result<CompletedExchange, UpstreamError> {
        let response = self.send(&self.client, params).await?;
        let exchange = CompletedExchange::read(response).await?;
        debug!(status = %exchange.status, bytes = exchange.body.len(), "upstream reply read");
        Ok(exchange)
    }

    /// Forward a streaming request.
    ///
    /// A 2xx reply is returned as a live [`LineStream`] without reading ahead;
    /// any other status is drained into a [`CompletedExchange`] so the error
    /// body can be relayed as-is.
    pub async fn stream(&self, params: &UpstreamCallParameters) -> Result<Exchange, UpstreamError> {
        let response = self.send(&self.stream_client, params).await?;
        if !response.status().is_success() {
            debug!(status = %response.status(), "upstream rejected streaming request");
            return CompletedExchange::read(response).await.map(Exchange::Completed);
        }

        let status = response.status();
        let headers = response.headers().clone();
        Ok(Exchange::Streaming(StreamingExchange {
            status,
            headers,
            lines: line_stream(response.bytes_stream()),
        }))
    }

    async fn send(
        &self,
        client: &Client,
        params: &UpstreamCallParameters,
    ) -> Result<reqwest::Response, UpstreamError> {
        debug!(url = %self.url, model = %params.model, stream = params.stream, "forwarding upstream");
        client
            .post(&self.url)
            .json(params)
            .send()
            .await
            .map_err(|source| UpstreamError::Request {
                url: self.url.clone(),
                source,
            })
    }
}

/// Splits bytes on `\n`, dropping a trailing `\r`. Never decodes UTF-8.
#[derive(Debug, Default)]
struct RawLineCodec {
    /// How far into the buffer has already been searched for `\n`.
    scanned: usize,
}

impl RawLineCodec {
    fn take_line(&mut self, buf: &mut BytesMut, len: usize, delimiter: usize) -> Bytes {
        self.scanned = 0;
        let mut line = buf.split_to(len);
        buf.advance(delimiter);
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        line.freeze()
    }
}

impl Decoder for RawLineCodec {
    type Item = Bytes;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<Bytes>> {
        match buf[self.scanned..].iter().position(|b| *b == b'\n') {
            Some(offset) => {
                let len = self.scanned + offset;
                Ok(Some(self.take_line(buf, len, 1)))
            }
            None if buf.len() > MAX_LINE_BYTES => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("upstream line exceeds {MAX_LINE_BYTES} bytes"),
            )),
            None => {
                self.scanned = buf.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> io::Result<Option<Bytes>> {
        match self.decode(buf)? {
            Some(line) => Ok(Some(line)),
            None if buf.is_empty() => Ok(None),
            None => {
                let len = buf.len();
                Ok(Some(self.take_line(buf, len, 0)))
            }
        }
    }
}

/// Split a byte stream into raw lines.
///
/// Accepts `\n` and `\r\n`; empty lines are kept; a trailing line without a
/// terminator is still yielded. Bytes that are not valid UTF-8 pass through
/// untouched. Reads happen only when the consumer polls.
pub fn line_stream<S, E>(bytes: S) -> LineStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
{
    let reader = StreamReader::new(bytes.map_err(io::Error::other));
    Box::pin(FramedRead::new(reader, RawLineCodec::default()))
}
