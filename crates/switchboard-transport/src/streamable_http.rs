//! Streamable HTTP client transport.
//!
//! Every outbound message is an HTTP POST to the endpoint. The server answers
//! with one of:
//!
//! - `202 Accepted` and no body (notifications and responses)
//! - `application/json`, a single frame
//! - `text/event-stream`, frames delivered as SSE `data:` fields, possibly
//!   interleaved with notifications for the same request
//!
//! Once the server assigns an `Mcp-Session-Id`, a GET push stream carries
//! server-initiated messages (log entries, sampling requests). Servers that
//! answer that GET with `405` simply have no push stream.
//!
//! An unreachable server, an expired HTTP session or a response stream that
//! breaks mid-way is fatal: the transport moves to
//! [`TransportState::Failed`] and emits [`TransportEvent::Failed`] as its
//! last event.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use reqwest::{Client as HttpClient, StatusCode, header};
use switchboard_protocol::{JsonRpcMessage, codec};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::error::{TransportError, TransportResult};
use crate::spec::StreamableHttpConfig;
use crate::types::{CHANNEL_CAPACITY, InboundStream, TransportEvent, TransportState};

const SESSION_HEADER: &str = "Mcp-Session-Id";
const PROTOCOL_HEADER: &str = "MCP-Protocol-Version";

/// Streamable HTTP transport.
#[derive(Debug)]
pub struct StreamableHttpTransport {
    config: StreamableHttpConfig,
    http: HttpClient,
    state: Arc<Mutex<TransportState>>,
    session_id: Arc<RwLock<Option<String>>>,
    inbound: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    push_started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StreamableHttpTransport {
    /// Create an unopened transport.
    ///
    /// # Errors
    ///
    /// Fails if the URL does not parse or the HTTP client cannot be built.
    pub fn new(config: StreamableHttpConfig) -> TransportResult<Self> {
        let url = url::Url::parse(&config.url)
            .map_err(|e| TransportError::ConfigurationError(format!("invalid URL '{}': {e}", config.url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(TransportError::ConfigurationError(format!(
                "unsupported URL scheme '{}'",
                url.scheme()
            )));
        }

        let mut builder = HttpClient::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| TransportError::ConfigurationError(format!("HTTP client: {e}")))?;

        Ok(Self {
            config,
            http,
            state: Arc::new(Mutex::new(TransportState::Disconnected)),
            session_id: Arc::new(RwLock::new(None)),
            inbound: Mutex::new(None),
            push_started: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Current state.
    pub fn state(&self) -> TransportState {
        self.state.lock().clone()
    }

    /// Session id assigned by the server, once known.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    /// Prepare the inbound stream. No request is made until the first `send`.
    ///
    /// # Errors
    ///
    /// Fails if the transport is already open.
    pub async fn open(&self) -> TransportResult<InboundStream> {
        let mut state = self.state.lock();
        if *state != TransportState::Disconnected {
            return Err(TransportError::ConnectionFailed(format!(
                "streamable HTTP transport is {state}"
            )));
        }
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        *self.inbound.lock() = Some(tx);
        *self.session_id.write() = None;
        self.push_started.store(false, Ordering::SeqCst);
        *state = TransportState::Connected;
        info!(url = %self.config.url, "streamable HTTP transport opened");
        Ok(rx)
    }

    fn headers(&self, accept: &'static str) -> header::HeaderMap {
        build_headers(&self.config, self.session_id.read().as_deref(), accept)
    }

    /// POST one message and route whatever the server answers to the
    /// inbound stream.
    ///
    /// # Errors
    ///
    /// [`TransportError::ConnectionFailed`] when the server is unreachable,
    /// [`TransportError::ConnectionLost`] when the session expired (404) and
    /// [`TransportError::SendFailed`] for other non-success statuses. The
    /// first two also fail the transport.
    pub async fn send(&self, message: JsonRpcMessage) -> TransportResult<()> {
        match self.post(message).await {
            Err(e) if e.is_fatal() && e != TransportError::NotConnected => {
                self.fail(e.clone()).await;
                Err(e)
            }
            other => other,
        }
    }

    /// Mark the transport failed and tell the reader.
    async fn fail(&self, error: TransportError) {
        let inbound = self.inbound.lock().take();
        if let Some(inbound) = inbound {
            report_failure(&self.state, &inbound, error).await;
        }
    }

    async fn post(&self, message: JsonRpcMessage) -> TransportResult<()> {
        let inbound = self
            .inbound
            .lock()
            .clone()
            .ok_or(TransportError::NotConnected)?;
        let body = codec::encode(&message)?;

        let response = self
            .http
            .post(&self.config.url)
            .headers(self.headers("application/json, text/event-stream"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        let status = response.status();
        if let Some(session_id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            let mut current = self.session_id.write();
            if current.as_deref() != Some(session_id) {
                debug!(session_id, "server assigned HTTP session id");
                *current = Some(session_id.to_string());
            }
        }

        if status == StatusCode::NOT_FOUND && self.session_id().is_some() {
            return Err(TransportError::ConnectionLost(
                "server no longer recognises the HTTP session".to_string(),
            ));
        }
        if !status.is_success() {
            return Err(TransportError::SendFailed(format!("POST returned {status}")));
        }

        self.maybe_start_push_stream(&inbound);

        if status == StatusCode::ACCEPTED {
            trace!("POST accepted without a body");
            return Ok(());
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();

        if content_type.starts_with("text/event-stream") {
            let state = Arc::clone(&self.state);
            let task = tokio::spawn(async move {
                if let Err(e) = pump_sse(response, &inbound).await {
                    report_failure(&state, &inbound, e).await;
                }
            });
            self.tasks.lock().push(task);
        } else {
            let bytes = response
                .bytes()
                .await
                .map_err(|e| TransportError::ConnectionLost(e.to_string()))?;
            if !bytes.iter().all(u8::is_ascii_whitespace) {
                inbound
                    .send(TransportEvent::Frame(bytes))
                    .await
                    .map_err(|_| TransportError::ConnectionLost("inbound reader dropped".into()))?;
            }
        }
        Ok(())
    }

    fn maybe_start_push_stream(&self, inbound: &mpsc::Sender<TransportEvent>) {
        if !self.config.push_stream || self.session_id().is_none() {
            return;
        }
        if self.push_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let request = self
            .http
            .get(&self.config.url)
            .headers(self.headers("text/event-stream"));
        let inbound = inbound.clone();
        let task = tokio::spawn(async move {
            match request.send().await {
                Ok(response) if response.status() == StatusCode::METHOD_NOT_ALLOWED => {
                    debug!("server offers no push stream (405)");
                }
                Ok(response) if response.status().is_success() => {
                    debug!("push stream established");
                    if let Err(e) = pump_sse(response, &inbound).await {
                        warn!("push stream ended: {e}");
                    }
                }
                Ok(response) => warn!("push stream rejected with {}", response.status()),
                Err(e) => warn!("push stream failed: {e}"),
            }
        });
        self.tasks.lock().push(task);
    }

    /// Stop background streams and send a best-effort `DELETE` for the
    /// session. Idempotent.
    pub async fn close(&self) -> TransportResult<()> {
        self.inbound.lock().take();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        let session_id = self.session_id.write().take();
        if let Some(session_id) = session_id {
            let request = self.http.delete(&self.config.url).headers(build_headers(
                &self.config,
                Some(&session_id),
                "application/json",
            ));
            if let Err(e) = request.send().await {
                debug!("session DELETE failed: {e}");
            }
        }
        *self.state.lock() = TransportState::Disconnected;
        Ok(())
    }
}

fn build_headers(
    config: &StreamableHttpConfig,
    session_id: Option<&str>,
    accept: &'static str,
) -> header::HeaderMap {
    let mut headers = header::HeaderMap::new();
    headers.insert(header::ACCEPT, header::HeaderValue::from_static(accept));
    if let Ok(value) = header::HeaderValue::from_str(&config.protocol_version) {
        headers.insert(PROTOCOL_HEADER, value);
    }
    if let Some(value) = session_id.and_then(|sid| header::HeaderValue::from_str(sid).ok()) {
        headers.insert(SESSION_HEADER, value);
    }
    if let Some(value) = config
        .auth_token
        .as_ref()
        .and_then(|token| header::HeaderValue::from_str(&format!("Bearer {token}")).ok())
    {
        headers.insert(header::AUTHORIZATION, value);
    }
    for (key, value) in &config.headers {
        match (
            header::HeaderName::from_bytes(key.as_bytes()),
            header::HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!(header = %key, "skipping invalid header"),
        }
    }
    headers
}

/// Forward every SSE event of `response` as a frame. A closed reader ends
/// the pump quietly.
async fn pump_sse(
    response: reqwest::Response,
    inbound: &mpsc::Sender<TransportEvent>,
) -> TransportResult<()> {
    let mut stream = response.bytes_stream();
    let mut parser = SseParser::default();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| TransportError::ConnectionLost(format!("SSE stream: {e}")))?;
        for data in parser.push(&chunk) {
            if inbound
                .send(TransportEvent::Frame(Bytes::from(data)))
                .await
                .is_err()
            {
                return Ok(());
            }
        }
    }
    trace!("SSE stream ended");
    Ok(())
}

async fn report_failure(
    state: &Mutex<TransportState>,
    inbound: &mpsc::Sender<TransportEvent>,
    error: TransportError,
) {
    {
        let mut state = state.lock();
        if !state.is_connected() {
            return;
        }
        *state = TransportState::Failed {
            reason: error.to_string(),
        };
    }
    error!("streamable HTTP transport failed: {error}");
    if inbound.send(TransportEvent::Failed(error)).await.is_err() {
        debug!("reader already gone");
    }
}

/// Incremental `text/event-stream` parser yielding the `data` of each event.
#[derive(Debug, Default)]
struct SseParser {
    buffer: String,
}

impl SseParser {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer
            .push_str(&String::from_utf8_lossy(chunk).replace("\r\n", "\n"));
        let mut events = Vec::new();
        while let Some(end) = self.buffer.find("\n\n") {
            let block: String = self.buffer.drain(..end + 2).collect();
            let data = block
                .lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(|value| value.strip_prefix(' ').unwrap_or(value))
                .collect::<Vec<_>>()
                .join("\n");
            if !data.is_empty() {
                events.push(data);
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_sse_parser_handles_split_chunks() {
        let mut parser = SseParser::default();
        assert!(parser.push(b"event: message\ndata: {\"a\"").is_empty());
        assert_eq!(parser.push(b":1}\n\n"), vec![r#"{"a":1}"#.to_string()]);
    }

    #[test]
    fn test_sse_parser_skips_comments_and_joins_lines() {
        let mut parser = SseParser::default();
        let events = parser.push(b": keep-alive\n\nid: 4\ndata: one\ndata: two\r\n\r\n");
        assert_eq!(events, vec!["one\ntwo".to_string()]);
    }

    #[test]
    fn test_invalid_url_is_configuration_error() {
        let err = StreamableHttpTransport::new(StreamableHttpConfig::new("not a url")).unwrap_err();
        assert!(matches!(err, TransportError::ConfigurationError(_)));
        let err =
            StreamableHttpTransport::new(StreamableHttpConfig::new("ftp://example.com")).unwrap_err();
        assert!(matches!(err, TransportError::ConfigurationError(_)));
    }

    #[test]
    fn test_headers_carry_credentials_and_session() {
        let config = StreamableHttpConfig::new("http://localhost/mcp")
            .bearer_token("tok")
            .header("X-Team", "blue");
        let headers = build_headers(&config, Some("abc"), "text/event-stream");
        assert_eq!(headers[header::AUTHORIZATION], "Bearer tok");
        assert_eq!(headers[SESSION_HEADER], "abc");
        assert_eq!(headers["x-team"], "blue");
        assert_eq!(headers[header::ACCEPT], "text/event-stream");
    }
}
