//! In-process transport.
//!
//! Messages travel as [`JsonRpcMessage`] values over channels between the
//! client and a server loop running on the same runtime, so framing and
//! serialization are skipped. Each request is handled on its own task, which
//! lets a slow tool run while other requests, and the server's own log,
//! progress and sampling traffic, keep flowing.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use switchboard_protocol::types::{
    CreateMessageRequest, CreateMessageResult, LoggingLevel, LoggingMessageNotification,
    ProgressNotification,
};
use switchboard_protocol::{
    JsonRpcError, JsonRpcErrorCode, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, RequestId, methods,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, trace, warn};

use crate::error::{TransportError, TransportResult};
use crate::types::{CHANNEL_CAPACITY, InboundStream, TransportEvent, TransportState};

/// A server object that can be driven without a wire.
///
/// Implementations answer requests with a result value or a JSON-RPC error.
/// Tool failures that should reach the caller verbatim are reported as a
/// successful `tools/call` result with `isError: true`.
#[async_trait]
pub trait InProcessServer: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str {
        "in-process"
    }

    /// Handle one client request.
    async fn handle_request(
        &self,
        request: JsonRpcRequest,
        peer: ServerPeer,
    ) -> Result<Value, JsonRpcError>;

    /// Handle one client notification. The default ignores it.
    async fn handle_notification(&self, notification: JsonRpcNotification, peer: ServerPeer) {
        let _ = (notification, peer);
    }
}

/// Options for [`InProcessTransport`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InProcessOptions {
    /// Replace the message of internal errors (-32603) with a generic one.
    /// Tool results flagged `isError` are never affected.
    pub mask_error_details: bool,
}

type PeerWaiters = Arc<Mutex<HashMap<RequestId, oneshot::Sender<JsonRpcResponse>>>>;

/// The server's view of the connection while it handles one message.
#[derive(Debug, Clone)]
pub struct ServerPeer {
    outbound: mpsc::Sender<TransportEvent>,
    waiters: PeerWaiters,
    next_id: Arc<AtomicI64>,
    progress_token: Option<Value>,
}

impl ServerPeer {
    /// Send a notification to the client.
    ///
    /// # Errors
    ///
    /// Fails when the client side has gone away.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> TransportResult<()> {
        let notification = JsonRpcNotification::new(method, params);
        self.outbound
            .send(TransportEvent::Message(notification.into()))
            .await
            .map_err(|_| TransportError::ConnectionLost("client receiver dropped".into()))
    }

    /// Emit a `notifications/message` log entry.
    ///
    /// # Errors
    ///
    /// Fails when the client side has gone away.
    pub async fn log(
        &self,
        level: LoggingLevel,
        logger: Option<&str>,
        data: Value,
    ) -> TransportResult<()> {
        let params = LoggingMessageNotification {
            level,
            logger: logger.map(str::to_string),
            data,
        };
        self.notify(methods::LOG_MESSAGE, Some(serde_json::to_value(params)?))
            .await
    }

    /// Report progress for the request being handled. A request sent
    /// without a progress token makes this a no-op.
    ///
    /// # Errors
    ///
    /// Fails when the client side has gone away.
    pub async fn progress(
        &self,
        progress: f64,
        total: Option<f64>,
        message: Option<&str>,
    ) -> TransportResult<()> {
        let Some(token) = self.progress_token.clone() else {
            trace!("progress reported without a progress token, skipping");
            return Ok(());
        };
        let params = ProgressNotification {
            progress_token: token,
            progress,
            total,
            message: message.map(str::to_string),
        };
        self.notify(methods::PROGRESS, Some(serde_json::to_value(params)?))
            .await
    }

    /// Send a request to the client and wait for its answer.
    ///
    /// # Errors
    ///
    /// Returns the client's JSON-RPC error, or an internal error when the
    /// connection closes first.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let id = RequestId::String(format!("srv-{}", self.next_id.fetch_add(1, Ordering::Relaxed)));
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().insert(id.clone(), tx);

        let request = JsonRpcRequest::new(method, params, id.clone());
        if self
            .outbound
            .send(TransportEvent::Message(request.into()))
            .await
            .is_err()
        {
            self.waiters.lock().remove(&id);
            return Err(JsonRpcError::internal_error("client disconnected"));
        }

        match rx.await {
            Ok(response) => response.into_result(),
            Err(_) => Err(JsonRpcError::internal_error("client disconnected")),
        }
    }

    /// Ask the client to sample from its model.
    ///
    /// # Errors
    ///
    /// Returns the client's JSON-RPC error or a decoding failure.
    pub async fn create_message(
        &self,
        request: CreateMessageRequest,
    ) -> Result<CreateMessageResult, JsonRpcError> {
        let params = serde_json::to_value(request)
            .map_err(|e| JsonRpcError::internal_error(&e.to_string()))?;
        let result = self
            .request(methods::SAMPLING_CREATE_MESSAGE, Some(params))
            .await?;
        serde_json::from_value(result).map_err(|e| JsonRpcError::internal_error(&e.to_string()))
    }
}

/// Transport that drives an [`InProcessServer`] directly.
pub struct InProcessTransport {
    server: Arc<dyn InProcessServer>,
    options: InProcessOptions,
    state: Mutex<TransportState>,
    to_server: Mutex<Option<mpsc::Sender<JsonRpcMessage>>>,
    server_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for InProcessTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcessTransport")
            .field("server", &self.server.name())
            .field("options", &self.options)
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl InProcessTransport {
    /// Create a transport for `server`.
    pub fn new(server: Arc<dyn InProcessServer>, options: InProcessOptions) -> Self {
        Self {
            server,
            options,
            state: Mutex::new(TransportState::Disconnected),
            to_server: Mutex::new(None),
            server_task: Mutex::new(None),
        }
    }

    /// Current state.
    pub fn state(&self) -> TransportState {
        self.state.lock().clone()
    }

    /// Start the server loop and return the client's inbound stream.
    ///
    /// # Errors
    ///
    /// Fails if the transport is already open.
    pub async fn open(&self) -> TransportResult<InboundStream> {
        {
            let mut state = self.state.lock();
            if *state != TransportState::Disconnected {
                return Err(TransportError::ConnectionFailed(format!(
                    "in-process transport is {state}"
                )));
            }
            *state = TransportState::Connecting;
        }

        let (client_tx, client_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let task = tokio::spawn(server_loop(
            Arc::clone(&self.server),
            self.options.clone(),
            client_rx,
            inbound_tx,
        ));

        *self.to_server.lock() = Some(client_tx);
        *self.server_task.lock() = Some(task);
        *self.state.lock() = TransportState::Connected;
        debug!(server = self.server.name(), "in-process transport opened");
        Ok(inbound_rx)
    }

    /// Deliver one message to the server.
    ///
    /// # Errors
    ///
    /// Fails if the transport is not open or the server loop has stopped.
    pub async fn send(&self, message: JsonRpcMessage) -> TransportResult<()> {
        let sender = self
            .to_server
            .lock()
            .clone()
            .ok_or(TransportError::NotConnected)?;
        sender
            .send(message)
            .await
            .map_err(|_| TransportError::ConnectionLost("in-process server loop stopped".into()))
    }

    /// Stop the server loop and abort in-flight handlers. Idempotent.
    pub async fn close(&self) -> TransportResult<()> {
        self.to_server.lock().take();
        if let Some(task) = self.server_task.lock().take() {
            task.abort();
        }
        *self.state.lock() = TransportState::Disconnected;
        Ok(())
    }
}

async fn server_loop(
    server: Arc<dyn InProcessServer>,
    options: InProcessOptions,
    mut from_client: mpsc::Receiver<JsonRpcMessage>,
    outbound: mpsc::Sender<TransportEvent>,
) {
    let waiters: PeerWaiters = Arc::new(Mutex::new(HashMap::new()));
    let next_id = Arc::new(AtomicI64::new(1));
    let mut handlers = JoinSet::new();

    loop {
        tokio::select! {
            message = from_client.recv() => {
                let Some(message) = message else { break };
                match message {
                    JsonRpcMessage::Request(request) => {
                        let peer = ServerPeer {
                            outbound: outbound.clone(),
                            waiters: Arc::clone(&waiters),
                            next_id: Arc::clone(&next_id),
                            progress_token: progress_token(&request),
                        };
                        let server = Arc::clone(&server);
                        let outbound = outbound.clone();
                        let mask = options.mask_error_details;
                        handlers.spawn(async move {
                            let id = request.id.clone();
                            let response = match server.handle_request(request, peer).await {
                                Ok(result) => JsonRpcResponse::success(result, id),
                                Err(error) => JsonRpcResponse::error_response(mask_error(error, mask), id),
                            };
                            let _ = outbound.send(TransportEvent::Message(response.into())).await;
                        });
                    }
                    JsonRpcMessage::Response(response) => {
                        let waiter = response.id.as_ref().and_then(|id| waiters.lock().remove(id));
                        match waiter {
                            Some(tx) => {
                                let _ = tx.send(response);
                            }
                            None => warn!(id = ?response.id, "in-process server received an unexpected response"),
                        }
                    }
                    JsonRpcMessage::Notification(notification) => {
                        let peer = ServerPeer {
                            outbound: outbound.clone(),
                            waiters: Arc::clone(&waiters),
                            next_id: Arc::clone(&next_id),
                            progress_token: None,
                        };
                        server.handle_notification(notification, peer).await;
                    }
                }
            }
            Some(_) = handlers.join_next(), if !handlers.is_empty() => {}
        }
    }
    debug!(server = server.name(), "in-process server loop finished");
}

fn progress_token(request: &JsonRpcRequest) -> Option<Value> {
    request
        .params
        .as_ref()?
        .get("_meta")?
        .get("progressToken")
        .cloned()
}

fn mask_error(error: JsonRpcError, mask: bool) -> JsonRpcError {
    if mask && error.kind() == JsonRpcErrorCode::InternalError {
        JsonRpcError {
            code: error.code,
            message: "Internal error".to_string(),
            data: None,
        }
    } else {
        error
    }
}

/// Result value for a successful tool call carrying one text block.
pub fn text_result(text: impl Into<String>) -> Value {
    json!({ "content": [{ "type": "text", "text": text.into() }] })
}

/// Result value for a failed tool call; the text reaches the caller verbatim.
pub fn tool_error_result(message: impl Into<String>) -> Value {
    json!({ "content": [{ "type": "text", "text": message.into() }], "isError": true })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Debug)]
    struct Echo;

    #[async_trait]
    impl InProcessServer for Echo {
        async fn handle_request(
            &self,
            request: JsonRpcRequest,
            peer: ServerPeer,
        ) -> Result<Value, JsonRpcError> {
            match request.method.as_str() {
                "echo" => {
                    peer.progress(1.0, Some(1.0), None).await.ok();
                    Ok(request.params.unwrap_or(Value::Null))
                }
                "boom" => Err(JsonRpcError::internal_error("secret stack trace")),
                other => Err(JsonRpcError::method_not_found(other)),
            }
        }
    }

    async fn next_response(inbound: &mut InboundStream) -> JsonRpcResponse {
        loop {
            match inbound.recv().await {
                Some(TransportEvent::Message(JsonRpcMessage::Response(r))) => return r,
                Some(_) => continue,
                None => panic!("inbound closed"),
            }
        }
    }

    #[tokio::test]
    async fn test_request_round_trip_without_framing() {
        let transport = InProcessTransport::new(Arc::new(Echo), InProcessOptions::default());
        let mut inbound = transport.open().await.unwrap();
        transport
            .send(JsonRpcRequest::new("echo", Some(json!({"x": 1})), RequestId::Number(1)).into())
            .await
            .unwrap();
        let response = next_response(&mut inbound).await;
        assert_eq!(response.id, Some(RequestId::Number(1)));
        assert_eq!(response.result(), Some(&json!({"x": 1})));
    }

    #[tokio::test]
    async fn test_progress_uses_request_token() {
        let transport = InProcessTransport::new(Arc::new(Echo), InProcessOptions::default());
        let mut inbound = transport.open().await.unwrap();
        let params = json!({"_meta": {"progressToken": 9}});
        transport
            .send(JsonRpcRequest::new("echo", Some(params), RequestId::Number(9)).into())
            .await
            .unwrap();
        match inbound.recv().await {
            Some(TransportEvent::Message(JsonRpcMessage::Notification(n))) => {
                assert_eq!(n.method, methods::PROGRESS);
                assert_eq!(n.params.unwrap()["progressToken"], json!(9));
            }
            other => panic!("expected progress notification, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_masking_hides_internal_errors() {
        let transport = InProcessTransport::new(
            Arc::new(Echo),
            InProcessOptions {
                mask_error_details: true,
            },
        );
        let mut inbound = transport.open().await.unwrap();
        transport
            .send(JsonRpcRequest::new("boom", None, RequestId::Number(2)).into())
            .await
            .unwrap();
        let error = next_response(&mut inbound).await.into_result().unwrap_err();
        assert_eq!(error.message, "Internal error");
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_rejects_sends() {
        let transport = InProcessTransport::new(Arc::new(Echo), InProcessOptions::default());
        let _inbound = transport.open().await.unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert_eq!(transport.state(), TransportState::Disconnected);
        let err = transport
            .send(JsonRpcRequest::new("echo", None, RequestId::Number(3)).into())
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::NotConnected);
    }
}
