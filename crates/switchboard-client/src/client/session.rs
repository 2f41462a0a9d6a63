//! One live connection to one server.
//!
//! A [`Session`] owns exactly one transport, the correlation table for its
//! in-flight calls and the reader task that drains the transport. Its state
//! moves `Disconnected → Connecting → Connected → Disconnected`; once
//! disconnected a session is never reused, and reconnecting produces a new
//! session with a new [`SessionId`].

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use switchboard_protocol::types::{
    CancelledNotification, ClientCapabilities, InitializeRequest, InitializeResult,
    ListPromptsResult, ListResourceTemplatesResult, ListResourcesResult, ListToolsResult,
    PaginatedRequest, Prompt, Resource, ResourceTemplate, Tool,
};
use switchboard_protocol::{
    JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, PROTOCOL_VERSION, RequestId, methods,
};
use switchboard_transport::{Transport, TransportType};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::dispatcher::{PendingCalls, ReaderLink, run_reader};
use super::router::CallbackRouter;
use crate::config::{ClientConfig, ServerEntry};
use crate::error::{Error, Result};
use crate::handlers::{HandlerRegistry, ProgressHandler};

/// Opaque identity of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Uuid);

impl SessionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not connected; terminal for a given session
    Disconnected,
    /// Transport open, handshake in progress
    Connecting,
    /// Ready for calls
    Connected,
}

/// A live connection to one server.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    server: String,
    transport: Arc<Transport>,
    state: Arc<Mutex<SessionState>>,
    pending: Arc<PendingCalls>,
    next_id: AtomicI64,
    reader: Mutex<Option<JoinHandle<()>>>,
    server_info: OnceLock<InitializeResult>,
    default_timeout: Option<Duration>,
}

impl Session {
    /// Open the transport for `entry`, start the reader and run the
    /// `initialize` handshake.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] for an unusable transport description,
    /// [`Error::Connection`] if the transport cannot be opened or the
    /// handshake fails or exceeds `init_timeout`.
    pub(crate) async fn connect(
        entry: &ServerEntry,
        config: &ClientConfig,
        handlers: &HandlerRegistry,
    ) -> Result<Arc<Self>> {
        let transport = Arc::new(Transport::from_spec(&entry.spec)?);
        let state = Arc::new(Mutex::new(SessionState::Connecting));
        let inbound = transport.open().await.map_err(|e| {
            *state.lock() = SessionState::Disconnected;
            Error::connection(format!("failed to connect to '{}': {e}", entry.name))
        })?;

        let pending = Arc::new(PendingCalls::default());
        let router = Arc::new(CallbackRouter::new(
            entry.name.clone(),
            handlers.clone(),
            Arc::clone(&pending),
        ));
        let reader = tokio::spawn(run_reader(
            inbound,
            ReaderLink {
                server: entry.name.clone(),
                transport: Arc::clone(&transport),
                pending: Arc::clone(&pending),
                state: Arc::clone(&state),
                router,
            },
        ));

        let session = Arc::new(Self {
            id: SessionId::new(),
            server: entry.name.clone(),
            transport,
            state,
            pending,
            next_id: AtomicI64::new(1),
            reader: Mutex::new(Some(reader)),
            server_info: OnceLock::new(),
            default_timeout: config.default_timeout,
        });

        if let Err(e) = session.handshake(config, handlers).await {
            session.close().await;
            return Err(match e {
                Error::Connection(_) => e,
                other => Error::connection(format!(
                    "handshake with '{}' failed: {other}",
                    session.server
                )),
            });
        }

        {
            let mut state = session.state.lock();
            if *state == SessionState::Connecting {
                *state = SessionState::Connected;
            }
        }
        info!(
            server = %session.server,
            session = %session.id,
            transport = %session.transport.transport_type(),
            "session connected"
        );
        Ok(session)
    }

    async fn handshake(&self, config: &ClientConfig, handlers: &HandlerRegistry) -> Result<()> {
        let request = InitializeRequest {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities {
                sampling: handlers.has_sampling_handler().then(|| json!({})),
                experimental: None,
            },
            client_info: config.client_info.clone(),
        };
        let result: InitializeResult = serde_json::from_value(
            self.request(
                methods::INITIALIZE,
                Some(serde_json::to_value(&request)?),
                Some(config.init_timeout),
                None,
            )
            .await?,
        )?;

        if result.protocol_version != PROTOCOL_VERSION {
            warn!(
                server = %self.server,
                offered = PROTOCOL_VERSION,
                accepted = %result.protocol_version,
                "server negotiated a different protocol version"
            );
        }
        debug!(
            server = %self.server,
            name = %result.server_info.name,
            version = %result.server_info.version,
            "initialized"
        );
        let _ = self.server_info.set(result);
        self.notify(methods::INITIALIZED, None).await
    }

    /// Identity of this session.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Name of the server this session talks to.
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Whether calls can be made.
    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected && self.transport.state().is_connected()
    }

    /// Kind of transport underneath.
    pub fn transport_type(&self) -> TransportType {
        self.transport.transport_type()
    }

    /// Process id of a stdio server.
    pub async fn process_id(&self) -> Option<u32> {
        self.transport.process_id().await
    }

    /// The server's `initialize` result.
    pub fn server_info(&self) -> Option<&InitializeResult> {
        self.server_info.get()
    }

    /// Issue one request and wait for its result.
    ///
    /// With a `timeout`, an expired deadline abandons the call: its entry is
    /// removed, `notifications/cancelled` is sent best-effort and a late
    /// response is discarded. With a `progress` handler, the request carries
    /// its correlation id as `_meta.progressToken`.
    ///
    /// # Errors
    ///
    /// [`Error::Timeout`], [`Error::Connection`] if the session is closed or
    /// fails while waiting, [`Error::Rpc`] for a JSON-RPC error response.
    pub(crate) async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
        progress: Option<Arc<dyn ProgressHandler>>,
    ) -> Result<Value> {
        if self.state() == SessionState::Disconnected {
            return Err(Error::connection(format!(
                "session to '{}' is closed",
                self.server
            )));
        }

        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed));
        let params = match progress {
            Some(_) => Some(with_progress_token(params, &id)),
            None => params,
        };
        let receiver = self.pending.register(id.clone(), method, progress);
        let _registration = Registration {
            pending: &self.pending,
            id: &id,
        };

        self.send(JsonRpcRequest::new(method, params, id.clone()).into())
            .await?;

        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, receiver).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.pending.remove(&id);
                    debug!(server = %self.server, %id, method, "request timed out");
                    self.cancel(&id, "request timed out").await;
                    return Err(Error::Timeout {
                        method: method.to_string(),
                        timeout: limit,
                    });
                }
            },
            None => receiver.await,
        };

        match outcome {
            Ok(Ok(response)) => response.into_result().map_err(Error::from),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::connection(format!(
                "session to '{}' closed while waiting for '{method}'",
                self.server
            ))),
        }
    }

    /// Send one notification.
    ///
    /// # Errors
    ///
    /// [`Error::Connection`] if the transport is unusable.
    pub(crate) async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        self.send(JsonRpcNotification::new(method, params).into())
            .await
    }

    /// Hand one message to the transport. A fatal transport error ends the
    /// session.
    async fn send(&self, message: JsonRpcMessage) -> Result<()> {
        let Err(e) = self.transport.send(message).await else {
            return Ok(());
        };
        let fatal = e.is_fatal();
        let error = Error::from(e);
        if fatal {
            self.fail(&error);
        }
        Err(error)
    }

    /// Move to `Disconnected` and fail every pending call with `reason`.
    fn fail(&self, reason: &Error) {
        let previous = std::mem::replace(&mut *self.state.lock(), SessionState::Disconnected);
        if previous != SessionState::Disconnected {
            error!(server = %self.server, session = %self.id, "session lost: {reason}");
        }
        self.pending.fail_all(reason);
    }

    async fn cancel(&self, id: &RequestId, reason: &str) {
        let notice = CancelledNotification {
            request_id: id.to_value(),
            reason: Some(reason.to_string()),
        };
        let Ok(params) = serde_json::to_value(notice) else {
            return;
        };
        if let Err(e) = self.notify(methods::CANCELLED, Some(params)).await {
            debug!(server = %self.server, %id, "could not send cancellation: {e}");
        }
    }

    /// `ping` the server.
    pub(crate) async fn ping(&self) -> Result<()> {
        self.request(methods::PING, None, self.default_timeout, None)
            .await
            .map(|_| ())
    }

    /// Every tool, following pagination. Empty when the server declares no
    /// tools capability.
    pub(crate) async fn list_tools(&self) -> Result<Vec<Tool>> {
        if !self.declares(|c| c.tools.is_some()) {
            return Ok(Vec::new());
        }
        self.paginate(methods::TOOLS_LIST, |page: ListToolsResult| {
            (page.tools, page.next_cursor)
        })
        .await
    }

    /// Every resource, following pagination.
    pub(crate) async fn list_resources(&self) -> Result<Vec<Resource>> {
        if !self.declares(|c| c.resources.is_some()) {
            return Ok(Vec::new());
        }
        self.paginate(methods::RESOURCES_LIST, |page: ListResourcesResult| {
            (page.resources, page.next_cursor)
        })
        .await
    }

    /// Every resource template, following pagination.
    pub(crate) async fn list_resource_templates(&self) -> Result<Vec<ResourceTemplate>> {
        if !self.declares(|c| c.resources.is_some()) {
            return Ok(Vec::new());
        }
        self.paginate(
            methods::RESOURCE_TEMPLATES_LIST,
            |page: ListResourceTemplatesResult| (page.resource_templates, page.next_cursor),
        )
        .await
    }

    /// Every prompt, following pagination.
    pub(crate) async fn list_prompts(&self) -> Result<Vec<Prompt>> {
        if !self.declares(|c| c.prompts.is_some()) {
            return Ok(Vec::new());
        }
        self.paginate(methods::PROMPTS_LIST, |page: ListPromptsResult| {
            (page.prompts, page.next_cursor)
        })
        .await
    }

    fn declares(
        &self,
        capability: impl Fn(&switchboard_protocol::types::ServerCapabilities) -> bool,
    ) -> bool {
        self.server_info()
            .is_some_and(|info| capability(&info.capabilities))
    }

    async fn paginate<P, T>(
        &self,
        method: &str,
        split: impl Fn(P) -> (Vec<T>, Option<String>),
    ) -> Result<Vec<T>>
    where
        P: DeserializeOwned,
    {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = serde_json::to_value(PaginatedRequest {
                cursor: cursor.clone(),
            })?;
            let page: P = serde_json::from_value(
                self.request(method, Some(params), self.default_timeout, None)
                    .await?,
            )?;
            let (batch, next) = split(page);
            items.extend(batch);
            match next {
                Some(next) if !next.is_empty() && cursor.as_deref() != Some(next.as_str()) => {
                    cursor = Some(next);
                }
                _ => break,
            }
        }
        Ok(items)
    }

    /// Tear the session down: fail pending calls, close the transport and
    /// stop the reader. Idempotent.
    pub async fn close(&self) {
        let previous = std::mem::replace(&mut *self.state.lock(), SessionState::Disconnected);
        let in_flight = self.pending.len();
        self.pending.fail_all(&Error::connection(format!(
            "session to '{}' was closed",
            self.server
        )));
        if let Err(e) = self.transport.close().await {
            warn!(server = %self.server, "failed to close transport: {e}");
        }
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        if previous != SessionState::Disconnected {
            info!(server = %self.server, session = %self.id, in_flight, "session closed");
        }
    }

    /// Synchronous teardown for contexts that cannot await. Stopping the
    /// reader drops its transport handle, which releases the channel.
    pub(crate) fn abort(&self) {
        *self.state.lock() = SessionState::Disconnected;
        self.pending.fail_all(&Error::connection(format!(
            "session to '{}' was dropped",
            self.server
        )));
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
    }
}

/// Removes a pending entry when the waiting caller goes away early.
struct Registration<'a> {
    pending: &'a PendingCalls,
    id: &'a RequestId,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.id);
    }
}

fn with_progress_token(params: Option<Value>, id: &RequestId) -> Value {
    let mut object = match params {
        Some(Value::Object(object)) => object,
        _ => Map::new(),
    };
    let meta = object
        .entry("_meta")
        .or_insert_with(|| Value::Object(Map::new()));
    if let Value::Object(meta) = meta {
        meta.insert("progressToken".to_string(), id.to_value());
    }
    Value::Object(object)
}

/// A cheap, comparable handle to a session.
///
/// Two handles are equal exactly when they refer to the same session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    inner: Arc<Session>,
}

impl SessionHandle {
    pub(crate) fn new(inner: Arc<Session>) -> Self {
        Self { inner }
    }

    /// Identity of the session.
    pub fn id(&self) -> SessionId {
        self.inner.id()
    }

    /// Server name.
    pub fn server(&self) -> &str {
        self.inner.server()
    }

    /// Whether the session is still usable.
    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    /// Kind of transport underneath.
    pub fn transport_type(&self) -> TransportType {
        self.inner.transport_type()
    }

    /// Process id of a stdio server.
    pub async fn process_id(&self) -> Option<u32> {
        self.inner.process_id().await
    }
}

impl PartialEq for SessionHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for SessionHandle {}
