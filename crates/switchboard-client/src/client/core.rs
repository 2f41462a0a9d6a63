//! The [`Client`] and its scope lifecycle.
//!
//! `Client` is a cheaply-cloneable `Arc` wrapper. All clones share the same
//! sessions, namespace and scope depth:
//!
//! - **`parking_lot::RwLock`** for the session table and namespace, never
//!   held across an `.await`
//! - **`tokio::sync::Mutex`** serializing connect and close
//! - **`AtomicUsize`** for the scope depth
//!
//! Sessions are opened on the first [`Client::enter`] (or an explicit
//! [`Client::connect`]) and kept across scope exits when keep-alive is on.
//! [`Client::close`] always tears them down; the next entry allocates new
//! sessions.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::{join_all, try_join4};
use parking_lot::RwLock;
use switchboard_protocol::types::InitializeResult;
use tracing::{debug, info, warn};

use super::aggregator::{Aggregator, Namespace, ServerListing};
use super::builder::{ClientBuilder, ClientTarget};
use super::session::{Session, SessionHandle};
use crate::config::{ClientConfig, ServerEntry};
use crate::error::{Error, Result};
use crate::handlers::HandlerRegistry;

/// Shared client state.
#[derive(Debug)]
pub(super) struct ClientInner {
    pub(super) config: ClientConfig,
    /// In entry order; an `mcpServers` document yields them sorted by name.
    pub(super) entries: Vec<ServerEntry>,
    pub(super) aggregator: Aggregator,
    pub(super) handlers: HandlerRegistry,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    namespace: RwLock<Option<Arc<Namespace>>>,
    lifecycle: tokio::sync::Mutex<()>,
    scope_depth: AtomicUsize,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        let sessions = self.sessions.get_mut();
        if !sessions.is_empty() {
            debug!(
                count = sessions.len(),
                "last client reference dropped, aborting sessions"
            );
        }
        for (_, session) in sessions.drain() {
            session.abort();
        }
    }
}

/// A client for one or many servers.
///
/// ```rust,no_run
/// use switchboard_client::Client;
///
/// # async fn example() -> switchboard_client::Result<()> {
/// let client = Client::new("https://weather-api.example.com/mcp")?;
/// let tools = client
///     .scoped(|client| async move { client.list_tools().await })
///     .await?;
/// # let _ = tools;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Client {
    pub(super) inner: Arc<ClientInner>,
}

impl Client {
    /// Client for `target` with default configuration.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] when the target names no server, repeats a
    /// server name, or cannot be turned into a transport.
    pub fn new(target: impl Into<ClientTarget>) -> Result<Self> {
        ClientBuilder::new().target(target).build()
    }

    /// Start building a client.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub(super) fn from_parts(
        entries: Vec<ServerEntry>,
        config: ClientConfig,
        handlers: HandlerRegistry,
    ) -> Self {
        let aggregator = Aggregator::new(&entries, config.prefixing);
        Self {
            inner: Arc::new(ClientInner {
                config,
                entries,
                aggregator,
                handlers,
                sessions: RwLock::new(HashMap::new()),
                namespace: RwLock::new(None),
                lifecycle: tokio::sync::Mutex::new(()),
                scope_depth: AtomicUsize::new(0),
            }),
        }
    }

    /// Configuration in effect.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Prefixing and routing rules.
    pub fn aggregator(&self) -> &Aggregator {
        &self.inner.aggregator
    }

    /// Open a session to every server without one and rebuild the
    /// namespace. Live sessions are reused.
    ///
    /// # Errors
    ///
    /// The first connection or handshake failure, or
    /// [`Error::NamespaceCollision`] if the merged namespace is ambiguous.
    /// Sessions that did connect are kept; [`Client::enter`] releases them.
    pub async fn connect(&self) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;

        let missing: Vec<&ServerEntry> = {
            let sessions = self.inner.sessions.read();
            self.inner
                .entries
                .iter()
                .filter(|entry| {
                    sessions
                        .get(&entry.name)
                        .is_none_or(|session| !session.is_connected())
                })
                .collect()
        };
        if missing.is_empty() && self.inner.namespace.read().is_some() {
            return Ok(());
        }

        let results = join_all(missing.iter().map(|entry| {
            Session::connect(entry, &self.inner.config, &self.inner.handlers)
        }))
        .await;

        let mut first_error = None;
        let mut stale = Vec::new();
        {
            let mut sessions = self.inner.sessions.write();
            for (entry, result) in missing.iter().zip(results) {
                match result {
                    Ok(session) => {
                        if let Some(old) = sessions.insert(entry.name.clone(), session) {
                            stale.push(old);
                        }
                    }
                    Err(e) => {
                        warn!(server = %entry.name, "connect failed: {e}");
                        first_error.get_or_insert(e);
                    }
                }
            }
        }
        join_all(stale.iter().map(|session| session.close())).await;
        if let Some(e) = first_error {
            return Err(e);
        }

        let namespace = self.build_namespace().await?;
        *self.inner.namespace.write() = Some(Arc::new(namespace));
        Ok(())
    }

    async fn build_namespace(&self) -> Result<Namespace> {
        let sessions: Vec<Arc<Session>> = {
            let sessions = self.inner.sessions.read();
            self.inner
                .entries
                .iter()
                .filter_map(|entry| sessions.get(&entry.name).cloned())
                .collect()
        };
        let listings = join_all(sessions.iter().map(|session| async move {
            let (tools, resources, resource_templates, prompts) = try_join4(
                session.list_tools(),
                session.list_resources(),
                session.list_resource_templates(),
                session.list_prompts(),
            )
            .await?;
            Ok::<_, Error>(ServerListing {
                server: session.server().to_string(),
                tools,
                resources,
                resource_templates,
                prompts,
            })
        }))
        .await
        .into_iter()
        .collect::<Result<Vec<_>>>()?;
        self.inner.aggregator.build(listings)
    }

    /// Enter a usage scope, connecting first if needed.
    ///
    /// Scopes nest; sessions are released when the outermost scope exits
    /// with keep-alive off, and kept otherwise.
    ///
    /// # Errors
    ///
    /// Whatever [`Client::connect`] fails with. A failed outermost entry
    /// releases any sessions it opened.
    pub async fn enter(&self) -> Result<ClientScope> {
        let previous = self.inner.scope_depth.fetch_add(1, Ordering::SeqCst);
        match self.connect().await {
            Ok(()) => {
                debug!(depth = previous + 1, "entered client scope");
                Ok(ClientScope {
                    client: self.clone(),
                    active: true,
                })
            }
            Err(e) => {
                self.release();
                if previous == 0 {
                    self.close().await;
                }
                Err(e)
            }
        }
    }

    /// Run `body` inside a scope. The scope is exited whether the body
    /// succeeds or fails.
    ///
    /// # Errors
    ///
    /// Entry failures, or the body's own error.
    pub async fn scoped<F, Fut, T>(&self, body: F) -> Result<T>
    where
        F: FnOnce(Client) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let scope = self.enter().await?;
        let outcome = body(self.clone()).await;
        scope.exit().await;
        outcome
    }

    /// Drop one scope level. Returns `true` when sessions must be released.
    fn release(&self) -> bool {
        let previous = self
            .inner
            .scope_depth
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |depth| {
                depth.checked_sub(1)
            })
            .unwrap_or(0);
        previous == 1 && !self.inner.config.keep_alive
    }

    /// Close every session regardless of keep-alive. Idempotent.
    pub async fn close(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;
        let sessions: Vec<Arc<Session>> = self
            .inner
            .sessions
            .write()
            .drain()
            .map(|(_, session)| session)
            .collect();
        *self.inner.namespace.write() = None;
        if sessions.is_empty() {
            return;
        }
        join_all(sessions.iter().map(|session| session.close())).await;
        info!(count = sessions.len(), "client closed");
    }

    /// Whether every configured server has a live session.
    pub fn is_connected(&self) -> bool {
        let sessions = self.inner.sessions.read();
        self.inner.entries.iter().all(|entry| {
            sessions
                .get(&entry.name)
                .is_some_and(|session| session.is_connected())
        })
    }

    /// The session of a single-server client.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] for a multi-server client,
    /// [`Error::Connection`] when not connected.
    pub fn session(&self) -> Result<SessionHandle> {
        match self.inner.entries.as_slice() {
            [only] => self.session_for(&only.name),
            entries => Err(Error::configuration(format!(
                "client has {} servers; use session_for(name)",
                entries.len()
            ))),
        }
    }

    /// The session of one server.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown server, [`Error::Connection`] when
    /// it is not connected.
    pub fn session_for(&self, server: &str) -> Result<SessionHandle> {
        self.live_session(server).map(SessionHandle::new)
    }

    /// Configured server names, in entry order. Servers from an
    /// `mcpServers` document come sorted by name.
    pub fn server_names(&self) -> impl Iterator<Item = &str> {
        self.inner.entries.iter().map(|entry| entry.name.as_str())
    }

    /// A server's `initialize` result, while connected.
    pub fn server_info(&self, server: &str) -> Option<InitializeResult> {
        self.inner
            .sessions
            .read()
            .get(server)
            .and_then(|session| session.server_info().cloned())
    }

    /// The merged namespace, while connected.
    pub fn namespace(&self) -> Option<Arc<Namespace>> {
        self.inner.namespace.read().clone()
    }

    /// `ping` every connected server.
    ///
    /// # Errors
    ///
    /// The first failure among the servers.
    pub async fn ping(&self) -> Result<()> {
        let sessions: Vec<Arc<Session>> = self
            .inner
            .entries
            .iter()
            .map(|entry| self.live_session(&entry.name))
            .collect::<Result<_>>()?;
        join_all(sessions.iter().map(|session| session.ping()))
            .await
            .into_iter()
            .collect()
    }

    /// The connected session for `server`.
    pub(super) fn live_session(&self, server: &str) -> Result<Arc<Session>> {
        if !self.inner.entries.iter().any(|entry| entry.name == server) {
            return Err(Error::NotFound {
                kind: "server",
                name: server.to_string(),
            });
        }
        match self.inner.sessions.read().get(server) {
            Some(session) if session.is_connected() => Ok(Arc::clone(session)),
            Some(_) => Err(Error::connection(format!(
                "session to '{server}' is no longer connected"
            ))),
            None => Err(Error::connection(format!(
                "not connected to '{server}'; enter a client scope first"
            ))),
        }
    }

    /// The namespace, or a connection error outside a scope.
    pub(super) fn require_namespace(&self) -> Result<Arc<Namespace>> {
        self.namespace()
            .ok_or_else(|| Error::connection("client is not connected; enter a client scope first"))
    }
}

/// An entered client scope.
///
/// Call [`exit`](Self::exit) to leave it. Dropping the guard also leaves the
/// scope; any teardown then runs on a spawned task.
#[derive(Debug)]
#[must_use = "dropping the scope leaves it immediately"]
pub struct ClientScope {
    client: Client,
    active: bool,
}

impl ClientScope {
    /// The client this scope belongs to.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Leave the scope, closing sessions when this is the outermost scope
    /// and keep-alive is off.
    pub async fn exit(mut self) {
        self.active = false;
        if self.client.release() {
            self.client.close().await;
        }
        debug!("exited client scope");
    }
}

impl Drop for ClientScope {
    fn drop(&mut self) {
        if !self.active || !self.client.release() {
            return;
        }
        let client = self.client.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { client.close().await });
            }
            Err(_) => warn!("client scope dropped outside a runtime; sessions left open"),
        }
    }
}
