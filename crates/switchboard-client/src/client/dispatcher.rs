//! Correlation table and inbound reader for one session.
//!
//! Every session runs exactly one reader task. It is the single consumer of
//! the transport's inbound stream and routes what arrives:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  reader task (one per session)                       │
//! │                                                      │
//! │  loop {                                              │
//! │    event = inbound.recv().await                      │
//! │    Response      => resolve PendingCall by id        │
//! │    Notification  => CallbackRouter (in order)        │
//! │    Request       => CallbackRouter on its own task,  │
//! │                     reply sent back on the transport │
//! │    Failed / EOF  => fail every PendingCall, stop     │
//! │  }                                                   │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! Notifications are handled inline so progress reports reach their handler
//! in arrival order, and before the response they precede. Server requests
//! get their own task: the server still waits for the handler's answer, but
//! responses to other calls keep flowing meanwhile.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use switchboard_protocol::{JsonRpcMessage, JsonRpcResponse, RequestId, codec};
use switchboard_transport::{InboundStream, Transport, TransportEvent};
use tokio::sync::oneshot;
use tracing::{debug, error, info, trace, warn};

use super::router::CallbackRouter;
use super::session::SessionState;
use crate::error::{Error, Result};
use crate::handlers::ProgressHandler;

/// Where a pending call's outcome is delivered.
pub(crate) type ResultSlot = oneshot::Sender<Result<JsonRpcResponse>>;

/// One in-flight request.
#[derive(Debug)]
struct PendingCall {
    method: String,
    slot: ResultSlot,
    progress: Option<Arc<dyn ProgressHandler>>,
}

/// In-flight requests of one session, keyed by correlation id.
///
/// Entries leave the table exactly once: on response, on deadline expiry
/// (the caller removes its own entry), or when the session fails.
#[derive(Debug, Default)]
pub(crate) struct PendingCalls {
    calls: Mutex<HashMap<RequestId, PendingCall>>,
}

impl PendingCalls {
    /// Register a call before its request is sent.
    pub(crate) fn register(
        &self,
        id: RequestId,
        method: &str,
        progress: Option<Arc<dyn ProgressHandler>>,
    ) -> oneshot::Receiver<Result<JsonRpcResponse>> {
        let (slot, receiver) = oneshot::channel();
        let previous = self.calls.lock().insert(
            id.clone(),
            PendingCall {
                method: method.to_string(),
                slot,
                progress,
            },
        );
        if previous.is_some() {
            warn!(%id, "correlation id reused while still pending");
        }
        receiver
    }

    /// Resolve the call a response belongs to. Returns `false` for late or
    /// unknown ids.
    pub(crate) fn complete(&self, response: JsonRpcResponse) -> bool {
        let Some(id) = response.id.clone() else {
            warn!("discarding response without an id");
            return false;
        };
        let Some(call) = self.calls.lock().remove(&id) else {
            debug!(%id, "discarding late or unknown response");
            return false;
        };
        trace!(%id, method = %call.method, "routing response");
        // The caller may have stopped waiting; nothing to do then.
        let _ = call.slot.send(Ok(response));
        true
    }

    /// Forget a call. Safe to call for ids that already left the table.
    pub(crate) fn remove(&self, id: &RequestId) -> bool {
        self.calls.lock().remove(id).is_some()
    }

    /// Progress handler of a pending call. `None` when the call is not
    /// pending; `Some(None)` when it is pending without a handler.
    pub(crate) fn progress_handler(
        &self,
        id: &RequestId,
    ) -> Option<Option<Arc<dyn ProgressHandler>>> {
        self.calls.lock().get(id).map(|call| call.progress.clone())
    }

    /// Fail every pending call with `error` and empty the table.
    pub(crate) fn fail_all(&self, error: &Error) {
        let drained: Vec<(RequestId, PendingCall)> = self.calls.lock().drain().collect();
        if !drained.is_empty() {
            debug!(count = drained.len(), "failing pending calls: {error}");
        }
        for (_, call) in drained {
            let _ = call.slot.send(Err(error.clone()));
        }
    }

    /// Number of in-flight calls.
    pub(crate) fn len(&self) -> usize {
        self.calls.lock().len()
    }
}

/// Everything the reader task needs from its session.
#[derive(Debug)]
pub(crate) struct ReaderLink {
    pub(crate) server: String,
    pub(crate) transport: Arc<Transport>,
    pub(crate) pending: Arc<PendingCalls>,
    pub(crate) state: Arc<Mutex<SessionState>>,
    pub(crate) router: Arc<CallbackRouter>,
}

/// Drain `inbound` until the transport fails or closes.
pub(crate) async fn run_reader(mut inbound: InboundStream, link: ReaderLink) {
    info!(server = %link.server, "session reader started");

    let reason = loop {
        let message = match inbound.recv().await {
            Some(TransportEvent::Message(message)) => message,
            Some(TransportEvent::Frame(frame)) => match codec::decode(&frame) {
                Ok(message) => message,
                Err(e) => {
                    break Error::protocol(format!("malformed frame from '{}': {e}", link.server));
                }
            },
            Some(TransportEvent::Failed(e)) => {
                break Error::connection(format!("connection to '{}' failed: {e}", link.server));
            }
            None => {
                break Error::connection(format!("connection to '{}' closed", link.server));
            }
        };
        link.route(message).await;
    };

    link.shut_down(reason).await;
    info!(server = %link.server, "session reader terminated");
}

impl ReaderLink {
    async fn route(&self, message: JsonRpcMessage) {
        match message {
            JsonRpcMessage::Response(response) => {
                self.pending.complete(response);
            }
            JsonRpcMessage::Notification(notification) => {
                self.router.on_notification(notification).await;
            }
            JsonRpcMessage::Request(request) => {
                debug!(
                    server = %self.server,
                    method = %request.method,
                    id = %request.id,
                    "server-initiated request"
                );
                let router = Arc::clone(&self.router);
                let transport = Arc::clone(&self.transport);
                let server = self.server.clone();
                tokio::spawn(async move {
                    let reply = router.on_request(request).await;
                    if let Err(e) = transport.send(reply.into()).await {
                        warn!(server = %server, "failed to answer server request: {e}");
                    }
                });
            }
        }
    }

    /// Tear the session down after the reader stops.
    async fn shut_down(&self, reason: Error) {
        let was_live = {
            let mut state = self.state.lock();
            let live = *state != SessionState::Disconnected;
            *state = SessionState::Disconnected;
            live
        };
        if was_live {
            error!(server = %self.server, "session lost: {reason}");
        }
        self.pending.fail_all(&reason);
        if let Err(e) = self.transport.close().await {
            warn!(server = %self.server, "failed to close transport: {e}");
        }
    }
}
