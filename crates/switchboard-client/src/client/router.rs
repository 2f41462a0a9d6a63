//! Routes server-originated messages to the registered handlers.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::{Value, json};
use switchboard_protocol::types::{
    CancelledNotification, ContentBlock, CreateMessageRequest, CreateMessageResult,
    LoggingLevel, LoggingMessageNotification, ProgressNotification, Role,
};
use switchboard_protocol::{
    JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId, methods,
};
use tracing::{debug, error, info, trace, warn};

use super::dispatcher::PendingCalls;
use crate::handlers::{
    HandlerRegistry, HandlerResult, LogMessage, ProgressUpdate, SamplingContext, SamplingParams,
};

/// Model name reported in sampling results.
const SAMPLING_MODEL: &str = "switchboard-client";

/// Per-session router for log, progress and sampling traffic.
#[derive(Debug)]
pub(crate) struct CallbackRouter {
    server: String,
    handlers: HandlerRegistry,
    pending: Arc<PendingCalls>,
}

impl CallbackRouter {
    pub(crate) fn new(
        server: impl Into<String>,
        handlers: HandlerRegistry,
        pending: Arc<PendingCalls>,
    ) -> Self {
        Self {
            server: server.into(),
            handlers,
            pending,
        }
    }

    /// Dispatch one notification. Never fails; problems are logged.
    pub(crate) async fn on_notification(&self, notification: JsonRpcNotification) {
        let params = notification.params.unwrap_or(Value::Null);
        match notification.method.as_str() {
            methods::LOG_MESSAGE => match serde_json::from_value(params) {
                Ok(log) => self.on_log(log).await,
                Err(e) => warn!(server = %self.server, "malformed log notification: {e}"),
            },
            methods::PROGRESS => match serde_json::from_value(params) {
                Ok(progress) => self.on_progress(progress).await,
                Err(e) => warn!(server = %self.server, "malformed progress notification: {e}"),
            },
            methods::CANCELLED => {
                if let Ok(cancelled) = serde_json::from_value::<CancelledNotification>(params) {
                    debug!(
                        server = %self.server,
                        request_id = %cancelled.request_id,
                        reason = ?cancelled.reason,
                        "server cancelled a request"
                    );
                }
            }
            other => debug!(server = %self.server, method = other, "ignoring notification"),
        }
    }

    async fn on_log(&self, log: LoggingMessageNotification) {
        let message = LogMessage {
            level: log.level,
            logger: log
                .logger
                .unwrap_or_else(|| LogMessage::DEFAULT_LOGGER.to_string()),
            data: log.data,
            server: self.server.clone(),
        };

        let Some(handler) = self.handlers.get_log_handler() else {
            emit_server_log(&message);
            return;
        };
        guarded("log", &self.server, handler.handle_log(message)).await;
    }

    async fn on_progress(&self, progress: ProgressNotification) {
        let Some(request_id) = RequestId::from_value(&progress.progress_token) else {
            debug!(server = %self.server, token = %progress.progress_token, "unusable progress token");
            return;
        };
        let handler = match self.pending.progress_handler(&request_id) {
            Some(Some(handler)) => handler,
            Some(None) => {
                trace!(server = %self.server, %request_id, "no progress handler for call");
                return;
            }
            None => {
                debug!(server = %self.server, %request_id, "dropping progress for a call that is not in flight");
                return;
            }
        };
        let update = ProgressUpdate {
            progress: progress.progress,
            total: progress.total,
            message: progress.message,
            server: self.server.clone(),
            request_id,
        };
        guarded("progress", &self.server, handler.handle_progress(update)).await;
    }

    /// Answer one server request.
    pub(crate) async fn on_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();
        let outcome = match request.method.as_str() {
            methods::PING => Ok(json!({})),
            methods::SAMPLING_CREATE_MESSAGE => self.on_create_message(request).await,
            other => {
                debug!(server = %self.server, method = other, "unsupported server request");
                Err(JsonRpcError::method_not_found(other))
            }
        };
        match outcome {
            Ok(result) => JsonRpcResponse::success(result, id),
            Err(error) => JsonRpcResponse::error_response(error, id),
        }
    }

    async fn on_create_message(&self, request: JsonRpcRequest) -> Result<Value, JsonRpcError> {
        let Some(handler) = self.handlers.get_sampling_handler() else {
            debug!(server = %self.server, "sampling requested but no handler is registered");
            return Err(JsonRpcError::method_not_found(methods::SAMPLING_CREATE_MESSAGE));
        };
        let params: CreateMessageRequest =
            serde_json::from_value(request.params.unwrap_or(Value::Null))
                .map_err(|e| JsonRpcError::invalid_params(&e.to_string()))?;

        let context = SamplingContext {
            server: self.server.clone(),
            request_id: request.id,
        };
        let sampling = SamplingParams {
            max_tokens: params.max_tokens,
            system_prompt: params.system_prompt,
            temperature: params.temperature,
            stop_sequences: params.stop_sequences,
            model_preferences: params.model_preferences,
            include_context: params.include_context,
            metadata: params.metadata,
        };

        let call = handler.handle_create_message(params.messages, sampling, context);
        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(text)) => serde_json::to_value(CreateMessageResult {
                role: Role::Assistant,
                content: ContentBlock::Text { text },
                model: SAMPLING_MODEL.to_string(),
                stop_reason: Some("endTurn".to_string()),
            })
            .map_err(|e| JsonRpcError::internal_error(&e.to_string())),
            Ok(Err(e)) => {
                warn!(server = %self.server, "sampling handler failed: {e}");
                Err(e.into_jsonrpc_error())
            }
            Err(_) => {
                error!(server = %self.server, "sampling handler panicked");
                Err(JsonRpcError::internal_error("sampling handler panicked"))
            }
        }
    }
}

/// Run a handler future, logging errors and panics instead of propagating.
async fn guarded<F>(kind: &str, server: &str, call: F)
where
    F: Future<Output = HandlerResult<()>>,
{
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(server, "{kind} handler failed: {e}"),
        Err(_) => error!(server, "{kind} handler panicked"),
    }
}

/// Render a server log entry through `tracing` when nobody registered a
/// handler.
fn emit_server_log(log: &LogMessage) {
    let data = match &log.data {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    match log.level {
        LoggingLevel::Debug => {
            debug!(target: "switchboard::server_log", server = %log.server, logger = %log.logger, "{data}");
        }
        LoggingLevel::Info | LoggingLevel::Notice => {
            info!(target: "switchboard::server_log", server = %log.server, logger = %log.logger, "{data}");
        }
        LoggingLevel::Warning => {
            warn!(target: "switchboard::server_log", server = %log.server, logger = %log.logger, "{data}");
        }
        LoggingLevel::Error | LoggingLevel::Critical | LoggingLevel::Alert | LoggingLevel::Emergency => {
            error!(target: "switchboard::server_log", server = %log.server, logger = %log.logger, "{data}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::{LogHandler, ProgressHandler, SamplingHandler, HandlerError};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use switchboard_protocol::types::SamplingMessage;

    #[derive(Debug, Default)]
    struct Recorder {
        logs: Mutex<Vec<LogMessage>>,
        progress: Mutex<Vec<ProgressUpdate>>,
    }

    #[async_trait]
    impl LogHandler for Recorder {
        async fn handle_log(&self, log: LogMessage) -> HandlerResult<()> {
            self.logs.lock().push(log);
            Ok(())
        }
    }

    #[async_trait]
    impl ProgressHandler for Recorder {
        async fn handle_progress(&self, update: ProgressUpdate) -> HandlerResult<()> {
            self.progress.lock().push(update);
            Ok(())
        }
    }

    #[derive(Debug)]
    struct Failing;

    #[async_trait]
    impl SamplingHandler for Failing {
        async fn handle_create_message(
            &self,
            _messages: Vec<SamplingMessage>,
            _params: SamplingParams,
            _context: SamplingContext,
        ) -> HandlerResult<String> {
            Err(HandlerError::generic("no model configured"))
        }
    }

    #[derive(Debug)]
    struct Picky;

    #[async_trait]
    impl SamplingHandler for Picky {
        async fn handle_create_message(
            &self,
            _messages: Vec<SamplingMessage>,
            _params: SamplingParams,
            _context: SamplingContext,
        ) -> HandlerResult<String> {
            Err(HandlerError::InvalidInput {
                details: "no messages to sample from".into(),
            })
        }
    }

    #[derive(Debug)]
    struct Panicking;

    #[async_trait]
    impl LogHandler for Panicking {
        async fn handle_log(&self, _log: LogMessage) -> HandlerResult<()> {
            panic!("handler bug");
        }
    }

    fn router(handlers: HandlerRegistry) -> (CallbackRouter, Arc<PendingCalls>) {
        let pending = Arc::new(PendingCalls::default());
        (
            CallbackRouter::new("test", handlers, Arc::clone(&pending)),
            pending,
        )
    }

    fn log_notification(logger: Option<&str>) -> JsonRpcNotification {
        let mut params = json!({"level": "info", "data": "hello"});
        if let Some(logger) = logger {
            params["logger"] = json!(logger);
        }
        JsonRpcNotification::new(methods::LOG_MESSAGE, Some(params))
    }

    #[tokio::test]
    async fn test_log_without_handler_is_dropped() {
        let (router, _) = router(HandlerRegistry::new());
        router.on_notification(log_notification(None)).await;
    }

    #[tokio::test]
    async fn test_log_logger_defaults() {
        let recorder = Arc::new(Recorder::default());
        let mut handlers = HandlerRegistry::new();
        handlers.set_log_handler(recorder.clone());
        let (router, _) = router(handlers);

        router.on_notification(log_notification(None)).await;
        router.on_notification(log_notification(Some("db"))).await;

        let logs = recorder.logs.lock();
        assert_eq!(logs[0].logger, "default");
        assert_eq!(logs[1].logger, "db");
        assert_eq!(logs[0].data, json!("hello"));
        assert_eq!(logs[0].server, "test");
    }

    #[tokio::test]
    async fn test_panicking_handler_is_contained() {
        let mut handlers = HandlerRegistry::new();
        handlers.set_log_handler(Arc::new(Panicking));
        let (router, _) = router(handlers);
        router.on_notification(log_notification(None)).await;
        router.on_notification(log_notification(None)).await;
    }

    #[tokio::test]
    async fn test_progress_only_for_pending_calls() {
        let recorder = Arc::new(Recorder::default());
        let (router, pending) = router(HandlerRegistry::new());
        let _receiver = pending.register(RequestId::Number(3), "tools/call", Some(recorder.clone()));

        let progress = |token: i64, value: f64| {
            JsonRpcNotification::new(
                methods::PROGRESS,
                Some(json!({"progressToken": token, "progress": value, "total": 100.0})),
            )
        };
        router.on_notification(progress(3, 50.0)).await;
        router.on_notification(progress(99, 75.0)).await;
        router.on_notification(progress(3, 100.0)).await;

        let seen: Vec<f64> = recorder.progress.lock().iter().map(|u| u.progress).collect();
        assert_eq!(seen, vec![50.0, 100.0]);
    }

    #[tokio::test]
    async fn test_server_ping_and_unknown_requests() {
        let (router, _) = router(HandlerRegistry::new());
        let pong = router
            .on_request(JsonRpcRequest::new(methods::PING, None, RequestId::from("s1")))
            .await;
        assert_eq!(pong.result(), Some(&json!({})));

        let unknown = router
            .on_request(JsonRpcRequest::new("roots/list", None, RequestId::from("s2")))
            .await;
        assert_eq!(unknown.error().map(|e| e.code), Some(-32601));
    }

    #[tokio::test]
    async fn test_sampling_without_handler_is_method_not_found() {
        let (router, _) = router(HandlerRegistry::new());
        let params = json!({"messages": [], "maxTokens": 10});
        let reply = router
            .on_request(JsonRpcRequest::new(
                methods::SAMPLING_CREATE_MESSAGE,
                Some(params),
                RequestId::from("s3"),
            ))
            .await;
        assert_eq!(reply.error().map(|e| e.code), Some(-32601));
    }

    #[tokio::test]
    async fn test_sampling_handler_error_is_internal_error() {
        let mut handlers = HandlerRegistry::new();
        handlers.set_sampling_handler(Arc::new(Failing));
        let (router, _) = router(handlers);
        let params = json!({"messages": [], "maxTokens": 10});
        let reply = router
            .on_request(JsonRpcRequest::new(
                methods::SAMPLING_CREATE_MESSAGE,
                Some(params),
                RequestId::from("s4"),
            ))
            .await;
        let error = reply.error().unwrap();
        assert_eq!(error.code, -32603);
        assert!(error.message.contains("no model configured"));
    }

    #[tokio::test]
    async fn test_sampling_invalid_input_is_invalid_params() {
        let mut handlers = HandlerRegistry::new();
        handlers.set_sampling_handler(Arc::new(Picky));
        let (router, _) = router(handlers);
        let params = json!({"messages": [], "maxTokens": 10});
        let reply = router
            .on_request(JsonRpcRequest::new(
                methods::SAMPLING_CREATE_MESSAGE,
                Some(params),
                RequestId::from("s5"),
            ))
            .await;
        let error = reply.error().unwrap();
        assert_eq!(error.code, -32602);
        assert!(error.message.contains("no messages to sample from"));
    }
}
