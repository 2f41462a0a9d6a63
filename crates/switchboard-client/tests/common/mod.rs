//! Shared fixtures: an in-process server with a fixed catalogue and
//! recording handlers.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use switchboard_client::protocol::types::{
    ContentBlock, CreateMessageRequest, LoggingLevel, Role, SamplingMessage,
};
use switchboard_client::protocol::{JsonRpcError, JsonRpcRequest, PROTOCOL_VERSION, methods};
use switchboard_client::transport::in_process::{text_result, tool_error_result};
use switchboard_client::transport::{InProcessConfig, InProcessServer, ServerPeer, TransportSpec};
use switchboard_client::{
    HandlerError, HandlerResult, LogHandler, LogMessage, ProgressHandler, ProgressUpdate,
    SamplingContext, SamplingHandler, SamplingParams, ServerEntry,
};

/// Tools listed per `tools/list` page.
const PAGE_SIZE: usize = 4;

/// In-process server exposing a small weather-flavoured catalogue.
///
/// Every text it returns is prefixed with its own name so tests can tell
/// which server answered.
#[derive(Debug)]
pub struct TestServer {
    name: String,
    pub initializations: AtomicUsize,
    pub tool_calls: AtomicUsize,
    pub cancellations: Mutex<Vec<Value>>,
    fail_initialize: bool,
}

impl TestServer {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            initializations: AtomicUsize::new(0),
            tool_calls: AtomicUsize::new(0),
            cancellations: Mutex::new(Vec::new()),
            fail_initialize: false,
        })
    }

    /// A server whose handshake always fails.
    pub fn broken(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            initializations: AtomicUsize::new(0),
            tool_calls: AtomicUsize::new(0),
            cancellations: Mutex::new(Vec::new()),
            fail_initialize: true,
        })
    }

    pub fn entry(self: &Arc<Self>) -> ServerEntry {
        ServerEntry::new(self.name.clone(), TransportSpec::in_process(self.clone()))
    }

    pub fn masked_entry(self: &Arc<Self>) -> ServerEntry {
        ServerEntry::new(
            self.name.clone(),
            InProcessConfig::new(self.clone()).mask_error_details(true),
        )
    }

    fn tools(&self) -> Vec<Value> {
        vec![
            json!({
                "name": "get_forecast",
                "description": "Forecast for a city",
                "inputSchema": {
                    "type": "object",
                    "properties": {"city": {"type": "string"}},
                    "required": ["city"]
                }
            }),
            json!({
                "name": "divide",
                "inputSchema": {
                    "type": "object",
                    "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
                    "required": ["a", "b"]
                }
            }),
            json!({
                "name": "sleep",
                "inputSchema": {
                    "type": "object",
                    "properties": {"ms": {"type": "integer", "minimum": 0}},
                    "required": ["ms"]
                }
            }),
            json!({
                "name": "lookup_user",
                "inputSchema": {
                    "type": "object",
                    "properties": {"user_id": {"type": "string", "format": "uuid"}},
                    "required": ["user_id"]
                }
            }),
            json!({
                "name": "paint",
                "inputSchema": {
                    "type": "object",
                    "properties": {"color": {"enum": ["red", "green", "blue"]}},
                    "required": ["color"]
                }
            }),
            json!({"name": "report_progress", "inputSchema": {"type": "object"}}),
            json!({
                "name": "emit_log",
                "inputSchema": {
                    "type": "object",
                    "properties": {"message": {"type": "string"}},
                    "required": ["message"]
                }
            }),
            json!({
                "name": "ask_model",
                "inputSchema": {
                    "type": "object",
                    "properties": {"prompt": {"type": "string"}},
                    "required": ["prompt"]
                }
            }),
            json!({"name": "explode", "inputSchema": {"type": "object"}}),
        ]
    }

    fn list_tools(&self, params: Option<&Value>) -> Value {
        let start = params
            .and_then(|p| p.get("cursor"))
            .and_then(Value::as_str)
            .and_then(|c| c.parse::<usize>().ok())
            .unwrap_or(0);
        let tools = self.tools();
        let end = (start + PAGE_SIZE).min(tools.len());
        let mut page = json!({"tools": tools[start..end]});
        if end < tools.len() {
            page["nextCursor"] = json!(end.to_string());
        }
        page
    }

    async fn call_tool(&self, params: Value, peer: ServerPeer) -> Result<Value, JsonRpcError> {
        self.tool_calls.fetch_add(1, Ordering::SeqCst);
        let args = params.get("arguments").cloned().unwrap_or(json!({}));
        let name = params["name"].as_str().unwrap_or_default();
        let me = &self.name;
        match name {
            "get_forecast" => Ok(text_result(format!(
                "{me}: sunny in {}",
                args["city"].as_str().unwrap_or("?")
            ))),
            "divide" => {
                let a = args["a"].as_f64().unwrap_or(0.0);
                let b = args["b"].as_f64().unwrap_or(0.0);
                if b == 0.0 {
                    return Ok(tool_error_result("Division by zero"));
                }
                Ok(json!({
                    "content": [{"type": "text", "text": (a / b).to_string()}],
                    "structuredContent": {"result": a / b}
                }))
            }
            "sleep" => {
                let ms = args["ms"].as_u64().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(text_result(format!("{me}: slept {ms}ms")))
            }
            "lookup_user" => Ok(text_result(args["user_id"].as_str().unwrap_or_default())),
            "paint" => Ok(text_result(args["color"].as_str().unwrap_or_default())),
            "report_progress" => {
                let _ = peer.progress(50.0, Some(100.0), Some("halfway")).await;
                let _ = peer.progress(100.0, Some(100.0), Some("done")).await;
                Ok(text_result("finished"))
            }
            "emit_log" => {
                let _ = peer
                    .log(LoggingLevel::Warning, None, args["message"].clone())
                    .await;
                Ok(text_result("logged"))
            }
            "ask_model" => {
                let request = CreateMessageRequest {
                    messages: vec![SamplingMessage {
                        role: Role::User,
                        content: ContentBlock::Text {
                            text: args["prompt"].as_str().unwrap_or_default().to_string(),
                        },
                    }],
                    max_tokens: 64,
                    system_prompt: Some("be brief".to_string()),
                    temperature: None,
                    stop_sequences: Vec::new(),
                    model_preferences: None,
                    include_context: None,
                    metadata: None,
                };
                match peer.create_message(request).await {
                    Ok(result) => Ok(text_result(
                        result.content.as_text().unwrap_or_default().to_string(),
                    )),
                    Err(e) => Ok(tool_error_result(format!("sampling failed: {}", e.message))),
                }
            }
            "explode" => Err(JsonRpcError::internal_error("database password leaked")),
            other => Err(JsonRpcError::invalid_params(&format!("unknown tool '{other}'"))),
        }
    }
}

#[async_trait]
impl InProcessServer for TestServer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle_request(
        &self,
        request: JsonRpcRequest,
        peer: ServerPeer,
    ) -> Result<Value, JsonRpcError> {
        let params = request.params.clone().unwrap_or(json!({}));
        let me = &self.name;
        match request.method.as_str() {
            methods::INITIALIZE => {
                self.initializations.fetch_add(1, Ordering::SeqCst);
                if self.fail_initialize {
                    return Err(JsonRpcError::internal_error("not today"));
                }
                Ok(json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {"tools": {}, "resources": {}, "prompts": {}, "logging": {}},
                    "serverInfo": {"name": me, "version": "1.0.0"}
                }))
            }
            methods::PING => Ok(json!({})),
            methods::TOOLS_LIST => Ok(self.list_tools(request.params.as_ref())),
            methods::TOOLS_CALL => self.call_tool(params, peer).await,
            methods::RESOURCES_LIST => Ok(json!({
                "resources": [{"uri": format!("{me}://icons/sunny"), "name": "sunny icon"}]
            })),
            methods::RESOURCE_TEMPLATES_LIST => Ok(json!({
                "resourceTemplates": [{"uriTemplate": format!("{me}://forecast/{{city}}"), "name": "forecast"}]
            })),
            methods::RESOURCES_READ => {
                let uri = params["uri"].as_str().unwrap_or_default();
                if !uri.starts_with(&format!("{me}://")) {
                    return Err(JsonRpcError::invalid_params(&format!("no resource '{uri}'")));
                }
                Ok(json!({"contents": [{"uri": uri, "mimeType": "text/plain", "text": format!("{me} read {uri}")}]}))
            }
            methods::PROMPTS_LIST => Ok(json!({
                "prompts": [{
                    "name": "summarize",
                    "arguments": [{"name": "topic", "required": true}, {"name": "depth"}]
                }]
            })),
            methods::PROMPTS_GET => {
                let topic = params["arguments"]["topic"].as_str().unwrap_or_default();
                let depth = params["arguments"]["depth"].as_str().unwrap_or("1");
                Ok(json!({
                    "description": format!("{me} summary"),
                    "messages": [{
                        "role": "user",
                        "content": {"type": "text", "text": format!("Summarize {topic} at depth {depth}")}
                    }]
                }))
            }
            other => Err(JsonRpcError::method_not_found(other)),
        }
    }

    async fn handle_notification(
        &self,
        notification: switchboard_client::protocol::JsonRpcNotification,
        _peer: ServerPeer,
    ) {
        if notification.method == methods::CANCELLED {
            self.cancellations
                .lock()
                .push(notification.params.unwrap_or(Value::Null));
        }
    }
}

/// Records every progress update.
#[derive(Debug, Default)]
pub struct RecordingProgress {
    pub updates: Mutex<Vec<ProgressUpdate>>,
}

#[async_trait]
impl ProgressHandler for RecordingProgress {
    async fn handle_progress(&self, update: ProgressUpdate) -> HandlerResult<()> {
        self.updates.lock().push(update);
        Ok(())
    }
}

/// Records every log entry.
#[derive(Debug, Default)]
pub struct RecordingLog {
    pub entries: Mutex<Vec<LogMessage>>,
}

#[async_trait]
impl LogHandler for RecordingLog {
    async fn handle_log(&self, log: LogMessage) -> HandlerResult<()> {
        self.entries.lock().push(log);
        Ok(())
    }
}

/// A log handler that panics on every entry.
#[derive(Debug, Default)]
pub struct PanickingLog;

#[async_trait]
impl LogHandler for PanickingLog {
    async fn handle_log(&self, _log: LogMessage) -> HandlerResult<()> {
        panic!("log handler blew up");
    }
}

/// Answers sampling requests by echoing the last user message.
#[derive(Debug, Default)]
pub struct EchoSampler {
    pub contexts: Mutex<Vec<(SamplingParams, SamplingContext)>>,
}

#[async_trait]
impl SamplingHandler for EchoSampler {
    async fn handle_create_message(
        &self,
        messages: Vec<SamplingMessage>,
        params: SamplingParams,
        context: SamplingContext,
    ) -> HandlerResult<String> {
        let last = messages
            .last()
            .and_then(|m| m.content.as_text())
            .unwrap_or_default()
            .to_string();
        self.contexts.lock().push((params, context));
        Ok(format!("echo: {last}"))
    }
}

/// A sampler that always refuses.
#[derive(Debug, Default)]
pub struct RefusingSampler;

#[async_trait]
impl SamplingHandler for RefusingSampler {
    async fn handle_create_message(
        &self,
        _messages: Vec<SamplingMessage>,
        _params: SamplingParams,
        _context: SamplingContext,
    ) -> HandlerResult<String> {
        Err(HandlerError::UserCancelled)
    }
}

/// Install a test subscriber once; output shows with `--nocapture`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("switchboard_client=debug")
        .with_test_writer()
        .try_init();
}
