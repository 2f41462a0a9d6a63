//! Tool operations: listing, calling and result unwrapping.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use switchboard_protocol::methods;
use switchboard_protocol::types::{CallToolRequest, CallToolResult, ContentBlock, Tool};
use tracing::debug;

use crate::error::{Error, Result};
use crate::handlers::ProgressHandler;
use crate::schema::ArgumentSchema;

/// Per-call settings for [`Client::call_tool_with`](crate::Client::call_tool_with).
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Deadline for this call; overrides the client default
    pub timeout: Option<Duration>,
    /// Receives this call's progress; overrides the registered handler
    pub progress_handler: Option<Arc<dyn ProgressHandler>>,
}

impl CallOptions {
    /// Options with nothing overridden.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the deadline.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the progress handler.
    pub fn progress_handler(mut self, handler: Arc<dyn ProgressHandler>) -> Self {
        self.progress_handler = Some(handler);
        self
    }
}

/// A successful tool result.
#[derive(Debug, Clone, PartialEq)]
pub struct CallToolOutcome {
    /// Content blocks as returned
    pub content: Vec<ContentBlock>,
    /// Structured content as returned
    pub structured_content: Option<Value>,
    /// Best-effort typed value of the result
    ///
    /// The `result` field of the structured content when present, else the
    /// whole structured content, else the text of a single text block
    /// (parsed as JSON when it is JSON).
    pub data: Option<Value>,
}

impl CallToolOutcome {
    /// Unwrap a raw result.
    ///
    /// # Errors
    ///
    /// [`Error::Tool`] carrying the tool's own message when the result is
    /// flagged `isError`.
    pub fn from_result(result: CallToolResult) -> Result<Self> {
        if result.is_error.unwrap_or(false) {
            return Err(Error::Tool {
                message: text_of(&result.content),
            });
        }
        let data = match &result.structured_content {
            Some(Value::Object(fields)) if fields.contains_key("result") => {
                fields.get("result").cloned()
            }
            Some(structured) => Some(structured.clone()),
            None => match result.content.as_slice() {
                [ContentBlock::Text { text }] => Some(
                    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.clone())),
                ),
                _ => None,
            },
        };
        Ok(Self {
            content: result.content,
            structured_content: result.structured_content,
            data,
        })
    }

    /// Text blocks joined by newlines.
    pub fn text(&self) -> String {
        text_of(&self.content)
    }
}

fn text_of(content: &[ContentBlock]) -> String {
    content
        .iter()
        .filter_map(ContentBlock::as_text)
        .collect::<Vec<_>>()
        .join("\n")
}

impl super::super::core::Client {
    /// Every tool across all servers, under exposed names.
    ///
    /// # Errors
    ///
    /// [`Error::Connection`] outside a client scope.
    pub async fn list_tools(&self) -> Result<Vec<Tool>> {
        let namespace = self.require_namespace()?;
        Ok(namespace.tools().iter().map(|e| e.item.clone()).collect())
    }

    /// One server's tools exactly as it lists them.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown server, [`Error::Connection`] when
    /// it is not connected, or any failure of the listing itself.
    pub async fn list_tools_raw(&self, server: &str) -> Result<Vec<Tool>> {
        self.live_session(server)?.list_tools().await
    }

    /// Call a tool by exposed name.
    ///
    /// Arguments are coerced against the tool's input schema first; a
    /// mismatch fails with [`Error::Validation`] and nothing is sent.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`], [`Error::Tool`] when the tool reports failure,
    /// [`Error::Timeout`], [`Error::NotFound`] for an unroutable name, or a
    /// connection failure.
    pub async fn call_tool(&self, name: &str, arguments: Option<Value>) -> Result<CallToolOutcome> {
        self.call_tool_with(name, arguments, CallOptions::default())
            .await
    }

    /// [`call_tool`](Self::call_tool) with per-call options.
    ///
    /// # Errors
    ///
    /// As [`call_tool`](Self::call_tool).
    pub async fn call_tool_with(
        &self,
        name: &str,
        arguments: Option<Value>,
        options: CallOptions,
    ) -> Result<CallToolOutcome> {
        let namespace = self.namespace();
        let route = self.inner.aggregator.route_tool(namespace.as_deref(), name)?;
        let arguments = arguments.unwrap_or(Value::Null);
        let arguments = match &route.schema {
            Some(schema) => schema.coerce(&arguments)?,
            None => ArgumentSchema::permissive().coerce(&arguments)?,
        }
        .to_json();

        let session = self.live_session(&route.server)?;
        let timeout = options.timeout.or(self.inner.config.default_timeout);
        let progress = options
            .progress_handler
            .or_else(|| self.inner.handlers.get_progress_handler());

        debug!(server = %route.server, tool = %route.raw, "calling tool");
        let request = CallToolRequest {
            name: route.raw,
            arguments: Some(arguments),
            meta: None,
        };
        let value = session
            .request(
                methods::TOOLS_CALL,
                Some(serde_json::to_value(&request)?),
                timeout,
                progress,
            )
            .await?;
        CallToolOutcome::from_result(serde_json::from_value(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn result(value: Value) -> CallToolResult {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_error_result_keeps_message_verbatim() {
        let err = CallToolOutcome::from_result(result(json!({
            "content": [{"type": "text", "text": "Division by zero"}],
            "isError": true
        })))
        .unwrap_err();
        assert_eq!(err.to_string(), "Division by zero");
        assert!(err.is_tool_error());
    }

    #[test]
    fn test_data_prefers_structured_result_field() {
        let outcome = CallToolOutcome::from_result(result(json!({
            "content": [{"type": "text", "text": "4"}],
            "structuredContent": {"result": 4}
        })))
        .unwrap();
        assert_eq!(outcome.data, Some(json!(4)));

        let outcome = CallToolOutcome::from_result(result(json!({
            "content": [],
            "structuredContent": {"temperature": 21}
        })))
        .unwrap();
        assert_eq!(outcome.data, Some(json!({"temperature": 21})));
    }

    #[test]
    fn test_data_falls_back_to_single_text_block() {
        let outcome = CallToolOutcome::from_result(result(json!({
            "content": [{"type": "text", "text": "{\"ok\": true}"}]
        })))
        .unwrap();
        assert_eq!(outcome.data, Some(json!({"ok": true})));

        let outcome = CallToolOutcome::from_result(result(json!({
            "content": [{"type": "text", "text": "sunny"}]
        })))
        .unwrap();
        assert_eq!(outcome.data, Some(json!("sunny")));
        assert_eq!(outcome.text(), "sunny");

        let outcome = CallToolOutcome::from_result(result(json!({
            "content": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}]
        })))
        .unwrap();
        assert_eq!(outcome.data, None);
        assert_eq!(outcome.text(), "a\nb");
    }
}
