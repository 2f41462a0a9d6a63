//! Newline-delimited JSON-RPC codec.
//!
//! One frame is one JSON object. Stream transports terminate each frame with
//! `\n`; HTTP bodies and SSE `data:` fields carry a single frame without one.

use bytes::{BufMut, Bytes, BytesMut};
use serde_json::Value;
use thiserror::Error;

use crate::jsonrpc::{
    JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, JSONRPC_VERSION,
};

/// Result alias for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// A frame that could not be encoded or does not form a valid JSON-RPC message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CodecError {
    /// The bytes are not JSON.
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    /// Batches were removed from the protocol.
    #[error("Batch frames are not supported")]
    BatchNotSupported,

    /// JSON, but not a JSON-RPC 2.0 message.
    #[error("Invalid JSON-RPC message: {0}")]
    InvalidMessage(String),

    /// Serializing an outbound message failed.
    #[error("Failed to encode message: {0}")]
    Encode(String),
}

/// Decode one frame. Surrounding whitespace, including the line terminator,
/// is ignored.
pub fn decode(frame: &[u8]) -> CodecResult<JsonRpcMessage> {
    let value: Value =
        serde_json::from_slice(frame).map_err(|e| CodecError::InvalidJson(e.to_string()))?;
    decode_value(value)
}

/// Classify an already-parsed JSON value as a request, response or notification.
pub fn decode_value(value: Value) -> CodecResult<JsonRpcMessage> {
    let object = match &value {
        Value::Object(object) => object,
        Value::Array(_) => return Err(CodecError::BatchNotSupported),
        other => {
            return Err(CodecError::InvalidMessage(format!(
                "expected an object, got {}",
                json_type(other)
            )));
        }
    };

    match object.get("jsonrpc").and_then(Value::as_str) {
        Some(JSONRPC_VERSION) => {}
        Some(other) => {
            return Err(CodecError::InvalidMessage(format!(
                "unsupported jsonrpc version '{other}'"
            )));
        }
        None => return Err(CodecError::InvalidMessage("missing 'jsonrpc' field".into())),
    }

    let has_method = object.contains_key("method");
    let has_id = object.get("id").is_some_and(|id| !id.is_null());
    let has_result = object.contains_key("result");
    let has_error = object.contains_key("error");

    let invalid = |e: serde_json::Error| CodecError::InvalidMessage(e.to_string());
    match (has_method, has_id) {
        (true, true) => serde_json::from_value::<JsonRpcRequest>(value)
            .map(JsonRpcMessage::Request)
            .map_err(invalid),
        (true, false) => serde_json::from_value::<JsonRpcNotification>(value)
            .map(JsonRpcMessage::Notification)
            .map_err(invalid),
        (false, _) if has_result && has_error => Err(CodecError::InvalidMessage(
            "response carries both 'result' and 'error'".into(),
        )),
        (false, _) if has_result || has_error => serde_json::from_value::<JsonRpcResponse>(value)
            .map(JsonRpcMessage::Response)
            .map_err(invalid),
        (false, _) => Err(CodecError::InvalidMessage(
            "neither a request, a notification nor a response".into(),
        )),
    }
}

/// Encode one frame without a trailing newline.
pub fn encode(message: &JsonRpcMessage) -> CodecResult<Bytes> {
    serde_json::to_vec(message)
        .map(Bytes::from)
        .map_err(|e| CodecError::Encode(e.to_string()))
}

/// Encode one frame followed by `\n`, ready for a byte-stream transport.
pub fn encode_line(message: &JsonRpcMessage) -> CodecResult<Bytes> {
    let body = encode(message)?;
    let mut buf = BytesMut::with_capacity(body.len() + 1);
    buf.put_slice(&body);
    buf.put_u8(b'\n');
    Ok(buf.freeze())
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
