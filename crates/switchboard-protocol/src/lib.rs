//! # switchboard-protocol
//!
//! The wire layer shared by every switchboard transport: the JSON-RPC 2.0
//! message model, a newline-delimited codec, and the MCP payload types the
//! client runtime exchanges with servers.
//!
//! Nothing in this crate performs I/O. Transports hand raw frames to
//! [`codec::decode`] and receive encoded frames from [`codec::encode`];
//! in-process transports skip the codec and pass [`JsonRpcMessage`] values
//! directly.
//!
//! ## Example
//!
//! ```rust
//! use switchboard_protocol::{JsonRpcMessage, JsonRpcRequest, RequestId, codec};
//!
//! let request = JsonRpcRequest::new("ping", None, RequestId::Number(1));
//! let frame = codec::encode(&JsonRpcMessage::Request(request)).unwrap();
//! let decoded = codec::decode(&frame).unwrap();
//! assert!(matches!(decoded, JsonRpcMessage::Request(r) if r.method == "ping"));
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]

pub mod codec;
pub mod jsonrpc;
pub mod types;

pub use codec::{CodecError, CodecResult};
pub use jsonrpc::{
    JsonRpcError, JsonRpcErrorCode, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, JsonRpcResponsePayload, JsonRpcVersion, RequestId,
};

/// Protocol revision sent in the `initialize` handshake.
pub const PROTOCOL_VERSION: &str = "2025-06-18";

/// Method names used by the client runtime.
pub mod methods {
    /// Handshake request.
    pub const INITIALIZE: &str = "initialize";
    /// Sent by the client once the handshake response has been processed.
    pub const INITIALIZED: &str = "notifications/initialized";
    /// Liveness probe, valid in both directions.
    pub const PING: &str = "ping";
    /// List the tools a server exposes.
    pub const TOOLS_LIST: &str = "tools/list";
    /// Invoke a tool.
    pub const TOOLS_CALL: &str = "tools/call";
    /// List concrete resources.
    pub const RESOURCES_LIST: &str = "resources/list";
    /// List resource templates.
    pub const RESOURCE_TEMPLATES_LIST: &str = "resources/templates/list";
    /// Read a resource by URI.
    pub const RESOURCES_READ: &str = "resources/read";
    /// List prompts.
    pub const PROMPTS_LIST: &str = "prompts/list";
    /// Render a prompt.
    pub const PROMPTS_GET: &str = "prompts/get";
    /// Server log entry.
    pub const LOG_MESSAGE: &str = "notifications/message";
    /// Progress report for an in-flight request.
    pub const PROGRESS: &str = "notifications/progress";
    /// Best-effort cancellation of an abandoned request.
    pub const CANCELLED: &str = "notifications/cancelled";
    /// Server-initiated request for model sampling.
    pub const SAMPLING_CREATE_MESSAGE: &str = "sampling/createMessage";
}
