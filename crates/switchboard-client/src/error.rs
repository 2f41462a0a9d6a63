//! Error taxonomy for client operations.
//!
//! Every failure a caller can observe is one [`Error`] variant. Transport
//! failures surface as [`Error::Connection`], bad arguments as
//! [`Error::Validation`] before anything is sent, tool-reported failures as
//! [`Error::Tool`] with the server's message untouched, and expired
//! deadlines as [`Error::Timeout`].

use std::time::Duration;

use serde_json::Value;
use switchboard_protocol::{CodecError, JsonRpcError};
use switchboard_transport::TransportError;
use thiserror::Error;

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the client runtime.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// The transport could not be opened, the handshake failed, or the
    /// connection dropped.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Arguments did not satisfy the tool's input schema.
    #[error("Validation error for '{field}': {message}")]
    Validation {
        /// Path of the offending field, e.g. `filters.limit` or `tags[1]`
        field: String,
        /// What was wrong
        message: String,
    },

    /// The tool ran and reported failure. Displays the server's message
    /// verbatim.
    #[error("{message}")]
    Tool {
        /// Message text from the tool's error content
        message: String,
    },

    /// No response arrived within the deadline.
    #[error("Request '{method}' timed out after {timeout:?}")]
    Timeout {
        /// Method that timed out
        method: String,
        /// Deadline that expired
        timeout: Duration,
    },

    /// A malformed or unexpected message.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Two entries would be exposed under the same name.
    #[error("Name '{name}' is exposed by both '{first}' and '{second}'")]
    NamespaceCollision {
        /// The clashing exposed name
        name: String,
        /// Server that claimed the name first
        first: String,
        /// Server that tried to claim it again
        second: String,
    },

    /// The server answered with a JSON-RPC error.
    #[error("Server error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code
        code: i32,
        /// Error message
        message: String,
        /// Optional error data
        data: Option<Value>,
    },

    /// A name or URI does not route to any server.
    #[error("Unknown {kind} '{name}'")]
    NotFound {
        /// `tool`, `resource`, `prompt` or `server`
        kind: &'static str,
        /// The name as given by the caller
        name: String,
    },

    /// Invalid client or server configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Shorthand for [`Error::Connection`].
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Shorthand for [`Error::Validation`].
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Shorthand for [`Error::Protocol`].
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Shorthand for [`Error::Configuration`].
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Whether the session behind this error is unusable.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    /// Whether a deadline expired.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Whether the arguments were rejected locally.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// Whether the tool itself reported failure.
    pub fn is_tool_error(&self) -> bool {
        matches!(self, Self::Tool { .. })
    }
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::ProtocolError(msg) => Self::Protocol(msg),
            TransportError::SerializationFailed(msg) => Self::Protocol(msg),
            TransportError::ConfigurationError(msg) => Self::Configuration(msg),
            other => Self::Connection(other.to_string()),
        }
    }
}

impl From<JsonRpcError> for Error {
    fn from(err: JsonRpcError) -> Self {
        Self::Rpc {
            code: err.code,
            message: err.message,
            data: err.data,
        }
    }
}

impl From<CodecError> for Error {
    fn from(err: CodecError) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(format!("malformed payload: {err}"))
    }
}
