//! Handler traits for server-originated messages.
//!
//! Servers talk back to the client while calls are in flight: log entries,
//! progress reports and `sampling/createMessage` requests. Each kind has a
//! handler trait; implementations are registered on the
//! [`ClientBuilder`](crate::ClientBuilder) and invoked by the callback router.
//!
//! ## Dispatch rules
//!
//! - No handler registered: the message is dropped. Log entries still go to
//!   `tracing` on the `switchboard::server_log` target.
//! - A handler that errors or panics is logged; the inbound reader keeps
//!   running.
//! - Sampling handlers run before the server gets its answer, so the server
//!   resumes only once the handler returns.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use switchboard_client::handlers::{
//!     HandlerResult, SamplingContext, SamplingHandler, SamplingParams,
//! };
//! use switchboard_client::protocol::types::SamplingMessage;
//!
//! #[derive(Debug)]
//! struct CannedReply;
//!
//! #[async_trait]
//! impl SamplingHandler for CannedReply {
//!     async fn handle_create_message(
//!         &self,
//!         messages: Vec<SamplingMessage>,
//!         params: SamplingParams,
//!         context: SamplingContext,
//!     ) -> HandlerResult<String> {
//!         Ok(format!(
//!             "{} messages from {} (max {} tokens)",
//!             messages.len(),
//!             context.server,
//!             params.max_tokens
//!         ))
//!     }
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use switchboard_protocol::types::{LoggingLevel, ModelPreferences, SamplingMessage};
use switchboard_protocol::{JsonRpcError, JsonRpcErrorCode, RequestId};
use thiserror::Error;
use tracing::debug;

// ============================================================================
// ERROR TYPES FOR HANDLER OPERATIONS
// ============================================================================

/// Errors a handler can report.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HandlerError {
    /// The user declined, e.g. refused a sampling request
    #[error("User cancelled the operation")]
    UserCancelled,

    /// The request could not be served as asked
    #[error("Invalid input: {details}")]
    InvalidInput {
        /// What was wrong
        details: String,
    },

    /// Generic handler error
    #[error("Handler error: {message}")]
    Generic {
        /// Error message
        message: String,
    },

    /// External system error (model API, UI, database)
    #[error("External system error: {source}")]
    External {
        /// Underlying error
        #[from]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl HandlerError {
    /// Shorthand for [`HandlerError::Generic`].
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }

    /// The JSON-RPC error sent back to the server. Bad input is reported as
    /// invalid params (`-32602`); anything else is an internal error
    /// (`-32603`) carrying this error's message.
    #[must_use]
    pub fn into_jsonrpc_error(&self) -> JsonRpcError {
        match self {
            Self::InvalidInput { details } => JsonRpcError::invalid_params(details),
            _ => JsonRpcError::new(JsonRpcErrorCode::InternalError.code(), self.to_string()),
        }
    }
}

/// Result type for handler operations.
pub type HandlerResult<T> = Result<T, HandlerError>;

// ============================================================================
// LOG HANDLER
// ============================================================================

/// A server log entry, as handed to a [`LogHandler`].
#[derive(Debug, Clone, PartialEq)]
pub struct LogMessage {
    /// Severity
    pub level: LoggingLevel,
    /// Logger name; `"default"` when the server sent none
    pub logger: String,
    /// Payload, any JSON value
    pub data: Value,
    /// Name of the server that sent it
    pub server: String,
}

impl LogMessage {
    /// Logger name used when the server omits one.
    pub const DEFAULT_LOGGER: &'static str = "default";
}

/// Receives server log entries.
///
/// ```rust,no_run
/// use async_trait::async_trait;
/// use switchboard_client::handlers::{HandlerResult, LogHandler, LogMessage};
///
/// #[derive(Debug)]
/// struct Stderr;
///
/// #[async_trait]
/// impl LogHandler for Stderr {
///     async fn handle_log(&self, log: LogMessage) -> HandlerResult<()> {
///         eprintln!("[{}/{}] {:?}: {}", log.server, log.logger, log.level, log.data);
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait LogHandler: Send + Sync + std::fmt::Debug {
    /// Handle one log entry.
    async fn handle_log(&self, log: LogMessage) -> HandlerResult<()>;
}

// ============================================================================
// PROGRESS HANDLER
// ============================================================================

/// A progress report tied to an in-flight call.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    /// Progress so far
    pub progress: f64,
    /// Total, when the server knows it
    pub total: Option<f64>,
    /// Human-readable status
    pub message: Option<String>,
    /// Server that sent the report
    pub server: String,
    /// Correlation id of the call being reported on
    pub request_id: RequestId,
}

/// Receives progress reports for in-flight calls.
#[async_trait]
pub trait ProgressHandler: Send + Sync + std::fmt::Debug {
    /// Handle one progress report.
    async fn handle_progress(&self, update: ProgressUpdate) -> HandlerResult<()>;
}

// ============================================================================
// SAMPLING HANDLER
// ============================================================================

/// Generation parameters of a sampling request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SamplingParams {
    /// Maximum tokens to generate
    pub max_tokens: u32,
    /// System prompt
    pub system_prompt: Option<String>,
    /// Sampling temperature
    pub temperature: Option<f64>,
    /// Stop sequences
    pub stop_sequences: Vec<String>,
    /// Model preferences
    pub model_preferences: Option<ModelPreferences>,
    /// Context inclusion hint
    pub include_context: Option<String>,
    /// Provider-specific metadata
    pub metadata: Option<Value>,
}

/// Where a sampling request came from.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingContext {
    /// Server that asked
    pub server: String,
    /// Id of the server's request
    pub request_id: RequestId,
}

/// Produces model output on behalf of a server.
///
/// The returned string becomes the text of an assistant message in the
/// `sampling/createMessage` result.
#[async_trait]
pub trait SamplingHandler: Send + Sync + std::fmt::Debug {
    /// Answer a sampling request.
    async fn handle_create_message(
        &self,
        messages: Vec<SamplingMessage>,
        params: SamplingParams,
        context: SamplingContext,
    ) -> HandlerResult<String>;
}

// ============================================================================
// HANDLER REGISTRY
// ============================================================================

/// The handlers registered on a client.
#[derive(Debug, Default, Clone)]
pub struct HandlerRegistry {
    /// Log handler for server log entries
    pub log: Option<Arc<dyn LogHandler>>,

    /// Default progress handler for every call
    pub progress: Option<Arc<dyn ProgressHandler>>,

    /// Sampling handler for `sampling/createMessage`
    pub sampling: Option<Arc<dyn SamplingHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a log handler
    pub fn set_log_handler(&mut self, handler: Arc<dyn LogHandler>) {
        debug!("Registering log handler");
        self.log = Some(handler);
    }

    /// Register a progress handler
    pub fn set_progress_handler(&mut self, handler: Arc<dyn ProgressHandler>) {
        debug!("Registering progress handler");
        self.progress = Some(handler);
    }

    /// Register a sampling handler
    pub fn set_sampling_handler(&mut self, handler: Arc<dyn SamplingHandler>) {
        debug!("Registering sampling handler");
        self.sampling = Some(handler);
    }

    /// Check if a log handler is registered
    #[must_use]
    pub fn has_log_handler(&self) -> bool {
        self.log.is_some()
    }

    /// Check if a sampling handler is registered
    #[must_use]
    pub fn has_sampling_handler(&self) -> bool {
        self.sampling.is_some()
    }

    /// Get the log handler if registered
    #[must_use]
    pub fn get_log_handler(&self) -> Option<Arc<dyn LogHandler>> {
        self.log.clone()
    }

    /// Get the progress handler if registered
    #[must_use]
    pub fn get_progress_handler(&self) -> Option<Arc<dyn ProgressHandler>> {
        self.progress.clone()
    }

    /// Get the sampling handler if registered
    #[must_use]
    pub fn get_sampling_handler(&self) -> Option<Arc<dyn SamplingHandler>> {
        self.sampling.clone()
    }
}
