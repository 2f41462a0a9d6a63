//! # switchboard-client
//!
//! A client runtime that talks to one or many MCP servers through a single
//! [`Client`].
//!
//! - **Sessions** own one transport each, perform the `initialize`
//!   handshake and survive scope exit when keep-alive is on.
//! - **Aggregation** merges every server's tools, resources and prompts.
//!   With two or more servers, names become `{server}_{name}` and resource
//!   URIs become `{scheme}://{server}/{path}`.
//! - **Dispatch** coerces arguments against each tool's input schema,
//!   correlates responses by id and enforces per-call deadlines.
//! - **Callbacks** route server log entries, progress reports and sampling
//!   requests to registered handlers.
//!
//! ## Example
//!
//! ```rust,no_run
//! use switchboard_client::{Client, McpConfig};
//! use serde_json::json;
//!
//! # async fn example() -> switchboard_client::Result<()> {
//! let config: McpConfig = r#"{
//!     "mcpServers": {
//!         "weather": {"url": "https://weather-api.example.com/mcp", "transport": "streamable-http"},
//!         "assistant": {"command": "python", "args": ["./assistant_server.py"]}
//!     }
//! }"#.parse()?;
//!
//! let client = Client::new(config)?;
//! let scope = client.enter().await?;
//! let forecast = client
//!     .call_tool("weather_get_forecast", Some(json!({"city": "London"})))
//!     .await?;
//! let icons = client.read_resource("weather://weather/icons/sunny").await?;
//! scope.exit().await;
//! # let _ = (forecast, icons);
//! # Ok(())
//! # }
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod error;
pub mod handlers;
pub mod schema;

pub use client::{
    Aggregator, CallOptions, CallToolOutcome, Client, ClientBuilder, ClientScope, ClientTarget,
    Namespace, NamespaceEntry, PromptOutcome, Session, SessionHandle, SessionId, SessionState,
};
pub use config::{ClientConfig, McpConfig, Prefixing, ServerConfig, ServerEntry};
pub use error::{Error, Result};
pub use handlers::{
    HandlerError, HandlerRegistry, HandlerResult, LogHandler, LogMessage, ProgressHandler,
    ProgressUpdate, SamplingContext, SamplingHandler, SamplingParams,
};
pub use schema::{ArgValue, ArgumentSchema, FieldKind};

pub use async_trait::async_trait;
pub use switchboard_protocol as protocol;
pub use switchboard_transport as transport;
