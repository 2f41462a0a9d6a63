//! # switchboard-transport
//!
//! Physical channels between the switchboard client runtime and MCP servers.
//!
//! A [`Transport`] is a closed set of variants sharing one capability set:
//! [`Transport::open`] returns the inbound event stream for the single
//! reader that owns it, [`Transport::send`] writes one message, and
//! [`Transport::close`] releases the channel idempotently. Transports know
//! nothing about sessions, correlation or multiplexing.
//!
//! | Variant | Channel | Framing |
//! |---|---|---|
//! | [`InProcessTransport`] | direct calls into an [`InProcessServer`] | none |
//! | [`StdioTransport`] | child process stdin/stdout | newline-delimited JSON |
//! | [`StreamableHttpTransport`] | HTTP POST plus SSE push stream | JSON or SSE bodies |
//!
//! Which variant to build is described by a [`TransportSpec`], which can be
//! inferred from a target string with [`TransportSpec::infer`].

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]

pub mod error;
pub mod in_process;
pub mod spec;
#[cfg(feature = "stdio")]
pub mod stdio;
#[cfg(feature = "http")]
pub mod streamable_http;
mod transport;
pub mod types;

pub use error::{TransportError, TransportResult};
pub use in_process::{InProcessOptions, InProcessServer, InProcessTransport, ServerPeer};
pub use spec::{InProcessConfig, StdioConfig, StreamableHttpConfig, TransportSpec};
#[cfg(feature = "stdio")]
pub use stdio::StdioTransport;
#[cfg(feature = "http")]
pub use streamable_http::StreamableHttpTransport;
pub use transport::Transport;
pub use types::{InboundStream, TransportEvent, TransportState, TransportType};
