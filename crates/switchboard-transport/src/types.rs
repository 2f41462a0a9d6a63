//! Shared transport types.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use switchboard_protocol::JsonRpcMessage;
use tokio::sync::mpsc;

use crate::error::TransportError;

/// Inbound events for the single reader that opened the transport.
///
/// The stream ends when the transport is closed. A [`TransportEvent::Failed`]
/// is always the last event a transport emits.
pub type InboundStream = mpsc::Receiver<TransportEvent>;

/// Capacity of inbound and outbound queues; `send` suspends when full.
pub(crate) const CHANNEL_CAPACITY: usize = 256;

/// One item delivered by a transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// An already-decoded message (in-process transports bypass framing).
    Message(JsonRpcMessage),
    /// One raw frame awaiting the wire codec.
    Frame(Bytes),
    /// The channel broke; no further events follow.
    Failed(TransportError),
}

/// Enumerates the transport variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportType {
    /// Direct calls into a server object in the same process.
    InProcess,
    /// Child process over standard input/output.
    Stdio,
    /// Streamable HTTP.
    StreamableHttp,
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InProcess => write!(f, "in-process"),
            Self::Stdio => write!(f, "stdio"),
            Self::StreamableHttp => write!(f, "streamable-http"),
        }
    }
}

/// Represents the current state of a transport connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportState {
    /// The transport is not connected.
    Disconnected,
    /// The transport is in the process of connecting.
    Connecting,
    /// The transport is connected and ready to send/receive messages.
    Connected,
    /// The transport is in the process of disconnecting.
    Disconnecting,
    /// The transport has encountered an unrecoverable error.
    Failed {
        /// A description of the failure reason.
        reason: String,
    },
}

impl TransportState {
    /// Whether messages can be sent.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnecting => write!(f, "disconnecting"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}
