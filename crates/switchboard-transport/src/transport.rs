use switchboard_protocol::JsonRpcMessage;
use tracing::debug;

use crate::error::TransportResult;
use crate::in_process::InProcessTransport;
use crate::spec::TransportSpec;
#[cfg(feature = "stdio")]
use crate::stdio::StdioTransport;
#[cfg(feature = "http")]
use crate::streamable_http::StreamableHttpTransport;
use crate::types::{InboundStream, TransportState, TransportType};

/// One physical channel to a server.
///
/// The variant set is closed; callers above this layer only use
/// [`open`](Self::open), [`send`](Self::send), [`close`](Self::close) and
/// [`state`](Self::state).
#[derive(Debug)]
#[non_exhaustive]
pub enum Transport {
    /// Direct calls into a server object.
    InProcess(InProcessTransport),
    /// Child process over stdio.
    #[cfg(feature = "stdio")]
    Stdio(StdioTransport),
    /// Streamable HTTP.
    #[cfg(feature = "http")]
    StreamableHttp(StreamableHttpTransport),
}

impl Transport {
    /// Build an unopened transport for `spec`.
    ///
    /// # Errors
    ///
    /// [`TransportError::NotAvailable`](crate::TransportError::NotAvailable) when the variant's feature is
    /// disabled, or a configuration error from the variant itself.
    pub fn from_spec(spec: &TransportSpec) -> TransportResult<Self> {
        match spec {
            TransportSpec::InProcess(config) => Ok(Self::InProcess(InProcessTransport::new(
                config.server.clone(),
                config.options.clone(),
            ))),
            #[cfg(feature = "stdio")]
            TransportSpec::Stdio(config) => Ok(Self::Stdio(StdioTransport::new(config.clone()))),
            #[cfg(not(feature = "stdio"))]
            TransportSpec::Stdio(_) => Err(crate::error::TransportError::NotAvailable(
                "stdio support is not compiled in".to_string(),
            )),
            #[cfg(feature = "http")]
            TransportSpec::StreamableHttp(config) => Ok(Self::StreamableHttp(
                StreamableHttpTransport::new(config.clone())?,
            )),
            #[cfg(not(feature = "http"))]
            TransportSpec::StreamableHttp(_) => Err(crate::error::TransportError::NotAvailable(
                "streamable HTTP support is not compiled in".to_string(),
            )),
        }
    }

    /// Variant tag.
    pub fn transport_type(&self) -> TransportType {
        match self {
            Self::InProcess(_) => TransportType::InProcess,
            #[cfg(feature = "stdio")]
            Self::Stdio(_) => TransportType::Stdio,
            #[cfg(feature = "http")]
            Self::StreamableHttp(_) => TransportType::StreamableHttp,
        }
    }

    /// Current state.
    pub fn state(&self) -> TransportState {
        match self {
            Self::InProcess(t) => t.state(),
            #[cfg(feature = "stdio")]
            Self::Stdio(t) => t.state(),
            #[cfg(feature = "http")]
            Self::StreamableHttp(t) => t.state(),
        }
    }

    /// Open the channel and hand back the inbound stream. Only one reader
    /// exists per open.
    ///
    /// # Errors
    ///
    /// Any failure to reach the server; callers report it as a connection
    /// error.
    pub async fn open(&self) -> TransportResult<InboundStream> {
        debug!(transport = %self.transport_type(), "opening transport");
        match self {
            Self::InProcess(t) => t.open().await,
            #[cfg(feature = "stdio")]
            Self::Stdio(t) => t.open().await,
            #[cfg(feature = "http")]
            Self::StreamableHttp(t) => t.open().await,
        }
    }

    /// Send one message.
    ///
    /// # Errors
    ///
    /// Fails if the channel is unusable.
    pub async fn send(&self, message: JsonRpcMessage) -> TransportResult<()> {
        match self {
            Self::InProcess(t) => t.send(message).await,
            #[cfg(feature = "stdio")]
            Self::Stdio(t) => t.send(message).await,
            #[cfg(feature = "http")]
            Self::StreamableHttp(t) => t.send(message).await,
        }
    }

    /// Release the channel. Safe to call more than once.
    ///
    /// # Errors
    ///
    /// Reserved for variants whose teardown can fail; the built-in variants
    /// log teardown problems and return `Ok`.
    pub async fn close(&self) -> TransportResult<()> {
        debug!(transport = %self.transport_type(), "closing transport");
        match self {
            Self::InProcess(t) => t.close().await,
            #[cfg(feature = "stdio")]
            Self::Stdio(t) => t.close().await,
            #[cfg(feature = "http")]
            Self::StreamableHttp(t) => t.close().await,
        }
    }

    /// Process id for stdio transports.
    pub async fn process_id(&self) -> Option<u32> {
        match self {
            #[cfg(feature = "stdio")]
            Self::Stdio(t) => t.process_id().await,
            _ => None,
        }
    }
}
