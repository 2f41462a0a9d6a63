//! Client builder and connection targets.
//!
//! Provides a fluent interface for configuring a [`Client`] before creation.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use switchboard_protocol::types::Implementation;
use switchboard_transport::{
    InProcessConfig, InProcessServer, StdioConfig, StreamableHttpConfig, TransportSpec,
};

use super::core::Client;
use crate::config::{ClientConfig, DEFAULT_SERVER_NAME, McpConfig, Prefixing, ServerEntry};
use crate::error::{Error, Result};
use crate::handlers::{HandlerRegistry, LogHandler, ProgressHandler, SamplingHandler};

/// What a client connects to.
///
/// Most callers never name this type; anything convertible into it can be
/// passed to [`Client::new`] or [`ClientBuilder::target`]:
///
/// | Input                                 | Servers                          |
/// |---------------------------------------|----------------------------------|
/// | `"https://host/mcp"`                  | one, streamable HTTP             |
/// | `"server.py"`, `"server.js"`          | one, stdio under python or node  |
/// | [`McpConfig`]                         | one per `mcpServers` key         |
/// | `Arc<dyn InProcessServer>`            | one, in-process                  |
/// | [`ServerEntry`] or `Vec<ServerEntry>` | as given                         |
#[derive(Debug, Clone)]
pub enum ClientTarget {
    /// One named server
    Server(ServerEntry),
    /// Several named servers
    Servers(Vec<ServerEntry>),
    /// An `mcpServers` document
    Config(McpConfig),
    /// A URL or script path whose transport is inferred
    Inferred(String),
}

impl ClientTarget {
    /// Resolve into server entries.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] for an empty target, a blank or repeated
    /// server name, or an uninferable string.
    pub fn into_entries(self) -> Result<Vec<ServerEntry>> {
        let entries = match self {
            Self::Server(entry) => vec![entry],
            Self::Servers(entries) => entries,
            Self::Config(config) => config.to_entries()?,
            Self::Inferred(target) => vec![ServerEntry::new(
                DEFAULT_SERVER_NAME,
                TransportSpec::infer(&target)?,
            )],
        };
        if entries.is_empty() {
            return Err(Error::configuration("no servers configured"));
        }
        let mut seen = HashSet::new();
        for entry in &entries {
            if entry.name.trim().is_empty() {
                return Err(Error::configuration("server names must not be empty"));
            }
            if !seen.insert(entry.name.as_str()) {
                return Err(Error::configuration(format!(
                    "server '{}' is configured more than once",
                    entry.name
                )));
            }
        }
        Ok(entries)
    }
}

impl From<ServerEntry> for ClientTarget {
    fn from(entry: ServerEntry) -> Self {
        Self::Server(entry)
    }
}

impl From<Vec<ServerEntry>> for ClientTarget {
    fn from(entries: Vec<ServerEntry>) -> Self {
        Self::Servers(entries)
    }
}

impl From<McpConfig> for ClientTarget {
    fn from(config: McpConfig) -> Self {
        Self::Config(config)
    }
}

impl From<TransportSpec> for ClientTarget {
    fn from(spec: TransportSpec) -> Self {
        Self::Server(ServerEntry::new(DEFAULT_SERVER_NAME, spec))
    }
}

impl From<InProcessConfig> for ClientTarget {
    fn from(config: InProcessConfig) -> Self {
        TransportSpec::from(config).into()
    }
}

impl From<StdioConfig> for ClientTarget {
    fn from(config: StdioConfig) -> Self {
        TransportSpec::from(config).into()
    }
}

impl From<StreamableHttpConfig> for ClientTarget {
    fn from(config: StreamableHttpConfig) -> Self {
        TransportSpec::from(config).into()
    }
}

impl From<Arc<dyn InProcessServer>> for ClientTarget {
    fn from(server: Arc<dyn InProcessServer>) -> Self {
        TransportSpec::in_process(server).into()
    }
}

impl From<&str> for ClientTarget {
    fn from(target: &str) -> Self {
        Self::Inferred(target.to_string())
    }
}

impl From<String> for ClientTarget {
    fn from(target: String) -> Self {
        Self::Inferred(target)
    }
}

/// Builder for configuring and creating a [`Client`].
///
/// ```rust,no_run
/// use std::time::Duration;
/// use switchboard_client::{ClientBuilder, McpConfig};
///
/// # fn example(config: McpConfig) -> switchboard_client::Result<()> {
/// let client = ClientBuilder::new()
///     .target(config)
///     .with_timeout(Duration::from_secs(30))
///     .with_keep_alive(false)
///     .build()?;
/// # let _ = client;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct ClientBuilder {
    target: Option<ClientTarget>,
    config: ClientConfig,
    handlers: HandlerRegistry,
}

impl ClientBuilder {
    /// Create a new client builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set what to connect to.
    pub fn target(mut self, target: impl Into<ClientTarget>) -> Self {
        self.target = Some(target.into());
        self
    }

    // ============================================================================
    // CONFIGURATION
    // ============================================================================

    /// Default deadline for calls without their own.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.default_timeout = Some(timeout);
        self
    }

    /// Deadline for the `initialize` handshake.
    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.config.init_timeout = timeout;
        self
    }

    /// Keep sessions open across scope exits.
    pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.config.keep_alive = keep_alive;
        self
    }

    /// Name prefixing policy for multi-server clients.
    pub fn with_prefixing(mut self, prefixing: Prefixing) -> Self {
        self.config.prefixing = prefixing;
        self
    }

    /// Identity sent in the handshake.
    pub fn with_client_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.config.client_info = Implementation {
            name: name.into(),
            version: version.into(),
        };
        self
    }

    /// Replace the whole configuration.
    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    // ============================================================================
    // HANDLER REGISTRATION
    // ============================================================================

    /// Receive server log entries.
    pub fn with_log_handler(mut self, handler: Arc<dyn LogHandler>) -> Self {
        self.handlers.set_log_handler(handler);
        self
    }

    /// Receive progress reports for every call.
    pub fn with_progress_handler(mut self, handler: Arc<dyn ProgressHandler>) -> Self {
        self.handlers.set_progress_handler(handler);
        self
    }

    /// Answer `sampling/createMessage` requests. Also advertises the
    /// sampling capability in the handshake.
    pub fn with_sampling_handler(mut self, handler: Arc<dyn SamplingHandler>) -> Self {
        self.handlers.set_sampling_handler(handler);
        self
    }

    /// Build the client. Nothing connects until the first scope entry.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] when no target was set or the target does
    /// not resolve to a valid, non-empty set of servers.
    pub fn build(self) -> Result<Client> {
        let target = self
            .target
            .ok_or_else(|| Error::configuration("no target configured"))?;
        let entries = target.into_entries()?;
        Ok(Client::from_parts(entries, self.config, self.handlers))
    }
}
