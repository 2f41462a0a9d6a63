//! Client and server configuration.
//!
//! [`ClientConfig`] carries the client-wide knobs (timeouts, keep-alive,
//! prefixing). [`McpConfig`] is the `mcpServers` document that names every
//! server the client should aggregate:
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "weather": {"url": "https://weather-api.example.com/mcp", "transport": "streamable-http"},
//!     "assistant": {"command": "python", "args": ["./assistant_server.py"], "env": {"DEBUG": "true"}}
//!   }
//! }
//! ```
//!
//! `${VAR}` placeholders in URLs, header values and `env` values are
//! expanded from the process environment when entries are built.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use switchboard_protocol::types::Implementation;
use switchboard_transport::{StdioConfig, StreamableHttpConfig, TransportSpec};
use tracing::warn;

use crate::error::{Error, Result};

/// Name given to the server of a single-target client.
pub const DEFAULT_SERVER_NAME: &str = "default";

/// How exposed names are derived from raw names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Prefixing {
    /// Prefix with `{server}_` when two or more servers are configured
    #[default]
    Auto,
    /// Never prefix; clashing names are rejected at scope entry
    Never,
}

/// Client-wide settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Deadline for calls that do not set their own; `None` waits forever
    pub default_timeout: Option<Duration>,
    /// Deadline for the `initialize` handshake
    pub init_timeout: Duration,
    /// Keep sessions alive when the last scope exits
    pub keep_alive: bool,
    /// Exposed-name policy
    pub prefixing: Prefixing,
    /// Identity sent in `initialize`
    pub client_info: Implementation,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_timeout: None,
            init_timeout: Duration::from_secs(30),
            keep_alive: true,
            prefixing: Prefixing::Auto,
            client_info: Implementation {
                name: "switchboard".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }
}

/// One configured server: a unique name plus how to reach it.
#[derive(Debug, Clone)]
pub struct ServerEntry {
    /// Unique key in the server map; used as the exposed-name prefix
    pub name: String,
    /// Transport description
    pub spec: TransportSpec,
}

impl ServerEntry {
    /// Pair a name with a transport.
    pub fn new(name: impl Into<String>, spec: impl Into<TransportSpec>) -> Self {
        Self {
            name: name.into(),
            spec: spec.into(),
        }
    }
}

/// One entry of the `mcpServers` map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerConfig {
    /// Remote server reached over HTTP
    Remote {
        /// Endpoint URL
        url: String,
        /// `"streamable-http"` (default) or its alias `"http"`
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transport: Option<String>,
        /// Headers sent with every request
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        headers: HashMap<String, String>,
    },
    /// Local process spoken to over stdio
    Stdio {
        /// Program to run
        command: String,
        /// Program arguments
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
        /// Extra environment variables
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        env: HashMap<String, String>,
        /// Working directory
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<PathBuf>,
    },
}

impl ServerConfig {
    /// Build the transport description, expanding `${VAR}` placeholders.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] for an unsupported `transport` value or an
    /// empty command.
    pub fn to_spec(&self, name: &str) -> Result<TransportSpec> {
        match self {
            Self::Remote {
                url,
                transport,
                headers,
            } => {
                match transport.as_deref() {
                    None | Some("streamable-http") | Some("http") => {}
                    Some(other) => {
                        return Err(Error::configuration(format!(
                            "server '{name}': unsupported transport '{other}'"
                        )));
                    }
                }
                let mut config = StreamableHttpConfig::new(expand_env(url));
                for (key, value) in headers {
                    config = config.header(key.clone(), expand_env(value));
                }
                Ok(config.into())
            }
            Self::Stdio {
                command,
                args,
                env,
                cwd,
            } => {
                if command.trim().is_empty() {
                    return Err(Error::configuration(format!(
                        "server '{name}': command cannot be empty"
                    )));
                }
                let mut config = StdioConfig::new(command.clone()).args(args.iter().cloned());
                for (key, value) in env {
                    config = config.env(key.clone(), expand_env(value));
                }
                if let Some(cwd) = cwd {
                    config = config.cwd(cwd.clone());
                }
                Ok(config.into())
            }
        }
    }
}

/// The `mcpServers` document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct McpConfig {
    /// Servers by name, iterated in name order
    #[serde(rename = "mcpServers")]
    pub servers: BTreeMap<String, ServerConfig>,
}

impl McpConfig {
    /// Parse a JSON document.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] if the text is not a valid `mcpServers`
    /// document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::configuration(format!("invalid mcpServers document: {e}")))
    }

    /// Convert an already-parsed JSON value.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] if the value does not have the expected shape.
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| Error::configuration(format!("invalid mcpServers document: {e}")))
    }

    /// Add or replace one server.
    pub fn with_server(mut self, name: impl Into<String>, server: ServerConfig) -> Self {
        self.servers.insert(name.into(), server);
        self
    }

    /// Build one [`ServerEntry`] per configured server, sorted by name.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] for an empty document, an empty server name or
    /// an invalid entry.
    pub fn to_entries(&self) -> Result<Vec<ServerEntry>> {
        if self.servers.is_empty() {
            return Err(Error::configuration("mcpServers is empty"));
        }
        self.servers
            .iter()
            .map(|(name, server)| {
                if name.is_empty() {
                    return Err(Error::configuration("server names cannot be empty"));
                }
                Ok(ServerEntry::new(name.clone(), server.to_spec(name)?))
            })
            .collect()
    }
}

impl FromStr for McpConfig {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_json_str(s)
    }
}

static ENV_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("Invalid env placeholder regex pattern")
});

/// Replace `${VAR}` with the variable's value; unset variables become `""`.
pub(crate) fn expand_env(input: &str) -> String {
    ENV_PLACEHOLDER
        .replace_all(input, |caps: &Captures<'_>| {
            let var = &caps[1];
            std::env::var(var).unwrap_or_else(|_| {
                warn!(variable = var, "environment variable is not set, expanding to empty");
                String::new()
            })
        })
        .into_owned()
}
