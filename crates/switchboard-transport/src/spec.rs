//! Immutable descriptions of how to reach a server.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use switchboard_protocol::PROTOCOL_VERSION;

use crate::error::{TransportError, TransportResult};
use crate::in_process::{InProcessOptions, InProcessServer};
use crate::types::TransportType;

/// How to reach one server. Immutable once constructed.
#[derive(Debug, Clone)]
pub enum TransportSpec {
    /// A server object living in this process.
    InProcess(InProcessConfig),
    /// A child process speaking over stdin/stdout.
    Stdio(StdioConfig),
    /// A streamable HTTP endpoint.
    StreamableHttp(StreamableHttpConfig),
}

impl TransportSpec {
    /// Infer a transport from a target string.
    ///
    /// * `http://` and `https://` URLs use streamable HTTP.
    /// * Paths ending in `.py` run under `python`, `.js` under `node`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConfigurationError`] for anything else.
    pub fn infer(target: &str) -> TransportResult<Self> {
        let trimmed = target.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            return Ok(Self::StreamableHttp(StreamableHttpConfig::new(trimmed)));
        }

        let path = Path::new(trimmed);
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("py") => Ok(Self::Stdio(StdioConfig::script("python", path))),
            Some("js") => Ok(Self::Stdio(StdioConfig::script("node", path))),
            _ => Err(TransportError::ConfigurationError(format!(
                "cannot infer a transport for '{target}': expected an http(s) URL or a .py/.js script"
            ))),
        }
    }

    /// Wrap a server object.
    pub fn in_process(server: Arc<dyn InProcessServer>) -> Self {
        Self::InProcess(InProcessConfig::new(server))
    }

    /// Variant tag.
    pub fn transport_type(&self) -> TransportType {
        match self {
            Self::InProcess(_) => TransportType::InProcess,
            Self::Stdio(_) => TransportType::Stdio,
            Self::StreamableHttp(_) => TransportType::StreamableHttp,
        }
    }
}

impl From<InProcessConfig> for TransportSpec {
    fn from(config: InProcessConfig) -> Self {
        Self::InProcess(config)
    }
}

impl From<StdioConfig> for TransportSpec {
    fn from(config: StdioConfig) -> Self {
        Self::Stdio(config)
    }
}

impl From<StreamableHttpConfig> for TransportSpec {
    fn from(config: StreamableHttpConfig) -> Self {
        Self::StreamableHttp(config)
    }
}

/// An in-process server handle plus transport options.
#[derive(Clone)]
pub struct InProcessConfig {
    /// The server object
    pub server: Arc<dyn InProcessServer>,
    /// Transport options
    pub options: InProcessOptions,
}

impl InProcessConfig {
    /// Wrap a server with default options.
    pub fn new(server: Arc<dyn InProcessServer>) -> Self {
        Self {
            server,
            options: InProcessOptions::default(),
        }
    }

    /// Replace internal error messages with a generic one.
    pub fn mask_error_details(mut self, mask: bool) -> Self {
        self.options.mask_error_details = mask;
        self
    }
}

impl fmt::Debug for InProcessConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InProcessConfig")
            .field("server", &self.server.name())
            .field("options", &self.options)
            .finish()
    }
}

/// Configuration for a child-process server.
#[derive(Debug, Clone, PartialEq)]
pub struct StdioConfig {
    /// Command to execute
    pub command: String,
    /// Arguments to pass to the command
    pub args: Vec<String>,
    /// Environment variables added to the inherited environment
    pub env: HashMap<String, String>,
    /// Working directory for the process
    pub cwd: Option<PathBuf>,
    /// Interpreter that runs `command` as a script, e.g. `python`
    pub interpreter: Option<String>,
    /// How long to wait for a graceful exit after stdin closes
    pub shutdown_timeout: Duration,
    /// Whether to kill the process when the transport is dropped
    pub kill_on_drop: bool,
}

impl StdioConfig {
    /// Run `command` directly.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            interpreter: None,
            shutdown_timeout: Duration::from_secs(5),
            kill_on_drop: true,
        }
    }

    /// Run a script file under `interpreter`.
    pub fn script(interpreter: impl Into<String>, path: impl AsRef<Path>) -> Self {
        let mut config = Self::new(path.as_ref().to_string_lossy().into_owned());
        config.interpreter = Some(interpreter.into());
        config
    }

    /// Append arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set one environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the working directory.
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Override the interpreter, e.g. a virtualenv's `python3`.
    pub fn interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = Some(interpreter.into());
        self
    }

    /// The program to spawn and its full argument list.
    pub fn program_and_args(&self) -> (String, Vec<String>) {
        match &self.interpreter {
            Some(interpreter) => {
                let mut args = Vec::with_capacity(self.args.len() + 1);
                args.push(self.command.clone());
                args.extend(self.args.iter().cloned());
                (interpreter.clone(), args)
            }
            None => (self.command.clone(), self.args.clone()),
        }
    }
}

/// Configuration for a streamable HTTP server.
#[derive(Clone, PartialEq)]
pub struct StreamableHttpConfig {
    /// Endpoint URL, e.g. `http://127.0.0.1:8000/mcp`
    pub url: String,
    /// Extra headers sent with every request
    pub headers: HashMap<String, String>,
    /// Bearer token for the `Authorization` header
    pub auth_token: Option<String>,
    /// Value of the `MCP-Protocol-Version` header
    pub protocol_version: String,
    /// Per-HTTP-request timeout; `None` leaves it to the caller's deadline
    pub request_timeout: Option<Duration>,
    /// Whether to open the GET push stream once a session id is known
    pub push_stream: bool,
}

impl StreamableHttpConfig {
    /// Endpoint with default settings.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HashMap::new(),
            auth_token: None,
            protocol_version: PROTOCOL_VERSION.to_string(),
            request_timeout: None,
            push_stream: true,
        }
    }

    /// Add a header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Send `Authorization: Bearer <token>`.
    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }
}

impl fmt::Debug for StreamableHttpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamableHttpConfig")
            .field("url", &self.url)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("protocol_version", &self.protocol_version)
            .field("request_timeout", &self.request_timeout)
            .field("push_stream", &self.push_stream)
            .finish()
    }
}
