//! Aggregated client demo.
//!
//! Reads an `mcpServers` document, connects to every server through one
//! client and lists or calls what they expose. Logs go to stderr; results go
//! to stdout as JSON.
//!
//! ```text
//! switchboard --config servers.json tools
//! switchboard --config servers.json call weather_get_forecast -a '{"city": "London"}'
//! switchboard --config servers.json read weather://weather/icons/sunny
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use switchboard_client::async_trait;
use switchboard_client::{
    CallOptions, Client, HandlerResult, LogHandler, LogMessage, McpConfig, ProgressHandler,
    ProgressUpdate,
};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
    name = "switchboard",
    version,
    about = "Talk to every server of an mcpServers document through one client"
)]
struct Cli {
    /// Path to the mcpServers JSON document
    #[arg(long, short = 'c', env = "SWITCHBOARD_CONFIG")]
    config: PathBuf,

    /// Default per-call timeout in seconds
    #[arg(long, short = 't')]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List tools under their exposed names
    Tools,
    /// List resources and resource templates
    Resources,
    /// List prompts
    Prompts,
    /// Call a tool
    Call {
        /// Exposed tool name
        name: String,
        /// Arguments as a JSON object
        #[arg(long, short = 'a', default_value = "{}")]
        arguments: String,
    },
    /// Read a resource by exposed URI
    Read {
        /// Exposed resource URI
        uri: String,
    },
    /// Render a prompt
    Prompt {
        /// Exposed prompt name
        name: String,
        /// Arguments as a JSON object
        #[arg(long, short = 'a', default_value = "{}")]
        arguments: String,
    },
    /// Ping every server
    Ping,
}

/// Forwards server log entries to this process's tracing output.
#[derive(Debug)]
struct TracingLog;

#[async_trait]
impl LogHandler for TracingLog {
    async fn handle_log(&self, log: LogMessage) -> HandlerResult<()> {
        info!(server = %log.server, logger = %log.logger, level = ?log.level, "{}", log.data);
        Ok(())
    }
}

/// Prints progress reports to stderr.
#[derive(Debug)]
struct StderrProgress;

#[async_trait]
impl ProgressHandler for StderrProgress {
    async fn handle_progress(&self, update: ProgressUpdate) -> HandlerResult<()> {
        match update.total {
            Some(total) => eprintln!("[{}] {}/{}", update.server, update.progress, total),
            None => eprintln!("[{}] {}", update.server, update.progress),
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let document = std::fs::read_to_string(&cli.config)
        .with_context(|| format!("reading {}", cli.config.display()))?;
    let config = McpConfig::from_json_str(&document)?;

    let mut builder = Client::builder()
        .target(config)
        .with_log_handler(Arc::new(TracingLog));
    if let Some(seconds) = cli.timeout {
        builder = builder.with_timeout(Duration::from_secs(seconds));
    }
    let client = builder.build()?;

    let output = client
        .scoped(|client| async move { run(&client, cli.command).await })
        .await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn run(client: &Client, command: Command) -> switchboard_client::Result<Value> {
    let value = match command {
        Command::Tools => serde_json::to_value(client.list_tools().await?)?,
        Command::Resources => json!({
            "resources": client.list_resources().await?,
            "resourceTemplates": client.list_resource_templates().await?,
        }),
        Command::Prompts => serde_json::to_value(client.list_prompts().await?)?,
        Command::Call { name, arguments } => {
            let arguments: Value = serde_json::from_str(&arguments)?;
            let options = CallOptions::new().progress_handler(Arc::new(StderrProgress));
            let outcome = client
                .call_tool_with(&name, Some(arguments), options)
                .await?;
            json!({
                "content": outcome.content,
                "structuredContent": outcome.structured_content,
                "data": outcome.data,
            })
        }
        Command::Read { uri } => serde_json::to_value(client.read_resource(&uri).await?)?,
        Command::Prompt { name, arguments } => {
            let arguments: Value = serde_json::from_str(&arguments)?;
            let prompt = client.get_prompt(&name, Some(arguments)).await?;
            json!({"description": prompt.description, "messages": prompt.messages})
        }
        Command::Ping => {
            client.ping().await?;
            json!({"servers": client.server_names().collect::<Vec<_>>()})
        }
    };
    Ok(value)
}
