//! Child-process transport.
//!
//! Spawns the server with piped stdio. Frames are newline-delimited JSON:
//! one writer task owns stdin, one reader task turns stdout lines into
//! [`TransportEvent::Frame`]s, and stderr is forwarded to `tracing` at debug
//! level. Stdout reaching EOF or a failed stdin write means the process is
//! gone; the reader sees a final [`TransportEvent::Failed`].
//!
//! State and handles use `parking_lot` locks that are never held across an
//! `.await`; the `Child` itself sits behind a `tokio` mutex because waiting
//! on it does cross one.

use std::process::Stdio;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use switchboard_protocol::{JsonRpcMessage, codec};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex as TokioMutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use crate::error::{TransportError, TransportResult};
use crate::spec::StdioConfig;
use crate::types::{CHANNEL_CAPACITY, InboundStream, TransportEvent, TransportState};

/// Transport over a child process's stdin/stdout.
#[derive(Debug)]
pub struct StdioTransport {
    config: StdioConfig,
    state: Arc<Mutex<TransportState>>,
    child: TokioMutex<Option<Child>>,
    stdin_tx: Mutex<Option<mpsc::Sender<Bytes>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StdioTransport {
    /// Create an unopened transport.
    pub fn new(config: StdioConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(TransportState::Disconnected)),
            child: TokioMutex::new(None),
            stdin_tx: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Current state.
    pub fn state(&self) -> TransportState {
        self.state.lock().clone()
    }

    /// OS process id of the running server, if any.
    pub async fn process_id(&self) -> Option<u32> {
        self.child.lock().await.as_ref().and_then(Child::id)
    }

    /// Spawn the process and return its inbound stream.
    ///
    /// # Errors
    ///
    /// [`TransportError::ConfigurationError`] for an empty command,
    /// [`TransportError::ConnectionFailed`] if spawning fails or the
    /// transport is already open.
    pub async fn open(&self) -> TransportResult<InboundStream> {
        if self.config.command.trim().is_empty() {
            return Err(TransportError::ConfigurationError(
                "Command cannot be empty".to_string(),
            ));
        }
        {
            let mut state = self.state.lock();
            if *state != TransportState::Disconnected {
                return Err(TransportError::ConnectionFailed(format!(
                    "stdio transport is {state}"
                )));
            }
            *state = TransportState::Connecting;
        }

        let (program, args) = self.config.program_and_args();
        info!(program = %program, args = ?args, "starting server process");

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .envs(&self.config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(self.config.kill_on_drop);
        if let Some(cwd) = &self.config.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!(program = %program, "failed to spawn server process: {e}");
                *self.state.lock() = TransportState::Failed {
                    reason: e.to_string(),
                };
                return Err(TransportError::ConnectionFailed(format!(
                    "Failed to spawn '{program}': {e}"
                )));
            }
        };

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            let _ = child.start_kill();
            *self.state.lock() = TransportState::Disconnected;
            return Err(TransportError::ConnectionFailed(
                "Failed to capture process stdio".to_string(),
            ));
        };

        let (stdin_tx, stdin_rx) = mpsc::channel::<Bytes>(CHANNEL_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        *self.state.lock() = TransportState::Connected;

        let writer = tokio::spawn(write_stdin(
            stdin,
            stdin_rx,
            inbound_tx.clone(),
            Arc::clone(&self.state),
        ));
        let reader = tokio::spawn(read_stdout(stdout, inbound_tx, Arc::clone(&self.state)));
        let program_name = program.clone();
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(program = %program_name, "server stderr: {line}");
            }
        });

        *self.child.lock().await = Some(child);
        *self.stdin_tx.lock() = Some(stdin_tx);
        *self.tasks.lock() = vec![writer, reader, stderr_task];
        Ok(inbound_rx)
    }

    /// Queue one message for the process's stdin.
    ///
    /// # Errors
    ///
    /// Fails when the transport is not open or the writer has stopped.
    pub async fn send(&self, message: JsonRpcMessage) -> TransportResult<()> {
        let sender = self
            .stdin_tx
            .lock()
            .clone()
            .ok_or(TransportError::NotConnected)?;
        let line = codec::encode_line(&message)?;
        sender
            .send(line)
            .await
            .map_err(|_| TransportError::ConnectionLost("server stdin is closed".to_string()))
    }

    /// Close stdin, give the process `shutdown_timeout` to exit, then kill it.
    /// Idempotent.
    pub async fn close(&self) -> TransportResult<()> {
        let previous = std::mem::replace(&mut *self.state.lock(), TransportState::Disconnecting);
        self.stdin_tx.lock().take();

        if let Some(mut child) = self.child.lock().await.take() {
            match timeout(self.config.shutdown_timeout, child.wait()).await {
                Ok(Ok(status)) => info!("server process exited with {status}"),
                Ok(Err(e)) => warn!("failed to wait for server process: {e}"),
                Err(_) => {
                    warn!("server process did not exit in time, killing it");
                    if let Err(e) = child.kill().await {
                        error!("failed to kill server process: {e}");
                    }
                }
            }
        } else {
            trace!(state = %previous, "close on a stdio transport with no process");
        }

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        *self.state.lock() = TransportState::Disconnected;
        Ok(())
    }
}

async fn write_stdin(
    stdin: tokio::process::ChildStdin,
    mut frames: mpsc::Receiver<Bytes>,
    inbound: mpsc::Sender<TransportEvent>,
    state: Arc<Mutex<TransportState>>,
) {
    let mut writer = BufWriter::new(stdin);
    while let Some(frame) = frames.recv().await {
        let written = async {
            writer.write_all(&frame).await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = written {
            error!("failed to write to server stdin: {e}");
            *state.lock() = TransportState::Failed {
                reason: e.to_string(),
            };
            let _ = inbound
                .send(TransportEvent::Failed(TransportError::ConnectionLost(format!(
                    "broken pipe: {e}"
                ))))
                .await;
            return;
        }
        trace!(bytes = frame.len(), "frame written to server stdin");
    }
    debug!("stdin writer finished");
}

async fn read_stdout(
    stdout: tokio::process::ChildStdout,
    inbound: mpsc::Sender<TransportEvent>,
    state: Arc<Mutex<TransportState>>,
) {
    let mut lines = BufReader::new(stdout).lines();
    let reason = loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                trace!("frame from server stdout: {line}");
                if inbound
                    .send(TransportEvent::Frame(Bytes::from(line)))
                    .await
                    .is_err()
                {
                    debug!("inbound receiver dropped, stopping stdout reader");
                    return;
                }
            }
            Ok(None) => break "server process exited".to_string(),
            Err(e) => break format!("failed to read server stdout: {e}"),
        }
    };

    let unexpected = {
        let mut current = state.lock();
        let connected = current.is_connected();
        if connected {
            *current = TransportState::Failed {
                reason: reason.clone(),
            };
        }
        connected
    };
    if unexpected {
        warn!("{reason}");
        let _ = inbound
            .send(TransportEvent::Failed(TransportError::ConnectionLost(reason)))
            .await;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use switchboard_protocol::{JsonRpcNotification, JsonRpcRequest, RequestId};

    #[tokio::test]
    async fn test_empty_command_error() {
        let transport = StdioTransport::new(StdioConfig::new("  "));
        let err = transport.open().await.unwrap_err();
        assert!(matches!(err, TransportError::ConfigurationError(_)));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_connection_error() {
        let transport = StdioTransport::new(StdioConfig::new("definitely-not-a-real-binary-xyz"));
        let err = transport.open().await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectionFailed(_)));
    }

    #[tokio::test]
    async fn test_cat_echoes_frames() {
        let transport = StdioTransport::new(StdioConfig::new("cat"));
        let mut inbound = transport.open().await.unwrap();
        assert!(transport.process_id().await.is_some());

        let request = JsonRpcRequest::new("ping", None, RequestId::Number(1));
        transport.send(request.clone().into()).await.unwrap();

        match inbound.recv().await {
            Some(TransportEvent::Frame(frame)) => {
                assert_eq!(codec::decode(&frame).unwrap(), JsonRpcMessage::Request(request));
            }
            other => panic!("expected a frame, got {other:?}"),
        }
        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert_eq!(transport.state(), TransportState::Disconnected);
    }

    #[tokio::test]
    async fn test_process_exit_is_fatal() {
        let transport = StdioTransport::new(StdioConfig::new("true"));
        let mut inbound = transport.open().await.unwrap();
        match inbound.recv().await {
            Some(TransportEvent::Failed(err)) => assert!(err.is_fatal()),
            other => panic!("expected failure, got {other:?}"),
        }
        let _ = transport
            .send(JsonRpcNotification::new("notifications/initialized", None).into())
            .await;
        transport.close().await.unwrap();
    }
}
