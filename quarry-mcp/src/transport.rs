//! Transport layer for JSON-RPC 2.0 message exchange.
//!
//! - [`ProcessTransport`]: newline-delimited JSON over a child process's pipes
//! - [`ChannelTransport`]: in-process tokio mpsc channels (for testing)

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::McpError;

/// Reads and writes framed JSON-RPC messages.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Read the next message.
    ///
    /// Returns `Ok(None)` on EOF (the remote side closed the connection).
    async fn read_message(&mut self) -> Result<Option<String>, McpError>;

    /// Write one message, framing and flushing it.
    async fn write_message(&mut self, message: &str) -> Result<(), McpError>;

    /// Gracefully close the transport.
    async fn close(&mut self) -> Result<(), McpError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn read_message(&mut self) -> Result<Option<String>, McpError> {
        (**self).read_message().await
    }

    async fn write_message(&mut self, message: &str) -> Result<(), McpError> {
        (**self).write_message(message).await
    }

    async fn close(&mut self) -> Result<(), McpError> {
        (**self).close().await
    }
}

// ---------------------------------------------------------------------------
// ProcessTransport
// ---------------------------------------------------------------------------

/// Talks to an MCP server spawned as a subprocess, one JSON message per line.
///
/// The child is killed when the transport is dropped.
pub struct ProcessTransport {
    child: Child,
    child_stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
}

impl std::fmt::Debug for ProcessTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessTransport")
            .field("pid", &self.child.id())
            .finish()
    }
}

impl ProcessTransport {
    /// Spawn `command` and wire its stdin/stdout to the transport.
    ///
    /// The child's stderr is forwarded to the debug log.
    pub async fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        working_dir: Option<&Path>,
    ) -> Result<Self, McpError> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| McpError::TransportError {
            message: format!("Failed to spawn {}: {}", command, e),
        })?;

        let stdin = child.stdin.take().ok_or_else(|| McpError::TransportError {
            message: "Failed to capture child stdin".into(),
        })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::TransportError {
                message: "Failed to capture child stdout".into(),
            })?;

        if let Some(stderr) = child.stderr.take() {
            let server = command.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(server = %server, line = %line, "MCP server stderr");
                }
            });
        }

        Ok(Self {
            child,
            child_stdin: stdin,
            reader: BufReader::new(stdout),
        })
    }
}

#[async_trait]
impl Transport for ProcessTransport {
    async fn read_message(&mut self) -> Result<Option<String>, McpError> {
        loop {
            let mut line = String::new();
            let bytes_read = self.reader.read_line(&mut line).await?;
            if bytes_read == 0 {
                return Ok(None);
            }
            let trimmed = line.trim_end();
            // Some servers print blank keep-alive lines.
            if !trimmed.is_empty() {
                return Ok(Some(trimmed.to_string()));
            }
        }
    }

    async fn write_message(&mut self, message: &str) -> Result<(), McpError> {
        self.child_stdin.write_all(message.as_bytes()).await?;
        self.child_stdin.write_all(b"\n").await?;
        self.child_stdin.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), McpError> {
        self.child_stdin.flush().await?;
        if let Err(e) = self.child.kill().await {
            debug!(error = %e, "MCP server already exited");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ChannelTransport
// ---------------------------------------------------------------------------

/// In-process transport backed by tokio mpsc channels.
pub struct ChannelTransport {
    receiver: mpsc::Receiver<String>,
    sender: mpsc::Sender<String>,
}

impl ChannelTransport {
    pub fn new(receiver: mpsc::Receiver<String>, sender: mpsc::Sender<String>) -> Self {
        Self { receiver, sender }
    }

    /// Create a linked pair: what one side writes, the other reads.
    pub fn pair(buffer: usize) -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::channel(buffer);
        let (tx_b, rx_b) = mpsc::channel(buffer);
        (
            ChannelTransport::new(rx_a, tx_b),
            ChannelTransport::new(rx_b, tx_a),
        )
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn read_message(&mut self) -> Result<Option<String>, McpError> {
        Ok(self.receiver.recv().await)
    }

    async fn write_message(&mut self, message: &str) -> Result<(), McpError> {
        self.sender
            .send(message.to_string())
            .await
            .map_err(|e| McpError::TransportError {
                message: format!("channel send failed: {e}"),
            })
    }

    async fn close(&mut self) -> Result<(), McpError> {
        self.receiver.close();
        Ok(())
    }
}
