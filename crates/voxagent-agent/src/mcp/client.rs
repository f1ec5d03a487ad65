//! MCP client over a child process's stdio.
//!
//! Spawns the server, performs the `initialize` handshake, lists tools and
//! forwards `tools/call`. Responses are matched by id; server-initiated
//! notifications and stale responses from abandoned calls are skipped.
//! Everything here is async and runs on the shared runtime.

use std::process::Stdio;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use voxagent_core::error::McpError;

use super::protocol::{
    InitializeParams, InitializeResult, JsonRpcMessage, JsonRpcRequest, ToolInfo,
    ToolsCallParams, ToolsCallResult, ToolsListResult,
};

/// A live connection to one MCP server process.
pub struct McpConnection {
    server: String,
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    next_id: u64,
}

impl McpConnection {
    /// Spawn `command args...` with piped stdio. The child is killed when the
    /// connection is dropped.
    pub fn spawn(server: &str, command: &str, args: &[String]) -> Result<Self, McpError> {
        info!(server = server, command = command, "spawning MCP server");

        let spawn_err = |reason: String| McpError::Spawn {
            server: server.to_string(),
            reason,
        };

        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_err(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_err("stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_err("stdout not captured".into()))?;

        Ok(Self {
            server: server.to_string(),
            child,
            stdin,
            stdout: BufReader::new(stdout),
            next_id: 1,
        })
    }

    /// `initialize` + `notifications/initialized`.
    pub async fn initialize(&mut self) -> Result<InitializeResult, McpError> {
        let params = serde_json::to_value(InitializeParams::voxagent())
            .map_err(|e| McpError::Protocol(e.to_string()))?;
        let result = self.request("initialize", Some(params)).await?;
        let init: InitializeResult = serde_json::from_value(result).map_err(|e| {
            McpError::Handshake {
                server: self.server.clone(),
                reason: format!("bad initialize result: {e}"),
            }
        })?;
        self.notify("notifications/initialized", None).await?;

        debug!(
            server = %self.server,
            protocol = %init.protocol_version,
            server_info = ?init.server_info,
            "MCP initialized"
        );
        Ok(init)
    }

    pub async fn list_tools(&mut self) -> Result<Vec<ToolInfo>, McpError> {
        let result = self.request("tools/list", Some(serde_json::json!({}))).await?;
        let list: ToolsListResult = serde_json::from_value(result)
            .map_err(|e| McpError::Protocol(format!("bad tools/list result: {e}")))?;
        Ok(list.tools)
    }

    pub async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<ToolsCallResult, McpError> {
        // Servers expect an object even for argument-less tools.
        let arguments = if arguments.is_null() {
            Value::Object(Default::default())
        } else {
            arguments
        };
        let params = serde_json::to_value(ToolsCallParams { name, arguments })
            .map_err(|e| McpError::Protocol(e.to_string()))?;
        let result = self.request("tools/call", Some(params)).await?;
        serde_json::from_value(result)
            .map_err(|e| McpError::Protocol(format!("bad tools/call result: {e}")))
    }

    /// Whether the child is still running.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Kill the child and reap it.
    pub async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            debug!(server = %self.server, error = %e, "MCP server already exited");
        }
        info!(server = %self.server, "MCP server stopped");
    }

    async fn request(&mut self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let id = self.next_id;
        self.next_id += 1;
        self.write(&JsonRpcRequest::new(id, method, params)).await?;

        loop {
            let mut line = String::new();
            let read = self
                .stdout
                .read_line(&mut line)
                .await
                .map_err(|_| McpError::Closed(self.server.clone()))?;
            if read == 0 {
                return Err(McpError::Closed(self.server.clone()));
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let message: JsonRpcMessage = match serde_json::from_str(line) {
                Ok(m) => m,
                Err(e) => {
                    warn!(server = %self.server, error = %e, "skipping non-JSON-RPC line");
                    continue;
                }
            };
            if !message.answers(id) {
                debug!(server = %self.server, method = ?message.method, "skipping unrelated message");
                continue;
            }
            if let Some(err) = message.error {
                return Err(McpError::Protocol(format!(
                    "{method} failed ({}): {}",
                    err.code, err.message
                )));
            }
            return Ok(message.result.unwrap_or(Value::Null));
        }
    }

    async fn notify(&mut self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        self.write(&JsonRpcRequest::notification(method, params)).await
    }

    async fn write(&mut self, message: &JsonRpcRequest<'_>) -> Result<(), McpError> {
        let mut line =
            serde_json::to_string(message).map_err(|e| McpError::Protocol(e.to_string()))?;
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|_| McpError::Closed(self.server.clone()))?;
        self.stdin
            .flush()
            .await
            .map_err(|_| McpError::Closed(self.server.clone()))
    }
}

impl std::fmt::Debug for McpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpConnection")
            .field("server", &self.server)
            .field("next_id", &self.next_id)
            .finish()
    }
}
