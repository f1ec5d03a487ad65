//! Error taxonomy.
//!
//! `ToolError` never escapes a turn: the ReAct loop turns it into an
//! observation for the model. `AgentError::Provider` aborts the turn and
//! leaves memory as it was before the call. `McpError` surfaces when a tool
//! server is connected; later call failures degrade to `ToolError`.

use std::time::Duration;

use thiserror::Error;

/// Top-level error returned by the agent facade and providers.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Bad or missing provider selection, malformed model artifact, template
    /// or grammar failure in the local provider.
    #[error("configuration error: {0}")]
    Config(String),

    /// Network, HTTP status, or response-parse failure during a turn.
    #[error("provider error: {0}")]
    Provider(String),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Mcp(#[from] McpError),

    #[error("skill not found: {0}")]
    SkillNotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AgentError {
    pub fn config(msg: impl Into<String>) -> Self {
        AgentError::Config(msg.into())
    }

    pub fn provider(msg: impl Into<String>) -> Self {
        AgentError::Provider(msg.into())
    }
}

/// Errors raised by the tool registry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("tool '{0}' is already registered")]
    DuplicateTool(String),

    #[error("tool '{0}' not found")]
    NotFound(String),

    #[error("tool '{name}' failed: {reason}")]
    ExecutionFailed { name: String, reason: String },
}

impl ToolError {
    pub fn failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        ToolError::ExecutionFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised while talking to an external tool server.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("failed to spawn MCP server '{server}': {reason}")]
    Spawn { server: String, reason: String },

    #[error("MCP handshake with '{server}' failed: {reason}")]
    Handshake { server: String, reason: String },

    #[error("MCP server '{server}' did not respond within {after:?}")]
    Timeout { server: String, after: Duration },

    #[error("MCP protocol error: {0}")]
    Protocol(String),

    #[error("MCP server '{0}' closed the connection")]
    Closed(String),

    #[error("MCP server '{0}' is not connected")]
    NotConnected(String),
}
