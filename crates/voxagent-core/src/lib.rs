//! Voxagent core — shared types, error taxonomy, configuration, and the
//! single sync-over-async boundary used by the rest of the workspace.
//!
//! - [`types`]: chat messages, tool calls, tool definitions, provider responses
//! - [`error`]: `AgentError`, `ToolError`, `McpError`
//! - [`config`]: `AgentConfig` schema plus JSON/env loader
//! - [`async_bridge`]: the process-wide tokio runtime and `block_on` helpers
//! - [`utils`]: paths, truncation, token estimation

pub mod async_bridge;
pub mod config;
pub mod error;
pub mod types;
pub mod utils;

pub use error::{AgentError, McpError, ToolError};
pub use types::{ChatMessage, LlmResponse, Role, ToolCall, ToolDefinition, UsageInfo};
