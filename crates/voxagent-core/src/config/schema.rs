//! Configuration schema.
//!
//! JSON on disk uses **camelCase** keys; Rust uses snake_case. Every field has
//! a default so a partial file (or `{}`) deserializes cleanly.
//!
//! Provider selection: exactly one of `model_path` (local, in-process) and
//! `base_url` (remote Responses API) must be set.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::AgentError;
use crate::utils::expand_home;

/// Inclusive range accepted for `memory.capsuleTokenBudget`.
pub const CAPSULE_BUDGET_RANGE: (usize, usize) = (100, 200);

// ─────────────────────────────────────────────
// Root Config
// ─────────────────────────────────────────────

/// Root configuration. An immutable snapshot consumed once by `Agent::new`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    /// Path to a GGUF model for the local provider.
    pub model_path: Option<String>,
    /// Base URL of a Responses-API compatible endpoint (e.g. `https://api.openai.com/v1`).
    pub base_url: Option<String>,
    pub api_key: String,
    /// Remote model identifier.
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    /// Spoken language hint passed into the system prompt.
    pub language: String,
    /// `low` / `medium` / `high`; omitted from requests when unset.
    pub reasoning_effort: Option<String>,
    /// Split `analysis`/`final` channels out of raw model text.
    pub use_harmony: bool,
    pub max_iterations: u32,
    /// Root for file tools and `exec`; defaults to the process cwd.
    pub working_dir: Option<String>,
    pub http_timeout_secs: u64,
    pub local: LocalConfig,
    pub tools: ToolsConfig,
    pub memory: MemoryConfig,
    pub mcp: McpConfig,
    pub watcher: WatcherConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            base_url: None,
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: 2048,
            temperature: 0.7,
            language: "en".to_string(),
            reasoning_effort: None,
            use_harmony: true,
            max_iterations: 10,
            working_dir: None,
            http_timeout_secs: 120,
            local: LocalConfig::default(),
            tools: ToolsConfig::default(),
            memory: MemoryConfig::default(),
            mcp: McpConfig::default(),
            watcher: WatcherConfig::default(),
        }
    }
}

impl AgentConfig {
    /// A remote-provider config pointing at `base_url`.
    pub fn remote(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: Some(base_url.into()),
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    /// A local-provider config loading `model_path`.
    pub fn local(model_path: impl Into<String>) -> Self {
        Self {
            model_path: Some(model_path.into()),
            ..Default::default()
        }
    }

    /// Check invariants that cannot be expressed in the type.
    pub fn validate(&self) -> Result<(), AgentError> {
        let has_local = self.model_path.as_deref().is_some_and(|p| !p.is_empty());
        let has_remote = self.base_url.as_deref().is_some_and(|u| !u.is_empty());
        match (has_local, has_remote) {
            (true, true) => {
                return Err(AgentError::config(
                    "both modelPath and baseUrl are set; choose exactly one provider",
                ))
            }
            (false, false) => {
                return Err(AgentError::config(
                    "no provider configured; set modelPath (local) or baseUrl (remote)",
                ))
            }
            _ => {}
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(AgentError::config(format!(
                "temperature {} is outside [0, 2]",
                self.temperature
            )));
        }
        if self.max_tokens == 0 {
            return Err(AgentError::config("maxTokens must be greater than 0"));
        }
        if self.max_iterations == 0 {
            return Err(AgentError::config("maxIterations must be at least 1"));
        }
        if self.watcher.max_latency_ms < self.watcher.debounce_ms {
            return Err(AgentError::config(format!(
                "watcher.maxLatencyMs {} is below watcher.debounceMs {}",
                self.watcher.max_latency_ms, self.watcher.debounce_ms
            )));
        }
        for server in &self.mcp.servers {
            let has_url = server.url.as_deref().is_some_and(|u| !u.is_empty());
            if has_url == !server.command.is_empty() {
                return Err(AgentError::config(format!(
                    "mcp server '{}' needs exactly one of command or url",
                    server.name
                )));
            }
        }
        let (lo, hi) = CAPSULE_BUDGET_RANGE;
        if !(lo..=hi).contains(&self.memory.capsule_token_budget) {
            return Err(AgentError::config(format!(
                "memory.capsuleTokenBudget {} is outside [{lo}, {hi}]",
                self.memory.capsule_token_budget
            )));
        }
        Ok(())
    }

    /// Resolved working directory (expands `~`, falls back to cwd).
    pub fn working_dir_path(&self) -> PathBuf {
        match self.working_dir.as_deref() {
            Some(dir) if !dir.is_empty() => expand_home(dir),
            _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }
}

// ─────────────────────────────────────────────
// Local inference
// ─────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct LocalConfig {
    /// Minimum llama.cpp context; grown per call to fit prompt plus
    /// `maxTokens`.
    pub context_size: u32,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self { context_size: 8192 }
    }
}

// ─────────────────────────────────────────────
// Tools
// ─────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolsConfig {
    pub exec_timeout_secs: u64,
    /// Confine file tools and `exec` to the working directory.
    pub restrict_to_workspace: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            exec_timeout_secs: 60,
            restrict_to_workspace: false,
        }
    }
}

// ─────────────────────────────────────────────
// Memory
// ─────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoryConfig {
    /// Hard cap on stored entries; system messages are always kept.
    pub max_messages: usize,
    /// History is compacted to this estimate before each turn.
    pub history_token_budget: usize,
    pub capsule_token_budget: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_messages: 100,
            history_token_budget: 6000,
            capsule_token_budget: 160,
        }
    }
}

// ─────────────────────────────────────────────
// MCP
// ─────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct McpConfig {
    pub handshake_timeout_secs: u64,
    pub call_timeout_secs: u64,
    /// Servers connected by `Agent::new`.
    pub servers: Vec<McpServerConfig>,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_secs: 10,
            call_timeout_secs: 60,
            servers: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct McpServerConfig {
    pub name: String,
    /// Program to spawn for a stdio server.
    pub command: String,
    pub args: Vec<String>,
    /// Streamable HTTP endpoint. Mutually exclusive with `command`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

// ─────────────────────────────────────────────
// Watcher
// ─────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct WatcherConfig {
    /// Quiet period that closes a batch.
    pub debounce_ms: u64,
    /// Upper bound on how long a batch may stay open under a steady stream
    /// of events.
    pub max_latency_ms: u64,
    /// How long situation records stay readable.
    pub situation_ttl_secs: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 2000,
            max_latency_ms: 10_000,
            situation_ttl_secs: 60,
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
