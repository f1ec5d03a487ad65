//! Voxagent Agent — the runtime behind the voice shell.
//!
//! This crate contains:
//! - **tools**: Tool trait, registry, filtered views, and built-in tools
//! - **skills**: named prompt bundles with optional tool subsets
//! - **capsule / updater / memory**: compressed conversation state
//! - **react**: the bounded reason/act/observe loop
//! - **mcp**: child-process tool servers bridged into the registry
//! - **watcher / situation**: debounced activity summaries and short-lived
//!   per-session activity records
//! - **agent**: the `Agent` facade tying it together

pub mod agent;
pub mod capsule;
pub mod mcp;
pub mod memory;
pub mod react;
pub mod situation;
pub mod skills;
pub mod tools;
pub mod updater;
pub mod watcher;

#[cfg(test)]
mod test_support;

pub use agent::{Agent, AgentResponse};
pub use capsule::{StateCapsule, Tone};
pub use mcp::McpBridge;
pub use memory::{ConversationMemory, MessageEntry};
pub use react::{LoopOptions, LoopOutcome};
pub use situation::{SituationMessage, SituationMessages};
pub use skills::{Skill, SkillRegistry};
pub use tools::{Tool, ToolRegistry};
pub use updater::{RuleBasedStateUpdater, StateUpdater};
pub use watcher::{EventPriority, EventRouter, EventSummary, WatcherEvent};
