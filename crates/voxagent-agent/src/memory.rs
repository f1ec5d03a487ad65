//! Conversation memory — ordered history plus the current state capsule.
//!
//! Backchannel acknowledgments are recorded (so turn-taking can be inspected)
//! but never reach a prompt. The capsule is prepended to every assembled
//! prompt as a system message.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use voxagent_core::types::{ChatMessage, Role};

use crate::capsule::StateCapsule;

/// Content recorded for a backchannel entry.
pub const BACKCHANNEL_MARKER: &str = "⟂";

/// Per-message overhead in the history token estimate.
const MESSAGE_OVERHEAD_TOKENS: usize = 10;

/// A history entry.
#[derive(Debug, Clone, Serialize)]
pub struct MessageEntry {
    /// Monotonic id, unique within one memory.
    pub id: u64,
    pub message: ChatMessage,
    pub is_backchannel: bool,
    pub timestamp: DateTime<Utc>,
}

impl MessageEntry {
    fn new(id: u64, message: ChatMessage, is_backchannel: bool) -> Self {
        Self {
            id,
            message,
            is_backchannel,
            timestamp: Utc::now(),
        }
    }

    fn estimated_tokens(&self) -> usize {
        self.message.content().chars().count() / 4 + MESSAGE_OVERHEAD_TOKENS
    }
}

/// Conversation history and state.
#[derive(Debug, Clone)]
pub struct ConversationMemory {
    entries: Vec<MessageEntry>,
    next_id: u64,
    max_messages: usize,
    capsule: StateCapsule,
    capsule_budget: usize,
}

impl Default for ConversationMemory {
    fn default() -> Self {
        Self::with_capacity(100)
    }
}

impl ConversationMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `max_messages` entries; system messages survive trimming.
    pub fn with_capacity(max_messages: usize) -> Self {
        Self {
            entries: Vec::new(),
            next_id: 0,
            max_messages,
            capsule: StateCapsule::default(),
            capsule_budget: 160,
        }
    }

    /// Token budget applied in [`Self::update_state_capsule`].
    pub fn with_capsule_budget(mut self, budget: usize) -> Self {
        self.capsule_budget = budget;
        self
    }

    /// Append a message and return its entry id.
    pub fn add_message(&mut self, message: ChatMessage) -> u64 {
        self.push(message, false)
    }

    /// Record that a backchannel was spoken.
    pub fn add_backchannel(&mut self) -> u64 {
        self.push(ChatMessage::assistant(BACKCHANNEL_MARKER), true)
    }

    fn push(&mut self, message: ChatMessage, is_backchannel: bool) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push(MessageEntry::new(id, message, is_backchannel));
        self.trim();
        id
    }

    /// Remove the entry with `id`. Returns false if it is already gone
    /// (trimmed, compacted or cleared).
    pub fn remove_entry(&mut self, id: u64) -> bool {
        match self.entries.iter().position(|e| e.id == id) {
            Some(i) => {
                self.entries.remove(i);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: u64) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    /// Replace the capsule, trimming it to the budget.
    pub fn update_state_capsule(&mut self, mut capsule: StateCapsule) {
        capsule.enforce_budget(self.capsule_budget);
        self.capsule = capsule;
    }

    pub fn state_capsule(&self) -> &StateCapsule {
        &self.capsule
    }

    /// Keep system messages plus the newest non-system entries.
    fn trim(&mut self) {
        if self.entries.len() <= self.max_messages {
            return;
        }
        let system_count = self
            .entries
            .iter()
            .filter(|e| e.message.role() == Role::System)
            .count();
        let keep_other = self.max_messages.saturating_sub(system_count);
        let other_count = self.entries.len() - system_count;
        let mut to_drop = other_count.saturating_sub(keep_other);
        let before = self.entries.len();

        self.entries.retain(|e| {
            if to_drop > 0 && e.message.role() != Role::System {
                to_drop -= 1;
                false
            } else {
                true
            }
        });
        debug!(dropped = before - self.entries.len(), "trimmed conversation memory");
    }

    /// Estimated tokens of the prompt-visible history.
    pub fn estimate_tokens(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| !e.is_backchannel)
            .map(MessageEntry::estimated_tokens)
            .sum()
    }

    /// Drop the oldest non-system messages until the estimate is at most
    /// `target_tokens`. Returns how many were dropped.
    pub fn compact(&mut self, target_tokens: usize) -> usize {
        let mut dropped = 0;
        while self.estimate_tokens() > target_tokens {
            let pos = self
                .entries
                .iter()
                .position(|e| !e.is_backchannel && e.message.role() != Role::System);
            match pos {
                Some(i) => {
                    self.entries.remove(i);
                    dropped += 1;
                }
                None => break,
            }
        }
        if dropped > 0 {
            debug!(dropped, target_tokens, "compacted conversation memory");
        }
        dropped
    }

    /// Prompt-visible messages (backchannels excluded).
    pub fn get_messages(&self) -> Vec<ChatMessage> {
        self.entries
            .iter()
            .filter(|e| !e.is_backchannel)
            .map(|e| e.message.clone())
            .collect()
    }

    /// Every entry including backchannels.
    pub fn entries(&self) -> &[MessageEntry] {
        &self.entries
    }

    /// Capsule system message followed by the prompt-visible history.
    pub fn assemble_prompt(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.entries.len() + 1);
        messages.push(ChatMessage::system(self.capsule.to_prompt_fragment()));
        messages.extend(self.get_messages());
        messages
    }

    /// Clear history and reset the capsule.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.capsule.clear();
    }

    /// Prompt-visible message count.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_backchannel).count()
    }

    /// All entries including backchannels. Always `>= len()`.
    pub fn total_len(&self) -> usize {
        self.entries.len()
    }

    /// True when no prompt-visible message is stored; backchannel records
    /// alone do not count.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
