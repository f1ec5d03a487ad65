//! State capsule — the compact conversation state sent ahead of the history.
//!
//! The capsule carries what the model needs to stay oriented (intent,
//! entities, goals, tone, open slots) in a bounded number of tokens. Every
//! field is capped on insertion and [`StateCapsule::enforce_budget`] sheds the
//! oldest data until the rendered fragment fits.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use voxagent_core::utils::{estimate_tokens, truncate_string};

/// Longest string kept in any capsule field.
pub const MAX_FIELD_CHARS: usize = 48;
const MAX_ENTITIES: usize = 8;
const MAX_GOALS: usize = 5;
const MAX_OPEN_SLOTS: usize = 4;

const INITIAL_INTENT: &str = "initial_greeting";

/// Conversation tone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    #[default]
    Neutral,
    Confused,
    Satisfied,
    Frustrated,
}

/// Compact, mutable conversation state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateCapsule {
    pub intent: String,
    #[serde(default)]
    pub entities: BTreeMap<String, String>,
    /// Oldest first.
    #[serde(default)]
    pub user_goals: Vec<String>,
    #[serde(default)]
    pub tone: Tone,
    #[serde(default)]
    pub open_slots: Vec<String>,
    pub confidence: f32,
}

impl Default for StateCapsule {
    fn default() -> Self {
        Self {
            intent: INITIAL_INTENT.to_string(),
            entities: BTreeMap::new(),
            user_goals: Vec::new(),
            tone: Tone::Neutral,
            open_slots: Vec::new(),
            confidence: 1.0,
        }
    }
}

impl StateCapsule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compact JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// The system-message text sent to the model.
    pub fn to_prompt_fragment(&self) -> String {
        format!("<State Capsule>\n{}\n</State Capsule>", self.to_json())
    }

    /// Estimated tokens of [`Self::to_prompt_fragment`].
    pub fn estimated_tokens(&self) -> usize {
        estimate_tokens(&self.to_prompt_fragment())
    }

    pub fn set_intent(&mut self, intent: &str) {
        self.intent = truncate_string(intent, MAX_FIELD_CHARS);
    }

    /// Insert or overwrite an entity. A new key beyond the cap evicts the
    /// first key in order.
    pub fn set_entity(&mut self, key: &str, value: &str) {
        let key = truncate_string(key, MAX_FIELD_CHARS);
        if !self.entities.contains_key(&key) && self.entities.len() >= MAX_ENTITIES {
            self.entities.pop_first();
        }
        self.entities
            .insert(key, truncate_string(value, MAX_FIELD_CHARS));
    }

    /// Append a goal (deduplicated); the oldest goal falls off past the cap.
    pub fn add_goal(&mut self, goal: &str) {
        let goal = truncate_string(goal, MAX_FIELD_CHARS);
        if self.user_goals.contains(&goal) {
            return;
        }
        self.user_goals.push(goal);
        if self.user_goals.len() > MAX_GOALS {
            self.user_goals.remove(0);
        }
    }

    pub fn remove_goal(&mut self, goal: &str) {
        self.user_goals.retain(|g| g != goal);
    }

    pub fn set_tone(&mut self, tone: Tone) {
        self.tone = tone;
    }

    pub fn add_open_slot(&mut self, slot: &str) {
        let slot = truncate_string(slot, MAX_FIELD_CHARS);
        if self.open_slots.contains(&slot) {
            return;
        }
        self.open_slots.push(slot);
        if self.open_slots.len() > MAX_OPEN_SLOTS {
            self.open_slots.remove(0);
        }
    }

    pub fn remove_open_slot(&mut self, slot: &str) {
        self.open_slots.retain(|s| s != slot);
    }

    pub fn set_confidence(&mut self, confidence: f32) {
        self.confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
    }

    /// Back to the initial state.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Shed data until the prompt fragment fits in `budget` estimated tokens.
    ///
    /// Order: oldest goals, oldest open slots, entities, then the intent is
    /// shortened. Tone and confidence always stay.
    pub fn enforce_budget(&mut self, budget: usize) {
        let before = self.estimated_tokens();
        if before <= budget {
            return;
        }

        while self.estimated_tokens() > budget {
            if !self.user_goals.is_empty() {
                self.user_goals.remove(0);
            } else if !self.open_slots.is_empty() {
                self.open_slots.remove(0);
            } else if !self.entities.is_empty() {
                self.entities.pop_first();
            } else if self.intent.chars().count() > 16 {
                self.intent = truncate_string(&self.intent, 16);
            } else {
                break;
            }
        }
        debug!(before, after = self.estimated_tokens(), budget, "state capsule trimmed");
    }
}
