//! Skills — named prompt bundles with an optional tool subset.
//!
//! A skill is an instruction prompt the model can look up by name. When a
//! skill lists tools, one-shot invocations of that skill only see those
//! tools; a skill with no tools runs with none.
//!
//! Registering a skill under an existing name replaces it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::{json, Value};
use tracing::info;

use crate::tools::base::{require_string, Tool};

// ─────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────

/// A registered skill.
#[derive(Clone, Debug, PartialEq)]
pub struct Skill {
    pub name: String,
    pub description: String,
    pub prompt: String,
    /// Tools this skill may use. Empty means no tools.
    pub tools: Vec<String>,
}

/// Thread-safe registry of skills.
#[derive(Debug, Default)]
pub struct SkillRegistry {
    skills: RwLock<HashMap<String, Skill>>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a prompt-only skill.
    pub fn add(&self, name: &str, description: &str, prompt: &str) {
        self.add_with_tools(name, description, prompt, Vec::new());
    }

    /// Register a skill restricted to `tools`.
    pub fn add_with_tools(&self, name: &str, description: &str, prompt: &str, tools: Vec<String>) {
        let skill = Skill {
            name: name.to_string(),
            description: description.to_string(),
            prompt: prompt.to_string(),
            tools,
        };
        let mut skills = self.skills.write().unwrap_or_else(|e| e.into_inner());
        let replaced = skills.insert(name.to_string(), skill).is_some();
        info!(skill = name, replaced, "registered skill");
    }

    /// Look up a skill by name.
    pub fn get(&self, name: &str) -> Option<Skill> {
        self.skills
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.skills.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn summary_lines(&self) -> Vec<String> {
        let skills = self.skills.read().unwrap_or_else(|e| e.into_inner());
        let mut lines: Vec<String> = skills
            .values()
            .map(|s| format!("- {}: {}", s.name, s.description))
            .collect();
        lines.sort();
        lines
    }

    /// All skills as sorted `- name: description` lines.
    pub fn list(&self) -> String {
        let lines = self.summary_lines();
        if lines.is_empty() {
            return "No skills registered.".to_string();
        }
        lines.join("\n")
    }

    /// Catalog injected into the prompt, or `None` without skills.
    pub fn catalog(&self) -> Option<String> {
        let lines = self.summary_lines();
        if lines.is_empty() {
            return None;
        }
        Some(format!(
            "Available skills (use lookup_skill tool to get full instructions):\n{}",
            lines.join("\n")
        ))
    }
}

// ─────────────────────────────────────────────
// lookup_skill tool
// ─────────────────────────────────────────────

/// Lets the model list skills or fetch one skill's instructions.
pub struct SkillLookupTool {
    registry: Arc<SkillRegistry>,
}

impl SkillLookupTool {
    pub fn new(registry: Arc<SkillRegistry>) -> Self {
        Self { registry }
    }
}

impl Tool for SkillLookupTool {
    fn name(&self) -> &str {
        "lookup_skill"
    }

    fn description(&self) -> &str {
        "Look up available skills. Use action 'list' to see all skills with descriptions, \
         or action 'get' with a skill name to retrieve its full instructions."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["list", "get"],
                    "description": "'list' all skills or 'get' one"
                },
                "name": {
                    "type": "string",
                    "description": "Skill name (required for 'get')"
                }
            },
            "required": ["action"]
        })
    }

    fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let action = require_string(&params, "action")?;
        match action.as_str() {
            "list" => Ok(self.registry.list()),
            "get" => {
                let name = require_string(&params, "name")?;
                Ok(match self.registry.get(&name) {
                    Some(skill) => format!("## Skill: {}\n\n{}", skill.name, skill.prompt),
                    None => format!("Skill '{name}' not found. Use action 'list' to see available skills."),
                })
            }
            other => anyhow::bail!("Unknown action: {other}"),
        }
    }
}
