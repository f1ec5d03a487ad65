//! Volatile situation messages: short-lived one-line records of what the
//! watched coding sessions are doing.
//!
//! The watcher router and `report_event` push a record per activity event;
//! the model reads them back through `read_situation_messages`. Records
//! expire after a TTL (60 s by default) and carry a `session_id`, usually
//! the session's working directory, so parallel sessions can be told apart.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use serde_json::{json, Value};

use crate::tools::base::{optional_string, Tool};

/// Session id used when an event names none.
pub const DEFAULT_SESSION: &str = "default";

#[derive(Debug, Clone)]
pub struct SituationMessage {
    pub text: String,
    pub source: String,
    pub session_id: String,
    pub timestamp: DateTime<Local>,
    created: Instant,
}

/// TTL-bounded message store. No count cap; expiry is the only eviction.
#[derive(Debug)]
pub struct SituationMessages {
    messages: Mutex<Vec<SituationMessage>>,
    ttl: Duration,
}

impl Default for SituationMessages {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl SituationMessages {
    pub fn new(ttl: Duration) -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            ttl,
        }
    }

    /// Append a record, dropping expired ones first.
    pub fn push(
        &self,
        text: impl Into<String>,
        source: impl Into<String>,
        session_id: impl Into<String>,
    ) {
        let mut messages = self.live();
        messages.push(SituationMessage {
            text: text.into(),
            source: source.into(),
            session_id: session_id.into(),
            timestamp: Local::now(),
            created: Instant::now(),
        });
    }

    /// Live records, oldest first.
    pub fn read_all(&self) -> Vec<SituationMessage> {
        self.live().clone()
    }

    pub fn read_by_session(&self, session_id: &str) -> Vec<SituationMessage> {
        self.live()
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.live().len()
    }

    /// Distinct session ids in first-seen order.
    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for message in self.live().iter() {
            if !ids.contains(&message.session_id) {
                ids.push(message.session_id.clone());
            }
        }
        ids
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Local>> {
        self.live().last().map(|m| m.timestamp)
    }

    /// Lock the store with expired records pruned.
    fn live(&self) -> MutexGuard<'_, Vec<SituationMessage>> {
        let mut messages = self.messages.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        messages.retain(|m| now.duration_since(m.created) < self.ttl);
        messages
    }
}

// ─────────────────────────────────────────────
// read_situation_messages tool
// ─────────────────────────────────────────────

const DESCRIPTION: &str = "Read recent situation messages from watched coding sessions \
     (hooks, session logs, reported events). Pass session_id (the session's working \
     directory) to read a single session.";

pub struct ReadSituationMessagesTool {
    messages: Arc<SituationMessages>,
}

impl ReadSituationMessagesTool {
    pub fn new(messages: Arc<SituationMessages>) -> Self {
        Self { messages }
    }
}

impl Tool for ReadSituationMessagesTool {
    fn name(&self) -> &str {
        "read_situation_messages"
    }

    fn description(&self) -> &str {
        DESCRIPTION
    }

    fn dynamic_description(&self) -> Option<String> {
        let count = self.messages.count();
        if count == 0 {
            return None;
        }
        let last = self
            .messages
            .last_timestamp()
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "?".to_string());
        let sessions = self.messages.session_ids();
        let sessions = if sessions.len() > 1 {
            let names: Vec<&str> = sessions.iter().map(|s| session_basename(s)).collect();
            format!(", sessions: {}", names.join(", "))
        } else {
            String::new()
        };
        Some(format!("{DESCRIPTION} [{count} message(s), last at {last}{sessions}]"))
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "session_id": {
                    "type": "string",
                    "description": "Only this session (working directory path). Omit for all sessions."
                }
            },
            "required": []
        })
    }

    fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let session = optional_string(&params, "session_id");
        let messages = match session.as_deref() {
            Some(id) => self.messages.read_by_session(id),
            None => self.messages.read_all(),
        };
        let show_session = session.is_none() && self.messages.session_ids().len() > 1;
        Ok(format_messages(&messages, show_session))
    }
}

fn format_messages(messages: &[SituationMessage], show_session: bool) -> String {
    if messages.is_empty() {
        return "No recent situation messages.".to_string();
    }
    let mut out = format!("{} situation message(s):\n", messages.len());
    for m in messages {
        let time = m.timestamp.format("%H:%M:%S");
        if show_session {
            out.push_str(&format!(
                "[{time}] ({}) [{}] {}\n",
                m.source,
                session_basename(&m.session_id),
                m.text
            ));
        } else {
            out.push_str(&format!("[{time}] ({}) {}\n", m.source, m.text));
        }
    }
    out
}

fn session_basename(session_id: &str) -> &str {
    Path::new(session_id)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(session_id)
}
