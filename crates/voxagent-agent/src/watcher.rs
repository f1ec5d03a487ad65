//! Watcher event router — debounces activity events into short summaries.
//!
//! Hook and session events are buffered on a background thread and condensed
//! into one `Normal` summary once no new event has arrived for the debounce
//! window, or once the batch has been open for the max latency, whichever
//! comes first. User speech skips the buffer and is emitted at once as
//! `High`. Summaries are counts only: tools used, files touched, sessions
//! finished.
//!
//! Every hook or session event with activity also lands in the shared
//! [`SituationMessages`] store as a one-line record.

use std::collections::HashMap;
use std::path::Path;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use voxagent_core::error::AgentError;
use voxagent_core::utils::truncate_string;

use crate::situation::{SituationMessages, DEFAULT_SESSION};
use crate::tools::base::Tool;

/// Longest summary handed to the caller.
const MAX_SUMMARY_CHARS: usize = 500;
/// Files listed by name before the rest are counted.
const MAX_LISTED_FILES: usize = 5;
/// Session entry types that carry no activity.
const NOISE_TYPES: &[&str] = &["progress", "system", "summary", "result", "queue-operation"];

// ─────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────

/// An activity event, tagged by `source`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum WatcherEvent {
    Hook(HookEvent),
    Session(SessionEvent),
    #[serde(rename = "user")]
    UserSpeech { text: String },
}

/// A tool hook firing (`PostToolUse`, `Stop`, ...).
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct HookEvent {
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub file_path: Option<String>,
    /// Working directory of the session that fired the hook.
    #[serde(default)]
    pub session_id: Option<String>,
}

/// One entry from a session log.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct SessionEvent {
    #[serde(rename = "type", default)]
    pub entry_type: String,
    #[serde(default)]
    pub tool_uses: Vec<ToolUse>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ToolUse {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub input: Value,
}

/// Summary ordering: `High` drains before `Normal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventPriority {
    High,
    Normal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSummary {
    pub text: String,
    pub priority: EventPriority,
}

// ─────────────────────────────────────────────
// Summarizer
// ─────────────────────────────────────────────

/// Condense a batch into one line, or `None` if nothing happened.
pub fn summarize(events: &[WatcherEvent]) -> Option<String> {
    let mut tool_counts: HashMap<&str, usize> = HashMap::new();
    let mut files: Vec<String> = Vec::new();
    let mut finished = 0usize;

    let mut touch = |path: &str| {
        let name = basename(path);
        if !files.contains(&name) {
            files.push(name);
        }
    };

    for event in events {
        match event {
            WatcherEvent::Hook(hook) => {
                if hook.event == "Stop" {
                    finished += 1;
                    continue;
                }
                if let Some(tool) = hook.tool_name.as_deref() {
                    *tool_counts.entry(tool).or_default() += 1;
                }
                if let Some(path) = hook.file_path.as_deref() {
                    touch(path);
                }
            }
            WatcherEvent::Session(session) => {
                if NOISE_TYPES.contains(&session.entry_type.as_str()) {
                    continue;
                }
                for tool_use in &session.tool_uses {
                    *tool_counts.entry(tool_use.name.as_str()).or_default() += 1;
                    if let Some(path) = tool_use.input.get("file_path").and_then(Value::as_str) {
                        touch(path);
                    }
                }
            }
            WatcherEvent::UserSpeech { .. } => {}
        }
    }

    let mut parts: Vec<String> = Vec::new();

    if !tool_counts.is_empty() {
        let mut counts: Vec<(&str, usize)> = tool_counts.into_iter().collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        let listed: Vec<String> = counts.iter().map(|(n, c)| format!("{n} x{c}")).collect();
        parts.push(format!("Tools used: {}", listed.join(", ")));
    }

    if !files.is_empty() {
        let mut listed = files
            .iter()
            .take(MAX_LISTED_FILES)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        if files.len() > MAX_LISTED_FILES {
            listed.push_str(&format!(" (+{} more)", files.len() - MAX_LISTED_FILES));
        }
        parts.push(format!("Files: {listed}"));
    }

    match finished {
        0 => {}
        1 => parts.push("Session finished".to_string()),
        n => parts.push(format!("Sessions finished x{n}")),
    }

    if parts.is_empty() {
        return None;
    }
    Some(truncate_string(
        &format!("[Activity] {}", parts.join(". ")),
        MAX_SUMMARY_CHARS,
    ))
}

/// One-line situation record for `event`: `(text, source, session_id)`.
/// `None` for user speech and entries without activity.
pub fn situation_record(event: &WatcherEvent) -> Option<(String, &'static str, String)> {
    let (text, source, session) = match event {
        WatcherEvent::Hook(hook) => {
            let text = match (hook.tool_name.as_deref(), hook.file_path.as_deref()) {
                (Some(tool), Some(path)) => format!("[hook] {tool}: {}", basename(path)),
                (Some(tool), None) => format!("[hook] {tool}"),
                (None, _) if !hook.event.is_empty() => format!("[hook] {}", hook.event),
                (None, _) => return None,
            };
            (text, "hook", hook.session_id.as_deref())
        }
        WatcherEvent::Session(session) => {
            if NOISE_TYPES.contains(&session.entry_type.as_str()) || session.tool_uses.is_empty()
            {
                return None;
            }
            let mut counts: Vec<(&str, usize)> = Vec::new();
            for tool_use in &session.tool_uses {
                match counts.iter_mut().find(|(n, _)| *n == tool_use.name) {
                    Some((_, c)) => *c += 1,
                    None => counts.push((tool_use.name.as_str(), 1)),
                }
            }
            let listed: Vec<String> = counts.iter().map(|(n, c)| format!("{n} x{c}")).collect();
            let text = format!("[session] {}: {}", session.entry_type, listed.join(", "));
            (text, "session", session.session_id.as_deref())
        }
        WatcherEvent::UserSpeech { .. } => return None,
    };
    let session = session.filter(|s| !s.is_empty()).unwrap_or(DEFAULT_SESSION);
    Some((text, source, session.to_string()))
}

fn basename(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

// ─────────────────────────────────────────────
// EventRouter
// ─────────────────────────────────────────────

/// Default max latency as a multiple of the debounce window.
const DEFAULT_LATENCY_FACTOR: u32 = 5;

/// Background debouncer. Dropping the router flushes pending events and
/// joins the thread.
pub struct EventRouter {
    events: Option<Sender<WatcherEvent>>,
    summaries: Mutex<Receiver<EventSummary>>,
    situation: Arc<SituationMessages>,
    worker: Option<JoinHandle<()>>,
}

impl EventRouter {
    /// Start a router with a max latency of five debounce windows and its
    /// own situation store.
    ///
    /// # Errors
    /// If the OS refuses to spawn the thread.
    pub fn new(debounce: Duration) -> std::io::Result<Self> {
        Self::with_limits(
            debounce,
            debounce * DEFAULT_LATENCY_FACTOR,
            Arc::new(SituationMessages::default()),
        )
    }

    /// Start the router thread. A batch is flushed after `debounce` of quiet
    /// or `max_latency` after its first event, whichever is sooner.
    ///
    /// # Errors
    /// If the OS refuses to spawn the thread.
    pub fn with_limits(
        debounce: Duration,
        max_latency: Duration,
        situation: Arc<SituationMessages>,
    ) -> std::io::Result<Self> {
        let (event_tx, event_rx) = mpsc::channel::<WatcherEvent>();
        let (summary_tx, summary_rx) = mpsc::channel::<EventSummary>();
        let max_latency = max_latency.max(debounce);

        let worker = std::thread::Builder::new()
            .name("voxagent-watcher".to_string())
            .spawn(move || run(event_rx, summary_tx, debounce, max_latency))?;

        info!(
            debounce_ms = debounce.as_millis() as u64,
            max_latency_ms = max_latency.as_millis() as u64,
            "watcher router started"
        );
        Ok(Self {
            events: Some(event_tx),
            summaries: Mutex::new(summary_rx),
            situation,
            worker: Some(worker),
        })
    }

    /// The store receiving one-line records of fed events.
    pub fn situation(&self) -> Arc<SituationMessages> {
        Arc::clone(&self.situation)
    }

    pub fn feed(&self, event: WatcherEvent) {
        if let Some((text, source, session)) = situation_record(&event) {
            self.situation.push(text, source, session);
        }
        if let Some(tx) = &self.events {
            if tx.send(event).is_err() {
                warn!("watcher router stopped, event dropped");
            }
        }
    }

    /// Parse and feed one JSON event.
    ///
    /// # Errors
    /// `AgentError::Internal` if the JSON is not a watcher event.
    pub fn feed_json(&self, json: &str) -> Result<(), AgentError> {
        let event: WatcherEvent = serde_json::from_str(json)
            .map_err(|e| AgentError::Internal(format!("invalid watcher event: {e}")))?;
        self.feed(event);
        Ok(())
    }

    /// Every summary produced so far, `High` first, arrival order within a
    /// priority. Never blocks.
    pub fn drain_summaries(&self) -> Vec<EventSummary> {
        let rx = self.summaries.lock().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<EventSummary> = rx.try_iter().collect();
        out.sort_by_key(|s| s.priority);
        out
    }
}

impl Drop for EventRouter {
    fn drop(&mut self) {
        // Closing the channel makes the worker flush and exit.
        self.events.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("watcher router thread panicked");
            }
        }
    }
}

fn run(
    events: Receiver<WatcherEvent>,
    summaries: Sender<EventSummary>,
    debounce: Duration,
    max_latency: Duration,
) {
    let mut buffer: Vec<WatcherEvent> = Vec::new();
    // Set while the buffer is non-empty.
    let mut deadline: Option<Instant> = None;

    loop {
        let next = match deadline {
            None => events.recv().map_err(|_| RecvTimeoutError::Disconnected),
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    debug!(events = buffer.len(), "watcher batch hit max latency");
                    Err(RecvTimeoutError::Timeout)
                } else {
                    events.recv_timeout(debounce.min(remaining))
                }
            }
        };

        match next {
            Ok(WatcherEvent::UserSpeech { text }) => {
                debug!(chars = text.len(), "user speech bypasses debounce");
                let _ = summaries.send(EventSummary {
                    text,
                    priority: EventPriority::High,
                });
            }
            Ok(event) => {
                if buffer.is_empty() {
                    deadline = Some(Instant::now() + max_latency);
                }
                buffer.push(event);
            }
            Err(RecvTimeoutError::Timeout) => {
                flush(&mut buffer, &summaries);
                deadline = None;
            }
            Err(RecvTimeoutError::Disconnected) => {
                flush(&mut buffer, &summaries);
                break;
            }
        }
    }
    debug!("watcher router stopped");
}

fn flush(buffer: &mut Vec<WatcherEvent>, summaries: &Sender<EventSummary>) {
    if buffer.is_empty() {
        return;
    }
    let batch = std::mem::take(buffer);
    match summarize(&batch) {
        Some(text) => {
            info!(events = batch.len(), summary = %text, "watcher summary");
            let _ = summaries.send(EventSummary {
                text,
                priority: EventPriority::Normal,
            });
        }
        None => debug!(events = batch.len(), "watcher batch had no activity"),
    }
}

// ─────────────────────────────────────────────
// report_event tool
// ─────────────────────────────────────────────

/// Lets a watcher process push events through the tool interface.
pub struct ReportEventTool {
    router: Arc<EventRouter>,
}

impl ReportEventTool {
    pub fn new(router: Arc<EventRouter>) -> Self {
        Self { router }
    }
}

impl Tool for ReportEventTool {
    fn name(&self) -> &str {
        "report_event"
    }

    fn description(&self) -> &str {
        "Report an activity event (tool hook, session log entry or user speech). \
         Events are debounced and summarized automatically."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "source": {
                    "type": "string",
                    "enum": ["hook", "session", "user"],
                    "description": "Where the event came from"
                },
                "text": {
                    "type": "string",
                    "description": "Spoken text (user events)"
                },
                "event": {
                    "type": "string",
                    "description": "Hook name, e.g. 'PostToolUse' or 'Stop'"
                },
                "tool_name": {
                    "type": "string",
                    "description": "Tool that ran (hook events)"
                },
                "file_path": {
                    "type": "string",
                    "description": "File the tool touched (hook events)"
                },
                "type": {
                    "type": "string",
                    "description": "Session entry type (session events)"
                },
                "session_id": {
                    "type": "string",
                    "description": "Working directory of the reporting session"
                },
                "tool_uses": {
                    "type": "array",
                    "description": "Tool uses in the entry (session events)",
                    "items": {
                        "type": "object",
                        "properties": {
                            "name": { "type": "string" },
                            "input": { "type": "object" }
                        }
                    }
                }
            },
            "required": ["source"]
        })
    }

    fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let event: WatcherEvent = serde_json::from_value(Value::Object(params.into_iter().collect()))
            .map_err(|e| anyhow::anyhow!("Invalid event: {e}"))?;
        self.router.feed(event);
        Ok("ok".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::thread::sleep;

    fn hook(tool: &str, path: Option<&str>) -> WatcherEvent {
        WatcherEvent::Hook(HookEvent {
            event: "PostToolUse".into(),
            tool_name: Some(tool.into()),
            file_path: path.map(Into::into),
            ..Default::default()
        })
    }

    fn stop() -> WatcherEvent {
        WatcherEvent::Hook(HookEvent {
            event: "Stop".into(),
            ..Default::default()
        })
    }

    #[test]
    fn test_deserialize_sources() {
        let user: WatcherEvent =
            serde_json::from_value(json!({"source": "user", "text": "hello"})).unwrap();
        assert_eq!(user, WatcherEvent::UserSpeech { text: "hello".into() });

        let session: WatcherEvent = serde_json::from_value(json!({
            "source": "session",
            "type": "assistant",
            "tool_uses": [{"name": "Write", "input": {"file_path": "/tmp/x.rs"}}]
        }))
        .unwrap();
        match session {
            WatcherEvent::Session(s) => {
                assert_eq!(s.entry_type, "assistant");
                assert_eq!(s.tool_uses[0].name, "Write");
            }
            other => panic!("expected session event, got {other:?}"),
        }

        assert!(serde_json::from_value::<WatcherEvent>(json!({"source": "radio"})).is_err());
    }

    #[test]
    fn test_summarize_counts_tools_and_files() {
        let events = vec![
            hook("Write", Some("/home/u/project/src/main.rs")),
            hook("Write", Some("/home/u/project/src/lib.rs")),
            hook("Bash", None),
        ];
        let summary = summarize(&events).unwrap();
        assert_eq!(
            summary,
            "[Activity] Tools used: Write x2, Bash x1. Files: main.rs, lib.rs"
        );
    }

    #[test]
    fn test_summarize_session_and_stop() {
        let events = vec![
            WatcherEvent::Session(SessionEvent {
                entry_type: "assistant".into(),
                tool_uses: vec![ToolUse {
                    name: "Edit".into(),
                    input: json!({"file_path": "/tmp/foo.rs"}),
                }],
                ..Default::default()
            }),
            stop(),
        ];
        let summary = summarize(&events).unwrap();
        assert!(summary.contains("Edit x1"));
        assert!(summary.contains("foo.rs"));
        assert!(summary.ends_with("Session finished"));
    }

    #[test]
    fn test_summarize_skips_noise() {
        let events = vec![WatcherEvent::Session(SessionEvent {
            entry_type: "progress".into(),
            tool_uses: vec![ToolUse {
                name: "Edit".into(),
                input: Value::Null,
            }],
            ..Default::default()
        })];
        assert!(summarize(&events).is_none());
        assert!(summarize(&[]).is_none());
    }

    #[test]
    fn test_summarize_caps_files_and_length() {
        let events: Vec<WatcherEvent> = (0..40)
            .map(|i| {
                hook(
                    &format!("tool_with_a_rather_long_name_{i}"),
                    Some(&format!("/src/file_{i}.rs")),
                )
            })
            .collect();
        let summary = summarize(&events).unwrap();
        assert!(summary.chars().count() <= MAX_SUMMARY_CHARS);
        assert!(summary.ends_with("..."));

        let few: Vec<WatcherEvent> = (0..7)
            .map(|i| hook("Edit", Some(&format!("/src/f{i}.rs"))))
            .collect();
        assert!(summarize(&few).unwrap().contains("(+2 more)"));
    }

    #[test]
    fn test_debounce_batches_events() {
        let router = EventRouter::new(Duration::from_millis(100)).unwrap();
        router.feed(hook("Write", Some("/tmp/a.rs")));
        router.feed(hook("Edit", Some("/tmp/b.rs")));
        assert!(router.drain_summaries().is_empty());

        sleep(Duration::from_millis(400));
        let summaries = router.drain_summaries();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].priority, EventPriority::Normal);
        assert!(summaries[0].text.contains("Write x1"));
        assert!(summaries[0].text.contains("Edit x1"));
    }

    #[test]
    fn test_steady_stream_flushes_at_max_latency() {
        let router = EventRouter::with_limits(
            Duration::from_millis(100),
            Duration::from_millis(300),
            Arc::new(SituationMessages::default()),
        )
        .unwrap();

        // Events every 30 ms never leave a 100 ms gap.
        let mut seen = Vec::new();
        for _ in 0..30 {
            router.feed(hook("Edit", Some("/tmp/a.rs")));
            sleep(Duration::from_millis(30));
            seen.extend(router.drain_summaries());
        }
        assert!(!seen.is_empty(), "no summary while events kept arriving");
        assert!(seen.iter().all(|s| s.priority == EventPriority::Normal));
        assert!(seen[0].text.contains("Edit x"));
    }

    #[test]
    fn test_feed_records_situation() {
        let router = EventRouter::new(Duration::from_secs(10)).unwrap();
        let situation = router.situation();
        router
            .feed_json(
                r#"{"source": "hook", "event": "PostToolUse", "tool_name": "Write",
                    "file_path": "/work/alpha/src/main.rs", "session_id": "/work/alpha"}"#,
            )
            .unwrap();
        router
            .feed_json(
                r#"{"source": "session", "type": "assistant",
                    "tool_uses": [{"name": "Edit"}, {"name": "Edit"}, {"name": "Bash"}]}"#,
            )
            .unwrap();
        router.feed_json(r#"{"source": "user", "text": "hi"}"#).unwrap();
        router.feed_json(r#"{"source": "session", "type": "progress"}"#).unwrap();

        let records = situation.read_all();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].text, "[hook] Write: main.rs");
        assert_eq!(records[0].session_id, "/work/alpha");
        assert_eq!(records[1].text, "[session] assistant: Edit x2, Bash x1");
        assert_eq!(records[1].source, "session");
        assert_eq!(records[1].session_id, DEFAULT_SESSION);
    }

    #[test]
    fn test_situation_record_for_stop() {
        let (text, source, _) = situation_record(&stop()).unwrap();
        assert_eq!(text, "[hook] Stop");
        assert_eq!(source, "hook");
        assert!(situation_record(&WatcherEvent::Hook(HookEvent::default())).is_none());
    }

    #[test]
    fn test_user_speech_bypasses_debounce() {
        let router = EventRouter::new(Duration::from_secs(10)).unwrap();
        router.feed(hook("Write", None));
        router
            .feed_json(r#"{"source": "user", "text": "what are you doing?"}"#)
            .unwrap();

        sleep(Duration::from_millis(100));
        let summaries = router.drain_summaries();
        assert_eq!(
            summaries,
            vec![EventSummary {
                text: "what are you doing?".into(),
                priority: EventPriority::High,
            }]
        );
    }

    #[test]
    fn test_drain_orders_high_first() {
        let router = EventRouter::new(Duration::from_millis(50)).unwrap();
        router.feed(stop());
        sleep(Duration::from_millis(300));
        router.feed(WatcherEvent::UserSpeech { text: "hey".into() });
        sleep(Duration::from_millis(100));

        let summaries = router.drain_summaries();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].priority, EventPriority::High);
        assert_eq!(summaries[1].priority, EventPriority::Normal);
    }

    #[test]
    fn test_drop_flushes_pending() {
        let router = EventRouter::new(Duration::from_secs(10)).unwrap();
        router.feed(hook("Bash", None));
        drop(router);
    }

    #[test]
    fn test_feed_json_rejects_garbage() {
        let router = EventRouter::new(Duration::from_millis(50)).unwrap();
        assert!(matches!(
            router.feed_json("not json"),
            Err(AgentError::Internal(_))
        ));
    }

    #[test]
    fn test_report_event_tool() {
        let router = Arc::new(EventRouter::new(Duration::from_millis(50)).unwrap());
        let tool = ReportEventTool::new(Arc::clone(&router));
        assert_eq!(tool.name(), "report_event");

        let params: HashMap<String, Value> = serde_json::from_value(json!({
            "source": "hook",
            "event": "PostToolUse",
            "tool_name": "Write",
            "file_path": "/tmp/test.rs"
        }))
        .unwrap();
        assert_eq!(tool.execute(params).unwrap(), "ok");

        let bad: HashMap<String, Value> =
            serde_json::from_value(json!({"source": "fax"})).unwrap();
        assert!(tool.execute(bad).is_err());

        sleep(Duration::from_millis(300));
        let summaries = router.drain_summaries();
        assert_eq!(summaries.len(), 1);
        assert!(summaries[0].text.contains("Write x1"));
    }
}
