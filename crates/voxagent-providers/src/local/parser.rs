//! Extraction of `<tool_call>` blocks from raw local-model output.

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tracing::warn;

use voxagent_core::types::{LlmResponse, ToolCall};

pub const OPEN: &str = "<tool_call>";
pub const CLOSE: &str = "</tool_call>";

static NEXT_CALL_ID: AtomicU64 = AtomicU64::new(1);

fn next_call_id() -> String {
    format!("call_local_{}", NEXT_CALL_ID.fetch_add(1, Ordering::Relaxed))
}

/// Split generated text into content and tool calls.
///
/// Text before the first block becomes content. If any block is malformed
/// the whole output is returned as plain text so nothing the model said is
/// lost.
pub fn parse_output(raw: &str) -> LlmResponse {
    let Some(first) = raw.find(OPEN) else {
        return text_only(raw);
    };

    match parse_blocks(&raw[first..]) {
        Some(calls) => {
            let preamble = raw[..first].trim();
            LlmResponse {
                content: (!preamble.is_empty()).then(|| preamble.to_string()),
                tool_calls: calls,
                ..Default::default()
            }
        }
        None => {
            warn!("malformed tool call in local output, treating as text");
            text_only(raw)
        }
    }
}

fn text_only(raw: &str) -> LlmResponse {
    let text = raw.trim();
    LlmResponse {
        content: (!text.is_empty()).then(|| text.to_string()),
        ..Default::default()
    }
}

fn parse_blocks(mut rest: &str) -> Option<Vec<ToolCall>> {
    let mut calls = Vec::new();
    while let Some(start) = rest.find(OPEN) {
        let after_open = &rest[start + OPEN.len()..];
        let end = after_open.find(CLOSE)?;
        calls.push(parse_call(after_open[..end].trim())?);
        rest = &after_open[end + CLOSE.len()..];
    }
    Some(calls)
}

fn parse_call(body: &str) -> Option<ToolCall> {
    let value: Value = serde_json::from_str(body).ok()?;
    let name = value.get("name")?.as_str()?.to_string();
    let arguments = match value.get("arguments") {
        None | Some(Value::Null) => Value::Object(Default::default()),
        // Some models emit the arguments object as a JSON-encoded string.
        Some(Value::String(encoded)) => serde_json::from_str(encoded).ok()?,
        Some(other) => other.clone(),
    };
    Some(ToolCall::new(next_call_id(), name, arguments))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_text() {
        let resp = parse_output("  The answer is 4.  ");
        assert_eq!(resp.content.as_deref(), Some("The answer is 4."));
        assert!(!resp.has_tool_calls());
    }

    #[test]
    fn test_single_call() {
        let resp = parse_output(
            "<tool_call>\n{\"name\": \"read_file\", \"arguments\": {\"path\": \"a.txt\"}}\n</tool_call>",
        );
        assert!(resp.content.is_none());
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].name, "read_file");
        assert_eq!(resp.tool_calls[0].arguments, json!({"path": "a.txt"}));
        assert!(resp.tool_calls[0].id.starts_with("call_local_"));
    }

    #[test]
    fn test_multiple_calls_get_distinct_ids() {
        let resp = parse_output(
            "Let me check.\n<tool_call>\n{\"name\": \"a\", \"arguments\": {}}\n</tool_call>\n\
             <tool_call>\n{\"name\": \"b\"}\n</tool_call>",
        );
        assert_eq!(resp.content.as_deref(), Some("Let me check."));
        assert_eq!(resp.tool_calls.len(), 2);
        assert_ne!(resp.tool_calls[0].id, resp.tool_calls[1].id);
        assert_eq!(resp.tool_calls[1].arguments, json!({}));
    }

    #[test]
    fn test_string_encoded_arguments() {
        let resp = parse_output(
            r#"<tool_call>{"name": "exec", "arguments": "{\"command\": \"ls\"}"}</tool_call>"#,
        );
        assert_eq!(resp.tool_calls[0].arguments["command"], "ls");
    }

    #[test]
    fn test_malformed_block_falls_back_to_text() {
        let raw = "<tool_call>\n{\"name\": \"exec\", \"arguments\": {\n</tool_call>";
        let resp = parse_output(raw);
        assert!(!resp.has_tool_calls());
        assert_eq!(resp.content.as_deref(), Some(raw));
    }

    #[test]
    fn test_unterminated_block_falls_back_to_text() {
        let resp = parse_output("<tool_call>{\"name\": \"exec\"}");
        assert!(!resp.has_tool_calls());
        assert!(resp.content.unwrap().contains("exec"));
    }
}
