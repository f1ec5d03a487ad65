//! Tool trait — the interface every agent tool implements.

use serde_json::Value;
use std::collections::HashMap;

use voxagent_core::types::ToolDefinition;

// ─────────────────────────────────────────────
// Tool trait
// ─────────────────────────────────────────────

/// Every agent tool implements this trait.
///
/// The loop discovers tools via `name()`, sends their schemas to the model
/// via `to_definition()`, and dispatches calls via `execute()`. Execution is
/// synchronous; tools that need async I/O go through
/// `voxagent_core::async_bridge`.
pub trait Tool: Send + Sync {
    /// Unique name used by the model to call this tool (e.g. `"read_file"`).
    fn name(&self) -> &str;

    /// Human-readable description shown to the model.
    fn description(&self) -> &str;

    /// JSON Schema describing the parameters.
    ///
    /// Must be `{"type": "object", "properties": {...}, "required": [...]}`.
    fn parameters(&self) -> Value;

    /// Execute the tool with the given arguments.
    ///
    /// Returns the tool output as a string (the model reads this). On
    /// failure return an `Err`; the registry wraps it as
    /// `ToolError::ExecutionFailed` and the loop turns that into an
    /// observation.
    fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String>;

    /// Description reflecting current state, used instead of
    /// [`Self::description`] when present.
    fn dynamic_description(&self) -> Option<String> {
        None
    }

    /// Build the `ToolDefinition` sent to the model.
    fn to_definition(&self) -> ToolDefinition {
        let description = self
            .dynamic_description()
            .unwrap_or_else(|| self.description().to_string());
        ToolDefinition::new(self.name(), description, self.parameters())
    }
}

// ─────────────────────────────────────────────
// Param helpers
// ─────────────────────────────────────────────

/// Convert call arguments into the map tools consume.
///
/// Non-object arguments (null, a bare string) become an empty map.
pub fn params_from_value(arguments: &Value) -> HashMap<String, Value> {
    match arguments {
        Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        _ => HashMap::new(),
    }
}

/// Extract a required `String` param, returning a model-readable error.
pub fn require_string(params: &HashMap<String, Value>, key: &str) -> anyhow::Result<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("Missing required parameter: {key}"))
}

/// Extract an optional `String` param.
pub fn optional_string(params: &HashMap<String, Value>, key: &str) -> Option<String> {
    params.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
}

/// Extract an optional integer param.
pub fn optional_i64(params: &HashMap<String, Value>, key: &str) -> Option<i64> {
    params.get(key).and_then(|v| v.as_i64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_require_string_present() {
        let mut params = HashMap::new();
        params.insert("path".into(), json!("/tmp/foo.txt"));
        assert_eq!(require_string(&params, "path").unwrap(), "/tmp/foo.txt");
    }

    #[test]
    fn test_require_string_missing() {
        let params = HashMap::new();
        assert!(require_string(&params, "path").is_err());
    }

    #[test]
    fn test_require_string_wrong_type() {
        let mut params = HashMap::new();
        params.insert("path".into(), json!(42));
        assert!(require_string(&params, "path").is_err());
    }

    #[test]
    fn test_optional_helpers() {
        let mut params = HashMap::new();
        params.insert("mode".into(), json!("list"));
        params.insert("count".into(), json!(5));
        assert_eq!(optional_string(&params, "mode"), Some("list".into()));
        assert_eq!(optional_string(&params, "other"), None);
        assert_eq!(optional_i64(&params, "count"), Some(5));
        assert_eq!(optional_i64(&params, "missing"), None);
    }

    #[test]
    fn test_params_from_value() {
        let params = params_from_value(&json!({"a": 1, "b": "x"}));
        assert_eq!(params.len(), 2);
        assert!(params_from_value(&json!("not an object")).is_empty());
        assert!(params_from_value(&Value::Null).is_empty());
    }
}
