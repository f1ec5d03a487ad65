//! Tool Registry — thread-safe catalog of invocable tools.
//!
//! Names are unique: registering a taken name fails with
//! `ToolError::DuplicateTool`. Tools may carry an owner tag (e.g. `mcp:fs`)
//! so a whole group can be removed at once.
//!
//! Invocation only holds the read lock long enough to clone the tool's `Arc`;
//! the tool itself runs unlocked, so a slow tool never blocks registration.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;
use tracing::{info, warn};

use voxagent_core::error::ToolError;
use voxagent_core::types::ToolDefinition;

use super::base::{params_from_value, Tool};

// ─────────────────────────────────────────────
// Access trait
// ─────────────────────────────────────────────

/// What the ReAct loop needs from a tool surface.
pub trait ToolAccess: Send + Sync {
    /// Definitions offered to the model, sorted by name.
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Invoke `name` with JSON `arguments`.
    fn call(&self, name: &str, arguments: &Value) -> Result<String, ToolError>;
}

// ─────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────

struct RegisteredTool {
    tool: Arc<dyn Tool>,
    owner: Option<String>,
}

/// Stores tools keyed by name and dispatches calls.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, RegisteredTool>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, RegisteredTool>> {
        self.tools.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, RegisteredTool>> {
        self.tools.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a tool. Fails if the name is taken.
    pub fn register(&self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        self.insert_all(vec![tool], None)
    }

    /// Register a group of tools under `owner`, all or nothing.
    pub fn register_owned(&self, tools: Vec<Arc<dyn Tool>>, owner: &str) -> Result<(), ToolError> {
        self.insert_all(tools, Some(owner))
    }

    fn insert_all(&self, tools: Vec<Arc<dyn Tool>>, owner: Option<&str>) -> Result<(), ToolError> {
        let mut map = self.write();

        let mut seen = HashSet::new();
        for tool in &tools {
            let name = tool.name();
            if map.contains_key(name) || !seen.insert(name.to_string()) {
                warn!(tool = name, "duplicate tool registration rejected");
                return Err(ToolError::DuplicateTool(name.to_string()));
            }
        }

        for tool in tools {
            info!(tool = tool.name(), owner = owner.unwrap_or("-"), "registered tool");
            map.insert(
                tool.name().to_string(),
                RegisteredTool {
                    tool,
                    owner: owner.map(str::to_string),
                },
            );
        }
        Ok(())
    }

    /// Unregister a tool by name. Returns whether it existed.
    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.write().remove(name).is_some();
        if removed {
            info!(tool = name, "unregistered tool");
        }
        removed
    }

    /// Remove every tool registered under `owner`. Returns the removed names.
    pub fn unregister_owner(&self, owner: &str) -> Vec<String> {
        let mut map = self.write();
        let mut removed: Vec<String> = map
            .iter()
            .filter(|(_, entry)| entry.owner.as_deref() == Some(owner))
            .map(|(name, _)| name.clone())
            .collect();
        for name in &removed {
            map.remove(name);
        }
        removed.sort();
        if !removed.is_empty() {
            info!(owner = owner, count = removed.len(), "unregistered tools");
        }
        removed
    }

    /// Check if a tool is registered.
    pub fn has(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// Names of all registered tools, sorted for determinism.
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Snapshot of the definitions for all registered tools, sorted by name.
    pub fn get_definitions(&self) -> Vec<ToolDefinition> {
        let tools: Vec<Arc<dyn Tool>> = self.read().values().map(|e| e.tool.clone()).collect();
        let mut defs: Vec<ToolDefinition> = tools.iter().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Execute a tool by name.
    pub fn call(&self, name: &str, arguments: &Value) -> Result<String, ToolError> {
        let tool = self.read().get(name).map(|e| e.tool.clone());
        let Some(tool) = tool else {
            warn!(tool = name, "tool not found");
            return Err(ToolError::NotFound(name.to_string()));
        };

        tool.execute(params_from_value(arguments)).map_err(|e| {
            warn!(tool = name, error = %e, "tool execution failed");
            ToolError::failed(name, format!("{e:#}"))
        })
    }

    /// A view exposing only `allowed` tools.
    pub fn filtered<S: AsRef<str>>(&self, allowed: &[S]) -> FilteredToolRegistry<'_> {
        FilteredToolRegistry {
            inner: self,
            allowed: allowed.iter().map(|s| s.as_ref().to_string()).collect(),
        }
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

impl ToolAccess for ToolRegistry {
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.get_definitions()
    }

    fn call(&self, name: &str, arguments: &Value) -> Result<String, ToolError> {
        ToolRegistry::call(self, name, arguments)
    }
}

// ─────────────────────────────────────────────
// Filtered view
// ─────────────────────────────────────────────

/// Restricts a registry to a named subset. Anything outside it is `NotFound`.
pub struct FilteredToolRegistry<'a> {
    inner: &'a ToolRegistry,
    allowed: HashSet<String>,
}

impl ToolAccess for FilteredToolRegistry<'_> {
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.inner
            .get_definitions()
            .into_iter()
            .filter(|d| self.allowed.contains(&d.name))
            .collect()
    }

    fn call(&self, name: &str, arguments: &Value) -> Result<String, ToolError> {
        if !self.allowed.contains(name) {
            return Err(ToolError::NotFound(name.to_string()));
        }
        self.inner.call(name, arguments)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    /// Minimal test tool.
    pub(crate) struct EchoTool(pub &'static str);

    impl Tool for EchoTool {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        fn parameters(&self) -> Value {
            json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string", "description": "Text to echo" }
                },
                "required": ["text"]
            })
        }
        fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
            let text = params
                .get("text")
                .and_then(|v| v.as_str())
                .unwrap_or("(empty)");
            Ok(format!("Echo: {text}"))
        }
    }

    /// Tool that always fails.
    struct FailTool;

    impl Tool for FailTool {
        fn name(&self) -> &str {
            "fail"
        }
        fn description(&self) -> &str {
            "Always fails"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {}, "required": []})
        }
        fn execute(&self, _params: HashMap<String, Value>) -> anyhow::Result<String> {
            anyhow::bail!("intentional failure")
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool("echo"))).unwrap();
        assert!(reg.has("echo"));
        assert!(!reg.has("nope"));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool("search"))).unwrap();
        let err = reg.register(Arc::new(EchoTool("search"))).unwrap_err();
        assert_eq!(err, ToolError::DuplicateTool("search".into()));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_owned_group_is_all_or_nothing() {
        let reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool("b"))).unwrap();
        let group: Vec<Arc<dyn Tool>> = vec![Arc::new(EchoTool("a")), Arc::new(EchoTool("b"))];
        assert!(reg.register_owned(group, "mcp:x").is_err());
        assert!(!reg.has("a"));
    }

    #[test]
    fn test_unregister_owner() {
        let reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool("local"))).unwrap();
        let group: Vec<Arc<dyn Tool>> = vec![Arc::new(EchoTool("r1")), Arc::new(EchoTool("r2"))];
        reg.register_owned(group, "mcp:x").unwrap();

        assert_eq!(reg.unregister_owner("mcp:x"), vec!["r1", "r2"]);
        assert_eq!(reg.tool_names(), vec!["local"]);
        assert!(reg.unregister_owner("mcp:x").is_empty());
    }

    #[test]
    fn test_unregister() {
        let reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool("echo"))).unwrap();
        assert!(reg.unregister("echo"));
        assert!(!reg.unregister("echo"));
        assert!(reg.is_empty());
    }

    #[test]
    fn test_get_definitions_sorted() {
        let reg = ToolRegistry::new();
        reg.register(Arc::new(FailTool)).unwrap();
        reg.register(Arc::new(EchoTool("echo"))).unwrap();
        let names: Vec<String> = reg.get_definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["echo", "fail"]);
    }

    #[test]
    fn test_call_success() {
        let reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool("echo"))).unwrap();
        let result = reg.call("echo", &json!({"text": "hello"})).unwrap();
        assert_eq!(result, "Echo: hello");
    }

    #[test]
    fn test_call_not_found() {
        let reg = ToolRegistry::new();
        let err = reg.call("missing", &json!({})).unwrap_err();
        assert_eq!(err, ToolError::NotFound("missing".into()));
    }

    #[test]
    fn test_call_error_wrapped() {
        let reg = ToolRegistry::new();
        reg.register(Arc::new(FailTool)).unwrap();
        match reg.call("fail", &json!({})).unwrap_err() {
            ToolError::ExecutionFailed { name, reason } => {
                assert_eq!(name, "fail");
                assert!(reason.contains("intentional failure"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_filtered_view() {
        let reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool("echo"))).unwrap();
        reg.register(Arc::new(FailTool)).unwrap();

        let view = reg.filtered(&["echo"]);
        let defs = view.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "echo");
        assert!(view.call("echo", &json!({"text": "x"})).is_ok());
        assert_eq!(
            view.call("fail", &json!({})).unwrap_err(),
            ToolError::NotFound("fail".into())
        );

        let none = reg.filtered::<&str>(&[]);
        assert!(none.definitions().is_empty());
    }

    #[test]
    fn test_concurrent_registration_and_calls() {
        let reg = Arc::new(ToolRegistry::new());
        reg.register(Arc::new(EchoTool("echo"))).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let reg = reg.clone();
                std::thread::spawn(move || {
                    let name: &'static str = Box::leak(format!("t{i}").into_boxed_str());
                    reg.register(Arc::new(EchoTool(name))).unwrap();
                    reg.call("echo", &json!({"text": "hi"})).unwrap()
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), "Echo: hi");
        }
        assert_eq!(reg.len(), 9);
    }
}
