//! MCP bridge — connects tool servers and exposes their tools in the registry.
//!
//! Each server's tools are registered as one owned group (`mcp:<server>`) so
//! a connect either adds all of them or none, and a disconnect removes
//! exactly that set. Proxies resolve their server by name at call time, so
//! a tool whose server went away reports "not connected" instead of hanging.
//! Servers are reached over a child's stdio or over Streamable HTTP.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};

use voxagent_core::async_bridge::block_on_timeout;
use voxagent_core::config::McpConfig;
use voxagent_core::error::{AgentError, McpError};

use super::client::McpConnection;
use super::http::McpHttpConnection;
use super::protocol::{ToolInfo, ToolsCallResult};
use crate::tools::base::Tool;
use crate::tools::registry::ToolRegistry;

// ─────────────────────────────────────────────
// Server table
// ─────────────────────────────────────────────

enum Transport {
    Stdio(McpConnection),
    Http(McpHttpConnection),
}

impl Transport {
    async fn initialize(&mut self) -> Result<(), McpError> {
        match self {
            Transport::Stdio(c) => c.initialize().await.map(|_| ()),
            Transport::Http(c) => c.initialize().await.map(|_| ()),
        }
    }

    async fn list_tools(&mut self) -> Result<Vec<ToolInfo>, McpError> {
        match self {
            Transport::Stdio(c) => c.list_tools().await,
            Transport::Http(c) => c.list_tools().await,
        }
    }

    async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<ToolsCallResult, McpError> {
        match self {
            Transport::Stdio(c) => c.call_tool(name, arguments).await,
            Transport::Http(c) => c.call_tool(name, arguments).await,
        }
    }

    /// HTTP servers have no process to watch; they count as alive.
    fn is_alive(&mut self) -> bool {
        match self {
            Transport::Stdio(c) => c.is_alive(),
            Transport::Http(_) => true,
        }
    }

    async fn close(&mut self) {
        if let Transport::Stdio(c) = self {
            c.kill().await;
        }
    }
}

/// Where to reach a server.
enum Endpoint {
    Command { command: String, args: Vec<String> },
    Url(String),
}

/// One connected server.
struct ServerHandle {
    connection: tokio::sync::Mutex<Transport>,
    tools: Vec<ToolInfo>,
}

type ServerTable = RwLock<HashMap<String, Arc<ServerHandle>>>;

fn owner_tag(server: &str) -> String {
    format!("mcp:{server}")
}

// ─────────────────────────────────────────────
// McpBridge
// ─────────────────────────────────────────────

/// Owns the connected servers and keeps the registry in sync with them.
pub struct McpBridge {
    servers: Arc<ServerTable>,
    registry: Arc<ToolRegistry>,
    /// Serializes connect/disconnect so a reconnect is never interleaved.
    lifecycle: Mutex<()>,
    handshake_timeout: Duration,
    call_timeout: Duration,
}

impl McpBridge {
    pub fn new(registry: Arc<ToolRegistry>, config: &McpConfig) -> Self {
        Self {
            servers: Arc::new(RwLock::new(HashMap::new())),
            registry,
            lifecycle: Mutex::new(()),
            handshake_timeout: Duration::from_secs(config.handshake_timeout_secs),
            call_timeout: Duration::from_secs(config.call_timeout_secs),
        }
    }

    /// Spawn `command`, handshake, and register every tool it advertises.
    ///
    /// An existing server with the same name is disconnected first. Returns
    /// the registered tool names.
    ///
    /// # Errors
    /// `McpError` for spawn, handshake or timeout failures;
    /// `ToolError::DuplicateTool` when an advertised name is already taken
    /// (the new server is shut down and nothing is registered).
    pub fn connect(
        &self,
        name: &str,
        command: &str,
        args: &[String],
    ) -> Result<Vec<String>, AgentError> {
        let endpoint = Endpoint::Command {
            command: command.to_string(),
            args: args.to_vec(),
        };
        self.attach(name, endpoint)
    }

    /// [`Self::connect`] for a server reached over Streamable HTTP at `url`.
    pub fn connect_http(&self, name: &str, url: &str) -> Result<Vec<String>, AgentError> {
        self.attach(name, Endpoint::Url(url.to_string()))
    }

    fn attach(&self, name: &str, endpoint: Endpoint) -> Result<Vec<String>, AgentError> {
        let _guard = self.lifecycle.lock().unwrap_or_else(|e| e.into_inner());

        if self.disconnect_locked(name) {
            info!(server = name, "replacing MCP server");
        }

        let handle = Arc::new(self.handshake(name, endpoint)?);
        let tool_names: Vec<String> = handle.tools.iter().map(|t| t.name.clone()).collect();
        let proxies: Vec<Arc<dyn Tool>> = handle
            .tools
            .iter()
            .map(|info| {
                Arc::new(McpToolProxy {
                    server: name.to_string(),
                    info: info.clone(),
                    servers: Arc::clone(&self.servers),
                    timeout: self.call_timeout,
                }) as Arc<dyn Tool>
            })
            .collect();

        self.write_table().insert(name.to_string(), Arc::clone(&handle));

        if let Err(e) = self.registry.register_owned(proxies, &owner_tag(name)) {
            warn!(server = name, error = %e, "MCP tool name collision, shutting server down");
            self.write_table().remove(name);
            self.stop(name, handle);
            return Err(e.into());
        }

        info!(server = name, tools = ?tool_names, "MCP server connected");
        Ok(tool_names)
    }

    /// Unregister the server's tools and stop it. Returns `false` if no
    /// server by that name was connected.
    pub fn disconnect(&self, name: &str) -> bool {
        let _guard = self.lifecycle.lock().unwrap_or_else(|e| e.into_inner());
        self.disconnect_locked(name)
    }

    /// Disconnect every server.
    pub fn disconnect_all(&self) {
        for name in self.server_names() {
            self.disconnect(&name);
        }
    }

    /// Connected server names, sorted.
    pub fn server_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read_table().keys().cloned().collect();
        names.sort();
        names
    }

    /// Tool names a connected server advertised.
    pub fn server_tools(&self, name: &str) -> Option<Vec<String>> {
        self.read_table()
            .get(name)
            .map(|h| h.tools.iter().map(|t| t.name.clone()).collect())
    }

    /// Whether `name` is connected and its process still running. A server
    /// busy with a call counts as alive.
    pub fn is_alive(&self, name: &str) -> bool {
        let Some(handle) = self.read_table().get(name).cloned() else {
            return false;
        };
        let alive = match handle.connection.try_lock() {
            Ok(mut connection) => connection.is_alive(),
            Err(_) => true,
        };
        alive
    }

    fn disconnect_locked(&self, name: &str) -> bool {
        let Some(handle) = self.write_table().remove(name) else {
            return false;
        };
        let removed = self.registry.unregister_owner(&owner_tag(name));
        info!(server = name, tools = ?removed, "MCP server disconnected");
        self.stop(name, handle);
        true
    }

    /// Kill a stdio child. An in-flight call holds the connection lock; if
    /// it does not finish within the call timeout the child dies when the
    /// last handle drops.
    fn stop(&self, name: &str, handle: Arc<ServerHandle>) {
        let killed = block_on_timeout(self.call_timeout, async move {
            handle.connection.lock().await.close().await;
        });
        if killed.is_err() {
            warn!(server = name, "MCP server busy, deferring kill");
        }
    }

    fn handshake(&self, name: &str, endpoint: Endpoint) -> Result<ServerHandle, McpError> {
        let server = name.to_string();

        let attempt = async move {
            let mut connection = match endpoint {
                // Spawned inside the runtime so the child registers with its reactor.
                Endpoint::Command { command, args } => {
                    Transport::Stdio(McpConnection::spawn(&server, &command, &args)?)
                }
                Endpoint::Url(url) => Transport::Http(McpHttpConnection::new(&server, &url)),
            };
            connection
                .initialize()
                .await
                .map_err(|e| handshake_error(&server, e))?;
            let tools = connection
                .list_tools()
                .await
                .map_err(|e| handshake_error(&server, e))?;
            Ok::<_, McpError>(ServerHandle {
                connection: tokio::sync::Mutex::new(connection),
                tools,
            })
        };

        match block_on_timeout(self.handshake_timeout, attempt) {
            Ok(result) => result,
            Err(_) => Err(McpError::Timeout {
                server: name.to_string(),
                after: self.handshake_timeout,
            }),
        }
    }

    fn read_table(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<ServerHandle>>> {
        self.servers.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_table(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<ServerHandle>>> {
        self.servers.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for McpBridge {
    fn drop(&mut self) {
        self.disconnect_all();
    }
}

fn handshake_error(server: &str, error: McpError) -> McpError {
    match error {
        McpError::Handshake { .. } | McpError::Spawn { .. } => error,
        other => McpError::Handshake {
            server: server.to_string(),
            reason: other.to_string(),
        },
    }
}

// ─────────────────────────────────────────────
// Proxy tool
// ─────────────────────────────────────────────

/// A remote tool as seen by the registry.
struct McpToolProxy {
    server: String,
    info: ToolInfo,
    servers: Arc<ServerTable>,
    timeout: Duration,
}

impl Tool for McpToolProxy {
    fn name(&self) -> &str {
        &self.info.name
    }

    fn description(&self) -> &str {
        &self.info.description
    }

    fn parameters(&self) -> Value {
        self.info.input_schema.clone()
    }

    fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let handle = self
            .servers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&self.server)
            .cloned()
            .ok_or_else(|| McpError::NotConnected(self.server.clone()))?;

        let name = self.info.name.clone();
        let arguments = Value::Object(params.into_iter().collect());
        let result = block_on_timeout(self.timeout, async move {
            handle.connection.lock().await.call_tool(&name, arguments).await
        })
        .map_err(|_| McpError::Timeout {
            server: self.server.clone(),
            after: self.timeout,
        })??;

        if result.is_error {
            anyhow::bail!("{}", result.text());
        }
        Ok(result.text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::registry::tests::EchoTool;
    use serde_json::json;
    use voxagent_core::error::ToolError;

    // Minimal line-oriented MCP server. `$1` is the tool it advertises.
    // Arguments containing "fail" produce isError; "die" exits mid-call.
    const FAKE_SERVER: &str = r#"
tool="$1"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/^{"jsonrpc":"2.0","id":\([0-9]*\),.*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"fake","version":"0.1"}}}\n' "$id" ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","method":"notifications/message","params":{}}\n'
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"%s","description":"Fake tool","inputSchema":{"type":"object","properties":{"text":{"type":"string"}}}}]}}\n' "$id" "$tool" ;;
    *'"method":"tools/call"'*)
      case "$line" in
        *'"text":"die"'*) exit 1 ;;
        *'"text":"fail"'*)
          printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"boom"}],"isError":true}}\n' "$id" ;;
        *)
          printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"pong from %s"}]}}\n' "$id" "$tool" ;;
      esac ;;
  esac
done
"#;

    struct Fixture {
        bridge: McpBridge,
        registry: Arc<ToolRegistry>,
        script: String,
        _dir: tempfile::TempDir,
    }

    fn fixture(handshake_secs: u64) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.sh");
        std::fs::write(&path, FAKE_SERVER).unwrap();
        let registry = Arc::new(ToolRegistry::new());
        let config = McpConfig {
            handshake_timeout_secs: handshake_secs,
            call_timeout_secs: 5,
            servers: Vec::new(),
        };
        Fixture {
            script: path.to_string_lossy().into_owned(),
            _dir: dir,
            bridge: McpBridge::new(Arc::clone(&registry), &config),
            registry,
        }
    }

    fn args(script: &str, tool: &str) -> Vec<String> {
        vec![script.to_string(), tool.to_string()]
    }

    #[cfg(unix)]
    #[test]
    fn test_connect_registers_and_calls() {
        let f = fixture(5);
        let names = f.bridge.connect("fake", "sh", &args(&f.script, "ping")).unwrap();
        assert_eq!(names, vec!["ping"]);
        assert!(f.registry.has("ping"));
        assert_eq!(f.bridge.server_names(), vec!["fake"]);
        assert!(f.bridge.is_alive("fake"));
        assert!(!f.bridge.is_alive("other"));

        let defs = f.registry.get_definitions();
        assert_eq!(defs[0].description, "Fake tool");

        let out = f.registry.call("ping", &json!({"text": "hi"})).unwrap();
        assert_eq!(out, "pong from ping");
    }

    #[cfg(unix)]
    #[test]
    fn test_is_error_result_becomes_tool_error() {
        let f = fixture(5);
        f.bridge.connect("fake", "sh", &args(&f.script, "ping")).unwrap();
        let err = f.registry.call("ping", &json!({"text": "fail"})).unwrap_err();
        match err {
            ToolError::ExecutionFailed { name, reason } => {
                assert_eq!(name, "ping");
                assert!(reason.contains("boom"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_dead_server_fails_the_call() {
        let f = fixture(5);
        f.bridge.connect("fake", "sh", &args(&f.script, "ping")).unwrap();
        let err = f.registry.call("ping", &json!({"text": "die"})).unwrap_err();
        assert!(err.to_string().contains("closed"), "got: {err}");
    }

    #[cfg(unix)]
    #[test]
    fn test_reconnect_replaces_tools() {
        let f = fixture(5);
        f.bridge.connect("fake", "sh", &args(&f.script, "ping")).unwrap();
        f.bridge.connect("fake", "sh", &args(&f.script, "ping")).unwrap();
        assert_eq!(f.registry.tool_names(), vec!["ping"]);

        f.bridge.connect("fake", "sh", &args(&f.script, "pong")).unwrap();
        assert_eq!(f.registry.tool_names(), vec!["pong"]);
        assert_eq!(f.bridge.server_tools("fake"), Some(vec!["pong".to_string()]));
    }

    #[cfg(unix)]
    #[test]
    fn test_disconnect_removes_tools() {
        let f = fixture(5);
        f.registry.register(Arc::new(EchoTool("echo"))).unwrap();
        f.bridge.connect("fake", "sh", &args(&f.script, "ping")).unwrap();

        assert!(f.bridge.disconnect("fake"));
        assert_eq!(f.registry.tool_names(), vec!["echo"]);
        assert!(f.bridge.server_names().is_empty());
        assert!(!f.bridge.disconnect("fake"));
    }

    #[cfg(unix)]
    #[test]
    fn test_collision_with_builtin_fails_closed() {
        let f = fixture(5);
        f.registry.register(Arc::new(EchoTool("echo"))).unwrap();

        let err = f.bridge.connect("fake", "sh", &args(&f.script, "echo")).unwrap_err();
        assert!(matches!(err, AgentError::Tool(ToolError::DuplicateTool(ref n)) if n == "echo"));
        assert!(f.bridge.server_names().is_empty());
        assert_eq!(f.registry.call("echo", &json!({"text": "x"})).unwrap(), "Echo: x");
    }

    #[test]
    fn test_spawn_failure() {
        let f = fixture(5);
        let err = f
            .bridge
            .connect("ghost", "/nonexistent/voxagent-mcp-server", &[])
            .unwrap_err();
        assert!(matches!(err, AgentError::Mcp(McpError::Spawn { .. })));
        assert!(f.registry.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_handshake_timeout() {
        let f = fixture(1);
        let err = f
            .bridge
            .connect("slow", "sh", &["-c".to_string(), "sleep 5".to_string()])
            .unwrap_err();
        assert!(matches!(err, AgentError::Mcp(McpError::Timeout { .. })));
        assert!(f.bridge.server_names().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_server_exiting_during_handshake() {
        let f = fixture(5);
        let err = f
            .bridge
            .connect("quitter", "sh", &["-c".to_string(), "exit 0".to_string()])
            .unwrap_err();
        assert!(matches!(err, AgentError::Mcp(McpError::Handshake { .. })));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_connect_http_registers_and_calls() {
        use crate::mcp::http::McpHttpServer;
        use crate::tools::TaskTool;

        let served = Arc::new(ToolRegistry::new());
        served.register(Arc::new(TaskTool::new())).unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/mcp", listener.local_addr().unwrap());
        tokio::spawn(McpHttpServer::new(served).serve(listener));

        let f = fixture(5);
        let (names, out, alive) = tokio::task::spawn_blocking(move || {
            let names = f.bridge.connect_http("remote", &url).unwrap();
            let out = f
                .registry
                .call("tasks", &json!({"action": "create", "subject": "Chop onions"}))
                .unwrap();
            let alive = f.bridge.is_alive("remote");
            assert!(f.bridge.disconnect("remote"));
            assert!(f.registry.is_empty());
            (names, out, alive)
        })
        .await
        .unwrap();

        assert_eq!(names, vec!["tasks"]);
        assert_eq!(out, "Created task #1: Chop onions");
        assert!(alive);
    }

    #[test]
    fn test_connect_http_unreachable() {
        let f = fixture(5);
        let err = f.bridge.connect_http("nowhere", "http://127.0.0.1:9/mcp").unwrap_err();
        assert!(matches!(err, AgentError::Mcp(McpError::Handshake { .. })));
        assert!(f.bridge.server_names().is_empty());
    }

    #[test]
    fn test_proxy_without_server_reports_not_connected() {
        let proxy = McpToolProxy {
            server: "gone".into(),
            info: ToolInfo {
                name: "remote".into(),
                description: String::new(),
                input_schema: json!({"type": "object"}),
            },
            servers: Arc::new(RwLock::new(HashMap::new())),
            timeout: Duration::from_secs(1),
        };
        let err = proxy.execute(HashMap::new()).unwrap_err();
        assert!(err.to_string().contains("not connected"));
    }
}
