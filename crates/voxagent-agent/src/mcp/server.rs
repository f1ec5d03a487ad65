//! MCP server mode: exposes a tool surface to other MCP clients.
//!
//! Over stdio, each line on stdin is one JSON-RPC message and each response
//! is one line on stdout. Notifications get no response. Tool failures are
//! reported as `isError` results, not JSON-RPC errors.

use std::io::{BufRead, Write};

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::protocol::{
    Implementation, IncomingRequest, IncomingToolCall, InitializeResult, JsonRpcResponse,
    ToolInfo, ToolsCallResult, ToolsListResult, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST,
    METHOD_NOT_FOUND, PARSE_ERROR, PROTOCOL_VERSION,
};
use crate::tools::registry::ToolAccess;

/// Server name advertised in `initialize` unless overridden.
pub const DEFAULT_SERVER_NAME: &str = "voice-agent";

pub(crate) fn default_info() -> Implementation {
    Implementation {
        name: DEFAULT_SERVER_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }
}

/// Answers MCP requests from a tool surface.
pub struct McpServer<'a> {
    tools: &'a dyn ToolAccess,
    info: Implementation,
}

impl<'a> McpServer<'a> {
    pub fn new(tools: &'a dyn ToolAccess) -> Self {
        Self {
            tools,
            info: default_info(),
        }
    }

    pub fn with_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.info = Implementation {
            name: name.into(),
            version: version.into(),
        };
        self
    }

    /// Handle one raw message. `None` for notifications.
    pub fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        let value: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                return Some(JsonRpcResponse::error(
                    Value::Null,
                    PARSE_ERROR,
                    format!("Parse error: {e}"),
                ))
            }
        };
        let id = value.get("id").cloned().unwrap_or(Value::Null);
        match serde_json::from_value::<IncomingRequest>(value) {
            Ok(request) => self.process(&request),
            Err(e) => Some(JsonRpcResponse::error(
                id,
                INVALID_REQUEST,
                format!("Invalid request: {e}"),
            )),
        }
    }

    /// Dispatch a parsed request. `None` for notifications.
    pub fn process(&self, request: &IncomingRequest) -> Option<JsonRpcResponse> {
        if request.is_notification() {
            debug!(method = %request.method, "MCP notification");
            return None;
        }
        let id = request.id.clone().unwrap_or(Value::Null);
        let response = match request.method.as_str() {
            "initialize" => self.initialize(id),
            "tools/list" => self.list_tools(id),
            "tools/call" => self.call_tool(id, request.params.as_ref()),
            "ping" => JsonRpcResponse::success(id, json!({})),
            other => JsonRpcResponse::error(id, METHOD_NOT_FOUND, format!("Unknown method: {other}")),
        };
        Some(response)
    }

    /// Serve stdin/stdout until EOF.
    pub fn run(&self) -> std::io::Result<()> {
        let stdin = std::io::stdin();
        let stdout = std::io::stdout();
        self.run_with(stdin.lock(), stdout.lock())
    }

    pub fn run_with<R: BufRead, W: Write>(&self, reader: R, mut writer: W) -> std::io::Result<()> {
        info!(server = %self.info.name, "MCP server listening on stdio");
        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(response) = self.handle_line(line) {
                let out = serde_json::to_string(&response)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
                writeln!(writer, "{out}")?;
                writer.flush()?;
            }
        }
        info!(server = %self.info.name, "MCP client closed stdin");
        Ok(())
    }

    fn initialize(&self, id: Value) -> JsonRpcResponse {
        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: json!({"tools": {"listChanged": false}}),
            server_info: Some(self.info.clone()),
        };
        to_response(id, &result)
    }

    fn list_tools(&self, id: Value) -> JsonRpcResponse {
        let tools = self
            .tools
            .definitions()
            .into_iter()
            .map(|d| ToolInfo {
                name: d.name,
                description: d.description,
                input_schema: d.parameters,
            })
            .collect();
        to_response(id, &ToolsListResult { tools })
    }

    fn call_tool(&self, id: Value, params: Option<&Value>) -> JsonRpcResponse {
        let Some(params) = params else {
            return JsonRpcResponse::error(id, INVALID_PARAMS, "Missing params");
        };
        let call: IncomingToolCall = match serde_json::from_value(params.clone()) {
            Ok(c) => c,
            Err(e) => return JsonRpcResponse::error(id, INVALID_PARAMS, format!("Invalid params: {e}")),
        };
        let result = match self.tools.call(&call.name, &call.arguments) {
            Ok(text) => ToolsCallResult::text_result(text, false),
            Err(e) => {
                warn!(tool = %call.name, error = %e, "MCP tool call failed");
                ToolsCallResult::text_result(e.to_string(), true)
            }
        };
        to_response(id, &result)
    }
}

fn to_response<T: serde::Serialize>(id: Value, result: &T) -> JsonRpcResponse {
    match serde_json::to_value(result) {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(e) => JsonRpcResponse::error(id, INTERNAL_ERROR, e.to_string()),
    }
}
