//! MCP over Streamable HTTP.
//!
//! Every JSON-RPC message is a POST. The server answers a request with a
//! single SSE `message` event, a notification with `202 Accepted`, and
//! anything but POST with `405`. Every response carries the server's
//! `Mcp-Session-Id`, which the client echoes on later requests.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{post, MethodRouter},
    Router,
};
use serde_json::Value;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use voxagent_core::error::McpError;

use super::protocol::{
    Implementation, InitializeParams, InitializeResult, JsonRpcMessage, JsonRpcRequest,
    JsonRpcResponse, ToolInfo, ToolsCallParams, ToolsCallResult, ToolsListResult,
};
use super::server::{default_info, McpServer};
use crate::tools::registry::ToolAccess;

pub const MCP_SESSION_ID_HEADER: &str = "Mcp-Session-Id";

/// `mcp-<pid hex>-<nanos hex>`.
pub fn generate_session_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("mcp-{:x}-{:x}", std::process::id(), nanos)
}

/// Render a response as one SSE event.
pub fn format_sse_event(response: &JsonRpcResponse) -> Result<String, serde_json::Error> {
    Ok(format!("event: message\ndata: {}\n\n", serde_json::to_string(response)?))
}

/// Parse a response body that is either plain JSON or an SSE stream. For
/// SSE, the `data:` lines are joined and parsed as one message.
pub fn parse_event_stream(body: &str) -> Result<JsonRpcMessage, serde_json::Error> {
    if let Ok(message) = serde_json::from_str(body.trim()) {
        return Ok(message);
    }
    let data: Vec<&str> = body
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|d| d.strip_prefix(' ').unwrap_or(d))
        .collect();
    serde_json::from_str(&data.join("\n"))
}

// ─────────────────────────────────────────────
// Server
// ─────────────────────────────────────────────

#[derive(Clone)]
struct HttpState {
    tools: Arc<dyn ToolAccess>,
    info: Implementation,
    session_id: Arc<str>,
}

/// Serves a tool surface to HTTP MCP clients. One session per server.
pub struct McpHttpServer {
    state: HttpState,
}

impl McpHttpServer {
    pub fn new(tools: Arc<dyn ToolAccess>) -> Self {
        Self {
            state: HttpState {
                tools,
                info: default_info(),
                session_id: generate_session_id().into(),
            },
        }
    }

    pub fn with_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.state.info = Implementation {
            name: name.into(),
            version: version.into(),
        };
        self
    }

    pub fn session_id(&self) -> &str {
        &self.state.session_id
    }

    /// Routes `/` and `/mcp`.
    pub fn router(&self) -> Router {
        let endpoint = || -> MethodRouter<HttpState> { post(handle_post).fallback(method_not_allowed) };
        Router::new()
            .route("/", endpoint())
            .route("/mcp", endpoint())
            .with_state(self.state.clone())
    }

    /// Bind `addr` and serve until the task is dropped.
    pub async fn run(self, addr: &str) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        info!(
            addr = ?listener.local_addr().ok(),
            session = %self.state.session_id,
            "MCP HTTP server listening"
        );
        axum::serve(listener, self.router()).await
    }
}

async fn handle_post(State(state): State<HttpState>, body: String) -> Response {
    let session = Arc::clone(&state.session_id);
    // Tool calls block; keep them off the reactor.
    let reply = tokio::task::spawn_blocking(move || {
        McpServer::new(state.tools.as_ref())
            .with_info(state.info.name.clone(), state.info.version.clone())
            .handle_line(&body)
    })
    .await;

    match reply {
        Ok(Some(response)) => match format_sse_event(&response) {
            Ok(event) => (
                [
                    (header::CONTENT_TYPE.as_str(), "text/event-stream"),
                    (header::CACHE_CONTROL.as_str(), "no-cache"),
                    (MCP_SESSION_ID_HEADER, &*session),
                ],
                event,
            )
                .into_response(),
            Err(e) => {
                error!(error = %e, "failed to encode MCP response");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        },
        Ok(None) => (StatusCode::ACCEPTED, [(MCP_SESSION_ID_HEADER, &*session)]).into_response(),
        Err(e) => {
            error!(error = %e, "MCP request handler panicked");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(header::ALLOW, "POST")],
        "Method Not Allowed",
    )
        .into_response()
}

// ─────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────

/// A connection to one HTTP MCP server.
pub struct McpHttpConnection {
    server: String,
    url: String,
    http: reqwest::Client,
    session_id: Option<String>,
    next_id: u64,
}

impl McpHttpConnection {
    pub fn new(server: &str, url: &str) -> Self {
        Self {
            server: server.to_string(),
            url: url.to_string(),
            http: reqwest::Client::new(),
            session_id: None,
            next_id: 1,
        }
    }

    /// Session id assigned by the server, once one has been seen.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// `initialize` + `notifications/initialized`.
    pub async fn initialize(&mut self) -> Result<InitializeResult, McpError> {
        let params = serde_json::to_value(InitializeParams::voxagent())
            .map_err(|e| McpError::Protocol(e.to_string()))?;
        let result = self.request("initialize", Some(params)).await?;
        let init: InitializeResult = serde_json::from_value(result).map_err(|e| McpError::Handshake {
            server: self.server.clone(),
            reason: format!("bad initialize result: {e}"),
        })?;
        self.post(&JsonRpcRequest::notification("notifications/initialized", None))
            .await?;

        info!(
            server = %self.server,
            url = %self.url,
            server_info = ?init.server_info,
            "MCP HTTP server initialized"
        );
        Ok(init)
    }

    pub async fn list_tools(&mut self) -> Result<Vec<ToolInfo>, McpError> {
        let result = self.request("tools/list", Some(serde_json::json!({}))).await?;
        let list: ToolsListResult = serde_json::from_value(result)
            .map_err(|e| McpError::Protocol(format!("bad tools/list result: {e}")))?;
        Ok(list.tools)
    }

    pub async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<ToolsCallResult, McpError> {
        let arguments = if arguments.is_null() {
            Value::Object(Default::default())
        } else {
            arguments
        };
        let params = serde_json::to_value(ToolsCallParams { name, arguments })
            .map_err(|e| McpError::Protocol(e.to_string()))?;
        let result = self.request("tools/call", Some(params)).await?;
        serde_json::from_value(result)
            .map_err(|e| McpError::Protocol(format!("bad tools/call result: {e}")))
    }

    async fn request(&mut self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let id = self.next_id;
        self.next_id += 1;
        let body = self.post(&JsonRpcRequest::new(id, method, params)).await?;

        let message = parse_event_stream(&body)
            .map_err(|e| McpError::Protocol(format!("{method}: unreadable response: {e}")))?;
        if let Some(err) = message.error {
            return Err(McpError::Protocol(format!(
                "{method} failed ({}): {}",
                err.code, err.message
            )));
        }
        if !message.answers(id) {
            return Err(McpError::Protocol(format!("{method}: response id does not match")));
        }
        Ok(message.result.unwrap_or(Value::Null))
    }

    /// POST one message and return the body. Captures the session id.
    async fn post(&mut self, message: &JsonRpcRequest<'_>) -> Result<String, McpError> {
        let mut request = self
            .http
            .post(&self.url)
            .header(header::ACCEPT.as_str(), "text/event-stream, application/json")
            .json(message);
        if let Some(session) = &self.session_id {
            request = request.header(MCP_SESSION_ID_HEADER, session.as_str());
        }

        let response = request.send().await.map_err(|e| {
            debug!(server = %self.server, error = %e, "MCP HTTP transport error");
            McpError::Closed(self.server.clone())
        })?;
        if let Some(session) = session_header(response.headers()) {
            self.session_id = Some(session);
        }

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|_| McpError::Closed(self.server.clone()))?;
        if !status.is_success() {
            return Err(McpError::Protocol(format!(
                "HTTP {} from {}: {}",
                status.as_u16(),
                self.server,
                body.trim()
            )));
        }
        Ok(body)
    }
}

fn session_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(MCP_SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

impl std::fmt::Debug for McpHttpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpHttpConnection")
            .field("server", &self.server)
            .field("url", &self.url)
            .field("session_id", &self.session_id)
            .finish()
    }
}
