//! Remote provider for the OpenAI Responses API (`POST {base}/responses`).
//!
//! Conversation messages become `input` items. Tool calls made by the model in
//! earlier iterations are echoed back as `function_call` items and their
//! results as `function_call_output` items carrying the same `call_id`, which
//! is how the API pairs a result with its call.
//!
//! Chat requests are sent exactly once. Only the `GET {base}/models`
//! availability check retries.
//!
//! When `SSL_CERT_FILE` names a readable PEM bundle (or a single DER
//! certificate) its certificates are trusted in addition to the built-in
//! roots.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use voxagent_core::async_bridge::block_on;
use voxagent_core::config::AgentConfig;
use voxagent_core::error::AgentError;
use voxagent_core::types::{ChatMessage, LlmResponse, ToolCall, ToolDefinition, UsageInfo};

use crate::retry::{with_retry, RetryPolicy};
use crate::traits::LlmProvider;

// ─────────────────────────────────────────────
// Wire format
// ─────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum InputItem {
    #[serde(rename = "message")]
    Message { role: &'static str, content: String },
    #[serde(rename = "function_call")]
    FunctionCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    #[serde(rename = "function_call_output")]
    FunctionCallOutput { call_id: String, output: String },
}

#[derive(Debug, Serialize)]
struct FunctionTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    name: String,
    description: String,
    parameters: serde_json::Value,
    strict: bool,
}

#[derive(Debug, Serialize)]
struct ReasoningParam {
    effort: String,
    /// Must be set for the API to return reasoning text at all.
    summary: &'static str,
}

#[derive(Debug, Serialize)]
struct TextParam {
    format: TextFormat,
}

#[derive(Debug, Serialize)]
struct TextFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
    name: String,
    schema: serde_json::Value,
    strict: bool,
}

#[derive(Debug, Serialize)]
struct ResponsesRequest {
    model: String,
    input: Vec<InputItem>,
    max_output_tokens: u32,
    temperature: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<FunctionTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning: Option<ReasoningParam>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<TextParam>,
}

#[derive(Debug, Deserialize)]
struct ResponsesResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    output: Vec<OutputItem>,
    #[serde(default)]
    incomplete_details: Option<IncompleteDetails>,
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Debug, Deserialize)]
struct IncompleteDetails {
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(rename = "type")]
    item_type: String,
    #[serde(default)]
    content: Vec<OutputContent>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    call_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
    #[serde(default)]
    summary: Vec<OutputContent>,
}

#[derive(Debug, Deserialize)]
struct OutputContent {
    #[serde(default)]
    text: String,
}

// ─────────────────────────────────────────────
// RemoteProvider
// ─────────────────────────────────────────────

/// Provider backed by a Responses-API compatible HTTP endpoint.
pub struct RemoteProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f64,
    reasoning_effort: Option<String>,
    availability_policy: RetryPolicy,
}

impl std::fmt::Debug for RemoteProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteProvider")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl RemoteProvider {
    /// Build from config. `config.base_url` must be set.
    pub fn new(config: &AgentConfig) -> Result<Self, AgentError> {
        let base_url = config
            .base_url
            .clone()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| AgentError::config("remote provider requires baseUrl"))?;

        let mut builder =
            reqwest::Client::builder().timeout(Duration::from_secs(config.http_timeout_secs));
        if let Ok(path) = std::env::var("SSL_CERT_FILE") {
            match load_certificates(Path::new(&path)) {
                Ok(certs) => {
                    info!(path = %path, count = certs.len(), "trusting extra CA certificates");
                    for cert in certs {
                        builder = builder.add_root_certificate(cert);
                    }
                }
                Err(e) => warn!(path = %path, error = %e, "ignoring SSL_CERT_FILE"),
            }
        }
        let client = builder
            .build()
            .map_err(|e| AgentError::config(format!("failed to build HTTP client: {e}")))?;

        info!(base_url = %base_url, model = %config.model, "remote provider ready");

        Ok(RemoteProvider {
            client,
            base_url,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            reasoning_effort: config.reasoning_effort.clone().filter(|e| !e.is_empty()),
            availability_policy: RetryPolicy::default(),
        })
    }

    /// Override the backoff used by [`LlmProvider::check_available`].
    pub fn with_availability_policy(mut self, policy: RetryPolicy) -> Self {
        self.availability_policy = policy;
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    fn build_request(&self, messages: &[ChatMessage], tools: &[ToolDefinition]) -> ResponsesRequest {
        ResponsesRequest {
            model: self.model.clone(),
            input: to_input_items(messages),
            max_output_tokens: self.max_tokens,
            temperature: self.temperature,
            tools: tools
                .iter()
                .map(|t| FunctionTool {
                    tool_type: "function",
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                    strict: false,
                })
                .collect(),
            reasoning: self.reasoning_effort.as_ref().map(|effort| ReasoningParam {
                effort: effort.clone(),
                summary: "auto",
            }),
            text: None,
        }
    }

    async fn send(&self, request: &ResponsesRequest) -> Result<ResponsesResponse, AgentError> {
        let url = self.endpoint("responses");
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP request failed");
                AgentError::provider(format!("request to {url} failed: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            error!(status = %status, body = %body, "API error");
            return Err(AgentError::provider(format!("API error {status}: {body}")));
        }

        let parsed: ResponsesResponse = response.json().await.map_err(|e| {
            error!(error = %e, "Failed to parse LLM response");
            AgentError::provider(format!("failed to parse response: {e}"))
        })?;

        if parsed.status.as_deref() == Some("incomplete") {
            let reason = parsed
                .incomplete_details
                .as_ref()
                .map(|d| d.reason.as_str())
                .unwrap_or("unknown");
            return Err(AgentError::provider(format!(
                "response incomplete: {reason}"
            )));
        }

        Ok(parsed)
    }

    async fn list_models(&self) -> Result<(), AgentError> {
        let url = self.endpoint("models");
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| AgentError::provider(format!("GET {url} failed: {e}")))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(AgentError::provider(format!(
                "GET {url} returned {}",
                response.status()
            )))
        }
    }
}

impl LlmProvider for RemoteProvider {
    fn chat_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<LlmResponse, AgentError> {
        debug!(
            model = %self.model,
            messages = messages.len(),
            tools = tools.len(),
            "Calling LLM"
        );

        let request = self.build_request(messages, tools);
        let response = block_on(self.send(&request))?;
        let llm = into_llm_response(response);

        debug!(
            has_content = llm.content.is_some(),
            tool_calls = llm.tool_calls.len(),
            "LLM response received"
        );
        Ok(llm)
    }

    fn chat_with_schema(
        &self,
        messages: &[ChatMessage],
        schema: &serde_json::Value,
        name: &str,
    ) -> Result<String, AgentError> {
        debug!(model = %self.model, schema = name, "Calling LLM with structured output");
        let mut request = self.build_request(messages, &[]);
        request.text = Some(TextParam {
            format: TextFormat {
                format_type: "json_schema",
                name: name.to_string(),
                schema: schema.clone(),
                strict: true,
            },
        });
        let response = block_on(self.send(&request))?;
        Ok(into_llm_response(response).content.unwrap_or_default())
    }

    fn supports_structured_output(&self) -> bool {
        true
    }

    fn check_available(&self) -> Result<(), AgentError> {
        block_on(with_retry(&self.availability_policy, "list models", move || {
            self.list_models()
        }))
    }

    fn display_name(&self) -> &str {
        "remote"
    }
}

// ─────────────────────────────────────────────
// Conversion
// ─────────────────────────────────────────────

fn to_input_items(messages: &[ChatMessage]) -> Vec<InputItem> {
    let mut items = Vec::with_capacity(messages.len());
    for msg in messages {
        match msg {
            ChatMessage::System { content } => items.push(InputItem::Message {
                role: "system",
                content: content.clone(),
            }),
            ChatMessage::User { content } => items.push(InputItem::Message {
                role: "user",
                content: content.clone(),
            }),
            ChatMessage::Assistant {
                content,
                tool_calls,
            } => {
                if !content.is_empty() {
                    items.push(InputItem::Message {
                        role: "assistant",
                        content: content.clone(),
                    });
                }
                for call in tool_calls {
                    items.push(InputItem::FunctionCall {
                        call_id: call.id.clone(),
                        name: call.name.clone(),
                        arguments: call.arguments.to_string(),
                    });
                }
            }
            ChatMessage::Tool {
                content,
                tool_call_id,
                ..
            } => items.push(InputItem::FunctionCallOutput {
                call_id: tool_call_id.clone(),
                output: content.clone(),
            }),
        }
    }
    items
}

/// Every certificate in a PEM bundle, or the file as one DER certificate.
fn load_certificates(path: &Path) -> Result<Vec<reqwest::Certificate>, String> {
    let bytes = std::fs::read(path).map_err(|e| e.to_string())?;
    if bytes.windows(10).any(|w| w == b"-----BEGIN") {
        let certs = reqwest::Certificate::from_pem_bundle(&bytes).map_err(|e| e.to_string())?;
        if certs.is_empty() {
            return Err("no certificates in PEM bundle".to_string());
        }
        return Ok(certs);
    }
    reqwest::Certificate::from_der(&bytes)
        .map(|cert| vec![cert])
        .map_err(|e| e.to_string())
}

fn into_llm_response(response: ResponsesResponse) -> LlmResponse {
    let mut text_parts = Vec::new();
    let mut reasoning_parts = Vec::new();
    let mut summary_parts = Vec::new();
    let mut tool_calls = Vec::new();

    for item in response.output {
        match item.item_type.as_str() {
            "message" | "text" => {
                if let Some(text) = item.text {
                    text_parts.push(text);
                }
                text_parts.extend(item.content.into_iter().map(|c| c.text));
            }
            "reasoning" => {
                reasoning_parts.extend(item.content.into_iter().map(|c| c.text));
                summary_parts.extend(item.summary.into_iter().map(|c| c.text));
            }
            "function_call" => {
                let (Some(call_id), Some(name)) = (item.call_id, item.name) else {
                    continue;
                };
                let raw = item.arguments.unwrap_or_default();
                let arguments = serde_json::from_str(&raw)
                    .unwrap_or_else(|_| serde_json::Value::Object(Default::default()));
                tool_calls.push(ToolCall::new(call_id, name, arguments));
            }
            other => debug!(item_type = other, "ignoring output item"),
        }
    }

    let join = |parts: Vec<String>| {
        let parts: Vec<String> = parts.into_iter().filter(|p| !p.is_empty()).collect();
        (!parts.is_empty()).then(|| parts.join("\n"))
    };

    LlmResponse {
        content: join(text_parts),
        tool_calls,
        reasoning: join(reasoning_parts).or_else(|| join(summary_parts)),
        usage: response.usage,
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use voxagent_core::async_bridge::block_on;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> RemoteProvider {
        let mut config = AgentConfig::remote(server.uri(), "test-key-123");
        config.model = "gpt-test".into();
        config.max_tokens = 256;
        RemoteProvider::new(&config).unwrap()
    }

    fn text_response(text: &str) -> serde_json::Value {
        json!({
            "status": "completed",
            "output": [{
                "type": "message",
                "role": "assistant",
                "content": [{"type": "output_text", "text": text}]
            }],
            "usage": {"input_tokens": 12, "output_tokens": 3, "total_tokens": 15}
        })
    }

    #[test]
    fn test_requires_base_url() {
        let err = RemoteProvider::new(&AgentConfig::default()).unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
    }

    #[test]
    fn test_input_items_pair_calls_and_results() {
        let call = ToolCall::new("call_1", "read_file", json!({"path": "notes.txt"}));
        let messages = vec![
            ChatMessage::system("sys"),
            ChatMessage::user("read my notes"),
            ChatMessage::assistant_tool_calls("", vec![call.clone()]),
            ChatMessage::tool_result(&call, "hello"),
        ];
        let items = serde_json::to_value(to_input_items(&messages)).unwrap();
        assert_eq!(items.as_array().unwrap().len(), 4);
        assert_eq!(items[2]["type"], "function_call");
        assert_eq!(items[2]["call_id"], "call_1");
        assert_eq!(items[2]["arguments"], "{\"path\":\"notes.txt\"}");
        assert_eq!(items[3]["type"], "function_call_output");
        assert_eq!(items[3]["call_id"], "call_1");
        assert_eq!(items[3]["output"], "hello");
    }

    #[test]
    fn test_assistant_preamble_kept_before_calls() {
        let call = ToolCall::new("c", "exec", json!({}));
        let items = serde_json::to_value(to_input_items(&[ChatMessage::assistant_tool_calls(
            "Checking.",
            vec![call],
        )]))
        .unwrap();
        assert_eq!(items[0]["type"], "message");
        assert_eq!(items[0]["role"], "assistant");
        assert_eq!(items[1]["type"], "function_call");
    }

    #[test]
    fn test_parse_reasoning_falls_back_to_summary() {
        let response: ResponsesResponse = serde_json::from_value(json!({
            "status": "completed",
            "output": [
                {"type": "reasoning", "summary": [{"type": "summary_text", "text": "short"}]},
                {"type": "message", "content": [{"type": "output_text", "text": "Four."}]}
            ]
        }))
        .unwrap();
        let llm = into_llm_response(response);
        assert_eq!(llm.reasoning.as_deref(), Some("short"));
        assert_eq!(llm.content.as_deref(), Some("Four."));
    }

    #[test]
    fn test_chat_success() {
        let server = block_on(MockServer::start());
        block_on(
            Mock::given(method("POST"))
                .and(path("/responses"))
                .and(header("Authorization", "Bearer test-key-123"))
                .and(body_partial_json(json!({"model": "gpt-test", "max_output_tokens": 256})))
                .respond_with(ResponseTemplate::new(200).set_body_json(text_response("4")))
                .mount(&server),
        );

        let provider = provider_for(&server);
        let resp = provider
            .chat_with_tools(&[ChatMessage::user("What is 2+2?")], &[])
            .unwrap();

        assert_eq!(resp.content.as_deref(), Some("4"));
        assert!(!resp.has_tool_calls());
        assert_eq!(resp.usage.unwrap().total_tokens, 15);
    }

    #[test]
    fn test_chat_with_tool_calls() {
        let server = block_on(MockServer::start());
        block_on(
            Mock::given(method("POST"))
                .and(path("/responses"))
                .and(body_partial_json(json!({
                    "tools": [{"type": "function", "name": "web_fetch", "strict": false}]
                })))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "status": "completed",
                    "output": [{
                        "type": "function_call",
                        "call_id": "call_abc123",
                        "name": "web_fetch",
                        "arguments": "{\"url\": \"https://example.com\"}"
                    }]
                })))
                .mount(&server),
        );

        let provider = provider_for(&server);
        let tool = ToolDefinition::new(
            "web_fetch",
            "Fetch a URL",
            json!({"type": "object", "properties": {"url": {"type": "string"}}}),
        );
        let resp = provider
            .chat_with_tools(&[ChatMessage::user("fetch example.com")], &[tool])
            .unwrap();

        assert!(resp.content.is_none());
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].id, "call_abc123");
        assert_eq!(resp.tool_calls[0].arguments["url"], "https://example.com");
    }

    #[test]
    fn test_second_request_carries_call_and_result() {
        let server = block_on(MockServer::start());
        block_on(
            Mock::given(method("POST"))
                .and(path("/responses"))
                .respond_with(ResponseTemplate::new(200).set_body_json(text_response("done")))
                .mount(&server),
        );

        let provider = provider_for(&server);
        let call = ToolCall::new("call_9", "exec", json!({"command": "date"}));
        let messages = vec![
            ChatMessage::user("what time is it"),
            ChatMessage::assistant_tool_calls("", vec![call.clone()]),
            ChatMessage::tool_result(&call, "12:00"),
        ];
        provider.chat_with_tools(&messages, &[]).unwrap();

        let requests = block_on(server.received_requests()).unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        let input = body["input"].as_array().unwrap();
        let call_item = input.iter().find(|i| i["type"] == "function_call").unwrap();
        let output_item = input
            .iter()
            .find(|i| i["type"] == "function_call_output")
            .unwrap();
        assert_eq!(call_item["call_id"], "call_9");
        assert_eq!(output_item["call_id"], "call_9");
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn test_reasoning_param_sent_when_configured() {
        let server = block_on(MockServer::start());
        block_on(
            Mock::given(method("POST"))
                .and(body_partial_json(json!({"reasoning": {"effort": "low", "summary": "auto"}})))
                .respond_with(ResponseTemplate::new(200).set_body_json(text_response("ok")))
                .mount(&server),
        );

        let mut config = AgentConfig::remote(server.uri(), "k");
        config.reasoning_effort = Some("low".into());
        let provider = RemoteProvider::new(&config).unwrap();
        let resp = provider.chat_with_tools(&[ChatMessage::user("hi")], &[]).unwrap();
        assert_eq!(resp.content.as_deref(), Some("ok"));
    }

    #[test]
    fn test_chat_api_error_is_not_retried() {
        let server = block_on(MockServer::start());
        block_on(
            Mock::given(method("POST"))
                .and(path("/responses"))
                .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                    "error": {"message": "Rate limit exceeded"}
                })))
                .expect(1)
                .mount(&server),
        );

        let provider = provider_for(&server);
        let err = provider
            .chat_with_tools(&[ChatMessage::user("hi")], &[])
            .unwrap_err();
        assert!(matches!(err, AgentError::Provider(_)));
        assert!(err.to_string().contains("429"));
        block_on(server.verify());
    }

    #[test]
    fn test_incomplete_response_is_provider_error() {
        let server = block_on(MockServer::start());
        block_on(
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "status": "incomplete",
                    "incomplete_details": {"reason": "max_output_tokens"},
                    "output": []
                })))
                .mount(&server),
        );

        let err = provider_for(&server)
            .chat_with_tools(&[ChatMessage::user("hi")], &[])
            .unwrap_err();
        assert!(err.to_string().contains("max_output_tokens"));
    }

    #[test]
    fn test_chat_network_error() {
        let config = AgentConfig::remote("http://127.0.0.1:1", "key");
        let provider = RemoteProvider::new(&config).unwrap();
        let err = provider
            .chat_with_tools(&[ChatMessage::user("Hello")], &[])
            .unwrap_err();
        assert!(matches!(err, AgentError::Provider(_)));
    }

    #[test]
    fn test_check_available_retries_three_times() {
        let server = block_on(MockServer::start());
        block_on(
            Mock::given(method("GET"))
                .and(path("/models"))
                .respond_with(ResponseTemplate::new(503))
                .expect(3)
                .mount(&server),
        );

        let provider = provider_for(&server).with_availability_policy(RetryPolicy {
            max_retries: 2,
            base_delay_ms: 1,
            max_delay_ms: 2,
            backoff_multiplier: 2.0,
        });
        assert!(provider.check_available().is_err());
        block_on(server.verify());
    }

    #[test]
    fn test_chat_with_schema_sends_json_schema_format() {
        let server = block_on(MockServer::start());
        block_on(
            Mock::given(method("POST"))
                .and(path("/responses"))
                .and(body_partial_json(json!({
                    "text": {"format": {"type": "json_schema", "name": "reply", "strict": true}}
                })))
                .respond_with(ResponseTemplate::new(200).set_body_json(text_response(
                    r#"{"response": "Sure.", "keywords": ["timer"]}"#,
                )))
                .expect(1)
                .mount(&server),
        );

        let provider = provider_for(&server);
        assert!(provider.supports_structured_output());
        let schema = json!({"type": "object", "properties": {"response": {"type": "string"}}});
        let raw = provider
            .chat_with_schema(&[ChatMessage::user("set a timer")], &schema, "reply")
            .unwrap();
        assert!(raw.contains("\"keywords\""));

        let requests = block_on(server.received_requests()).unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["text"]["format"]["schema"], schema);
        assert!(body.get("tools").is_none());
        block_on(server.verify());
    }

    #[test]
    fn test_plain_chat_omits_text_format() {
        let provider = RemoteProvider::new(&AgentConfig::remote("http://x/v1", "")).unwrap();
        let body = serde_json::to_value(provider.build_request(&[ChatMessage::user("hi")], &[]))
            .unwrap();
        assert!(body.get("text").is_none());
    }

    #[test]
    fn test_load_certificates_rejects_garbage() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"not a certificate").unwrap();
        assert!(load_certificates(file.path()).is_err());
        assert!(load_certificates(Path::new("/nonexistent/ca.pem")).is_err());
    }

    #[test]
    fn test_load_certificates_empty_pem_bundle() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"-----BEGIN NOTHING-----\n").unwrap();
        assert!(load_certificates(file.path()).is_err());
    }

    #[test]
    fn test_check_available_ok() {
        let server = block_on(MockServer::start());
        block_on(
            Mock::given(method("GET"))
                .and(path("/models"))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
                .mount(&server),
        );
        assert!(provider_for(&server).check_available().is_ok());
    }
}
