//! Scripted provider shared by the loop and agent tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use voxagent_core::error::AgentError;
use voxagent_core::types::{ChatMessage, LlmResponse, ToolCall, ToolDefinition};
use voxagent_providers::LlmProvider;

/// One recorded `chat_with_tools` request.
#[derive(Clone, Debug)]
pub struct Request {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
}

/// Replays queued responses, then repeats `fallback` (or errors).
pub struct ScriptedProvider {
    queue: Mutex<VecDeque<Result<LlmResponse, AgentError>>>,
    fallback: Option<LlmResponse>,
    requests: Mutex<Vec<Request>>,
    delay: Duration,
    structured: bool,
    schemas: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<LlmResponse>) -> Self {
        Self {
            queue: Mutex::new(responses.into_iter().map(Ok).collect()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            structured: false,
            schemas: Mutex::new(Vec::new()),
        }
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Claim structured-output support; schema calls answer with the next
    /// scripted response's text.
    pub fn with_structured_output(mut self) -> Self {
        self.structured = true;
        self
    }

    /// Schema names passed to `chat_with_schema`.
    pub fn schemas(&self) -> Vec<String> {
        self.schemas.lock().unwrap().clone()
    }

    /// Always answer with `response`.
    pub fn repeating(response: LlmResponse) -> Self {
        Self {
            fallback: Some(response),
            ..Self::new(Vec::new())
        }
    }

    pub fn failing(error: AgentError) -> Self {
        let provider = Self::new(Vec::new());
        provider.queue.lock().unwrap().push_back(Err(error));
        provider
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl LlmProvider for ScriptedProvider {
    fn chat_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<LlmResponse, AgentError> {
        self.requests.lock().unwrap().push(Request {
            messages: messages.to_vec(),
            tools: tools.to_vec(),
        });
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        match self.queue.lock().unwrap().pop_front() {
            Some(next) => next,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| AgentError::provider("script exhausted")),
        }
    }

    fn chat_with_schema(
        &self,
        messages: &[ChatMessage],
        _schema: &serde_json::Value,
        name: &str,
    ) -> Result<String, AgentError> {
        self.schemas.lock().unwrap().push(name.to_string());
        self.chat(messages)
    }

    fn supports_structured_output(&self) -> bool {
        self.structured
    }

    fn display_name(&self) -> &str {
        "scripted"
    }
}

/// A response calling `name` once.
pub fn tool_call(id: &str, name: &str, arguments: serde_json::Value) -> LlmResponse {
    LlmResponse::with_tool_calls(vec![ToolCall::new(id, name, arguments)])
}
