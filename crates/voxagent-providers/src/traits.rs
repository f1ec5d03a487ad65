//! LLM Provider trait — the single seam between the agent loop and a model.
//!
//! Two implementations exist with very different wire shapes:
//! [`RemoteProvider`](crate::remote::RemoteProvider) speaks the OpenAI
//! Responses API; [`LocalProvider`](crate::local::LocalProvider) renders a
//! chat template and decodes under a tool grammar. Both return the same
//! [`LlmResponse`].

use tracing::warn;

use voxagent_core::error::AgentError;
use voxagent_core::types::{ChatMessage, LlmResponse, ToolDefinition};

/// Trait that all LLM providers implement.
///
/// Calls are synchronous; providers that do I/O cross into async through
/// `voxagent_core::async_bridge`.
pub trait LlmProvider: Send + Sync {
    /// Send the conversation plus the available tool surface.
    ///
    /// An empty `tools` slice means the model must answer in text.
    ///
    /// # Errors
    /// `AgentError::Provider` on transport/status/parse failures,
    /// `AgentError::Config` when the request cannot be built at all.
    fn chat_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<LlmResponse, AgentError>;

    /// Tool-free completion returning only the text.
    fn chat(&self, messages: &[ChatMessage]) -> Result<String, AgentError> {
        let response = self.chat_with_tools(messages, &[])?;
        Ok(response.content.unwrap_or_default())
    }

    /// Completion constrained to the JSON `schema`, returned as raw text.
    ///
    /// Providers without structured output fall back to a plain
    /// [`Self::chat`]; check [`Self::supports_structured_output`] first.
    fn chat_with_schema(
        &self,
        messages: &[ChatMessage],
        _schema: &serde_json::Value,
        name: &str,
    ) -> Result<String, AgentError> {
        warn!(
            provider = self.display_name(),
            schema = name,
            "structured output unsupported; sending a plain chat"
        );
        self.chat(messages)
    }

    fn supports_structured_output(&self) -> bool {
        false
    }

    /// Idempotent availability check.
    fn check_available(&self) -> Result<(), AgentError> {
        Ok(())
    }

    /// Display name for logging.
    fn display_name(&self) -> &str;
}
