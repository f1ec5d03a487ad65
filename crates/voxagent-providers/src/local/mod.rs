//! In-process local provider with grammar-constrained decoding.
//!
//! Pipeline per call: flatten messages into Hermes-style turns ([`template`])
//! → let the engine format them with its chat template → build a GBNF grammar
//! from the tool schemas ([`grammar`]), armed lazily on `<tool_call>` →
//! generate through an [`InferenceEngine`] ([`engine`]) → split the output
//! into text and tool calls ([`parser`]).
//!
//! The native engine needs the `llama` cargo feature.

pub mod engine;
pub mod grammar;
pub mod parser;
pub mod template;

use tracing::{debug, info};

use voxagent_core::config::AgentConfig;
use voxagent_core::error::AgentError;
use voxagent_core::types::{ChatMessage, LlmResponse, ToolDefinition};

use crate::traits::LlmProvider;

#[cfg(feature = "llama")]
pub use engine::LlamaCppEngine;
pub use engine::{GenerationRequest, InferenceEngine};

/// Provider that runs a model inside this process.
pub struct LocalProvider {
    engine: Box<dyn InferenceEngine>,
    max_tokens: u32,
    temperature: f32,
}

impl std::fmt::Debug for LocalProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalProvider")
            .field("engine", &self.engine.name())
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl LocalProvider {
    /// Load the model named by `config.model_path` into llama.cpp.
    ///
    /// # Errors
    /// `AgentError::Config` for a missing or non-GGUF model, a build without
    /// the `llama` feature, or a model llama.cpp cannot load.
    pub fn new(config: &AgentConfig) -> Result<Self, AgentError> {
        let model_path = config
            .model_path
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(voxagent_core::utils::expand_home)
            .ok_or_else(|| AgentError::config("local provider requires modelPath"))?;

        engine::check_model_artifact(&model_path)?;
        Self::load_engine(&model_path, config)
    }

    #[cfg(feature = "llama")]
    fn load_engine(model_path: &std::path::Path, config: &AgentConfig) -> Result<Self, AgentError> {
        let engine = LlamaCppEngine::load(model_path, config.local.context_size)?;
        Ok(Self::with_engine(Box::new(engine), config))
    }

    #[cfg(not(feature = "llama"))]
    fn load_engine(model_path: &std::path::Path, _config: &AgentConfig) -> Result<Self, AgentError> {
        Err(AgentError::config(format!(
            "cannot load {}: built without llama support (enable the `llama` feature)",
            model_path.display()
        )))
    }

    /// Wrap an already constructed engine.
    pub fn with_engine(engine: Box<dyn InferenceEngine>, config: &AgentConfig) -> Self {
        info!(engine = engine.name(), "local provider ready");
        LocalProvider {
            engine,
            max_tokens: config.max_tokens,
            temperature: config.temperature as f32,
        }
    }
}

impl LlmProvider for LocalProvider {
    fn chat_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<LlmResponse, AgentError> {
        let turns = template::flatten(messages, tools)?;
        let prompt = self.engine.render_prompt(&turns)?;
        let grammar = if tools.is_empty() {
            None
        } else {
            Some(grammar::build_tool_grammar(tools)?)
        };

        debug!(
            messages = messages.len(),
            tools = tools.len(),
            prompt_chars = prompt.len(),
            "Calling local model"
        );

        let raw = self.engine.generate(&GenerationRequest {
            prompt: &prompt,
            grammar: grammar.as_deref(),
            grammar_trigger: grammar.as_ref().map(|_| parser::OPEN),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        })?;

        let raw = match raw.find(template::IM_END) {
            Some(end) => &raw[..end],
            None => raw.as_str(),
        };
        let response = parser::parse_output(raw);

        debug!(
            has_content = response.content.is_some(),
            tool_calls = response.tool_calls.len(),
            "local response parsed"
        );
        Ok(response)
    }

    fn display_name(&self) -> &str {
        self.engine.name()
    }
}
