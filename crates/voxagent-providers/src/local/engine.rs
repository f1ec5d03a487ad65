//! Inference engine seam and the llama.cpp backend.
//!
//! [`InferenceEngine`] turns flattened chat turns into a prompt and samples a
//! completion, optionally under a GBNF grammar. With the `llama` feature,
//! [`LlamaCppEngine`] implements it in-process on top of `llama-cpp-2`,
//! formatting prompts with the chat template embedded in the GGUF file.

use std::io::Read;
use std::path::Path;

use voxagent_core::error::AgentError;

use super::template::{self, Turn};

#[cfg(feature = "llama")]
pub use self::llama::LlamaCppEngine;

/// Magic bytes at the start of every GGUF model file.
pub const GGUF_MAGIC: &[u8; 4] = b"GGUF";

/// One generation call.
#[derive(Debug, Clone)]
pub struct GenerationRequest<'a> {
    pub prompt: &'a str,
    /// GBNF grammar; `None` means unconstrained decoding.
    pub grammar: Option<&'a str>,
    /// Text that switches the grammar on. `None` applies it from the first
    /// token.
    pub grammar_trigger: Option<&'a str>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// A text generator the local provider drives.
pub trait InferenceEngine: Send + Sync {
    /// Format `turns` as a prompt ending in an open assistant turn.
    ///
    /// Defaults to ChatML.
    fn render_prompt(&self, turns: &[Turn]) -> Result<String, AgentError> {
        Ok(template::render_turns(turns))
    }

    /// Generate a completion for `request.prompt`.
    fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, AgentError>;

    fn name(&self) -> &str;
}

/// Reject files that are not GGUF before handing them to native code.
pub fn check_model_artifact(path: &Path) -> Result<(), AgentError> {
    let mut file = std::fs::File::open(path).map_err(|e| {
        AgentError::config(format!("cannot open model {}: {e}", path.display()))
    })?;
    let mut magic = [0u8; 4];
    file.read_exact(&mut magic).map_err(|_| {
        AgentError::config(format!("malformed model artifact: {}", path.display()))
    })?;
    if &magic != GGUF_MAGIC {
        return Err(AgentError::config(format!(
            "malformed model artifact: {} is not a GGUF file",
            path.display()
        )));
    }
    Ok(())
}

// ─────────────────────────────────────────────
// llama.cpp engine
// ─────────────────────────────────────────────

#[cfg(feature = "llama")]
mod llama {
    use std::collections::HashSet;
    use std::num::NonZeroU32;
    use std::path::Path;

    use llama_cpp_2::context::params::LlamaContextParams;
    use llama_cpp_2::llama_backend::LlamaBackend;
    use llama_cpp_2::llama_batch::LlamaBatch;
    use llama_cpp_2::model::params::LlamaModelParams;
    use llama_cpp_2::model::{AddBos, LlamaChatMessage, LlamaChatTemplate, LlamaModel};
    use llama_cpp_2::sampling::LlamaSampler;
    use llama_cpp_2::token::LlamaToken;
    use tracing::{debug, info, warn};

    use voxagent_core::error::AgentError;

    use super::{GenerationRequest, InferenceEngine};
    use crate::local::parser;
    use crate::local::template::{Turn, IM_END};

    const SEED: u32 = 1234;

    /// GGUF model loaded into this process.
    pub struct LlamaCppEngine {
        backend: LlamaBackend,
        model: LlamaModel,
        /// `None` when the file carries no usable template; ChatML is used.
        template: Option<LlamaChatTemplate>,
        /// Markup tokens the tokenizer treats as special and that must be
        /// rendered back as text.
        preserved: HashSet<LlamaToken>,
        n_ctx: u32,
        name: String,
    }

    impl LlamaCppEngine {
        /// Initialise the backend and load `model_path`.
        ///
        /// # Errors
        /// `AgentError::Config` if the backend or the model fails to load.
        pub fn load(model_path: &Path, n_ctx: u32) -> Result<Self, AgentError> {
            let backend = LlamaBackend::init()
                .map_err(|e| AgentError::config(format!("failed to init llama backend: {e}")))?;
            let model =
                LlamaModel::load_from_file(&backend, model_path, &LlamaModelParams::default())
                    .map_err(|e| {
                        AgentError::config(format!(
                            "failed to load model {}: {e}",
                            model_path.display()
                        ))
                    })?;

            let template = match model.chat_template(None) {
                Ok(template) => Some(template),
                Err(e) => {
                    warn!(error = %e, "model has no chat template; using ChatML");
                    None
                }
            };

            let mut preserved = HashSet::new();
            for markup in [parser::OPEN, parser::CLOSE] {
                if let Ok(tokens) = model.str_to_token(markup, AddBos::Never) {
                    if let [token] = tokens.as_slice() {
                        preserved.insert(*token);
                    }
                }
            }

            let name = model_path
                .file_stem()
                .map(|s| format!("llama:{}", s.to_string_lossy()))
                .unwrap_or_else(|| "llama".to_string());
            info!(
                model = %model_path.display(),
                params = model.n_params(),
                n_ctx,
                n_ctx_train = model.n_ctx_train(),
                embedded_template = template.is_some(),
                "llama.cpp model loaded"
            );

            Ok(Self {
                backend,
                model,
                template,
                preserved,
                n_ctx,
                name,
            })
        }

        fn build_sampler(&self, request: &GenerationRequest<'_>) -> LlamaSampler {
            let temperature = request.temperature;
            let plain = || {
                LlamaSampler::chain_simple([
                    LlamaSampler::temp(temperature),
                    LlamaSampler::dist(SEED),
                ])
            };
            let Some(grammar) = request.grammar else {
                return plain();
            };

            if let Some(trigger) = request.grammar_trigger {
                let (patterns, tokens) = self.trigger_for(trigger);
                let lazy = LlamaSampler::grammar_lazy_patterns(
                    &self.model,
                    grammar,
                    "root",
                    &patterns,
                    &tokens,
                );
                match lazy {
                    Ok(sampler) => {
                        debug!("using lazy grammar sampler");
                        return LlamaSampler::chain_simple([
                            sampler,
                            LlamaSampler::temp(temperature),
                            LlamaSampler::dist(SEED),
                        ]);
                    }
                    Err(e) => warn!(error = %e, "lazy grammar rejected; trying strict"),
                }
            }

            match LlamaSampler::grammar(&self.model, grammar, "root") {
                Ok(sampler) => {
                    debug!("using strict grammar sampler");
                    LlamaSampler::chain_simple([
                        sampler,
                        LlamaSampler::temp(temperature),
                        LlamaSampler::dist(SEED),
                    ])
                }
                Err(e) => {
                    warn!(error = %e, "grammar rejected; decoding unconstrained");
                    plain()
                }
            }
        }

        /// A single special token triggers directly; anything else becomes a
        /// regex over the generated text.
        fn trigger_for(&self, trigger: &str) -> (Vec<String>, Vec<LlamaToken>) {
            match self.model.str_to_token(trigger, AddBos::Never) {
                Ok(tokens) if tokens.len() == 1 && self.preserved.contains(&tokens[0]) => {
                    (Vec::new(), tokens)
                }
                _ => (vec![regex::escape(trigger)], Vec::new()),
            }
        }
    }

    impl InferenceEngine for LlamaCppEngine {
        fn render_prompt(&self, turns: &[Turn]) -> Result<String, AgentError> {
            let Some(template) = &self.template else {
                return Ok(crate::local::template::render_turns(turns));
            };
            let chat = turns
                .iter()
                .map(|t| LlamaChatMessage::new(t.role.to_string(), t.content.clone()))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| AgentError::config(format!("chat template: {e}")))?;
            self.model
                .apply_chat_template(template, &chat, true)
                .map_err(|e| AgentError::config(format!("chat template: {e}")))
        }

        fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, AgentError> {
            let tokens = self
                .model
                .str_to_token(request.prompt, AddBos::Never)
                .map_err(|e| AgentError::provider(format!("tokenization failed: {e}")))?;

            let n_prompt = tokens.len() as u32;
            let n_ctx = self.n_ctx.max(n_prompt + request.max_tokens);
            let params = LlamaContextParams::default()
                .with_n_ctx(NonZeroU32::new(n_ctx))
                .with_n_batch(n_ctx);
            let mut ctx = self
                .model
                .new_context(&self.backend, params)
                .map_err(|e| AgentError::provider(format!("failed to create context: {e}")))?;

            let mut batch = LlamaBatch::new(n_ctx as usize, 1);
            let last = tokens.len().saturating_sub(1) as i32;
            for (pos, token) in (0_i32..).zip(tokens.iter().copied()) {
                batch
                    .add(token, pos, &[0], pos == last)
                    .map_err(|e| AgentError::provider(format!("batch add failed: {e}")))?;
            }
            ctx.decode(&mut batch)
                .map_err(|e| AgentError::provider(format!("prompt decode failed: {e}")))?;

            let mut sampler = self.build_sampler(request);
            let mut n_cur = batch.n_tokens();
            let limit = n_cur + request.max_tokens as i32;
            let stop = IM_END.as_bytes();
            let mut output: Vec<u8> = Vec::new();

            while n_cur < limit {
                let token = sampler.sample(&ctx, batch.n_tokens() - 1);
                if self.model.is_eog_token(token) {
                    break;
                }

                let special = self.preserved.contains(&token);
                let piece = self
                    .model
                    .token_to_piece_bytes(token, 8, special, None)
                    .or_else(|_| self.model.token_to_piece_bytes(token, 256, special, None))
                    .map_err(|e| AgentError::provider(format!("token decode failed: {e}")))?;
                output.extend_from_slice(&piece);
                if output.ends_with(stop) {
                    output.truncate(output.len() - stop.len());
                    break;
                }

                batch.clear();
                batch
                    .add(token, n_cur, &[0], true)
                    .map_err(|e| AgentError::provider(format!("batch add failed: {e}")))?;
                n_cur += 1;
                ctx.decode(&mut batch)
                    .map_err(|e| AgentError::provider(format!("decode failed: {e}")))?;
            }

            debug!(
                prompt_tokens = n_prompt,
                generated_bytes = output.len(),
                "local generation finished"
            );
            Ok(String::from_utf8_lossy(&output).into_owned())
        }

        fn name(&self) -> &str {
            &self.name
        }
    }
}
