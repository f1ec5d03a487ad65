//! Agent facade — the entry points the voice shell calls.
//!
//! One `Agent` owns the provider, the tool and skill registries, conversation
//! memory, the MCP bridge and the watcher router. `step` and `chat_once` are
//! serialized by a turn lock so two turns never interleave tool calls or
//! memory writes; other callers queue behind it.
//!
//! A turn records the user message and the updated capsule before the
//! provider runs, then releases the memory lock. A backchannel arriving
//! mid-turn therefore lands after the user message and builds on the
//! updated capsule. On a provider error the user message is removed and the
//! capsule restored, unless a backchannel has changed it since.

use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use tracing::{debug, info, warn};

use voxagent_core::config::AgentConfig;
use voxagent_core::error::AgentError;
use voxagent_core::types::{ChatMessage, ToolDefinition};
use voxagent_providers::{create_provider, LlmProvider};

use crate::capsule::StateCapsule;
use crate::mcp::{McpBridge, McpHttpServer, McpServer};
use crate::memory::{ConversationMemory, MessageEntry};
use crate::react::{self, LoopOptions};
use crate::situation::{ReadSituationMessagesTool, SituationMessages};
use crate::skills::{SkillLookupTool, SkillRegistry};
use crate::tools::{
    ExecTool, FsScope, ListDirTool, ReadFileTool, TaskTool, ToolAccess, ToolRegistry,
    WebFetchTool, WriteFileTool,
};
use crate::updater::{RuleBasedStateUpdater, StateUpdater};
use crate::watcher::{EventRouter, EventSummary, ReportEventTool};

/// Instruction appended to one-shot prompts.
const ONE_SHOT_INSTRUCTION: &str =
    "Respond in 1-2 brief spoken sentences. Summarize what happened concisely.";

/// Schema name sent with keyword-extracting turns.
const KEYWORD_SCHEMA_NAME: &str = "conversation_response";

/// The result of one conversational turn.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentResponse {
    pub content: String,
    pub reasoning: Option<String>,
    /// The iteration cap was hit; `content` is the best partial answer.
    pub exhausted: bool,
    /// Terms worth biasing speech recognition towards. Only set by
    /// [`Agent::step_with_keywords`].
    pub keywords: Option<Vec<String>>,
}

impl AgentResponse {
    fn text(content: String) -> Self {
        Self {
            content,
            reasoning: None,
            exhausted: false,
            keywords: None,
        }
    }
}

/// JSON schema for a reply plus recognition keywords.
pub fn keyword_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "response": {
                "type": "string",
                "description": "Your natural language response to the user"
            },
            "keywords": {
                "type": "array",
                "description": "Important keywords from this conversation for speech recognition context (proper nouns, technical terms, domain-specific words)",
                "items": { "type": "string" },
                "maxItems": 10
            }
        },
        "required": ["response", "keywords"],
        "additionalProperties": false
    })
}

/// Split a [`keyword_schema`] reply into text and keywords. Non-string
/// keywords are skipped; a missing list reads as empty.
///
/// # Errors
/// `AgentError::Provider` if `raw` is not JSON or lacks `response`.
pub fn parse_structured_response(raw: &str) -> Result<(String, Vec<String>), AgentError> {
    let parsed: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| AgentError::provider(format!("structured reply is not JSON: {e}")))?;
    let response = parsed["response"]
        .as_str()
        .ok_or_else(|| AgentError::provider("structured reply has no 'response' field"))?
        .to_string();
    let keywords = parsed["keywords"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    Ok((response, keywords))
}

pub struct Agent {
    config: AgentConfig,
    provider: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    skills: Arc<SkillRegistry>,
    memory: Mutex<ConversationMemory>,
    updater: Box<dyn StateUpdater>,
    system_prompt: RwLock<Option<String>>,
    router: Arc<EventRouter>,
    mcp: McpBridge,
    turn: Mutex<()>,
}

impl Agent {
    /// Validate `config`, build its provider and start the runtime pieces.
    ///
    /// # Errors
    /// `AgentError::Config` for an invalid config or an unusable provider.
    pub fn new(config: AgentConfig) -> Result<Self, AgentError> {
        init_tracing();
        config.validate()?;
        let provider = create_provider(&config)?;
        Self::with_provider(config, provider)
    }

    /// Build an agent around an already constructed provider.
    ///
    /// MCP servers listed in the config are connected here; one that fails
    /// to start is logged and skipped.
    ///
    /// # Errors
    /// `AgentError::Config` for an invalid config.
    pub fn with_provider(
        config: AgentConfig,
        provider: Arc<dyn LlmProvider>,
    ) -> Result<Self, AgentError> {
        config.validate()?;
        let working_dir = config.working_dir_path();
        let restrict = config.tools.restrict_to_workspace;
        info!(
            provider = provider.display_name(),
            working_dir = %working_dir.display(),
            restrict,
            "creating agent"
        );

        let situation = Arc::new(SituationMessages::new(Duration::from_secs(
            config.watcher.situation_ttl_secs,
        )));
        let router = Arc::new(
            EventRouter::with_limits(
                Duration::from_millis(config.watcher.debounce_ms),
                Duration::from_millis(config.watcher.max_latency_ms),
                situation,
            )
            .map_err(|e| AgentError::Internal(format!("failed to start watcher: {e}")))?,
        );
        let skills = Arc::new(SkillRegistry::new());
        let tools = Arc::new(ToolRegistry::new());

        let scope = FsScope::new(working_dir.clone(), restrict);
        tools.register(Arc::new(ReadFileTool::new(scope.clone())))?;
        tools.register(Arc::new(WriteFileTool::new(scope.clone())))?;
        tools.register(Arc::new(ListDirTool::new(scope)))?;
        tools.register(Arc::new(ExecTool::new(
            working_dir,
            Duration::from_secs(config.tools.exec_timeout_secs),
            restrict,
        )))?;
        tools.register(Arc::new(WebFetchTool::new(Duration::from_secs(
            config.http_timeout_secs,
        ))))?;
        tools.register(Arc::new(TaskTool::new()))?;
        tools.register(Arc::new(SkillLookupTool::new(Arc::clone(&skills))))?;
        tools.register(Arc::new(ReportEventTool::new(Arc::clone(&router))))?;
        tools.register(Arc::new(ReadSituationMessagesTool::new(router.situation())))?;

        let mcp = McpBridge::new(Arc::clone(&tools), &config.mcp);
        for server in &config.mcp.servers {
            let connected = match server.url.as_deref().filter(|u| !u.is_empty()) {
                Some(url) => mcp.connect_http(&server.name, url),
                None => mcp.connect(&server.name, &server.command, &server.args),
            };
            if let Err(e) = connected {
                warn!(server = %server.name, error = %e, "skipping MCP server");
            }
        }

        let memory = ConversationMemory::with_capacity(config.memory.max_messages)
            .with_capsule_budget(config.memory.capsule_token_budget);
        let updater = Box::new(RuleBasedStateUpdater::new(
            config.memory.capsule_token_budget,
        ));

        info!(tools = tools.len(), "agent ready");
        Ok(Self {
            config,
            provider,
            tools,
            skills,
            memory: Mutex::new(memory),
            updater,
            system_prompt: RwLock::new(None),
            router,
            mcp,
            turn: Mutex::new(()),
        })
    }

    // ─────────────────────────────────────────────
    // Turns
    // ─────────────────────────────────────────────

    /// Run one full conversational turn for `user_input`.
    ///
    /// # Errors
    /// Provider failures. Tool failures are handled inside the loop.
    pub fn step(&self, user_input: &str) -> Result<AgentResponse, AgentError> {
        self.turn(user_input, |messages| {
            let outcome = react::run(
                self.provider.as_ref(),
                messages,
                self.tools.as_ref(),
                &self.loop_options(),
            )?;
            debug!(iterations = outcome.iterations, "loop finished");
            Ok(AgentResponse {
                content: outcome.content,
                reasoning: outcome.reasoning,
                exhausted: outcome.exhausted,
                keywords: None,
            })
        })
    }

    /// A tool-free turn that also asks the model for recognition keywords.
    ///
    /// Providers without structured output answer with plain text and no
    /// keywords. Memory is updated exactly as in [`Self::step`].
    ///
    /// # Errors
    /// Provider failures, or a structured reply without `response`.
    pub fn step_with_keywords(&self, user_input: &str) -> Result<AgentResponse, AgentError> {
        self.turn(user_input, |messages| {
            if !self.provider.supports_structured_output() {
                return Ok(AgentResponse::text(self.provider.chat(messages)?));
            }
            let raw = self
                .provider
                .chat_with_schema(messages, &keyword_schema(), KEYWORD_SCHEMA_NAME)?;
            let (content, keywords) = parse_structured_response(&raw)?;
            debug!(keywords = keywords.len(), "structured reply");
            Ok(AgentResponse {
                keywords: (!keywords.is_empty()).then_some(keywords),
                ..AgentResponse::text(content)
            })
        })
    }

    /// Shared turn bookkeeping around `run`, which gets the full prompt.
    fn turn<F>(&self, user_input: &str, run: F) -> Result<AgentResponse, AgentError>
    where
        F: FnOnce(&mut Vec<ChatMessage>) -> Result<AgentResponse, AgentError>,
    {
        let _turn = lock(&self.turn);

        let (previous, applied, pending, mut messages) = {
            let mut memory = lock(&self.memory);
            let previous = memory.state_capsule().clone();
            memory.update_state_capsule(self.updater.update(&previous, user_input));
            let applied = memory.state_capsule().clone();
            let pending = memory.add_message(ChatMessage::user(user_input));

            let mut messages = vec![ChatMessage::system(self.base_system_prompt())];
            messages.extend(memory.assemble_prompt());
            (previous, applied, pending, messages)
        };
        if let Some(catalog) = self.skills.catalog() {
            messages.push(ChatMessage::system(catalog));
        }

        debug!(
            prompt_messages = messages.len(),
            intent = %applied.intent,
            "starting turn"
        );
        let result = run(&mut messages);

        let mut memory = lock(&self.memory);
        match result {
            Ok(response) => {
                // Absent after a reset during the turn.
                if memory.contains(pending) {
                    memory.add_message(ChatMessage::assistant(response.content.clone()));
                }
                memory.compact(self.config.memory.history_token_budget);
                info!(
                    exhausted = response.exhausted,
                    history = memory.len(),
                    "turn complete"
                );
                Ok(response)
            }
            Err(e) => {
                memory.remove_entry(pending);
                if memory.state_capsule() == &applied {
                    memory.update_state_capsule(previous);
                }
                warn!(error = %e, "turn failed, user message rolled back");
                Err(e)
            }
        }
    }

    /// One-shot call outside the conversation.
    ///
    /// With a skill, its prompt is added and only its tools are visible (none
    /// if it lists none). Without one, no tools are offered. Memory is not
    /// read or written.
    ///
    /// # Errors
    /// `AgentError::SkillNotFound` for an unknown skill, or provider failures.
    pub fn chat_once(&self, input: &str, skill_name: Option<&str>) -> Result<String, AgentError> {
        let _turn = lock(&self.turn);

        let skill = match skill_name {
            Some(name) => Some(
                self.skills
                    .get(name)
                    .ok_or_else(|| AgentError::SkillNotFound(name.to_string()))?,
            ),
            None => None,
        };

        let mut messages = vec![ChatMessage::system(self.base_system_prompt())];
        if let Some(skill) = &skill {
            messages.push(ChatMessage::system(format!(
                "## Skill: {}\n\n{}",
                skill.name, skill.prompt
            )));
        }
        messages.push(ChatMessage::system(ONE_SHOT_INSTRUCTION));
        messages.push(ChatMessage::user(input));

        let allowed: &[String] = skill.as_ref().map(|s| s.tools.as_slice()).unwrap_or(&[]);
        let tools = self.tools.filtered(allowed);
        debug!(skill = ?skill_name, tools = allowed.len(), "one-shot call");

        let outcome = react::run(
            self.provider.as_ref(),
            &mut messages,
            &tools,
            &self.loop_options(),
        )?;
        Ok(outcome.content)
    }

    /// Decide whether a pause after `partial` deserves a short acknowledgment.
    ///
    /// On `Some`, the capsule absorbs the utterance and a backchannel marker
    /// is recorded. No model call is made.
    pub fn process_backchannel(&self, partial: &str, pause_ms: u64) -> Option<String> {
        let ack = self.updater.should_backchannel(partial, pause_ms)?;

        let mut memory = lock(&self.memory);
        let capsule = self.updater.update(memory.state_capsule(), partial);
        memory.update_state_capsule(capsule);
        memory.add_backchannel();

        debug!(ack = %ack, pause_ms, "backchannel");
        Some(ack)
    }

    // ─────────────────────────────────────────────
    // Watcher
    // ─────────────────────────────────────────────

    /// Queue one JSON watcher event.
    ///
    /// # Errors
    /// If `json` is not a watcher event.
    pub fn feed_watcher_event(&self, json: &str) -> Result<(), AgentError> {
        self.router.feed_json(json)
    }

    /// Summaries ready so far, high priority first.
    pub fn drain_watcher_summaries(&self) -> Vec<EventSummary> {
        self.router.drain_summaries()
    }

    /// Short-lived per-session activity records.
    pub fn situation(&self) -> Arc<SituationMessages> {
        self.router.situation()
    }

    // ─────────────────────────────────────────────
    // MCP server mode
    // ─────────────────────────────────────────────

    /// Serve this agent's tools over stdio until stdin closes.
    ///
    /// # Errors
    /// I/O failures on stdin/stdout.
    pub fn serve_mcp_stdio(&self) -> std::io::Result<()> {
        McpServer::new(self.tools.as_ref()).run()
    }

    /// Serve this agent's tools over Streamable HTTP on `addr`. Blocks
    /// until the listener fails.
    ///
    /// # Errors
    /// Bind or accept failures.
    pub fn serve_mcp_http(&self, addr: &str) -> std::io::Result<()> {
        let server = McpHttpServer::new(Arc::clone(&self.tools) as Arc<dyn ToolAccess>);
        voxagent_core::async_bridge::block_on(server.run(addr))
    }

    // ─────────────────────────────────────────────
    // Skills & MCP
    // ─────────────────────────────────────────────

    pub fn add_skill(&self, name: &str, description: &str, prompt: &str) {
        self.skills.add(name, description, prompt);
    }

    pub fn add_skill_with_tools(&self, name: &str, description: &str, prompt: &str, tools: Vec<String>) {
        self.skills.add_with_tools(name, description, prompt, tools);
    }

    /// Connect an MCP server and register its tools. Returns their names.
    ///
    /// # Errors
    /// See [`McpBridge::connect`].
    pub fn add_mcp_server(
        &self,
        name: &str,
        command: &str,
        args: &[String],
    ) -> Result<Vec<String>, AgentError> {
        self.mcp.connect(name, command, args)
    }

    pub fn remove_mcp_server(&self, name: &str) -> bool {
        self.mcp.disconnect(name)
    }

    /// [`Self::add_mcp_server`] for a Streamable HTTP server at `url`.
    ///
    /// # Errors
    /// See [`McpBridge::connect_http`].
    pub fn add_mcp_http_server(&self, name: &str, url: &str) -> Result<Vec<String>, AgentError> {
        self.mcp.connect_http(name, url)
    }

    pub fn mcp_servers(&self) -> Vec<String> {
        self.mcp.server_names()
    }

    pub fn mcp_server_alive(&self, name: &str) -> bool {
        self.mcp.is_alive(name)
    }

    // ─────────────────────────────────────────────
    // State
    // ─────────────────────────────────────────────

    /// Clear history and the capsule. Tools and skills are kept.
    pub fn reset(&self) {
        lock(&self.memory).clear();
        info!("conversation reset");
    }

    /// Prompt-visible history as a JSON array.
    pub fn get_conversation_history(&self) -> String {
        let messages = lock(&self.memory).get_messages();
        serde_json::to_string_pretty(&messages).unwrap_or_else(|_| "[]".to_string())
    }

    /// Replace the default system prompt.
    pub fn set_system_prompt(&self, prompt: &str) {
        *self.system_prompt.write().unwrap_or_else(|e| e.into_inner()) = Some(prompt.to_string());
        info!(chars = prompt.len(), "system prompt set");
    }

    pub fn state_capsule(&self) -> StateCapsule {
        lock(&self.memory).state_capsule().clone()
    }

    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools.definitions()
    }

    pub fn provider_name(&self) -> &str {
        self.provider.display_name()
    }

    /// Check that the provider is reachable.
    ///
    /// # Errors
    /// Whatever the provider's availability check reports.
    pub fn check_available(&self) -> Result<(), AgentError> {
        self.provider.check_available()
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Every memory entry, backchannel records included.
    pub fn memory_entries(&self) -> Vec<MessageEntry> {
        lock(&self.memory).entries().to_vec()
    }

    fn base_system_prompt(&self) -> String {
        match self
            .system_prompt
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_deref()
        {
            Some(prompt) => prompt.to_string(),
            None => format!(
                "You are a helpful voice assistant. Answers are spoken aloud, so keep \
                 them short and avoid markdown. Reply in the user's language (default: {}).",
                self.config.language
            ),
        }
    }

    fn loop_options(&self) -> LoopOptions {
        LoopOptions {
            max_iterations: self.config.max_iterations as usize,
            harmony: self.config.use_harmony,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Install a stderr subscriber honouring `RUST_LOG`; a no-op if the host
/// already installed one.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
