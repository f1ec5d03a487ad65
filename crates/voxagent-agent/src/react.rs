//! ReAct loop — reason, act, observe until a final answer or the cap.
//!
//! Each iteration sends the transcript plus tool definitions to the provider.
//! A response without tool calls is the final answer. Otherwise the calls run
//! in emission order, every observation is appended, and the loop goes again.
//! Tool failures become observations; provider failures end the turn.

use tracing::{debug, info, warn};

use voxagent_core::error::AgentError;
use voxagent_core::types::{ChatMessage, ToolCall, UsageInfo};
use voxagent_providers::harmony;
use voxagent_providers::LlmProvider;

use crate::tools::registry::ToolAccess;

/// Content returned when the cap is hit before any text was produced.
pub const EXHAUSTED_FALLBACK: &str =
    "I wasn't able to finish that within the allowed number of steps.";

/// Loop settings.
#[derive(Clone, Copy, Debug)]
pub struct LoopOptions {
    pub max_iterations: usize,
    /// Split Harmony channels out of every response before inspecting it.
    pub harmony: bool,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            harmony: false,
        }
    }
}

/// Result of one loop run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LoopOutcome {
    pub content: String,
    pub reasoning: Option<String>,
    /// The cap was reached without a final answer.
    pub exhausted: bool,
    pub iterations: usize,
    pub usage: UsageInfo,
}

/// Drive `provider` against `tools`, appending to `messages` as it goes.
///
/// # Errors
/// Whatever the provider returns; tool errors never surface here.
pub fn run(
    provider: &dyn LlmProvider,
    messages: &mut Vec<ChatMessage>,
    tools: &dyn ToolAccess,
    options: &LoopOptions,
) -> Result<LoopOutcome, AgentError> {
    let tool_defs = tools.definitions();
    let mut usage = UsageInfo::default();
    let mut reasoning: Vec<String> = Vec::new();
    let mut partial: Option<String> = None;

    for iteration in 1..=options.max_iterations {
        debug!(
            iteration,
            max = options.max_iterations,
            provider = provider.display_name(),
            "LLM call"
        );

        let mut response = provider.chat_with_tools(messages, &tool_defs)?;
        if options.harmony {
            harmony::apply(&mut response);
        }
        if let Some(u) = &response.usage {
            usage.add(u);
        }
        if let Some(r) = response.reasoning.take().filter(|r| !r.trim().is_empty()) {
            reasoning.push(r);
        }
        let content = response.content.take().unwrap_or_default();

        if !response.has_tool_calls() {
            info!(
                iteration,
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "ReAct complete"
            );
            return Ok(LoopOutcome {
                content,
                reasoning: join_reasoning(reasoning),
                exhausted: false,
                iterations: iteration,
                usage,
            });
        }

        if !content.trim().is_empty() {
            partial = Some(content.clone());
        }
        let calls = response.tool_calls;
        info!(iteration, calls = calls.len(), "tool calls requested");
        messages.push(ChatMessage::assistant_tool_calls(content, calls.clone()));

        for call in &calls {
            let observation = observe(tools, call);
            messages.push(ChatMessage::tool_result(call, observation));
        }
    }

    warn!(max = options.max_iterations, "ReAct loop hit iteration cap");
    Ok(LoopOutcome {
        content: partial.unwrap_or_else(|| EXHAUSTED_FALLBACK.to_string()),
        reasoning: join_reasoning(reasoning),
        exhausted: true,
        iterations: options.max_iterations,
        usage,
    })
}

/// Run one call, turning any failure into text the model can read.
fn observe(tools: &dyn ToolAccess, call: &ToolCall) -> String {
    match tools.call(&call.name, &call.arguments) {
        Ok(text) => {
            debug!(tool = %call.name, call_id = %call.id, result_len = text.len(), "tool result");
            text
        }
        Err(e) => {
            warn!(tool = %call.name, call_id = %call.id, error = %e, "tool call failed");
            format!("Error executing tool '{}': {e}", call.name)
        }
    }
}

fn join_reasoning(parts: Vec<String>) -> Option<String> {
    (!parts.is_empty()).then(|| parts.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;
    use voxagent_core::types::{LlmResponse, Role};

    use crate::test_support::{tool_call, ScriptedProvider};
    use crate::tools::filesystem::{FsScope, ReadFileTool};
    use crate::tools::registry::tests::EchoTool;
    use crate::tools::registry::ToolRegistry;
    use crate::tools::tasks::TaskTool;

    fn opts(max_iterations: usize) -> LoopOptions {
        LoopOptions {
            max_iterations,
            harmony: false,
        }
    }

    #[test]
    fn test_direct_answer_in_one_iteration() {
        let provider = ScriptedProvider::new(vec![LlmResponse::text("4")]);
        let mut messages = vec![ChatMessage::user("What is 2+2?")];
        let outcome = run(&provider, &mut messages, &ToolRegistry::new(), &opts(10)).unwrap();

        assert_eq!(outcome.content, "4");
        assert_eq!(outcome.iterations, 1);
        assert!(!outcome.exhausted);
        assert_eq!(provider.call_count(), 1);
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn test_tool_then_text() {
        let provider = ScriptedProvider::new(vec![
            tool_call("call_1", "tasks", json!({"action": "list"})),
            LlmResponse::text("There are no tasks."),
        ]);
        let tools = ToolRegistry::new();
        tools.register(Arc::new(TaskTool::new())).unwrap();
        let mut messages = vec![ChatMessage::user("List tasks")];

        let outcome = run(&provider, &mut messages, &tools, &opts(5)).unwrap();
        assert_eq!(outcome.content, "There are no tasks.");
        assert_eq!(outcome.iterations, 2);

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].role(), Role::Assistant);
        assert_eq!(messages[1].tool_calls()[0].id, "call_1");
        match &messages[2] {
            ChatMessage::Tool { content, tool_call_id, tool_name } => {
                assert_eq!(content, "No tasks.");
                assert_eq!(tool_call_id, "call_1");
                assert_eq!(tool_name, "tasks");
            }
            other => panic!("expected tool result, got {other:?}"),
        }

        // The second request carries the call/result pair.
        let second = &provider.requests()[1];
        assert_eq!(second.messages.len(), 3);
        assert_eq!(second.tools.len(), 1);
    }

    #[test]
    fn test_missing_file_is_observed_and_loop_continues() {
        let dir = tempfile::tempdir().unwrap();
        let tools = ToolRegistry::new();
        tools
            .register(Arc::new(ReadFileTool::new(FsScope::new(dir.path().to_path_buf(), false))))
            .unwrap();
        let provider = ScriptedProvider::new(vec![
            tool_call("c1", "read_file", json!({"path": "missing.txt"})),
            LlmResponse::text("That file doesn't exist."),
        ]);
        let mut messages = vec![ChatMessage::user("Read missing.txt")];

        let outcome = run(&provider, &mut messages, &tools, &opts(10)).unwrap();
        assert_eq!(outcome.content, "That file doesn't exist.");
        assert!(messages[2]
            .content()
            .starts_with("Error executing tool 'read_file':"));
        assert!(messages[2].content().contains("File not found"));
    }

    #[test]
    fn test_unknown_tool_becomes_observation() {
        let provider = ScriptedProvider::new(vec![
            tool_call("c1", "no_such_tool", json!({})),
            LlmResponse::text("ok"),
        ]);
        let mut messages = vec![ChatMessage::user("hi")];
        let outcome = run(&provider, &mut messages, &ToolRegistry::new(), &opts(3)).unwrap();
        assert_eq!(outcome.content, "ok");
        assert_eq!(
            messages[2].content(),
            "Error executing tool 'no_such_tool': tool 'no_such_tool' not found"
        );
    }

    #[test]
    fn test_iteration_cap_flags_exhaustion() {
        let provider = ScriptedProvider::new(
            (0..15)
                .map(|i| tool_call(&format!("c{i}"), "echo", json!({"text": "again"})))
                .collect(),
        );
        let tools = ToolRegistry::new();
        tools.register(Arc::new(EchoTool("echo"))).unwrap();
        let mut messages = vec![ChatMessage::user("loop forever")];

        let outcome = run(&provider, &mut messages, &tools, &opts(10)).unwrap();
        assert!(outcome.exhausted);
        assert_eq!(outcome.iterations, 10);
        assert_eq!(provider.call_count(), 10);
        assert_eq!(outcome.content, EXHAUSTED_FALLBACK);
    }

    #[test]
    fn test_exhaustion_keeps_best_partial() {
        let mut call = tool_call("c0", "echo", json!({"text": "x"}));
        call.content = Some("Still checking...".into());
        let provider = ScriptedProvider::repeating(call);
        let tools = ToolRegistry::new();
        tools.register(Arc::new(EchoTool("echo"))).unwrap();
        let mut messages = vec![ChatMessage::user("go")];

        let outcome = run(&provider, &mut messages, &tools, &opts(2)).unwrap();
        assert!(outcome.exhausted);
        assert_eq!(outcome.content, "Still checking...");
    }

    #[test]
    fn test_calls_execute_in_emission_order() {
        let provider = ScriptedProvider::new(vec![
            LlmResponse::with_tool_calls(vec![
                ToolCall::new("a", "echo", json!({"text": "first"})),
                ToolCall::new("b", "echo", json!({"text": "second"})),
            ]),
            LlmResponse::text("done"),
        ]);
        let tools = ToolRegistry::new();
        tools.register(Arc::new(EchoTool("echo"))).unwrap();
        let mut messages = vec![ChatMessage::user("go")];

        run(&provider, &mut messages, &tools, &opts(5)).unwrap();
        assert_eq!(messages[2].content(), "Echo: first");
        assert_eq!(messages[3].content(), "Echo: second");
    }

    #[test]
    fn test_provider_error_aborts() {
        let provider = ScriptedProvider::failing(AgentError::provider("API error 500"));
        let mut messages = vec![ChatMessage::user("hi")];
        let err = run(&provider, &mut messages, &ToolRegistry::new(), &opts(5)).unwrap_err();
        assert!(matches!(err, AgentError::Provider(_)));
    }

    #[test]
    fn test_usage_accumulates_and_harmony_applies() {
        let mut first = tool_call("c1", "echo", json!({"text": "x"}));
        first.usage = Some(UsageInfo {
            input_tokens: 10,
            output_tokens: 2,
            total_tokens: 12,
        });
        let mut second = LlmResponse::text(
            "<|channel|>analysis<|message|>simple<|end|><|channel|>final<|message|>Four.",
        );
        second.usage = Some(UsageInfo {
            input_tokens: 20,
            output_tokens: 3,
            total_tokens: 23,
        });
        let provider = ScriptedProvider::new(vec![first, second]);
        let tools = ToolRegistry::new();
        tools.register(Arc::new(EchoTool("echo"))).unwrap();
        let mut messages = vec![ChatMessage::user("2+2")];

        let options = LoopOptions {
            max_iterations: 5,
            harmony: true,
        };
        let outcome = run(&provider, &mut messages, &tools, &options).unwrap();
        assert_eq!(outcome.content, "Four.");
        assert_eq!(outcome.reasoning.as_deref(), Some("simple"));
        assert_eq!(outcome.usage.total_tokens, 35);
    }
}
