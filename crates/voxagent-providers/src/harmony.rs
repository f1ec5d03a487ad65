//! Harmony channel splitting.
//!
//! Models trained on the Harmony format interleave channels in their raw
//! text: `<|channel|>analysis<|message|>...<|end|>` carries the reasoning and
//! `<|channel|>final<|message|>...` the user-facing answer. This runs as a
//! post-processing step on any provider's text.

use voxagent_core::types::LlmResponse;

const CHANNEL: &str = "<|channel|>";
const MESSAGE: &str = "<|message|>";
const TERMINATORS: [&str; 5] = ["<|end|>", "<|return|>", "<|start|>", "<|call|>", CHANNEL];

/// Result of splitting a Harmony-formatted completion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HarmonyOutput {
    pub content: String,
    pub reasoning: Option<String>,
}

/// Split `text` into final content and analysis reasoning.
///
/// Text without channel markers passes through unchanged. When there is no
/// `final` channel, `commentary` is used as the content.
pub fn parse(text: &str) -> HarmonyOutput {
    if !text.contains(CHANNEL) {
        return HarmonyOutput {
            content: text.to_string(),
            reasoning: None,
        };
    }

    let mut analysis = Vec::new();
    let mut finals = Vec::new();
    let mut commentary = Vec::new();

    let mut rest = text;
    while let Some(start) = rest.find(CHANNEL) {
        let after = &rest[start + CHANNEL.len()..];
        let Some(msg_at) = after.find(MESSAGE) else {
            break;
        };
        // Header may carry routing after the name ("commentary to=functions.x").
        let channel = after[..msg_at].split_whitespace().next().unwrap_or("");
        let body_start = &after[msg_at + MESSAGE.len()..];
        let body_end = TERMINATORS
            .iter()
            .filter_map(|t| body_start.find(t))
            .min()
            .unwrap_or(body_start.len());
        let body = body_start[..body_end].trim();

        if !body.is_empty() {
            match channel {
                "analysis" => analysis.push(body),
                "final" => finals.push(body),
                _ => commentary.push(body),
            }
        }
        rest = &body_start[body_end..];
    }

    let content = if finals.is_empty() {
        commentary.join("\n")
    } else {
        finals.join("\n")
    };
    HarmonyOutput {
        content,
        reasoning: (!analysis.is_empty()).then(|| analysis.join("\n")),
    }
}

/// Apply [`parse`] to a provider response in place.
///
/// Reasoning already reported by the provider is kept ahead of any analysis
/// text found in the content.
pub fn apply(response: &mut LlmResponse) {
    let Some(raw) = response.content.as_deref() else {
        return;
    };
    if !raw.contains(CHANNEL) {
        return;
    }
    let parsed = parse(raw);
    response.content = (!parsed.content.is_empty()).then_some(parsed.content);
    response.reasoning = match (response.reasoning.take(), parsed.reasoning) {
        (Some(a), Some(b)) => Some(format!("{a}\n{b}")),
        (a, b) => a.or(b),
    };
}
