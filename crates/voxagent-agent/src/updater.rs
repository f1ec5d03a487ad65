//! Incremental state updates and backchannel decisions.
//!
//! [`RuleBasedStateUpdater`] derives the next [`StateCapsule`] from the
//! previous one plus the latest utterance without calling a model, and
//! decides when a pause deserves a short acknowledgment.

use regex::Regex;
use tracing::debug;

use crate::capsule::{StateCapsule, Tone};

/// Pause after a short status update before acknowledging it.
const STATUS_PAUSE_MS: u64 = 500;
/// Pause after a trailing conjunction before prompting the speaker on.
const CONTINUATION_PAUSE_MS: u64 = 400;
/// Utterances at or above this word count never get a status acknowledgment.
const SHORT_UTTERANCE_WORDS: usize = 10;

/// Character cap standing in for the word cap on text written without
/// spaces (Japanese).
const SHORT_UNSEGMENTED_CHARS: usize = 24;

const DONE_WORDS: &[&str] = &["done", "finished", "ready", "complete"];
const PROGRESS_WORDS: &[&str] = &["mixed", "added", "started", "cut", "poured", "opened"];
const CONJUNCTIONS: &[&str] = &["and", "but", "so", "or", "then"];

const JA_DONE_MARKERS: &[&str] = &["できた", "できました", "終わった", "終わりました"];
const JA_PROGRESS_MARKERS: &[&str] = &["溶いた", "入れた", "切った", "混ぜた", "加えた"];
/// Clause endings that leave a Japanese sentence open.
const JA_CONTINUATIONS: &[&str] = &["で", "が", "けど"];

const SATISFIED_WORDS: &[&str] = &["thanks", "thank you", "great", "perfect", "awesome", "nice"];
const CONFUSED_WORDS: &[&str] = &["confused", "don't understand", "what do you mean", "huh", "not sure"];
const FRUSTRATED_WORDS: &[&str] = &["ugh", "annoying", "not working", "doesn't work", "wrong", "again?"];

const GOAL_PREFIXES: &[&str] = &["i want to ", "i need to ", "help me ", "i'd like to ", "i would like to "];
const QUESTION_WORDS: &[&str] = &["what", "how", "why", "when", "where", "who", "which", "can", "could", "is", "are", "do", "does"];

const DURATION_SLOT: &str = "timer_duration?";

/// Derives capsule updates from user input.
pub trait StateUpdater: Send + Sync {
    /// Next capsule given the previous one and the latest utterance.
    fn update(&self, previous: &StateCapsule, input: &str) -> StateCapsule;

    /// `Some(ack)` if `utterance` followed by `pause_ms` of silence warrants a
    /// quick acknowledgment instead of a full turn.
    fn should_backchannel(&self, utterance: &str, pause_ms: u64) -> Option<String>;
}

// ─────────────────────────────────────────────
// Rule-based implementation
// ─────────────────────────────────────────────

/// Keyword and pattern rules; no model involved.
pub struct RuleBasedStateUpdater {
    budget: usize,
    step_re: Option<Regex>,
    duration_re: Option<Regex>,
}

impl RuleBasedStateUpdater {
    /// `budget` is the capsule token budget enforced after every update.
    pub fn new(budget: usize) -> Self {
        Self {
            budget,
            step_re: Regex::new(r"\bstep\s+(\d+)\b").ok(),
            duration_re: Regex::new(r"\b(\d+)\s*(seconds?|secs?|minutes?|mins?|hours?|hrs?)\b").ok(),
        }
    }

    fn classify_intent(&self, lower: &str) -> (&'static str, f32) {
        let first_word = lower.split_whitespace().next().unwrap_or("");
        if lower.contains("timer") || lower.contains("remind me") {
            ("timer_request", 0.9)
        } else if contains_any(lower, DONE_WORDS) || lower.starts_with("next") {
            ("progress_update", 0.85)
        } else if lower.trim_end().ends_with('?') || QUESTION_WORDS.contains(&first_word) {
            ("question", 0.8)
        } else if lower.contains("help") {
            ("help_request", 0.8)
        } else if contains_any(lower, SATISFIED_WORDS) || matches!(lower.trim(), "ok" | "okay" | "yes" | "yeah") {
            ("acknowledgment", 0.75)
        } else {
            ("statement", 0.6)
        }
    }

    fn classify_tone(lower: &str) -> Option<Tone> {
        if contains_any(lower, FRUSTRATED_WORDS) {
            Some(Tone::Frustrated)
        } else if contains_any(lower, CONFUSED_WORDS) {
            Some(Tone::Confused)
        } else if contains_any(lower, SATISFIED_WORDS) {
            Some(Tone::Satisfied)
        } else {
            None
        }
    }
}

impl Default for RuleBasedStateUpdater {
    fn default() -> Self {
        Self::new(160)
    }
}

impl StateUpdater for RuleBasedStateUpdater {
    fn update(&self, previous: &StateCapsule, input: &str) -> StateCapsule {
        let mut next = previous.clone();
        let lower = input.trim().to_lowercase();
        if lower.is_empty() {
            return next;
        }

        let (intent, confidence) = self.classify_intent(&lower);
        next.set_intent(intent);
        next.set_confidence(confidence);

        if let Some(tone) = Self::classify_tone(&lower) {
            next.set_tone(tone);
        }

        if let Some(caps) = self.step_re.as_ref().and_then(|re| re.captures(&lower)) {
            next.set_entity("step", &caps[1]);
        }
        match self.duration_re.as_ref().and_then(|re| re.captures(&lower)) {
            Some(caps) => {
                next.set_entity("duration", &format!("{} {}", &caps[1], &caps[2]));
                next.remove_open_slot(DURATION_SLOT);
            }
            None if intent == "timer_request" => next.add_open_slot(DURATION_SLOT),
            None => {}
        }

        for prefix in GOAL_PREFIXES {
            if let Some(idx) = lower.find(prefix) {
                let goal = lower[idx + prefix.len()..]
                    .trim_end_matches(['.', '!', '?'])
                    .trim();
                if !goal.is_empty() {
                    next.add_goal(goal);
                }
                break;
            }
        }
        if intent == "progress_update" && !next.user_goals.is_empty() {
            let done = next.user_goals.remove(0);
            debug!(goal = %done, "goal completed");
        }

        next.enforce_budget(self.budget);
        next
    }

    fn should_backchannel(&self, utterance: &str, pause_ms: u64) -> Option<String> {
        let lower = utterance.trim().to_lowercase();
        if lower.is_empty() {
            return None;
        }
        let words: Vec<&str> = lower
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
            .collect();
        let short = if words.len() > 1 {
            words.len() < SHORT_UTTERANCE_WORDS
        } else {
            lower.chars().count() <= SHORT_UNSEGMENTED_CHARS
        };

        if short && pause_ms > STATUS_PAUSE_MS {
            if words.iter().any(|w| DONE_WORDS.contains(w)) || contains_any(&lower, JA_DONE_MARKERS) {
                return Some("got it".to_string());
            }
            if words.iter().any(|w| PROGRESS_WORDS.contains(w))
                || contains_any(&lower, JA_PROGRESS_MARKERS)
            {
                return Some("mm-hmm".to_string());
            }
        }

        if pause_ms > CONTINUATION_PAUSE_MS {
            if words.last().is_some_and(|last| CONJUNCTIONS.contains(last)) {
                return Some("uh-huh".to_string());
            }
            let open = lower.trim_end_matches(|c: char| c.is_whitespace() || matches!(c, '、' | '。' | '…'));
            if JA_CONTINUATIONS.iter().any(|p| open.ends_with(p)) {
                return Some("uh-huh".to_string());
            }
        }
        None
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}
