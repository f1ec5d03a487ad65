//! Shared CLI helpers — path expansion, response printing, banner.

use std::path::PathBuf;

use colored::Colorize;

use voxagent_agent::AgentResponse;

/// Expand `~` at the start of a path to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_next::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs_next::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

/// Print a full turn: reasoning (dimmed), answer, and an exhaustion note.
pub fn print_response(response: &AgentResponse) {
    if let Some(reasoning) = &response.reasoning {
        println!();
        println!("{}", reasoning.dimmed().italic());
    }
    print_content(&response.content);
    if let Some(keywords) = &response.keywords {
        println!("{} {}", "keywords:".dimmed(), keywords.join(", "));
        println!();
    }
    if response.exhausted {
        println!("{}", "(stopped at the step limit)".yellow());
        println!();
    }
}

/// Print a bare answer.
pub fn print_content(content: &str) {
    println!();
    println!("{}", "🎙️ Voxagent".cyan().bold());
    if content.is_empty() {
        println!("{}", "(no response)".dimmed());
    } else {
        println!("{content}");
    }
    println!();
}

/// Print the banner shown at REPL start.
pub fn print_banner(provider: &str) {
    let version = env!("CARGO_PKG_VERSION");
    println!();
    println!(
        "{}  v{}  {}",
        "🎙️ Voxagent".cyan().bold(),
        version.dimmed(),
        format!("[{provider}]").dimmed()
    );
    println!(
        "{}",
        "Type a message, /help for commands, or \"exit\" to quit.".dimmed()
    );
    println!();
}

pub fn print_thinking() {
    eprint!("{}", "⠿ thinking...".dimmed());
}

pub fn clear_thinking() {
    eprint!("\r{}\r", " ".repeat(40));
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_tilde_home() {
        let result = expand_tilde("~/.voxagent/config.json");
        assert!(result.ends_with(".voxagent/config.json"));
        assert!(!result.starts_with("~"));
    }

    #[test]
    fn expand_tilde_leaves_other_paths() {
        assert_eq!(expand_tilde("/etc/voxagent.json"), PathBuf::from("/etc/voxagent.json"));
        assert_eq!(expand_tilde("conf/a.json"), PathBuf::from("conf/a.json"));
        assert_eq!(expand_tilde("~user/a"), PathBuf::from("~user/a"));
    }
}
