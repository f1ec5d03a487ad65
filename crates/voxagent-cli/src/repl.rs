//! Interactive REPL with persistent history.
//!
//! Plain lines run a full turn. Slash commands inspect or reset state
//! without calling the model.

use anyhow::Result;
use colored::Colorize;
use rustyline::config::Configurer;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{DefaultEditor, Editor};
use tracing::debug;

use voxagent_agent::Agent;

use crate::helpers;

/// Exit commands (case-insensitive match).
const EXIT_COMMANDS: &[&str] = &["exit", "quit", "/exit", "/quit", ":q"];

/// A parsed input line.
#[derive(Debug, PartialEq)]
enum Input<'a> {
    Exit,
    Help,
    Reset,
    History,
    State,
    Tools,
    Events,
    Message(&'a str),
}

fn parse_input(line: &str) -> Option<Input<'_>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    if EXIT_COMMANDS.contains(&trimmed.to_lowercase().as_str()) {
        return Some(Input::Exit);
    }
    Some(match trimmed {
        "/help" => Input::Help,
        "/reset" => Input::Reset,
        "/history" => Input::History,
        "/state" => Input::State,
        "/tools" => Input::Tools,
        "/events" => Input::Events,
        other => Input::Message(other),
    })
}

/// Run the interactive REPL loop.
pub fn run(agent: &Agent) -> Result<()> {
    helpers::print_banner(agent.provider_name());
    let mut editor = create_editor()?;

    loop {
        let line = match editor.readline("You: ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Input error: {e}");
                break;
            }
        };
        let Some(input) = parse_input(&line) else {
            continue;
        };
        let _ = editor.add_history_entry(line.trim());

        match input {
            Input::Exit => {
                println!("\nGoodbye! 👋");
                break;
            }
            Input::Help => print_help(),
            Input::Reset => {
                agent.reset();
                println!("{}", "Conversation cleared.".dimmed());
            }
            Input::History => println!("{}", agent.get_conversation_history()),
            Input::State => println!("{}", agent.state_capsule().to_json()),
            Input::Tools => {
                for def in agent.tool_definitions() {
                    println!("  {}", def.name);
                }
            }
            Input::Events => {
                let summaries = agent.drain_watcher_summaries();
                if summaries.is_empty() {
                    println!("{}", "(no events)".dimmed());
                }
                for s in summaries {
                    println!("  [{:?}] {}", s.priority, s.text);
                }
            }
            Input::Message(text) => {
                debug!(input = text, "processing input");
                helpers::print_thinking();
                let result = agent.step(text);
                helpers::clear_thinking();
                match result {
                    Ok(response) => helpers::print_response(&response),
                    Err(e) => eprintln!("\n❌ Error: {e}\n"),
                }
            }
        }
    }

    save_history(&mut editor);
    Ok(())
}

fn print_help() {
    println!();
    for (cmd, what) in [
        ("/reset", "clear history and state"),
        ("/history", "print the conversation as JSON"),
        ("/state", "print the state capsule"),
        ("/tools", "list tool names"),
        ("/events", "drain watcher summaries"),
        ("exit", "quit"),
    ] {
        println!("  {:<10} {}", cmd.bold(), what.dimmed());
    }
    println!();
}

fn create_editor() -> Result<Editor<(), DefaultHistory>> {
    let mut editor = DefaultEditor::new()?;
    editor.set_max_history_size(1000)?;

    let path = history_path();
    if path.exists() {
        let _ = editor.load_history(&path);
        debug!(path = %path.display(), "loaded REPL history");
    }
    Ok(editor)
}

fn save_history(editor: &mut Editor<(), DefaultHistory>) {
    let path = history_path();
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Err(e) = editor.save_history(&path) {
        debug!(error = %e, "failed to save history");
    }
}

fn history_path() -> std::path::PathBuf {
    voxagent_core::utils::get_data_path()
        .join("history")
        .join("cli_history")
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_commands() {
        assert_eq!(parse_input("exit"), Some(Input::Exit));
        assert_eq!(parse_input("  QUIT "), Some(Input::Exit));
        assert_eq!(parse_input(":q"), Some(Input::Exit));
    }

    #[test]
    fn slash_commands_and_messages() {
        assert_eq!(parse_input("/reset"), Some(Input::Reset));
        assert_eq!(parse_input("/events"), Some(Input::Events));
        assert_eq!(parse_input("  hello there "), Some(Input::Message("hello there")));
        assert_eq!(parse_input("/unknown"), Some(Input::Message("/unknown")));
        assert_eq!(parse_input("   "), None);
    }

    #[test]
    fn history_path_under_data_dir() {
        let path = history_path();
        assert!(path.to_string_lossy().contains(".voxagent"));
        assert!(path.ends_with("history/cli_history"));
    }
}
