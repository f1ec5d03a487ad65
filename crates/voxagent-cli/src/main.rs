//! Voxagent CLI — entry point.
//!
//! # Commands
//!
//! - `voxagent init [--force]` — write a default config file
//! - `voxagent chat [-m MESSAGE] [--skill NAME]` — single-shot or REPL
//! - `voxagent status [--check]` — show configuration and provider status
//! - `voxagent tools [--json]` — list the tools the agent would offer
//! - `voxagent serve [--http ADDR]` — expose the tools as an MCP server

mod helpers;
mod init;
mod repl;
mod status;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use voxagent_agent::Agent;
use voxagent_core::config::{load_config, AgentConfig};

// ─────────────────────────────────────────────
// CLI definition
// ─────────────────────────────────────────────

/// 🎙️ Voxagent — tool-calling agent runtime for voice assistants
#[derive(Parser)]
#[command(name = "voxagent", version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.voxagent/config.json)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the agent (single-shot or interactive REPL)
    Chat {
        /// Single message (non-interactive). Omit for REPL mode.
        #[arg(short, long)]
        message: Option<String>,

        /// Run the message as a one-shot call with this skill's tools
        #[arg(short, long, requires = "message")]
        skill: Option<String>,

        /// System prompt replacing the default
        #[arg(long)]
        system: Option<String>,

        /// Ask for speech-recognition keywords instead of running tools
        #[arg(long, default_value_t = false, requires = "message", conflicts_with = "skill")]
        keywords: bool,

        /// Enable debug logging
        #[arg(long, default_value_t = false)]
        logs: bool,
    },

    /// Write a default config file
    Init {
        /// Overwrite an existing config
        #[arg(long, default_value_t = false)]
        force: bool,
    },

    /// Show configuration and provider status
    Status {
        /// Also build the provider and check it is reachable
        #[arg(long, default_value_t = false)]
        check: bool,
    },

    /// List available tools
    Tools {
        /// Print the definitions as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Serve the agent's tools to MCP clients (stdio unless --http is given)
    Serve {
        /// Listen for Streamable HTTP on this address, e.g. 127.0.0.1:3000
        #[arg(long)]
        http: Option<String>,

        /// Enable debug logging (stderr)
        #[arg(long, default_value_t = false)]
        logs: bool,
    },
}

// ─────────────────────────────────────────────
// Entrypoint
// ─────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref().map(helpers::expand_tilde);

    match cli.command {
        Commands::Chat {
            message,
            skill,
            system,
            keywords,
            logs,
        } => {
            init_logging(logs);
            run_chat(config_path, message, skill, system, keywords)
        }
        Commands::Init { force } => init::run(config_path.as_deref(), force),
        Commands::Status { check } => {
            init_logging(false);
            status::run(config_path.as_deref(), check)
        }
        Commands::Tools { json } => {
            init_logging(false);
            run_tools(config_path, json)
        }
        Commands::Serve { http, logs } => {
            init_logging(logs);
            run_serve(config_path, http)
        }
    }
}

// ─────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────

fn run_chat(
    config_path: Option<PathBuf>,
    message: Option<String>,
    skill: Option<String>,
    system: Option<String>,
    keywords: bool,
) -> Result<()> {
    let agent = build_agent(&load_config(config_path.as_deref()))?;
    if let Some(prompt) = system {
        agent.set_system_prompt(&prompt);
    }

    match (message, skill) {
        (Some(msg), Some(skill)) => {
            info!(skill = %skill, "one-shot message");
            let content = agent
                .chat_once(&msg, Some(&skill))
                .context("one-shot call failed")?;
            helpers::print_content(&content);
        }
        (Some(msg), None) if keywords => {
            info!("single message with keywords");
            let response = agent
                .step_with_keywords(&msg)
                .context("agent turn failed")?;
            helpers::print_response(&response);
        }
        (Some(msg), None) => {
            info!("single message");
            let response = agent.step(&msg).context("agent turn failed")?;
            helpers::print_response(&response);
        }
        (None, _) => repl::run(&agent)?,
    }

    Ok(())
}

fn run_tools(config_path: Option<PathBuf>, json: bool) -> Result<()> {
    let agent = build_agent(&load_config(config_path.as_deref()))?;
    let definitions = agent.tool_definitions();

    if json {
        println!("{}", serde_json::to_string_pretty(&definitions)?);
        return Ok(());
    }

    println!();
    println!("{}", "🧰 Tools".cyan().bold());
    println!();
    for def in &definitions {
        println!("  {:<16} {}", def.name.bold(), first_line(&def.description).dimmed());
    }
    for server in agent.mcp_servers() {
        println!("  {} {}", "MCP:".bold(), server);
    }
    println!();
    Ok(())
}

fn run_serve(config_path: Option<PathBuf>, http: Option<String>) -> Result<()> {
    let agent = build_agent(&load_config(config_path.as_deref()))?;
    match http {
        Some(addr) => {
            eprintln!("{} MCP server on http://{addr}/mcp", "▶".green());
            agent
                .serve_mcp_http(&addr)
                .with_context(|| format!("MCP HTTP server on {addr} failed"))
        }
        None => agent.serve_mcp_stdio().context("MCP stdio server failed"),
    }
}

/// Build an `Agent` from the loaded configuration.
fn build_agent(config: &AgentConfig) -> Result<Agent> {
    let workspace = config.working_dir_path();
    std::fs::create_dir_all(&workspace)
        .with_context(|| format!("failed to create working dir: {}", workspace.display()))?;
    Agent::new(config.clone()).context("failed to start agent")
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}

/// Initialize tracing/logging.
fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("voxagent=debug,voxagent_agent=debug,voxagent_providers=debug,info")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
