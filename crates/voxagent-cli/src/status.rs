//! `voxagent status` — show configuration and provider status.

use std::path::Path;

use anyhow::Result;
use colored::Colorize;

use voxagent_agent::Agent;
use voxagent_core::config::{get_config_path, load_config, AgentConfig};

/// Run the status command.
pub fn run(config_path: Option<&Path>, check: bool) -> Result<()> {
    let config = load_config(config_path);
    let path = config_path.map(Path::to_path_buf).unwrap_or_else(get_config_path);

    println!();
    println!("{}", "🎙️ Voxagent Status".cyan().bold());
    println!();

    println!(
        "  {:<18} {} {}",
        "Config:".bold(),
        path.display(),
        found(path.exists())
    );

    let workspace = config.working_dir_path();
    println!(
        "  {:<18} {} {}",
        "Working dir:".bold(),
        workspace.display(),
        found(workspace.exists())
    );

    println!("  {:<18} {}", "Provider:".bold(), provider_line(&config));
    println!(
        "  {:<18} {} | max_tokens: {} | max_iterations: {}",
        "Parameters:".bold(),
        format!("temp: {}", config.temperature).dimmed(),
        format!("{}", config.max_tokens).dimmed(),
        format!("{}", config.max_iterations).dimmed(),
    );
    println!(
        "  {:<18} {}",
        "Harmony:".bold(),
        if config.use_harmony { "on" } else { "off" }
    );

    match config.validate() {
        Ok(()) => println!("  {:<18} {}", "Validation:".bold(), "✓".green()),
        Err(e) => println!("  {:<18} {}", "Validation:".bold(), e.to_string().red()),
    }

    if !config.mcp.servers.is_empty() {
        println!();
        println!("  {}", "MCP servers:".bold());
        for server in &config.mcp.servers {
            println!(
                "    {:<16} {} {}",
                server.name,
                server.command,
                server.args.join(" ").dimmed()
            );
        }
    }

    if check {
        println!();
        let outcome = Agent::new(config).and_then(|agent| agent.check_available());
        match outcome {
            Ok(()) => println!("  {:<18} {}", "Reachable:".bold(), "✓ reachable".green()),
            Err(e) => println!("  {:<18} {}", "Reachable:".bold(), e.to_string().red()),
        }
    }

    println!();
    Ok(())
}

fn found(exists: bool) -> String {
    if exists {
        "✓".green().to_string()
    } else {
        "(not found)".red().to_string()
    }
}

fn provider_line(config: &AgentConfig) -> String {
    match (config.model_path.as_deref(), config.base_url.as_deref()) {
        (Some(path), None) if !path.is_empty() => format!("local  {path}"),
        (None, Some(url)) if !url.is_empty() => {
            let key = if config.api_key.is_empty() {
                "· no key".dimmed().to_string()
            } else {
                format!("{} (key set)", "✓".green())
            };
            format!("remote {url}  model: {}  {key}", config.model)
        }
        _ => format!("{}", "· not configured".dimmed()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_line_variants() {
        colored::control::set_override(false);
        assert!(provider_line(&AgentConfig::local("/m.gguf")).starts_with("local  /m.gguf"));

        let remote = provider_line(&AgentConfig::remote("http://x/v1", "sk"));
        assert!(remote.starts_with("remote http://x/v1"));
        assert!(remote.contains("key set"));

        assert!(provider_line(&AgentConfig::default()).contains("not configured"));
    }
}
