//! `voxagent init` — write a default config file.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;

use voxagent_core::config::{get_config_path, save_config, AgentConfig};
use voxagent_core::utils::get_data_path;

/// Create the config (unless present) and the history directory.
pub fn run(config_path: Option<&Path>, force: bool) -> Result<()> {
    let path = config_path.map(Path::to_path_buf).unwrap_or_else(get_config_path);

    println!();
    println!("{}", "🎙️ Voxagent — Setup".cyan().bold());
    println!();

    if write_config(&path, force)? {
        println!("  {} wrote config to {}", "✓".green(), path.display());
    } else {
        println!("  {} config already exists at {}", "✓".green(), path.display());
    }

    let history = get_data_path().join("history");
    std::fs::create_dir_all(&history)
        .with_context(|| format!("failed to create {}", history.display()))?;

    println!();
    println!(
        "{}",
        "Set modelPath (local) or baseUrl + apiKey (remote), then run `voxagent chat`.".dimmed()
    );
    println!();
    Ok(())
}

/// Write defaults to `path`. Returns `false` if it existed and `force` is off.
fn write_config(path: &Path, force: bool) -> Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }
    save_config(&AgentConfig::default(), Some(path))
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxagent_core::config::load_config;

    #[test]
    fn writes_defaults_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        assert!(write_config(&path, false).unwrap());
        assert_eq!(load_config(Some(&path)).max_iterations, 10);

        std::fs::write(&path, r#"{"maxIterations": 4}"#).unwrap();
        assert!(!write_config(&path, false).unwrap());
        assert_eq!(load_config(Some(&path)).max_iterations, 4);

        assert!(write_config(&path, true).unwrap());
        assert_eq!(load_config(Some(&path)).max_iterations, 10);
    }
}
