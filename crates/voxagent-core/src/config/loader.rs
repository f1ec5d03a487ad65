//! Config loader — reads `~/.voxagent/config.json` and merges env vars.
//!
//! # Loading precedence
//! 1. Defaults (from `AgentConfig::default()`)
//! 2. JSON file at `~/.voxagent/config.json`
//! 3. Environment variables `VOXAGENT_<FIELD>` (override JSON)

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::schema::AgentConfig;

/// Default config file path.
pub fn get_config_path() -> PathBuf {
    crate::utils::get_data_path().join("config.json")
}

/// Load configuration from the default path + env vars.
///
/// Falls back to `AgentConfig::default()` if the file doesn't exist or can't be parsed.
pub fn load_config(path: Option<&Path>) -> AgentConfig {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);
    load_config_from_path(&config_path)
}

fn load_config_from_path(path: &Path) -> AgentConfig {
    if !path.exists() {
        info!("No config file found at {}, using defaults", path.display());
        return apply_env_overrides(AgentConfig::default());
    }

    debug!("Loading config from {}", path.display());

    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to read config file {}: {}", path.display(), e);
            return apply_env_overrides(AgentConfig::default());
        }
    };

    let config: AgentConfig = match serde_json::from_str(&content) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to parse config JSON: {}", e);
            return apply_env_overrides(AgentConfig::default());
        }
    };

    apply_env_overrides(config)
}

/// Save configuration to disk (pretty-printed JSON with camelCase keys).
pub fn save_config(config: &AgentConfig, path: Option<&Path>) -> std::io::Result<()> {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(config).map_err(std::io::Error::other)?;

    std::fs::write(&config_path, json)?;
    debug!("Config saved to {}", config_path.display());
    Ok(())
}

/// Apply environment variable overrides on top of a loaded config.
///
/// Supported overrides:
/// - `VOXAGENT_MODEL_PATH`, `VOXAGENT_BASE_URL`
/// - `VOXAGENT_API_KEY` (falls back to `OPENAI_API_KEY` when the key is still empty)
/// - `VOXAGENT_MODEL`, `VOXAGENT_MAX_TOKENS`, `VOXAGENT_TEMPERATURE`
/// - `VOXAGENT_LANGUAGE`, `VOXAGENT_REASONING_EFFORT`
/// - `VOXAGENT_MAX_ITERATIONS`, `VOXAGENT_WORKING_DIR`
fn apply_env_overrides(mut config: AgentConfig) -> AgentConfig {
    if let Ok(val) = std::env::var("VOXAGENT_MODEL_PATH") {
        config.model_path = Some(val);
    }
    if let Ok(val) = std::env::var("VOXAGENT_BASE_URL") {
        config.base_url = Some(val);
    }

    if let Ok(val) = std::env::var("VOXAGENT_API_KEY") {
        config.api_key = val;
    } else if config.api_key.is_empty() {
        if let Ok(val) = std::env::var("OPENAI_API_KEY") {
            config.api_key = val;
        }
    }

    if let Ok(val) = std::env::var("VOXAGENT_MODEL") {
        config.model = val;
    }
    if let Ok(val) = std::env::var("VOXAGENT_MAX_TOKENS") {
        if let Ok(n) = val.parse::<u32>() {
            config.max_tokens = n;
        }
    }
    if let Ok(val) = std::env::var("VOXAGENT_TEMPERATURE") {
        if let Ok(t) = val.parse::<f64>() {
            config.temperature = t;
        }
    }
    if let Ok(val) = std::env::var("VOXAGENT_LANGUAGE") {
        config.language = val;
    }
    if let Ok(val) = std::env::var("VOXAGENT_REASONING_EFFORT") {
        config.reasoning_effort = Some(val);
    }
    if let Ok(val) = std::env::var("VOXAGENT_MAX_ITERATIONS") {
        if let Ok(n) = val.parse::<u32>() {
            config.max_iterations = n;
        }
    }
    if let Ok(val) = std::env::var("VOXAGENT_WORKING_DIR") {
        config.working_dir = Some(val);
    }

    config
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
