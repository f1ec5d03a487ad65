//! Provider construction from an [`AgentConfig`].

use std::sync::Arc;

use tracing::debug;

use voxagent_core::config::AgentConfig;
use voxagent_core::error::AgentError;

use crate::local::LocalProvider;
use crate::remote::RemoteProvider;
use crate::traits::LlmProvider;

/// Build the provider selected by `config`: `modelPath` → local,
/// `baseUrl` → remote.
///
/// # Errors
/// `AgentError::Config` when both or neither are set, or the provider fails
/// to initialise.
pub fn create_provider(config: &AgentConfig) -> Result<Arc<dyn LlmProvider>, AgentError> {
    config.validate()?;

    if config.model_path.as_deref().is_some_and(|p| !p.is_empty()) {
        debug!(model_path = ?config.model_path, "Creating local provider");
        Ok(Arc::new(LocalProvider::new(config)?))
    } else {
        debug!(base_url = ?config.base_url, "Creating remote provider");
        Ok(Arc::new(RemoteProvider::new(config)?))
    }
}
