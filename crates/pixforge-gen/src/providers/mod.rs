//! Provider registry
//!
//! Maps provider names to concrete implementations.

pub mod mock;
pub mod openai;

use crate::config::PixforgeConfig;
use crate::provider::ImageProvider;
use pixforge_core::{PixforgeError, Result};
use std::sync::Arc;

/// Create a provider by name with configuration
pub fn create_provider(name: &str, config: &PixforgeConfig) -> Result<Arc<dyn ImageProvider>> {
    if !config.is_enabled(name) {
        return Err(PixforgeError::Config(format!(
            "Provider '{}' is disabled in config",
            name
        )));
    }

    match name {
        "mock" => Ok(Arc::new(mock::MockProvider::new())),
        "openai" => Ok(Arc::new(openai::OpenAiProvider::from_config(config)?)),
        _ => Err(PixforgeError::Config(format!(
            "Unknown provider '{}'. Available: {}",
            name,
            available_providers().join(", ")
        ))),
    }
}

/// List all available provider names
pub fn available_providers() -> Vec<&'static str> {
    vec!["openai", "mock"]
}
