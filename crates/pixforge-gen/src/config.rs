//! Layered configuration system
//!
//! Config is loaded with three layers of precedence (highest wins):
//! 1. Environment variables: `PIXFORGE_{PROVIDER}_API_KEY`, then `OPENAI_API_KEY`
//! 2. Project-local: `.pixforge/config.toml`
//! 3. Global: `~/.pixforge/config.toml`
//!
//! Command-line flags are applied on top by the CLI.

use pixforge_core::{ImageFormat, PixforgeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Provider-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: None,
            enabled: true,
        }
    }
}

/// Generation defaults shared by `generate` and `batch`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    #[serde(default)]
    pub format: ImageFormat,
    #[serde(default = "default_parallel")]
    pub parallel: usize,
    #[serde(default)]
    pub delay_ms: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            provider: default_provider(),
            output_dir: default_output_dir(),
            format: ImageFormat::default(),
            parallel: default_parallel(),
            delay_ms: 0,
        }
    }
}

fn default_model() -> String {
    "gpt-image-1".to_string()
}
fn default_provider() -> String {
    "openai".to_string()
}
fn default_output_dir() -> String {
    "images".to_string()
}
fn default_parallel() -> usize {
    1
}

/// Top-level config file structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    #[serde(default)]
    pub generation: GenerationConfig,
}

/// Resolved configuration with environment variable overrides applied
#[derive(Debug, Clone, Default)]
pub struct PixforgeConfig {
    pub providers: HashMap<String, ProviderConfig>,
    pub generation: GenerationConfig,
}

impl PixforgeConfig {
    /// Load config with layered precedence: global < project < env vars
    pub fn load() -> Result<Self> {
        let mut config = ConfigFile::default();

        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                tracing::debug!(path = %global_path.display(), "loading global config");
                let global = Self::load_file(&global_path)?;
                Self::merge_into(&mut config, global);
            }
        }

        let local_path = PathBuf::from(".pixforge/config.toml");
        if local_path.exists() {
            tracing::debug!(path = %local_path.display(), "loading project config");
            let local = Self::load_file(&local_path)?;
            Self::merge_into(&mut config, local);
        }

        Self::apply_env_overrides(&mut config, |key| std::env::var(key).ok());

        Ok(PixforgeConfig {
            providers: config.providers,
            generation: config.generation,
        })
    }

    /// Load config from a specific file path only, still honouring env overrides
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let mut config = Self::load_file(path)?;
        Self::apply_env_overrides(&mut config, |key| std::env::var(key).ok());
        Ok(PixforgeConfig {
            providers: config.providers,
            generation: config.generation,
        })
    }

    pub fn api_key(&self, provider_name: &str) -> Option<&str> {
        self.providers
            .get(provider_name)
            .and_then(|p| p.api_key.as_deref())
            .filter(|k| !k.is_empty())
    }

    pub fn api_url(&self, provider_name: &str) -> Option<&str> {
        self.providers
            .get(provider_name)
            .and_then(|p| p.api_url.as_deref())
    }

    /// Providers are enabled unless a config layer says otherwise
    pub fn is_enabled(&self, provider_name: &str) -> bool {
        self.providers
            .get(provider_name)
            .map(|p| p.enabled)
            .unwrap_or(true)
    }

    fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".pixforge").join("config.toml"))
    }

    fn load_file(path: &Path) -> Result<ConfigFile> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| {
            PixforgeError::Config(format!("Failed to parse config {}: {}", path.display(), e))
        })
    }

    fn merge_into(base: &mut ConfigFile, overlay: ConfigFile) {
        for (name, provider) in overlay.providers {
            let entry = base.providers.entry(name).or_default();
            if provider.api_key.is_some() {
                entry.api_key = provider.api_key;
            }
            if provider.api_url.is_some() {
                entry.api_url = provider.api_url;
            }
            entry.enabled = provider.enabled;
        }

        // A field only overrides the lower layer when it differs from the default
        let defaults = GenerationConfig::default();
        let generation = overlay.generation;
        if generation.default_model != defaults.default_model {
            base.generation.default_model = generation.default_model;
        }
        if generation.provider != defaults.provider {
            base.generation.provider = generation.provider;
        }
        if generation.output_dir != defaults.output_dir {
            base.generation.output_dir = generation.output_dir;
        }
        if generation.format != defaults.format {
            base.generation.format = generation.format;
        }
        if generation.parallel != defaults.parallel {
            base.generation.parallel = generation.parallel;
        }
        if generation.delay_ms != defaults.delay_ms {
            base.generation.delay_ms = generation.delay_ms;
        }
    }

    fn apply_env_overrides(config: &mut ConfigFile, env: impl Fn(&str) -> Option<String>) {
        let key = env("PIXFORGE_OPENAI_API_KEY").or_else(|| env("OPENAI_API_KEY"));
        if let Some(key) = key {
            let entry = config.providers.entry("openai".to_string()).or_default();
            entry.api_key = Some(key);
        }
        if let Some(url) = env("PIXFORGE_OPENAI_API_URL") {
            let entry = config.providers.entry("openai".to_string()).or_default();
            entry.api_url = Some(url);
        }
    }
}
