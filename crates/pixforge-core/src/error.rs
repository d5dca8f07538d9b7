//! Error types for pixforge

use thiserror::Error;

/// The main error type for pixforge operations.
///
/// `ModelUnknown`, `ValidationFailed`, `GenerationFailed` and `PersistFailed`
/// describe a single item and end up attached to that item's result.
/// `RunAborted` and `RunCancelled` describe a whole batch run.
#[derive(Debug, Error)]
pub enum PixforgeError {
    #[error("Manifest contains no usable items: {0}")]
    ManifestEmpty(String),

    #[error("Unknown model: {0}")]
    ModelUnknown(String),

    #[error("Validation error: {0}")]
    ValidationFailed(String),

    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("Failed to save image: {0}")]
    PersistFailed(String),

    #[error("Run aborted after item {index} failed")]
    RunAborted { index: u32 },

    #[error("Run cancelled")]
    RunCancelled,

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    #[error("TOML serialization error: {0}")]
    TomlSer(String),
}

impl PixforgeError {
    /// True for the errors that end a whole run rather than a single item
    pub fn is_run_level(&self) -> bool {
        matches!(
            self,
            PixforgeError::RunAborted { .. } | PixforgeError::RunCancelled
        )
    }
}

/// Result type alias for pixforge operations
pub type Result<T> = std::result::Result<T, PixforgeError>;

impl From<toml::de::Error> for PixforgeError {
    fn from(err: toml::de::Error) -> Self {
        PixforgeError::TomlParse(err.to_string())
    }
}

impl From<toml::ser::Error> for PixforgeError {
    fn from(err: toml::ser::Error) -> Self {
        PixforgeError::TomlSer(err.to_string())
    }
}
