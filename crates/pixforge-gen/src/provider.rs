//! Image provider trait and request/response types

use async_trait::async_trait;
use pixforge_core::{ImageFormat, Result};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// A request for one or more images from a single prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRequest {
    /// Model id, e.g. "gpt-image-1"
    pub model: String,
    pub prompt: String,
    /// Size as "WIDTHxHEIGHT" (or "auto" where the model allows it)
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub quality: Option<String>,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub format: ImageFormat,
    /// Ask for a transparent background
    #[serde(default)]
    pub transparent: bool,
    /// Number of images to generate
    #[serde(default = "default_count")]
    pub count: u32,
}

fn default_count() -> u32 {
    1
}

impl ImageRequest {
    /// A single png image with every option left to the model defaults
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            size: None,
            quality: None,
            style: None,
            format: ImageFormat::default(),
            transparent: false,
            count: default_count(),
        }
    }

    /// Width and height parsed from `size`, `None` for "auto" or when unset
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        let (w, h) = self.size.as_deref()?.split_once('x')?;
        Some((w.parse().ok()?, h.parse().ok()?))
    }
}

/// One generated image
#[derive(Debug, Clone)]
pub struct GeneratedImage {
    /// Encoded image bytes in the requested format
    pub bytes: Vec<u8>,
    /// Prompt as rewritten by the service, if it reports one
    pub revised_prompt: Option<String>,
}

/// Everything a provider returns for a request
#[derive(Debug, Clone, Default)]
pub struct ImageResponse {
    pub images: Vec<GeneratedImage>,
    /// Cost in USD, when known
    pub cost: Option<f64>,
}

/// Status returned by a provider health check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderStatus {
    Available,
    Unavailable(String),
    NoApiKey,
}

/// Trait implemented by each image generation backend (OpenAI, Mock)
#[async_trait]
pub trait ImageProvider: Send + Sync {
    /// Provider name (e.g. "openai", "mock")
    fn name(&self) -> &str;

    /// Check whether the provider can be used (API key set, service reachable)
    fn health_check(&self) -> Result<ProviderStatus>;

    /// Generate images for a validated request.
    ///
    /// Implementations must return promptly with `PixforgeError::RunCancelled`
    /// once `cancel` fires.
    async fn generate(
        &self,
        request: &ImageRequest,
        cancel: &CancellationToken,
    ) -> Result<ImageResponse>;
}
