//! Model registry
//!
//! Describes what each image model accepts (sizes, qualities, styles,
//! transparency, formats, image count) so requests can be completed with
//! defaults and rejected locally before any network call. Also carries a
//! static per-image price table used for cost accounting.

use crate::provider::ImageRequest;
use pixforge_core::{ImageFormat, PixforgeError, Result};

/// Price of one image at a given size and quality, in USD
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Price {
    pub size: &'static str,
    pub quality: &'static str,
    pub usd: f64,
}

const fn price(size: &'static str, quality: &'static str, usd: f64) -> Price {
    Price { size, quality, usd }
}

/// Capabilities and defaults of a single model
#[derive(Debug, Clone)]
pub struct ModelCapabilities {
    pub id: &'static str,
    /// Name of the provider that serves this model
    pub provider: &'static str,
    pub description: &'static str,
    pub sizes: &'static [&'static str],
    pub qualities: &'static [&'static str],
    /// Empty when the model takes no style parameter
    pub styles: &'static [&'static str],
    pub formats: &'static [ImageFormat],
    pub supports_transparency: bool,
    pub max_images: u32,
    pub default_size: &'static str,
    pub default_quality: &'static str,
    pub default_style: Option<&'static str>,
    pub prices: &'static [Price],
}

const GPT_IMAGE_1: ModelCapabilities = ModelCapabilities {
    id: "gpt-image-1",
    provider: "openai",
    description: "Natively multimodal image model with transparency and webp/jpeg output",
    sizes: &["1024x1024", "1536x1024", "1024x1536", "auto"],
    qualities: &["low", "medium", "high", "auto"],
    styles: &[],
    formats: &[ImageFormat::Png, ImageFormat::Jpeg, ImageFormat::Webp],
    supports_transparency: true,
    max_images: 10,
    default_size: "1024x1024",
    default_quality: "auto",
    default_style: None,
    prices: &[
        price("1024x1024", "low", 0.011),
        price("1536x1024", "low", 0.016),
        price("1024x1536", "low", 0.016),
        price("1024x1024", "medium", 0.042),
        price("1536x1024", "medium", 0.063),
        price("1024x1536", "medium", 0.063),
        price("1024x1024", "high", 0.167),
        price("1536x1024", "high", 0.25),
        price("1024x1536", "high", 0.25),
    ],
};

const DALL_E_3: ModelCapabilities = ModelCapabilities {
    id: "dall-e-3",
    provider: "openai",
    description: "DALL-E 3, one image per request with vivid/natural styles",
    sizes: &["1024x1024", "1792x1024", "1024x1792"],
    qualities: &["standard", "hd"],
    styles: &["vivid", "natural"],
    formats: &[ImageFormat::Png],
    supports_transparency: false,
    max_images: 1,
    default_size: "1024x1024",
    default_quality: "standard",
    default_style: Some("vivid"),
    prices: &[
        price("1024x1024", "standard", 0.04),
        price("1792x1024", "standard", 0.08),
        price("1024x1792", "standard", 0.08),
        price("1024x1024", "hd", 0.08),
        price("1792x1024", "hd", 0.12),
        price("1024x1792", "hd", 0.12),
    ],
};

const DALL_E_2: ModelCapabilities = ModelCapabilities {
    id: "dall-e-2",
    provider: "openai",
    description: "DALL-E 2, small square images, up to 10 per request",
    sizes: &["256x256", "512x512", "1024x1024"],
    qualities: &["standard"],
    styles: &[],
    formats: &[ImageFormat::Png],
    supports_transparency: false,
    max_images: 10,
    default_size: "1024x1024",
    default_quality: "standard",
    default_style: None,
    prices: &[
        price("256x256", "standard", 0.016),
        price("512x512", "standard", 0.018),
        price("1024x1024", "standard", 0.02),
    ],
};

impl ModelCapabilities {
    /// Fill every unset option of the request with this model's default
    pub fn apply_defaults(&self, request: &mut ImageRequest) {
        if request.size.is_none() {
            request.size = Some(self.default_size.to_string());
        }
        if request.quality.is_none() {
            request.quality = Some(self.default_quality.to_string());
        }
        if request.style.is_none() {
            request.style = self.default_style.map(str::to_string);
        }
    }

    /// Check the request against this model's constraints
    pub fn validate(&self, request: &ImageRequest) -> Result<()> {
        if request.prompt.trim().is_empty() {
            return Err(invalid(self.id, "prompt is empty".to_string()));
        }

        if let Some(size) = request.size.as_deref() {
            check_allowed(self.id, "size", size, self.sizes)?;
        }
        if let Some(quality) = request.quality.as_deref() {
            check_allowed(self.id, "quality", quality, self.qualities)?;
        }
        if let Some(style) = request.style.as_deref() {
            if self.styles.is_empty() {
                return Err(invalid(self.id, format!("does not support styles (got '{}')", style)));
            }
            check_allowed(self.id, "style", style, self.styles)?;
        }

        if !self.formats.contains(&request.format) {
            return Err(invalid(
                self.id,
                format!("cannot produce {} output", request.format),
            ));
        }

        if request.transparent {
            if !self.supports_transparency {
                return Err(invalid(self.id, "does not support transparent backgrounds".to_string()));
            }
            if !request.format.supports_alpha() {
                return Err(invalid(
                    self.id,
                    format!("transparent background requires png or webp, not {}", request.format),
                ));
            }
        }

        if request.count == 0 || request.count > self.max_images {
            return Err(invalid(
                self.id,
                format!(
                    "image count must be between 1 and {}, got {}",
                    self.max_images, request.count
                ),
            ));
        }

        Ok(())
    }

    /// Cost of the request from the price table, `None` when size/quality are not priced
    pub fn estimate_cost(&self, request: &ImageRequest) -> Option<f64> {
        let size = request.size.as_deref()?;
        let quality = request.quality.as_deref()?;
        self.prices
            .iter()
            .find(|p| p.size == size && p.quality == quality)
            .map(|p| p.usd * f64::from(request.count))
    }
}

fn check_allowed(model: &str, what: &str, value: &str, allowed: &[&str]) -> Result<()> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(invalid(
            model,
            format!("unsupported {} '{}' (supported: {})", what, value, allowed.join(", ")),
        ))
    }
}

fn invalid(model: &str, detail: String) -> PixforgeError {
    PixforgeError::ValidationFailed(format!("{}: {}", model, detail))
}

/// Lookup table of known models
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: Vec<ModelCapabilities>,
}

impl ModelRegistry {
    /// Registry with the built-in OpenAI image models
    pub fn builtin() -> Self {
        Self {
            models: vec![GPT_IMAGE_1, DALL_E_3, DALL_E_2],
        }
    }

    /// Look up a model by id
    pub fn resolve(&self, id: &str) -> Option<&ModelCapabilities> {
        self.models.iter().find(|m| m.id == id)
    }

    /// Ids of every registered model, in registration order
    pub fn ids(&self) -> Vec<&'static str> {
        self.models.iter().map(|m| m.id).collect()
    }

    /// Iterate over registered models
    pub fn iter(&self) -> impl Iterator<Item = &ModelCapabilities> {
        self.models.iter()
    }

    /// Resolve the request's model, fill defaults and validate in one step
    pub fn prepare(&self, request: &mut ImageRequest) -> Result<&ModelCapabilities> {
        let caps = self
            .resolve(&request.model)
            .ok_or_else(|| PixforgeError::ModelUnknown(request.model.clone()))?;
        caps.apply_defaults(request);
        caps.validate(request)?;
        Ok(caps)
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
