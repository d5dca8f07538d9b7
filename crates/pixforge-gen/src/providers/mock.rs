//! Mock provider for testing and dry runs
//!
//! Renders solid-color images locally without any network calls. The color
//! is derived from the prompt so different items produce distinguishable
//! files, and the reported cost is what the real model would have charged.

use crate::models::ModelRegistry;
use crate::provider::*;
use async_trait::async_trait;
use pixforge_core::{ImageFormat, PixforgeError, Result};
use std::io::Cursor;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const DEFAULT_SIDE: u32 = 64;

/// A provider that generates placeholder images locally
#[derive(Default)]
pub struct MockProvider {
    latency: Option<Duration>,
    registry: ModelRegistry,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a slow remote call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }
}

#[async_trait]
impl ImageProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn health_check(&self) -> Result<ProviderStatus> {
        Ok(ProviderStatus::Available)
    }

    async fn generate(
        &self,
        request: &ImageRequest,
        cancel: &CancellationToken,
    ) -> Result<ImageResponse> {
        if let Some(latency) = self.latency {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PixforgeError::RunCancelled),
                _ = tokio::time::sleep(latency) => {}
            }
        } else if cancel.is_cancelled() {
            return Err(PixforgeError::RunCancelled);
        }

        let (width, height) = request
            .dimensions()
            .unwrap_or((DEFAULT_SIDE, DEFAULT_SIDE));
        let images = (0..request.count)
            .map(|n| {
                let seed = format!("{}#{}", request.prompt, n);
                let bytes = render_solid(&seed, width, height, request.format, request.transparent)?;
                Ok(GeneratedImage {
                    bytes,
                    revised_prompt: None,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let cost = self
            .registry
            .resolve(&request.model)
            .and_then(|caps| caps.estimate_cost(request));

        Ok(ImageResponse { images, cost })
    }
}

/// Encode a single-color image in the requested format
fn render_solid(
    seed: &str,
    width: u32,
    height: u32,
    format: ImageFormat,
    transparent: bool,
) -> Result<Vec<u8>> {
    let hash_val = seed
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(u32::from(b)));
    let [_, r, g, b] = hash_val.to_be_bytes();
    let alpha = if transparent { 0 } else { 255 };

    let img = image::RgbaImage::from_pixel(width, height, image::Rgba([r, g, b, alpha]));
    let dynamic = match format {
        // The jpeg encoder has no alpha channel
        ImageFormat::Jpeg => image::DynamicImage::ImageRgb8(image::DynamicImage::ImageRgba8(img).to_rgb8()),
        _ => image::DynamicImage::ImageRgba8(img),
    };

    let target = match format {
        ImageFormat::Png => image::ImageFormat::Png,
        ImageFormat::Jpeg => image::ImageFormat::Jpeg,
        ImageFormat::Webp => image::ImageFormat::WebP,
    };

    let mut bytes = Vec::new();
    dynamic
        .write_to(&mut Cursor::new(&mut bytes), target)
        .map_err(|e| PixforgeError::GenerationFailed(format!("Failed to encode {}: {}", format, e)))?;
    Ok(bytes)
}
