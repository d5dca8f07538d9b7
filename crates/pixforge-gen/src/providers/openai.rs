//! OpenAI image generation provider
//!
//! Calls `POST {api_url}/images/generations` with the blocking `ureq` client on
//! tokio's blocking pool, racing the call against the run's cancellation token.
//! Images come back either inline as base64 or as short-lived URLs that are
//! downloaded before returning.

use crate::config::PixforgeConfig;
use crate::models::ModelRegistry;
use crate::provider::*;
use async_trait::async_trait;
use base64::Engine as _;
use pixforge_core::{PixforgeError, Result};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
const REQUEST_TIMEOUT_SECS: u64 = 180;
const MAX_RETRIES: usize = 3;
const RETRY_BASE_DELAY_MS: u64 = 500;
const MAX_BODY_BYTES: u64 = 64 * 1024 * 1024;

/// Provider for the OpenAI Images API
pub struct OpenAiProvider {
    client: Client,
    registry: ModelRegistry,
}

/// Connection details, cloned into each blocking request task
#[derive(Clone)]
struct Client {
    api_key: String,
    api_url: String,
}

/// Image payload as returned by the API, before decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageData {
    Base64(String),
    Url(String),
}

impl OpenAiProvider {
    pub fn from_config(config: &PixforgeConfig) -> Result<Self> {
        let api_key = config
            .api_key("openai")
            .ok_or_else(|| {
                PixforgeError::Config(
                    "OpenAI API key not configured. Set PIXFORGE_OPENAI_API_KEY or add it to .pixforge/config.toml".to_string(),
                )
            })?
            .to_string();

        let api_url = config
            .api_url("openai")
            .unwrap_or(DEFAULT_OPENAI_URL)
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client: Client { api_key, api_url },
            registry: ModelRegistry::builtin(),
        })
    }
}

/// Request body for the generations endpoint
pub fn build_payload(request: &ImageRequest) -> serde_json::Value {
    let mut payload = serde_json::json!({
        "model": request.model,
        "prompt": request.prompt,
        "n": request.count,
    });

    if let Some(size) = &request.size {
        payload["size"] = serde_json::json!(size);
    }
    if let Some(quality) = &request.quality {
        payload["quality"] = serde_json::json!(quality);
    }
    if let Some(style) = &request.style {
        payload["style"] = serde_json::json!(style);
    }

    if request.model.starts_with("gpt-image") {
        // Always answers with base64 and takes the encoding as a parameter
        payload["output_format"] = serde_json::json!(request.format.extension());
        if request.transparent {
            payload["background"] = serde_json::json!("transparent");
        }
    } else {
        payload["response_format"] = serde_json::json!("b64_json");
    }

    payload
}

/// Extract image payloads and revised prompts from a generations response
pub fn parse_images_response(
    response: &serde_json::Value,
) -> Result<Vec<(ImageData, Option<String>)>> {
    let data = response
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| {
            PixforgeError::GenerationFailed(format!(
                "Unexpected OpenAI response format: {}",
                serde_json::to_string(response).unwrap_or_default()
            ))
        })?;

    data.iter()
        .map(|entry| {
            let revised = entry
                .get("revised_prompt")
                .and_then(|p| p.as_str())
                .map(str::to_string);
            let image = if let Some(b64) = entry.get("b64_json").and_then(|v| v.as_str()) {
                ImageData::Base64(b64.to_string())
            } else if let Some(url) = entry.get("url").and_then(|v| v.as_str()) {
                ImageData::Url(url.to_string())
            } else {
                return Err(PixforgeError::GenerationFailed(
                    "Response entry has neither b64_json nor url".to_string(),
                ));
            };
            Ok((image, revised))
        })
        .collect()
}

fn api_error_message(body: &serde_json::Value) -> Option<&str> {
    body.get("error")
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
}

impl Client {
    fn generate_blocking(&self, payload: &serde_json::Value) -> Result<Vec<GeneratedImage>> {
        let response = self.post_json_with_retry(payload)?;
        parse_images_response(&response)?
            .into_iter()
            .map(|(data, revised_prompt)| {
                let bytes = match data {
                    ImageData::Base64(b64) => base64::engine::general_purpose::STANDARD
                        .decode(b64.as_bytes())
                        .map_err(|e| {
                            PixforgeError::GenerationFailed(format!(
                                "Invalid base64 image data: {}",
                                e
                            ))
                        })?,
                    ImageData::Url(url) => self.download_bytes_with_retry(&url)?,
                };
                Ok(GeneratedImage {
                    bytes,
                    revised_prompt,
                })
            })
            .collect()
    }

    fn post_json_with_retry(&self, payload: &serde_json::Value) -> Result<serde_json::Value> {
        let url = format!("{}/images/generations", self.api_url);
        let agent = build_agent();

        for attempt in 0..MAX_RETRIES {
            let response = agent
                .post(&url)
                .header("Authorization", &format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .send_json(payload);

            let retry_reason = match response {
                Ok(mut ok) => {
                    let status = ok.status().as_u16();
                    let body: serde_json::Value = ok
                        .body_mut()
                        .with_config()
                        .limit(MAX_BODY_BYTES)
                        .read_json()
                        .map_err(|e| {
                            PixforgeError::GenerationFailed(format!(
                                "Failed to parse OpenAI response: {}",
                                e
                            ))
                        })?;

                    if (200..300).contains(&status) {
                        return Ok(body);
                    }

                    let message = format!(
                        "OpenAI API returned {}: {}",
                        status,
                        api_error_message(&body).unwrap_or("no error message")
                    );
                    if !is_retryable_status(status) {
                        return Err(PixforgeError::GenerationFailed(message));
                    }
                    message
                }
                Err(e) => {
                    if !is_retryable_error(&e) {
                        return Err(PixforgeError::GenerationFailed(format!(
                            "OpenAI API request failed: {}",
                            e
                        )));
                    }
                    format!("OpenAI API request failed: {}", e)
                }
            };

            if attempt + 1 == MAX_RETRIES {
                return Err(PixforgeError::GenerationFailed(retry_reason));
            }
            tracing::warn!(attempt = attempt + 1, reason = %retry_reason, "retrying image request");
            sleep_backoff(attempt);
        }

        Err(PixforgeError::GenerationFailed(
            "OpenAI API request failed after retries".to_string(),
        ))
    }

    fn download_bytes_with_retry(&self, url: &str) -> Result<Vec<u8>> {
        let agent = build_agent();

        for attempt in 0..MAX_RETRIES {
            match agent.get(url).call() {
                Ok(mut ok) if ok.status().is_success() => {
                    return ok
                        .body_mut()
                        .with_config()
                        .limit(MAX_BODY_BYTES)
                        .read_to_vec()
                        .map_err(|e| {
                            PixforgeError::GenerationFailed(format!(
                                "Failed to read image data: {}",
                                e
                            ))
                        });
                }
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt + 1 < MAX_RETRIES && is_retryable_status(status) {
                        sleep_backoff(attempt);
                        continue;
                    }
                    return Err(PixforgeError::GenerationFailed(format!(
                        "Image download returned {}",
                        status
                    )));
                }
                Err(e) => {
                    if attempt + 1 < MAX_RETRIES && is_retryable_error(&e) {
                        sleep_backoff(attempt);
                        continue;
                    }
                    return Err(PixforgeError::GenerationFailed(format!(
                        "Failed to download image: {}",
                        e
                    )));
                }
            }
        }

        Err(PixforgeError::GenerationFailed(
            "Image download failed after retries".to_string(),
        ))
    }
}

fn build_agent() -> ureq::Agent {
    let config = ureq::Agent::config_builder()
        .timeout_global(Some(Duration::from_secs(REQUEST_TIMEOUT_SECS)))
        .http_status_as_error(false)
        .build();
    config.into()
}

fn is_retryable_status(code: u16) -> bool {
    matches!(code, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(e: &ureq::Error) -> bool {
    match e {
        ureq::Error::Timeout(_)
        | ureq::Error::Io(_)
        | ureq::Error::ConnectionFailed
        | ureq::Error::HostNotFound => true,
        ureq::Error::StatusCode(code) => is_retryable_status(*code),
        _ => false,
    }
}

fn sleep_backoff(attempt: usize) {
    let delay_ms = RETRY_BASE_DELAY_MS.saturating_mul(1u64 << attempt);
    std::thread::sleep(Duration::from_millis(delay_ms));
}

#[async_trait]
impl ImageProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn health_check(&self) -> Result<ProviderStatus> {
        if self.client.api_key.is_empty() {
            return Ok(ProviderStatus::NoApiKey);
        }
        Ok(ProviderStatus::Available)
    }

    async fn generate(
        &self,
        request: &ImageRequest,
        cancel: &CancellationToken,
    ) -> Result<ImageResponse> {
        if cancel.is_cancelled() {
            return Err(PixforgeError::RunCancelled);
        }

        let payload = build_payload(request);
        let client = self.client.clone();
        let task = tokio::task::spawn_blocking(move || client.generate_blocking(&payload));

        // The blocking call cannot be interrupted; on cancellation it finishes
        // in the background and its result is dropped.
        let images = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PixforgeError::RunCancelled),
            joined = task => joined.map_err(|e| {
                PixforgeError::GenerationFailed(format!("Request task failed: {}", e))
            })??,
        };

        let cost = self
            .registry
            .resolve(&request.model)
            .and_then(|caps| caps.estimate_cost(request));

        Ok(ImageResponse { images, cost })
    }
}
