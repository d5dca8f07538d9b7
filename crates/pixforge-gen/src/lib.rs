//! Pixforge Gen - image generation pipeline
//!
//! Model registry and request validation, pluggable providers (OpenAI, Mock),
//! manifest parsing, and the batch processor that drives many prompts through
//! generation with bounded concurrency, cancellation and stop-on-error.

pub mod batch;
pub mod config;
pub mod filename;
pub mod manifest;
pub mod models;
pub mod provider;
pub mod providers;
pub mod record;
pub mod saver;

pub use batch::{summarize, BatchOptions, BatchOutcome, Item, ItemResult, Processor, SavedImage};
pub use config::PixforgeConfig;
pub use models::{ModelCapabilities, ModelRegistry};
pub use provider::{
    GeneratedImage, ImageProvider, ImageRequest, ImageResponse, ProviderStatus,
};
pub use record::RunRecord;
pub use saver::{FsSaver, ImageSaver};
