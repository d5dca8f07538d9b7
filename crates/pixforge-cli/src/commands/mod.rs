pub mod batch;
pub mod generate;
pub mod models;

use anyhow::{Context, Result};
use pixforge_core::ImageFormat;
use pixforge_gen::providers::create_provider;
use pixforge_gen::{BatchOptions, ImageProvider, PixforgeConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Flags shared by `generate` and `batch`, layered over the config file
#[derive(clap::Args, Debug, Default)]
pub struct CommonArgs {
    /// Output directory (defaults to generation.output_dir, "images")
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Model used when an item does not name one
    #[arg(long, short)]
    pub model: Option<String>,

    /// Output encoding: png, jpeg, webp
    #[arg(long)]
    pub format: Option<ImageFormat>,

    /// Provider to use (openai, mock)
    #[arg(long)]
    pub provider: Option<String>,

    /// Request a transparent background
    #[arg(long)]
    pub transparent: bool,
}

/// Load the layered config, falling back to defaults when no file is readable
pub fn load_config() -> PixforgeConfig {
    PixforgeConfig::load().unwrap_or_else(|e| {
        eprintln!("Warning: Could not load config, using defaults: {}", e);
        PixforgeConfig::default()
    })
}

/// Merge config defaults and command-line flags into run options
pub fn build_options(config: &PixforgeConfig, common: &CommonArgs) -> BatchOptions {
    let generation = &config.generation;
    BatchOptions {
        output_dir: common
            .output
            .clone()
            .unwrap_or_else(|| PathBuf::from(&generation.output_dir)),
        default_model: common
            .model
            .clone()
            .unwrap_or_else(|| generation.default_model.clone()),
        format: common.format.unwrap_or(generation.format),
        parallel: generation.parallel,
        stop_on_error: false,
        delay_ms: generation.delay_ms,
        transparent: common.transparent,
        count: 1,
    }
}

pub fn provider_for(config: &PixforgeConfig, common: &CommonArgs) -> Result<Arc<dyn ImageProvider>> {
    let name = common
        .provider
        .as_deref()
        .unwrap_or(&config.generation.provider);
    create_provider(name, config).with_context(|| format!("Failed to set up provider '{}'", name))
}

/// Token cancelled on the first Ctrl-C
pub fn ctrl_c_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling: no new items will start, waiting for running ones...");
            trigger.cancel();
        }
    });
    token
}
