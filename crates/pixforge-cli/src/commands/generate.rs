//! Single-image generation

use super::{build_options, ctrl_c_token, load_config, provider_for, CommonArgs};
use anyhow::Result;
use pixforge_gen::{FsSaver, Item, Processor};
use std::sync::Arc;

#[derive(clap::Args, Debug)]
pub struct GenerateArgs {
    /// Text prompt describing the image
    pub prompt: String,

    /// Image size, e.g. 1024x1024
    #[arg(long)]
    pub size: Option<String>,

    /// Quality level (model dependent: low/medium/high, standard/hd)
    #[arg(long)]
    pub quality: Option<String>,

    /// Style (dall-e-3 only: vivid, natural)
    #[arg(long)]
    pub style: Option<String>,

    #[command(flatten)]
    pub common: CommonArgs,
}

pub async fn run(args: GenerateArgs) -> Result<()> {
    let config = load_config();
    let options = build_options(&config, &args.common);
    let provider = provider_for(&config, &args.common)?;

    let item = Item {
        size: args.size,
        quality: args.quality,
        style: args.style,
        ..Item::new(1, args.prompt)
    };

    println!(
        "Generating with {} via {}...",
        item.model.as_deref().unwrap_or(&options.default_model),
        provider.name()
    );

    let processor = Processor::new(provider, Arc::new(FsSaver), options);
    let outcome = processor
        .process(std::slice::from_ref(&item), &ctrl_c_token())
        .await;

    if let Some(err) = outcome.error {
        anyhow::bail!(err);
    }

    let result = outcome
        .results
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("No result produced"))?;
    let saved = result.outcome?;

    println!("  Saved: {}", saved.path.display());
    println!("  Hash: {}", saved.content_hash);
    if let Some(revised) = &saved.revised_prompt {
        println!("  Revised prompt: {}", revised);
    }
    if saved.cost > 0.0 {
        println!("  Cost: ${:.3}", saved.cost);
    }
    Ok(())
}
