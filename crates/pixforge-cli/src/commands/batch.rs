//! Batch generation from a manifest

use super::{build_options, ctrl_c_token, load_config, provider_for, CommonArgs};
use anyhow::{Context, Result};
use pixforge_gen::record::RECORD_FILE_NAME;
use pixforge_gen::{manifest, FsSaver, PixforgeConfig, Processor, RunRecord};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(clap::Args, Debug)]
pub struct BatchArgs {
    /// Manifest file: one prompt per line, or a JSON array of items
    pub manifest: PathBuf,

    /// Maximum number of images generated at once
    #[arg(long, short)]
    pub parallel: Option<usize>,

    /// Stop starting new items after the first failure
    #[arg(long)]
    pub stop_on_error: bool,

    /// Milliseconds to wait between starting items
    #[arg(long)]
    pub delay_ms: Option<u64>,

    /// Do not write pixforge-run.toml to the output directory
    #[arg(long)]
    pub no_record: bool,

    #[command(flatten)]
    pub common: CommonArgs,
}

pub async fn run(args: BatchArgs) -> Result<()> {
    run_with_config(args, &load_config()).await
}

pub async fn run_with_config(args: BatchArgs, config: &PixforgeConfig) -> Result<()> {
    let items = manifest::parse_file(&args.manifest)
        .with_context(|| format!("Failed to read manifest {}", args.manifest.display()))?;

    let mut options = build_options(config, &args.common);
    if let Some(parallel) = args.parallel {
        options.parallel = parallel;
    }
    if let Some(delay_ms) = args.delay_ms {
        options.delay_ms = delay_ms;
    }
    options.stop_on_error = args.stop_on_error;

    let provider = provider_for(config, &args.common)?;
    let provider_name = provider.name().to_string();

    println!(
        "Processing {} prompts with {} via {} (parallel: {})",
        items.len(),
        options.default_model,
        provider_name,
        options.parallel.max(1)
    );

    let processor =
        Processor::new(provider, Arc::new(FsSaver), options).with_progress(std::io::stdout());
    let outcome = processor.process(&items, &ctrl_c_token()).await;

    println!();
    println!("{}", outcome.summary());

    if !args.no_record {
        let record = RunRecord::from_outcome(&provider_name, processor.options(), &outcome);
        let path = processor.options().output_dir.join(RECORD_FILE_NAME);
        match record.save(&path) {
            Ok(()) => println!("Run record: {}", path.display()),
            Err(e) => eprintln!("Warning: Could not write run record: {}", e),
        }
    }

    if let Some(err) = outcome.error {
        let skipped = items.len() - outcome.results.len();
        anyhow::bail!("{} ({} items not started)", err, skipped);
    }
    Ok(())
}
