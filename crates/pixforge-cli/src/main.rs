//! Pixforge CLI - generate images from text prompts

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{batch, generate, models};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pixforge")]
#[command(about = "Generate images from text prompts, one at a time or in batches", long_about = None)]
#[command(version)]
struct Cli {
    /// Log more to stderr (-v info, -vv debug). PIXFORGE_LOG overrides.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a single image from a prompt
    Generate(generate::GenerateArgs),

    /// Generate images for every prompt in a text or JSON manifest
    Batch(batch::BatchArgs),

    /// List supported models and their options
    Models,
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_env("PIXFORGE_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(async move {
        match cli.command {
            Commands::Generate(args) => generate::run(args).await,
            Commands::Batch(args) => batch::run(args).await,
            Commands::Models => models::run(),
        }
    });
    // Requests abandoned on Ctrl-C keep running on the blocking pool
    runtime.shutdown_timeout(Duration::from_millis(500));
    result
}
