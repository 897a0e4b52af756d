//! spokkle: builds the assets listed in a JSON5 manifest.
//!
//! ```bash
//! # Build everything that changed since the last run
//! spokkle assets/manifest.json5
//!
//! # Write outputs somewhere else and rebuild from scratch
//! spokkle -o build/assets -f assets/manifest.json5
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

use anyhow::bail;
use clap::Parser;
use spokk_assets::{paths, BuildOptions, Manifest, ManifestBuilder};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "spokkle", version, about = "Build the assets listed in a JSON5 manifest")]
struct Cli {
    /// Output root, overriding the manifest's `defaults.output_root`
    #[arg(short, long, value_name = "DIR")]
    output_root: Option<PathBuf>,

    /// Rebuild every asset even if its output is up to date
    #[arg(short, long)]
    force_rebuild: bool,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,

    /// Manifest file
    manifest: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    let output_root = cli
        .output_root
        .as_deref()
        .map(paths::absolute)
        .transpose()?;
    let manifest = Manifest::load(&cli.manifest)?;
    let total = manifest.asset_count();

    let mut builder = ManifestBuilder::new(
        manifest,
        BuildOptions {
            output_root,
            force_rebuild: cli.force_rebuild,
        },
    );
    let summary = builder.build();
    if !summary.is_success() {
        bail!("{} of {total} assets failed", summary.failed);
    }
    Ok(())
}
