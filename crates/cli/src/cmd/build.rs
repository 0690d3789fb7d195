//! Implementation of the `kiln build` command.
//!
//! Runs the full pipeline for every target architecture and prints where the
//! packages were written.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::info;

use kiln_lib::consts::DEFAULT_MANIFEST;
use kiln_lib::package::BuildMode;
use kiln_lib::pipeline::{Pipeline, PipelineOptions};
use kiln_lib::platform::TargetArch;

use crate::output::{OutputFormat, print_json, write_report};

/// Flags shared by `build` and `deploy`.
#[derive(Debug, Clone, Args)]
pub struct BuildArgs {
  /// Path to the manifest
  #[arg(short = 'f', long = "file", default_value = DEFAULT_MANIFEST)]
  pub manifest: PathBuf,

  /// Target architecture, repeatable (default: app.android.archs)
  #[arg(short, long = "arch", value_name = "ARCH")]
  pub archs: Vec<TargetArch>,

  /// Build a signed release package
  #[arg(long)]
  pub release: bool,

  /// Discard the build dir and every cache entry before building
  #[arg(long)]
  pub clean: bool,

  /// Reject unknown manifest keys
  #[arg(long)]
  pub strict: bool,

  /// Maximum number of parallel workers
  #[arg(short = 'j', long)]
  pub workers: Option<usize>,
}

impl BuildArgs {
  pub fn options(&self) -> PipelineOptions {
    PipelineOptions {
      manifest_path: self.manifest.clone(),
      archs: self.archs.clone(),
      mode: if self.release { BuildMode::Release } else { BuildMode::Debug },
      clean: self.clean,
      strict: self.strict,
      workers: self.workers,
    }
  }
}

pub async fn cmd_build(args: &BuildArgs, output: OutputFormat, cancel: CancellationToken) -> Result<()> {
  let pipeline = Pipeline::from_env()?.with_cancellation(cancel);
  let report = pipeline.run(&args.options()).await?;
  info!(
    package = %report.package_id,
    archs = report.archs.len(),
    built = report.built(),
    cached = report.cached(),
    "build finished"
  );

  if output.is_json() {
    print_json(&report)?;
  } else {
    write_report(&mut std::io::stdout().lock(), &report)?;
  }
  Ok(())
}
