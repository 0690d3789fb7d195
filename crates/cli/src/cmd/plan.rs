//! Implementation of the `kiln plan` command.
//!
//! Resolves the manifest for each target architecture and shows the build
//! order with fingerprints and cache status. Nothing is fetched or built.

use anyhow::Result;

use kiln_lib::pipeline::{Pipeline, PipelineOptions};

use crate::output::{OutputFormat, print_json, write_plan};

pub fn cmd_plan(options: &PipelineOptions, output: OutputFormat) -> Result<()> {
  let pipeline = Pipeline::from_env()?;
  let report = pipeline.plan(options)?;

  if output.is_json() {
    return print_json(&report);
  }
  write_plan(&mut std::io::stdout().lock(), &report)?;
  Ok(())
}
