//! Implementation of the `kiln clean` command.

use std::path::Path;
use std::time::Instant;

use anyhow::Result;

use kiln_lib::pipeline::Pipeline;

use crate::output::{OutputFormat, print_json, write_clean};

pub fn cmd_clean(manifest: &Path, all: bool, output: OutputFormat) -> Result<()> {
  let start = Instant::now();
  let pipeline = Pipeline::from_env()?;
  let report = pipeline.clean(manifest, all)?;

  if output.is_json() {
    print_json(&report)?;
  } else {
    write_clean(&mut std::io::stdout().lock(), &report, start.elapsed())?;
  }
  Ok(())
}
