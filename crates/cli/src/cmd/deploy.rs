//! Implementation of the `kiln deploy` command.

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use kiln_lib::pipeline::{DeployConfig, Pipeline};

use super::build::BuildArgs;
use crate::output::{Marker, OutputFormat, print_json, status, write_report};

/// Build, then install the first architecture's package on a device.
pub async fn cmd_deploy(
  args: &BuildArgs,
  serial: Option<String>,
  output: OutputFormat,
  cancel: CancellationToken,
) -> Result<()> {
  let pipeline = Pipeline::from_env()?.with_cancellation(cancel);
  let config = DeployConfig::from_env(serial);
  let report = pipeline.deploy(&args.options(), &config).await?;

  if output.is_json() {
    print_json(&report)?;
  } else {
    write_report(&mut std::io::stdout().lock(), &report)?;
    if let Some(artifact) = &report.deployed {
      println!();
      status(Marker::Done, &format!("Installed {}", artifact.display()));
    }
  }
  Ok(())
}
