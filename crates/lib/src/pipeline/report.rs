use std::path::PathBuf;
use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::build::BuildReport;
use crate::package::{BuildMode, PackageOutput};
use crate::platform::TargetArch;
use crate::toolchain::ToolchainHandle;

fn millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
  serializer.serialize_u64(duration.as_millis() as u64)
}

/// Wall time spent in each pipeline stage, summed over architectures.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StageTimings {
  #[serde(rename = "load_ms", serialize_with = "millis")]
  pub load: Duration,
  #[serde(rename = "resolve_ms", serialize_with = "millis")]
  pub resolve: Duration,
  #[serde(rename = "provision_ms", serialize_with = "millis")]
  pub provision: Duration,
  #[serde(rename = "build_ms", serialize_with = "millis")]
  pub build: Duration,
  #[serde(rename = "assemble_ms", serialize_with = "millis")]
  pub assemble: Duration,
}

impl StageTimings {
  pub fn total(&self) -> Duration {
    self.load + self.resolve + self.provision + self.build + self.assemble
  }
}

#[derive(Debug, Serialize)]
pub struct ArchReport {
  pub arch: TargetArch,
  /// Recipe identities in plan order.
  pub plan: Vec<String>,
  pub build: BuildReport,
  pub package: PackageOutput,
}

/// Outcome of a successful pipeline run.
#[derive(Debug, Serialize)]
pub struct PipelineReport {
  pub package_id: String,
  pub version: String,
  pub mode: BuildMode,
  pub warnings: Vec<String>,
  pub toolchains: Vec<ToolchainHandle>,
  pub archs: Vec<ArchReport>,
  /// Temporary entries of interrupted runs removed at start.
  pub swept: usize,
  pub timings: StageTimings,
  /// Artifact installed by `deploy`.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub deployed: Option<PathBuf>,
}

impl PipelineReport {
  pub fn built(&self) -> usize {
    self.archs.iter().map(|a| a.build.built()).sum()
  }

  pub fn cached(&self) -> usize {
    self.archs.iter().map(|a| a.build.cached()).sum()
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanEntry {
  pub id: String,
  pub kind: String,
  pub deps: Vec<String>,
  pub fingerprint: String,
  /// A valid cache entry exists for this fingerprint.
  pub cached: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchPlan {
  pub arch: TargetArch,
  pub ndk_api: u32,
  pub steps: Vec<PlanEntry>,
}

/// Output of `kiln plan`.
#[derive(Debug, Clone, Serialize)]
pub struct PlanReport {
  pub package_id: String,
  pub version: String,
  pub archs: Vec<ArchPlan>,
}
