use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::recipe::RecipeId;
use crate::util::hash::Fingerprint;

/// Steps a recipe goes through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
  Fetch,
  Patch,
  Configure,
  Compile,
  Install,
  /// Recording the finished output in the cache.
  Cache,
}

impl Stage {
  pub fn as_str(&self) -> &'static str {
    match self {
      Stage::Fetch => "fetch",
      Stage::Patch => "patch",
      Stage::Configure => "configure",
      Stage::Compile => "compile",
      Stage::Install => "install",
      Stage::Cache => "cache",
    }
  }
}

impl fmt::Display for Stage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
  /// A stage of one recipe failed. Never retried.
  #[error("{recipe}: {stage} stage failed: {cause}")]
  RecipeBuildError {
    recipe: String,
    stage: Stage,
    cause: String,
    /// Exit code of the failing tool, if one ran.
    code: Option<i32>,
    /// Everything the tool printed, verbatim.
    output: String,
  },

  #[error("{recipe} skipped: dependency {dependency} failed")]
  DependencyFailed { recipe: String, dependency: String },

  #[error("failed to fingerprint {recipe}: {message}")]
  Fingerprint { recipe: String, message: String },

  #[error("{recipe} depends on toolchain {toolchain}, which was not provisioned")]
  MissingToolchain { recipe: String, toolchain: String },

  #[error("build cancelled")]
  Cancelled,

  #[error("failed to compose staging root {path}: {source}")]
  Staging {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

impl BuildError {
  pub(crate) fn stage(recipe: &RecipeId, stage: Stage, cause: impl fmt::Display) -> Self {
    BuildError::RecipeBuildError {
      recipe: recipe.to_string(),
      stage,
      cause: cause.to_string(),
      code: None,
      output: String::new(),
    }
  }

  /// Captured tool output, empty when there is none.
  pub fn output(&self) -> &str {
    match self {
      BuildError::RecipeBuildError { output, .. } => output,
      _ => "",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipeOutcome {
  Built,
  Cached,
}

/// A recipe whose output is available in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecipeResult {
  pub id: RecipeId,
  pub fingerprint: Fingerprint,
  /// The `out/` directory of the cache entry.
  pub out_dir: PathBuf,
  pub outcome: RecipeOutcome,
  #[serde(with = "duration_ms")]
  pub duration: Duration,
}

/// Result of building one plan.
#[derive(Debug, Default, Serialize)]
pub struct BuildReport {
  /// Set once every recipe succeeded and the staging root was composed.
  pub staging_root: Option<PathBuf>,
  /// Successful recipes in plan order.
  pub recipes: Vec<RecipeResult>,
  #[serde(serialize_with = "serialize_errors")]
  pub failures: Vec<BuildError>,
  #[serde(serialize_with = "serialize_errors")]
  pub skipped: Vec<BuildError>,
}

impl BuildReport {
  pub fn is_success(&self) -> bool {
    self.failures.is_empty() && self.skipped.is_empty()
  }

  pub fn built(&self) -> usize {
    self.recipes.iter().filter(|r| r.outcome == RecipeOutcome::Built).count()
  }

  pub fn cached(&self) -> usize {
    self.recipes.iter().filter(|r| r.outcome == RecipeOutcome::Cached).count()
  }

  pub fn get(&self, name: &str) -> Option<&RecipeResult> {
    self.recipes.iter().find(|r| r.id.name == name)
  }
}

/// Engine settings that do not come from the plan.
#[derive(Debug, Clone)]
pub struct BuildConfig {
  /// Maximum number of recipes built at once.
  pub workers: usize,
  /// Value of `KILN_JOBS` handed to stage scripts.
  pub jobs: usize,
  /// Where the staged outputs of a successful plan are merged.
  pub staging_root: PathBuf,
  /// Appended to the toolchain `bin` dirs in the stage `PATH`.
  pub host_path: String,
}

impl BuildConfig {
  pub fn new(staging_root: impl Into<PathBuf>, workers: usize) -> Self {
    let jobs = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    Self {
      workers: workers.max(1),
      jobs,
      staging_root: staging_root.into(),
      host_path: std::env::var("PATH").unwrap_or_default(),
    }
  }
}

fn serialize_errors<S: serde::Serializer>(errors: &[BuildError], serializer: S) -> Result<S::Ok, S::Error> {
  serializer.collect_seq(errors.iter().map(|e| e.to_string()))
}

pub(crate) mod duration_ms {
  use std::time::Duration;

  pub fn serialize<S: serde::Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
  }
}
