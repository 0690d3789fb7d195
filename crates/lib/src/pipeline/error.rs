use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::build::BuildError;
use crate::manifest::ManifestError;
use crate::package::AssembleError;
use crate::platform::TargetArch;
use crate::platform::paths::NoCacheDir;
use crate::recipe::RecipeError;
use crate::resolve::ResolveError;
use crate::store_lock::StoreLockError;
use crate::toolchain::ProvisionError;

/// Failure classes, each with its own process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
  Other,
  Validation,
  Resolution,
  Provisioning,
  Build,
  Assembly,
  Deploy,
  Interrupted,
}

impl ErrorCategory {
  pub fn exit_code(&self) -> i32 {
    match self {
      ErrorCategory::Other => 1,
      ErrorCategory::Validation => 2,
      ErrorCategory::Resolution => 3,
      ErrorCategory::Provisioning => 4,
      ErrorCategory::Build => 5,
      ErrorCategory::Assembly => 6,
      ErrorCategory::Deploy => 7,
      ErrorCategory::Interrupted => 130,
    }
  }
}

/// One reportable failure with the tool output that explains it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
  pub message: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub output: Option<String>,
}

impl Diagnostic {
  fn new(message: impl Into<String>, output: Option<&str>) -> Self {
    Self {
      message: message.into(),
      output: output.filter(|o| !o.trim().is_empty()).map(str::to_string),
    }
  }
}

#[derive(Debug, Error)]
pub enum PipelineError {
  #[error(transparent)]
  Manifest(#[from] ManifestError),

  #[error(transparent)]
  Recipes(#[from] RecipeError),

  #[error("no target architecture: set app.android.archs or pass --arch")]
  NoArchitectures,

  #[error("{}", resolve_summary(.failures))]
  Resolve { failures: Vec<(TargetArch, ResolveError)> },

  #[error("{} toolchain(s) could not be provisioned", .errors.len())]
  Provision { errors: Vec<ProvisionError> },

  #[error("{} recipe(s) failed to build", .failures.iter().filter(|(_, e)| !matches!(e, BuildError::DependencyFailed { .. })).count())]
  Build { failures: Vec<(TargetArch, BuildError)> },

  #[error("assembly failed for {arch}: {source}")]
  Assemble {
    arch: TargetArch,
    #[source]
    source: AssembleError,
  },

  #[error("deploy of {} failed: {message}", .artifact.display())]
  Deploy {
    artifact: PathBuf,
    message: String,
    output: String,
  },

  #[error(transparent)]
  Lock(#[from] StoreLockError),

  #[error(transparent)]
  CacheDir(#[from] NoCacheDir),

  #[error("I/O error at {}: {source}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("interrupted")]
  Interrupted,
}

impl PipelineError {
  pub fn category(&self) -> ErrorCategory {
    match self {
      PipelineError::Manifest(_) | PipelineError::Recipes(_) | PipelineError::NoArchitectures => {
        ErrorCategory::Validation
      }
      PipelineError::Resolve { .. } => ErrorCategory::Resolution,
      PipelineError::Provision { .. } => ErrorCategory::Provisioning,
      PipelineError::Build { .. } => ErrorCategory::Build,
      PipelineError::Assemble { .. } => ErrorCategory::Assembly,
      PipelineError::Deploy { .. } => ErrorCategory::Deploy,
      PipelineError::Interrupted => ErrorCategory::Interrupted,
      PipelineError::Lock(_) | PipelineError::CacheDir(_) | PipelineError::Io { .. } => ErrorCategory::Other,
    }
  }

  pub fn exit_code(&self) -> i32 {
    self.category().exit_code()
  }

  /// Every individual failure behind this error, in report order.
  pub fn diagnostics(&self) -> Vec<Diagnostic> {
    match self {
      PipelineError::Resolve { failures } => failures
        .iter()
        .map(|(arch, e)| Diagnostic::new(format!("[{}] {}", arch, e), None))
        .collect(),
      PipelineError::Provision { errors } => errors.iter().map(|e| Diagnostic::new(e.to_string(), None)).collect(),
      PipelineError::Build { failures } => failures
        .iter()
        .map(|(arch, e)| Diagnostic::new(format!("[{}] {}", arch, e), Some(e.output())))
        .collect(),
      PipelineError::Assemble { arch, source } => {
        vec![Diagnostic::new(format!("[{}] {}", arch, source), source.output())]
      }
      PipelineError::Deploy { output, .. } => vec![Diagnostic::new(self.to_string(), Some(output))],
      other => vec![Diagnostic::new(other.to_string(), None)],
    }
  }
}

fn resolve_summary(failures: &[(TargetArch, ResolveError)]) -> String {
  match failures {
    [(arch, source)] => format!("resolution failed for {}: {}", arch, source),
    _ => format!("resolution failed for {} architectures", failures.len()),
  }
}

pub(crate) fn io_error(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> PipelineError {
  let path = path.into();
  move |source| PipelineError::Io { path, source }
}
