//! Package assembly.
//!
//! Merges the selected application sources, the staged recipe outputs and the
//! rendered platform manifest into `<build_dir>/dist/<arch>/`, turns that tree
//! into an artifact under `bin_dir` and signs it in release mode. The output is
//! always regenerated from scratch.

pub mod android_manifest;
pub mod archive;
pub mod select;
pub mod sign;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::consts::STAGING_RECORD;
use crate::manifest::{ArtifactKind, Manifest};
use crate::platform::TargetArch;
use crate::tool::{ToolInvocation, ToolRunner};
use crate::util::fs::{copy_tree, remove_path};
use crate::util::hash::hash_file;

pub use sign::SigningConfig;

/// Directory inside the package tree holding the application files.
pub const APP_ASSETS_DIR: &str = "assets/app";
/// Directory inside the package tree holding non-library staged outputs.
pub const RUNTIME_ASSETS_DIR: &str = "assets/runtime";
pub const MANIFEST_FILE: &str = "AndroidManifest.xml";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
  #[default]
  Debug,
  Release,
}

impl BuildMode {
  pub fn as_str(&self) -> &'static str {
    match self {
      BuildMode::Debug => "debug",
      BuildMode::Release => "release",
    }
  }
}

impl fmt::Display for BuildMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Error)]
pub enum AssembleError {
  #[error("missing asset {}: {reason}", path.display())]
  MissingAsset { path: PathBuf, reason: String },

  #[error("signing failed: {message}")]
  SigningError { message: String, output: String },

  #[error("packaging tool '{tool}' failed: {message}")]
  PlatformPackagingError { tool: String, message: String, output: String },

  #[error("I/O error at {}: {source}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

impl AssembleError {
  /// Verbatim tool diagnostics, if the error came from an external tool.
  pub fn output(&self) -> Option<&str> {
    match self {
      AssembleError::SigningError { output, .. } | AssembleError::PlatformPackagingError { output, .. }
        if !output.is_empty() =>
      {
        Some(output)
      }
      _ => None,
    }
  }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> AssembleError + '_ {
  move |source| AssembleError::Io {
    path: path.to_path_buf(),
    source,
  }
}

/// A finished package for one architecture.
#[derive(Debug, Clone, Serialize)]
pub struct PackageOutput {
  pub arch: TargetArch,
  pub mode: BuildMode,
  pub artifact: PathBuf,
  /// The assembled tree the artifact was made from.
  pub tree: PathBuf,
  /// Number of application files copied into the package.
  pub app_files: usize,
  pub signed: bool,
  pub sha256: String,
}

#[derive(Debug, Clone, Default)]
pub struct AssembleConfig {
  pub mode: BuildMode,
  /// External packaging command, run through the shell instead of the built-in archiver.
  pub package_tool: Option<String>,
  pub signing: SigningConfig,
}

impl AssembleConfig {
  /// Packaging tool and signing credentials from `KILN_PACKAGE_TOOL` and the signing variables.
  pub fn from_env(mode: BuildMode) -> Self {
    Self {
      mode,
      package_tool: std::env::var("KILN_PACKAGE_TOOL").ok().filter(|v| !v.trim().is_empty()),
      signing: SigningConfig::from_env(),
    }
  }
}

/// Path of the artifact for `arch` in `mode`.
pub fn artifact_path(manifest: &Manifest, arch: TargetArch, mode: BuildMode) -> PathBuf {
  // Bundles are a release format; debug builds are always installable packages.
  let kind = match mode {
    BuildMode::Debug => ArtifactKind::Apk,
    BuildMode::Release => manifest.app.android.release_artifact,
  };
  manifest.bin_dir().join(format!(
    "{}-{}-{}-{}.{}",
    manifest.app.package_name,
    manifest.app.version,
    arch,
    mode,
    kind.extension()
  ))
}

/// Package tree directory for `arch`.
pub fn dist_dir(manifest: &Manifest, arch: TargetArch) -> PathBuf {
  manifest.build_dir().join("dist").join(arch.as_str())
}

pub struct Assembler {
  runner: Arc<dyn ToolRunner>,
  config: AssembleConfig,
}

impl Assembler {
  pub fn new(runner: Arc<dyn ToolRunner>, config: AssembleConfig) -> Self {
    Self { runner, config }
  }

  pub fn config(&self) -> &AssembleConfig {
    &self.config
  }

  /// Assemble, package and (in release mode) sign the application for `arch`.
  pub async fn assemble(
    &self,
    manifest: &Manifest,
    arch: TargetArch,
    staging_root: &Path,
  ) -> Result<PackageOutput, AssembleError> {
    let start = Instant::now();
    let tree = dist_dir(manifest, arch);
    let artifact = artifact_path(manifest, arch, self.config.mode);

    remove_path(&tree).map_err(io_error(&tree))?;
    remove_path(&artifact).map_err(io_error(&artifact))?;

    let source_root = manifest.source_dir();
    let selected = select::select_sources(&manifest.app.source, &source_root)?;
    let app_dir = tree.join(APP_ASSETS_DIR);
    for rel in &selected {
      let from = select::source_path(&source_root, rel);
      let to = select::source_path(&app_dir, rel);
      if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent).map_err(io_error(parent))?;
      }
      std::fs::copy(&from, &to).map_err(io_error(&from))?;
    }
    debug!(files = selected.len(), "application files copied");

    merge_staging(staging_root, &tree, arch)?;

    let manifest_path = tree.join(MANIFEST_FILE);
    std::fs::write(&manifest_path, android_manifest::render(manifest)).map_err(io_error(&manifest_path))?;

    match &self.config.package_tool {
      Some(tool) => self.run_package_tool(tool, manifest, &tree, &artifact).await?,
      None => {
        let entries = archive::write_archive(&tree, &artifact).map_err(io_error(&artifact))?;
        debug!(entries, artifact = ?artifact, "archive written");
      }
    }

    let signed = match self.config.mode {
      BuildMode::Release => {
        sign::sign(self.runner.as_ref(), &self.config.signing, &artifact).await?;
        true
      }
      BuildMode::Debug => false,
    };

    let sha256 = hash_file(&artifact)
      .map_err(|e| io_error(&artifact)(std::io::Error::other(e)))?
      .0;
    info!(
      arch = %arch,
      mode = %self.config.mode,
      artifact = ?artifact,
      signed,
      elapsed = ?start.elapsed(),
      "package assembled"
    );

    Ok(PackageOutput {
      arch,
      mode: self.config.mode,
      artifact,
      tree,
      app_files: selected.len(),
      signed,
      sha256,
    })
  }

  async fn run_package_tool(
    &self,
    tool: &str,
    manifest: &Manifest,
    tree: &Path,
    artifact: &Path,
  ) -> Result<(), AssembleError> {
    if let Some(parent) = artifact.parent() {
      std::fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    let invocation = ToolInvocation::shell(tool)
      .env("KILN_PACKAGE_TREE", tree.display().to_string())
      .env("KILN_PACKAGE_OUTPUT", artifact.display().to_string())
      .cwd(&manifest.root);

    info!(tool = %tool, "running packaging tool");
    let output = self
      .runner
      .run(&invocation)
      .await
      .map_err(|e| AssembleError::PlatformPackagingError {
        tool: tool.to_string(),
        message: format!("failed to start: {}", e),
        output: String::new(),
      })?;

    if !output.success {
      return Err(AssembleError::PlatformPackagingError {
        tool: tool.to_string(),
        message: format!(
          "exited with status {}",
          output.code.map(|c| c.to_string()).unwrap_or_else(|| "unknown".to_string())
        ),
        output: output.diagnostics(),
      });
    }
    if !artifact.is_file() {
      return Err(AssembleError::PlatformPackagingError {
        tool: tool.to_string(),
        message: format!("did not produce {}", artifact.display()),
        output: output.diagnostics(),
      });
    }
    Ok(())
  }
}

/// Copy the staging root into the package tree: `lib/` becomes `lib/<arch>/`,
/// everything else lands under the runtime assets.
fn merge_staging(staging_root: &Path, tree: &Path, arch: TargetArch) -> Result<(), AssembleError> {
  if !staging_root.is_dir() {
    return Ok(());
  }
  let entries = std::fs::read_dir(staging_root).map_err(io_error(staging_root))?;
  let mut paths: Vec<PathBuf> = entries
    .map(|e| e.map(|e| e.path()))
    .collect::<Result<_, _>>()
    .map_err(io_error(staging_root))?;
  paths.sort();

  let runtime = tree.join(RUNTIME_ASSETS_DIR);
  for path in paths {
    let Some(name) = path.file_name() else {
      continue;
    };
    if name == STAGING_RECORD {
      continue;
    }
    let dest = if name == "lib" && path.is_dir() {
      tree.join("lib").join(arch.as_str())
    } else {
      runtime.join(name)
    };

    if path.is_dir() {
      copy_tree(&path, &dest).map_err(io_error(&path))?;
    } else {
      std::fs::create_dir_all(&runtime).map_err(io_error(&runtime))?;
      std::fs::copy(&path, &dest).map_err(io_error(&path))?;
    }
  }
  Ok(())
}
