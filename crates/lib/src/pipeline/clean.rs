//! Removal of project outputs and cache contents.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use super::error::{PipelineError, io_error};
use crate::manifest::Manifest;
use crate::store::StoreLayout;
use crate::store_lock::{LockMode, StoreLock};
use crate::util::fs::{dir_size, remove_path};

#[derive(Debug, Default, Serialize)]
pub struct CleanReport {
  pub removed: Vec<PathBuf>,
  pub bytes_freed: u64,
}

impl CleanReport {
  fn remove(&mut self, path: &Path) -> Result<(), PipelineError> {
    if std::fs::symlink_metadata(path).is_err() {
      return Ok(());
    }
    let size = dir_size(path);
    remove_path(path).map_err(io_error(path))?;
    info!(path = ?path, bytes = size, "removed");
    self.bytes_freed += size;
    self.removed.push(path.to_path_buf());
    Ok(())
  }
}

/// Remove the project build directory.
pub fn clean_project(manifest: &Manifest, report: &mut CleanReport) -> Result<(), PipelineError> {
  report.remove(&manifest.build_dir())
}

/// Remove everything in the cache root except the lock file.
///
/// Takes the store lock exclusively and fails fast if another invocation holds it.
pub fn clean_cache(layout: &StoreLayout, report: &mut CleanReport) -> Result<(), PipelineError> {
  let lock = StoreLock::acquire(layout, LockMode::Exclusive, "clean --all")?;
  let root = layout.root();
  let entries = std::fs::read_dir(root).map_err(io_error(root))?;

  let mut paths: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
  paths.sort();
  for path in paths {
    if path == lock.lock_path() {
      continue;
    }
    report.remove(&path)?;
  }
  Ok(())
}
