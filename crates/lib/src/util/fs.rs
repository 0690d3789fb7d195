//! Filesystem helpers shared by the build engine and the assembler.

use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::consts::TMP_PREFIX;

/// Recursively copy `src` into `dest`, merging with anything already there.
///
/// Symlinks are recreated rather than followed. Returns the number of files copied.
pub fn copy_tree(src: &Path, dest: &Path) -> io::Result<usize> {
  let mut copied = 0;
  fs::create_dir_all(dest)?;

  for entry in WalkDir::new(src).sort_by_file_name() {
    let entry = entry.map_err(io::Error::other)?;
    let rel = entry.path().strip_prefix(src).map_err(io::Error::other)?;
    if rel.as_os_str().is_empty() {
      continue;
    }
    let target = dest.join(rel);
    let file_type = entry.file_type();

    if file_type.is_dir() {
      fs::create_dir_all(&target)?;
    } else if file_type.is_symlink() {
      let link = fs::read_link(entry.path())?;
      remove_path(&target)?;
      symlink(&link, &target)?;
      copied += 1;
    } else {
      if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
      }
      fs::copy(entry.path(), &target)?;
      copied += 1;
    }
  }

  Ok(copied)
}

/// Remove a file, symlink or directory tree. Missing paths are not an error.
pub fn remove_path(path: &Path) -> io::Result<()> {
  match fs::symlink_metadata(path) {
    Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
    Ok(_) => fs::remove_file(path),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
    Err(e) => Err(e),
  }
}

/// Delete leftover `.tmp-*` entries in `dir` from interrupted runs.
///
/// Only call this while holding the lock that guards `dir`.
pub fn sweep_temp_entries(dir: &Path) -> usize {
  let Ok(entries) = fs::read_dir(dir) else {
    return 0;
  };

  let mut swept = 0;
  for entry in entries.flatten() {
    let name = entry.file_name();
    if !name.to_string_lossy().starts_with(TMP_PREFIX) {
      continue;
    }
    match remove_path(&entry.path()) {
      Ok(()) => {
        debug!(path = ?entry.path(), "removed stale temporary entry");
        swept += 1;
      }
      Err(e) => warn!(path = ?entry.path(), error = %e, "failed to remove stale temporary entry"),
    }
  }
  swept
}

/// Total size in bytes of all regular files below `path`.
pub fn dir_size(path: &Path) -> u64 {
  WalkDir::new(path)
    .into_iter()
    .flatten()
    .filter(|e| e.file_type().is_file())
    .filter_map(|e| e.metadata().ok())
    .map(|m| m.len())
    .sum()
}

#[cfg(unix)]
fn symlink(original: &Path, link: &Path) -> io::Result<()> {
  std::os::unix::fs::symlink(original, link)
}

#[cfg(windows)]
fn symlink(original: &Path, link: &Path) -> io::Result<()> {
  std::os::windows::fs::symlink_file(original, link)
}
