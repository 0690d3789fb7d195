//! Application source selection.
//!
//! Inclusion happens first (by extension or path glob), exclusion second. A
//! file matching both an include and an exclude rule is excluded.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};
use tracing::debug;
use walkdir::WalkDir;

use super::AssembleError;
use crate::manifest::SourceLayout;
use crate::util::hash::relative_slash_path;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
  case_sensitive: true,
  require_literal_separator: true,
  require_literal_leading_dot: false,
};

fn compile(patterns: &[String], root: &Path) -> Result<Vec<Pattern>, AssembleError> {
  patterns
    .iter()
    .map(|p| {
      Pattern::new(p).map_err(|e| AssembleError::MissingAsset {
        path: root.to_path_buf(),
        reason: format!("invalid pattern '{}': {}", p, e.msg),
      })
    })
    .collect()
}

fn extension(rel: &str) -> Option<String> {
  Path::new(rel)
    .extension()
    .map(|e| e.to_string_lossy().to_ascii_lowercase())
}

/// Relative `/`-separated paths of the files under `root` that go into the package, sorted.
pub fn select_sources(layout: &SourceLayout, root: &Path) -> Result<Vec<String>, AssembleError> {
  if !root.is_dir() {
    return Err(AssembleError::MissingAsset {
      path: root.to_path_buf(),
      reason: "source directory does not exist".to_string(),
    });
  }

  let includes = compile(&layout.include_patterns, root)?;
  let excludes = compile(&layout.exclude_patterns, root)?;
  let mut matched_includes: BTreeSet<usize> = BTreeSet::new();
  let mut selected = Vec::new();

  let walker = WalkDir::new(root).sort_by_file_name().into_iter().filter_entry(|e| {
    e.depth() == 0
      || !e.file_type().is_dir()
      || !layout
        .exclude_dirs
        .iter()
        .any(|d| e.file_name().to_string_lossy() == d.as_str())
  });

  for entry in walker {
    let entry = entry.map_err(|e| AssembleError::MissingAsset {
      path: e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf()),
      reason: e.to_string(),
    })?;
    if !entry.file_type().is_file() {
      continue;
    }

    let rel = relative_slash_path(root, entry.path());
    let ext = extension(&rel);
    let by_ext = layout.include_exts.is_empty() || ext.as_ref().is_some_and(|e| layout.include_exts.contains(e));

    let mut by_pattern = false;
    for (index, pattern) in includes.iter().enumerate() {
      if pattern.matches_with(&rel, MATCH_OPTIONS) {
        matched_includes.insert(index);
        by_pattern = true;
      }
    }
    if !by_ext && !by_pattern {
      continue;
    }

    let excluded = ext.as_ref().is_some_and(|e| layout.exclude_exts.contains(e))
      || excludes.iter().any(|p| p.matches_with(&rel, MATCH_OPTIONS));
    if excluded {
      debug!(file = %rel, "excluded from package");
      continue;
    }

    selected.push(rel);
  }

  if let Some((_, pattern)) = layout
    .include_patterns
    .iter()
    .enumerate()
    .find(|(index, _)| !matched_includes.contains(index))
  {
    return Err(AssembleError::MissingAsset {
      path: root.join(pattern),
      reason: format!("include pattern '{}' matched no files", pattern),
    });
  }

  selected.sort();
  Ok(selected)
}

/// Absolute path of a selected file.
pub fn source_path(root: &Path, rel: &str) -> PathBuf {
  rel.split('/').fold(root.to_path_buf(), |path, part| path.join(part))
}
