//! Staging root composition.
//!
//! The staging root is rebuilt from the cached `out/` dirs of a plan. A small
//! JSON record of what was merged lets an unchanged plan skip the copy.

use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::RecipeResult;
use crate::consts::STAGING_RECORD;
use crate::platform::TargetArch;
use crate::util::fs::{copy_tree, remove_path};

const RECORD_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct StagedRecipe {
  id: String,
  fingerprint: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct StagingRecord {
  version: u32,
  arch: TargetArch,
  recipes: Vec<StagedRecipe>,
}

impl StagingRecord {
  fn new(arch: TargetArch, results: &[RecipeResult]) -> Self {
    Self {
      version: RECORD_VERSION,
      arch,
      recipes: results
        .iter()
        .map(|r| StagedRecipe {
          id: r.id.to_string(),
          fingerprint: r.fingerprint.0.clone(),
        })
        .collect(),
    }
  }

  fn read(root: &Path) -> Option<Self> {
    let content = std::fs::read_to_string(root.join(STAGING_RECORD)).ok()?;
    serde_json::from_str(&content).ok()
  }
}

/// Merge every result's output into `root`, in order.
///
/// Returns `true` if the existing root already held exactly these outputs.
pub fn compose(root: &Path, arch: TargetArch, results: &[RecipeResult]) -> io::Result<bool> {
  let record = StagingRecord::new(arch, results);
  if StagingRecord::read(root).as_ref() == Some(&record) {
    debug!(root = ?root, "staging root is current");
    return Ok(true);
  }

  remove_path(root)?;
  std::fs::create_dir_all(root)?;
  let mut files = 0;
  for result in results {
    if result.out_dir.is_dir() {
      files += copy_tree(&result.out_dir, root)?;
    }
  }

  // Written last: an interrupted compose leaves no record and is redone.
  let content = serde_json::to_string_pretty(&record).map_err(io::Error::other)?;
  std::fs::write(root.join(STAGING_RECORD), content)?;

  info!(root = ?root, recipes = results.len(), files, "staging root composed");
  Ok(false)
}
