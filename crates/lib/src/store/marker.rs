//! Completion markers for cache entries.
//!
//! An entry is only valid once its marker exists. The marker records the hash
//! of the entry contents so corrupted entries are detected on reuse.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::consts::COMPLETE_MARKER;
use crate::util::hash::{HashError, hash_directory};

const MARKER_VERSION: u32 = 1;

/// Names excluded when hashing entry contents.
pub const MARKER_HASH_EXCLUSIONS: &[&str] = &[COMPLETE_MARKER];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteMarker {
  pub version: u32,
  pub status: String,
  /// Identity of the entry: a fingerprint or a download checksum.
  pub key: String,
  /// SHA-256 of the entry contents, excluding the marker itself.
  pub output_hash: String,
}

#[derive(Debug, thiserror::Error)]
pub enum MarkerError {
  #[error("failed to read marker in {path}: {source}")]
  Read {
    path: String,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to write marker in {path}: {source}")]
  Write {
    path: String,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid marker in {path}: {message}")]
  Parse { path: String, message: String },

  #[error(transparent)]
  Hash(#[from] HashError),
}

impl CompleteMarker {
  /// Hash `entry` and write its marker. Call after all contents are in place.
  pub fn write(entry: &Path, key: &str) -> Result<Self, MarkerError> {
    let output_hash = hash_directory(entry, MARKER_HASH_EXCLUSIONS)?;
    let marker = Self {
      version: MARKER_VERSION,
      status: "complete".to_string(),
      key: key.to_string(),
      output_hash: output_hash.0,
    };

    let content = serde_json::to_string(&marker).map_err(|e| MarkerError::Parse {
      path: entry.display().to_string(),
      message: e.to_string(),
    })?;
    std::fs::write(entry.join(COMPLETE_MARKER), format!("{}\n", content)).map_err(|source| MarkerError::Write {
      path: entry.display().to_string(),
      source,
    })?;
    Ok(marker)
  }

  /// Returns `None` if the marker doesn't exist.
  pub fn read(entry: &Path) -> Result<Option<Self>, MarkerError> {
    let marker_path = entry.join(COMPLETE_MARKER);
    if !marker_path.exists() {
      return Ok(None);
    }

    let content = std::fs::read_to_string(&marker_path).map_err(|source| MarkerError::Read {
      path: entry.display().to_string(),
      source,
    })?;
    let marker = serde_json::from_str(&content).map_err(|e| MarkerError::Parse {
      path: entry.display().to_string(),
      message: e.to_string(),
    })?;
    Ok(Some(marker))
  }

  /// Check that the marker belongs to `key` and that the contents still hash
  /// to the recorded value.
  pub fn verify(&self, entry: &Path, key: &str) -> bool {
    if self.version != MARKER_VERSION || self.key != key {
      debug!(path = ?entry, "marker does not match entry key");
      return false;
    }

    match hash_directory(entry, MARKER_HASH_EXCLUSIONS) {
      Ok(current) if current.0 == self.output_hash => true,
      Ok(current) => {
        warn!(
          path = ?entry,
          expected = %self.output_hash,
          actual = %current.0,
          "cache entry corrupted, will rebuild"
        );
        false
      }
      Err(e) => {
        warn!(path = ?entry, error = %e, "failed to hash cache entry, will rebuild");
        false
      }
    }
  }
}

/// State of a cache entry on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryState {
  /// Marker present and contents verified.
  Valid(CompleteMarker),
  /// Nothing at the path.
  Missing,
  /// Directory exists but is incomplete or corrupted; remove before reuse.
  Invalid,
}

/// How much work [`inspect_entry`] does to trust an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verify {
  /// Marker present and matching the key. Entries are immutable once
  /// promoted, so this is enough for large toolchain trees.
  Presence,
  /// Also rehash the contents against the recorded output hash.
  Contents,
}

/// Inspect the entry at `entry` for `key`.
pub fn inspect_entry(entry: &Path, key: &str, verify: Verify) -> EntryState {
  if !entry.exists() {
    return EntryState::Missing;
  }
  match CompleteMarker::read(entry) {
    Ok(Some(marker)) if verify == Verify::Presence && marker.version == MARKER_VERSION && marker.key == key => {
      EntryState::Valid(marker)
    }
    Ok(Some(marker)) if verify == Verify::Contents && marker.verify(entry, key) => EntryState::Valid(marker),
    Ok(Some(_)) => EntryState::Invalid,
    Ok(None) => {
      debug!(path = ?entry, "incomplete cache entry");
      EntryState::Invalid
    }
    Err(e) => {
      debug!(path = ?entry, error = %e, "unreadable marker");
      EntryState::Invalid
    }
  }
}
