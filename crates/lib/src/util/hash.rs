//! Hashing utilities for fingerprints and cache verification.
//!
//! - [`Fingerprint`]: SHA-256 over the canonical JSON form of a value; used as cache keys
//! - [`ContentHash`]: SHA-256 of raw bytes, files or whole directory trees
//! - [`hash_directory()`]: deterministic tree hash that ignores timestamps and permissions

use std::fs;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::consts::FINGERPRINT_PREFIX_LEN;

/// A deterministic hash over a recipe's resolved inputs.
///
/// Stored as 64 lowercase hex characters. Directory names only use the
/// first [`FINGERPRINT_PREFIX_LEN`] characters, see [`Fingerprint::short`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub String);

impl Fingerprint {
  pub fn short(&self) -> &str {
    &self.0[..FINGERPRINT_PREFIX_LEN.min(self.0.len())]
  }
}

impl std::fmt::Display for Fingerprint {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Types whose serialized form identifies them.
///
/// Implementors must serialize deterministically: use `BTreeMap` rather than
/// `HashMap` for any map field.
pub trait Fingerprinted: Serialize {
  fn fingerprint(&self) -> Result<Fingerprint, serde_json::Error> {
    let serialized = serde_json::to_vec(self)?;
    Ok(Fingerprint(hash_bytes(&serialized).0))
  }
}

/// A full 64-character SHA-256 hash of some content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

#[derive(Debug, thiserror::Error)]
pub enum HashError {
  #[error("failed to walk {path}: {message}")]
  Walk { path: String, message: String },

  #[error("failed to read {path}: {source}")]
  Read {
    path: String,
    #[source]
    source: std::io::Error,
  },
}

/// Compute a deterministic hash of a directory tree.
///
/// Covers relative paths, file contents and symlink targets. Entries whose
/// file name is listed in `exclude` are skipped together with their subtree.
pub fn hash_directory(path: &Path, exclude: &[&str]) -> Result<ContentHash, HashError> {
  let mut records: Vec<String> = Vec::new();

  let walker = WalkDir::new(path).sort_by_file_name().into_iter().filter_entry(|e| {
    e.depth() == 0
      || e
        .file_name()
        .to_str()
        .map(|name| !exclude.contains(&name))
        .unwrap_or(true)
  });

  for entry in walker {
    let entry = entry.map_err(|e| HashError::Walk {
      path: path.display().to_string(),
      message: e.to_string(),
    })?;
    if entry.depth() == 0 {
      continue;
    }

    let rel = relative_slash_path(path, entry.path());
    let file_type = entry.file_type();

    if file_type.is_file() {
      records.push(format!("F:{}:{}", rel, hash_file(entry.path())?.0));
    } else if file_type.is_dir() {
      records.push(format!("D:{}", rel));
    } else if file_type.is_symlink() {
      let target = fs::read_link(entry.path()).map_err(|source| HashError::Read {
        path: entry.path().display().to_string(),
        source,
      })?;
      records.push(format!("L:{}:{}", rel, target.to_string_lossy()));
    }
  }

  records.sort();

  let mut hasher = Sha256::new();
  for record in records {
    hasher.update(record.as_bytes());
    hasher.update(b"\n");
  }

  Ok(ContentHash(hex::encode(hasher.finalize())))
}

/// Hash a file's contents in fixed-size chunks.
pub fn hash_file(path: &Path) -> Result<ContentHash, HashError> {
  let read_err = |source| HashError::Read {
    path: path.display().to_string(),
    source,
  };

  let mut file = fs::File::open(path).map_err(read_err)?;
  let mut hasher = Sha256::new();
  let mut buffer = [0u8; 8192];

  loop {
    let n = file.read(&mut buffer).map_err(read_err)?;
    if n == 0 {
      break;
    }
    hasher.update(&buffer[..n]);
  }

  Ok(ContentHash(hex::encode(hasher.finalize())))
}

pub fn hash_bytes(data: &[u8]) -> ContentHash {
  ContentHash(hex::encode(Sha256::digest(data)))
}

/// Relative path of `path` under `root`, always with `/` separators.
pub fn relative_slash_path(root: &Path, path: &Path) -> String {
  let rel = path.strip_prefix(root).unwrap_or(path);
  rel
    .components()
    .map(|c| c.as_os_str().to_string_lossy().into_owned())
    .collect::<Vec<_>>()
    .join("/")
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;
  use tempfile::tempdir;

  #[derive(Serialize)]
  struct Sample {
    name: &'static str,
    version: &'static str,
  }

  impl Fingerprinted for Sample {}

  #[test]
  fn fingerprint_is_deterministic_and_input_sensitive() {
    let a = Sample {
      name: "libffi",
      version: "3.4.4",
    };
    let b = Sample {
      name: "libffi",
      version: "3.4.5",
    };

    assert_eq!(a.fingerprint().unwrap(), a.fingerprint().unwrap());
    assert_ne!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
    assert_eq!(a.fingerprint().unwrap().0.len(), 64);
    assert_eq!(a.fingerprint().unwrap().short().len(), FINGERPRINT_PREFIX_LEN);
  }

  #[test]
  fn directory_hash_ignores_excluded_entries() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("lib.so"), "elf").unwrap();
    let before = hash_directory(temp.path(), &[]).unwrap();

    fs::write(temp.path().join(".kiln-complete"), "{}").unwrap();
    fs::create_dir(temp.path().join("tmp")).unwrap();
    fs::write(temp.path().join("tmp/scratch"), "x").unwrap();

    let after = hash_directory(temp.path(), &[".kiln-complete", "tmp"]).unwrap();
    assert_eq!(before, after);
  }

  #[test]
  fn directory_hash_tracks_content_and_layout() {
    let flat = tempdir().unwrap();
    fs::write(flat.path().join("a.txt"), "content").unwrap();

    let nested = tempdir().unwrap();
    fs::create_dir(nested.path().join("sub")).unwrap();
    fs::write(nested.path().join("sub/a.txt"), "content").unwrap();

    let flat_hash = hash_directory(flat.path(), &[]).unwrap();
    assert_ne!(flat_hash, hash_directory(nested.path(), &[]).unwrap());

    fs::write(flat.path().join("a.txt"), "changed").unwrap();
    assert_ne!(flat_hash, hash_directory(flat.path(), &[]).unwrap());
  }

  #[test]
  fn relative_paths_use_forward_slashes() {
    let root = Path::new("/project");
    let path = Path::new("/project/assets/img/logo.png");
    assert_eq!(relative_slash_path(root, path), "assets/img/logo.png");
  }

  #[test]
  fn hash_bytes_matches_known_digest() {
    assert_eq!(
      hash_bytes(b"").0,
      "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
  }
}
