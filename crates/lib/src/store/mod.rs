//! Layout of the shared artifact cache.
//!
//! ```text
//! <cache_root>/
//!   .lock                                   # store-wide lock (shared for builds, exclusive for clean)
//!   v1/
//!     downloads/<sha256>/<file>             # verified downloads
//!     toolchains/<name>-<version>-<fp16>/   # unpacked toolchains
//!     builds/<arch>/<name>-<version>-<fp16>/out/
//!     locks/<key>.lock                      # per-entry locks
//! ```

pub mod marker;

use std::path::{Path, PathBuf};

use crate::consts::CACHE_LAYOUT_VERSION;
use crate::platform::TargetArch;
use crate::platform::paths::{NoCacheDir, cache_root};
use crate::util::hash::Fingerprint;

pub use marker::{CompleteMarker, EntryState, MarkerError, Verify, inspect_entry};

/// Resolves paths inside a cache root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLayout {
  root: PathBuf,
}

impl StoreLayout {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  /// Layout rooted at `KILN_HOME` or the platform cache directory.
  pub fn from_env() -> Result<Self, NoCacheDir> {
    cache_root().map(Self::new)
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Directory holding everything for the current layout version.
  pub fn versioned(&self) -> PathBuf {
    self.root.join(format!("v{}", CACHE_LAYOUT_VERSION))
  }

  pub fn downloads_dir(&self) -> PathBuf {
    self.versioned().join("downloads")
  }

  /// Entry directory for a download with the given checksum.
  pub fn download_dir(&self, sha256: &str) -> PathBuf {
    self.downloads_dir().join(sha256.to_ascii_lowercase())
  }

  pub fn toolchains_dir(&self) -> PathBuf {
    self.versioned().join("toolchains")
  }

  pub fn toolchain_dir(&self, name: &str, version: &str, fingerprint: &Fingerprint) -> PathBuf {
    self
      .toolchains_dir()
      .join(entry_name(name, version, fingerprint))
  }

  pub fn builds_dir(&self, arch: TargetArch) -> PathBuf {
    self.versioned().join("builds").join(arch.as_str())
  }

  pub fn build_dir(&self, arch: TargetArch, name: &str, version: &str, fingerprint: &Fingerprint) -> PathBuf {
    self.builds_dir(arch).join(entry_name(name, version, fingerprint))
  }

  pub fn locks_dir(&self) -> PathBuf {
    self.versioned().join("locks")
  }

  /// Per-entry lock file. `key` must be a valid file name.
  pub fn key_lock_path(&self, key: &str) -> PathBuf {
    self.locks_dir().join(format!("{}.lock", key))
  }

  pub fn store_lock_path(&self) -> PathBuf {
    self.root.join(".lock")
  }
}

fn entry_name(name: &str, version: &str, fingerprint: &Fingerprint) -> String {
  format!("{}-{}-{}", name, version, fingerprint.short())
}
