//! Archive extraction for toolchains and recipe sources.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::debug;

use crate::consts::COMPLETE_MARKER;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
  TarGz,
  Tar,
  Zip,
  /// Not an archive; copied as a single file.
  Plain,
}

impl ArchiveKind {
  pub fn detect(file_name: &str) -> Self {
    let lower = file_name.to_ascii_lowercase();
    if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
      Self::TarGz
    } else if lower.ends_with(".tar") {
      Self::Tar
    } else if lower.ends_with(".zip") {
      Self::Zip
    } else {
      Self::Plain
    }
  }
}

/// Extract `archive` into `dest`, which is created if needed. Blocking.
pub fn unpack(archive: &Path, dest: &Path) -> io::Result<()> {
  std::fs::create_dir_all(dest)?;
  let file_name = archive
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_default();
  let kind = ArchiveKind::detect(&file_name);
  debug!(archive = ?archive, kind = ?kind, dest = ?dest, "unpacking");

  match kind {
    ArchiveKind::TarGz => {
      let mut tar = tar::Archive::new(GzDecoder::new(File::open(archive)?));
      tar.set_preserve_mtime(false);
      tar.unpack(dest)
    }
    ArchiveKind::Tar => {
      let mut tar = tar::Archive::new(File::open(archive)?);
      tar.set_preserve_mtime(false);
      tar.unpack(dest)
    }
    ArchiveKind::Zip => {
      let mut zip = zip::ZipArchive::new(File::open(archive)?).map_err(io::Error::other)?;
      zip.extract(dest).map_err(io::Error::other)
    }
    ArchiveKind::Plain => {
      std::fs::copy(archive, dest.join(&file_name))?;
      Ok(())
    }
  }
}

/// The directory holding the real contents of an unpacked tree.
///
/// Release archives usually wrap everything in one top-level directory
/// (`libffi-3.4.4/`); in that case that directory is returned.
pub fn content_root(dir: &Path) -> PathBuf {
  let Ok(entries) = std::fs::read_dir(dir) else {
    return dir.to_path_buf();
  };
  let children: Vec<PathBuf> = entries
    .flatten()
    .filter(|e| e.file_name() != COMPLETE_MARKER)
    .map(|e| e.path())
    .collect();

  match children.as_slice() {
    [only] if only.is_dir() => only.clone(),
    _ => dir.to_path_buf(),
  }
}
