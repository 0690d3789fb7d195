//! Built-in deterministic archiver.
//!
//! Entries are sorted by path, carry the ZIP epoch as their timestamp and
//! fixed permissions, so identical trees always produce identical archives.

use std::fs::File;
use std::io;
use std::path::Path;

use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::consts::TMP_PREFIX;
use crate::util::hash::relative_slash_path;

fn options(executable: bool) -> SimpleFileOptions {
  SimpleFileOptions::default()
    .compression_method(CompressionMethod::Deflated)
    .last_modified_time(DateTime::default())
    .unix_permissions(if executable { 0o755 } else { 0o644 })
}

#[cfg(unix)]
fn is_executable(meta: &std::fs::Metadata) -> bool {
  use std::os::unix::fs::PermissionsExt;
  meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &std::fs::Metadata) -> bool {
  false
}

/// Zip every file under `tree` into `output`. Returns the number of entries.
///
/// The archive is written to a temporary file next to `output` and renamed
/// into place when complete.
pub fn write_archive(tree: &Path, output: &Path) -> io::Result<usize> {
  let parent = output.parent().unwrap_or_else(|| Path::new("."));
  std::fs::create_dir_all(parent)?;
  let temp = tempfile::Builder::new().prefix(TMP_PREFIX).tempfile_in(parent)?;

  let mut zip = ZipWriter::new(temp.reopen()?);
  let mut entries = 0;
  for entry in WalkDir::new(tree).sort_by_file_name() {
    let entry = entry.map_err(io::Error::other)?;
    if !entry.file_type().is_file() {
      continue;
    }
    let name = relative_slash_path(tree, entry.path());
    let meta = entry.metadata().map_err(io::Error::other)?;

    zip.start_file(name, options(is_executable(&meta))).map_err(io::Error::other)?;
    io::copy(&mut File::open(entry.path())?, &mut zip)?;
    entries += 1;
  }
  zip.finish().map_err(io::Error::other)?.sync_all()?;

  temp.persist(output).map_err(|e| e.error)?;
  Ok(entries)
}
