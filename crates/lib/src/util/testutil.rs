//! Fixtures shared by unit tests: recipe definitions, source archives and
//! shell snippets that work on every supported host.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;

use crate::tool::{ToolInvocation, ToolOutput, ToolRunner};
use crate::recipe::{RecipeDef, RecipeId, RecipeKind, RecipeVersion, Requirement, StageCommands};
use crate::util::hash::hash_file;

/// A library recipe without source or stages.
pub fn recipe(name: &str, version: &str, deps: &[&str]) -> RecipeDef {
  RecipeDef {
    id: RecipeId::new(name, RecipeVersion::parse(version).unwrap()),
    kind: RecipeKind::Library,
    depends: deps.iter().map(|d| Requirement::parse(d).unwrap()).collect(),
    url: None,
    sha256: None,
    archs: None,
    min_api: None,
    patches: vec![],
    env: BTreeMap::new(),
    stages: StageCommands::default(),
    hosts: None,
    origin: PathBuf::from("test.lua"),
  }
}

/// A toolchain recipe whose archive is the local file `archive`.
pub fn toolchain(name: &str, version: &str, archive: &Path) -> RecipeDef {
  RecipeDef {
    kind: RecipeKind::Toolchain,
    url: Some(file_url(archive)),
    sha256: Some(hash_file(archive).unwrap().0),
    ..recipe(name, version, &[])
  }
}

pub fn file_url(path: &Path) -> String {
  format!("file://{}", path.display())
}

/// Write a gzipped tarball containing `files` as `(path, contents)` pairs.
pub fn write_tar_gz(path: &Path, files: &[(&str, &str)]) {
  let file = File::create(path).unwrap();
  let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
  for (name, content) in files {
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o755);
    header.set_mtime(0);
    header.set_cksum();
    builder.append_data(&mut header, name, content.as_bytes()).unwrap();
  }
  builder.into_inner().unwrap().finish().unwrap();
}

/// Shell script that writes `content` to `$KILN_PREFIX/<rel>`.
#[cfg(unix)]
pub fn install_file_script(rel: &str, content: &str) -> String {
  format!(
    "mkdir -p \"$(dirname \"$KILN_PREFIX/{rel}\")\" && printf '%s' '{content}' > \"$KILN_PREFIX/{rel}\""
  )
}

#[cfg(windows)]
pub fn install_file_script(rel: &str, content: &str) -> String {
  format!(
    "$p = Join-Path $env:KILN_PREFIX '{rel}'; New-Item -ItemType Directory -Force -Path (Split-Path $p) | Out-Null; Set-Content -NoNewline -Path $p -Value '{content}'"
  )
}

/// Shell script that exits with `code` after printing `message` to stderr.
#[cfg(unix)]
pub fn failing_script(message: &str, code: i32) -> String {
  format!("echo '{message}' >&2; exit {code}")
}

#[cfg(windows)]
pub fn failing_script(message: &str, code: i32) -> String {
  format!("[Console]::Error.WriteLine('{message}'); exit {code}")
}

/// Runner that records invocations and answers with a canned result.
pub struct RecordingRunner {
  calls: Mutex<Vec<ToolInvocation>>,
  code: i32,
  stderr: String,
}

impl RecordingRunner {
  pub fn succeeding() -> Self {
    Self::failing(0, "")
  }

  pub fn failing(code: i32, stderr: &str) -> Self {
    Self {
      calls: Mutex::new(Vec::new()),
      code,
      stderr: stderr.to_string(),
    }
  }

  pub fn calls(&self) -> Vec<ToolInvocation> {
    self.calls.lock().unwrap().clone()
  }
}

#[async_trait]
impl ToolRunner for RecordingRunner {
  async fn run(&self, invocation: &ToolInvocation) -> std::io::Result<ToolOutput> {
    self.calls.lock().unwrap().push(invocation.clone());
    Ok(ToolOutput {
      code: Some(self.code),
      success: self.code == 0,
      stdout: String::new(),
      stderr: self.stderr.clone(),
    })
  }
}
