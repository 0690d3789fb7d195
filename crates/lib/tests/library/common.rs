//! Shared helpers for library integration tests.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::Compression;
use flate2::write::GzEncoder;
use sha2::{Digest, Sha256};
use tempfile::TempDir;

use kiln_lib::pipeline::{Pipeline, PipelineOptions};
use kiln_lib::store::StoreLayout;
use kiln_lib::tool::ProcessRunner;
use kiln_lib::toolchain::{ProvisionConfig, RetryPolicy};

/// A project directory with its own cache root.
pub struct Project {
  pub temp: TempDir,
}

impl Project {
  /// Project whose manifest requires `requirements` (comma separated).
  pub fn new(requirements: &str) -> Self {
    let temp = TempDir::new().unwrap();
    let project = Self { temp };
    project.write(
      "kiln.spec",
      &format!(
        "[app]
title = Integration
package.name = demo
package.domain = org.example
version = 0.1.0
requirements = {}
source.include_exts = py
android.archs = arm64-v8a
android.permissions = INTERNET
",
        requirements
      ),
    );
    project.write("main.py", "print('hello')\n");
    project
  }

  pub fn path(&self) -> &Path {
    self.temp.path()
  }

  pub fn write(&self, rel: &str, content: &str) {
    let path = self.path().join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
  }

  /// Write `recipes/<name>.lua`.
  pub fn recipe(&self, name: &str, body: &str) {
    self.write(&format!("recipes/{}.lua", name), body);
  }

  pub fn manifest_path(&self) -> PathBuf {
    self.path().join("kiln.spec")
  }

  pub fn layout(&self) -> StoreLayout {
    StoreLayout::new(self.path().join("cache"))
  }

  /// Pipeline on the project cache with real processes and no retry delay.
  pub fn pipeline(&self) -> Pipeline {
    let config = ProvisionConfig {
      retry: RetryPolicy::immediate(2),
      ..ProvisionConfig::default()
    };
    Pipeline::new(self.layout(), Arc::new(ProcessRunner)).with_provision_config(config)
  }

  pub fn options(&self) -> PipelineOptions {
    PipelineOptions {
      workers: Some(2),
      ..PipelineOptions::new(self.manifest_path())
    }
  }

  /// Names of the build cache entries for `arch`.
  pub fn build_entries(&self, arch: &str) -> Vec<String> {
    let dir = self.layout().versioned().join("builds").join(arch);
    let Ok(entries) = std::fs::read_dir(dir) else {
      return Vec::new();
    };
    let mut names: Vec<String> = entries
      .flatten()
      .map(|e| e.file_name().to_string_lossy().into_owned())
      .collect();
    names.sort();
    names
  }
}

/// A library recipe whose install stage writes `content` to `$KILN_PREFIX/<rel>`.
pub fn library(name: &str, depends: &[&str], rel: &str, content: &str) -> String {
  let depends: Vec<String> = depends.iter().map(|d| format!("\"{}\"", d)).collect();
  format!(
    r#"return {{
  name = "{name}",
  version = "1.0",
  kind = "library",
  depends = {{ {deps} }},
  stages = {{
    install = [[mkdir -p "$(dirname "$KILN_PREFIX/{rel}")" && printf '%s' '{content}' > "$KILN_PREFIX/{rel}"]],
  }},
}}
"#,
    name = name,
    deps = depends.join(", "),
    rel = rel,
    content = content,
  )
}

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

pub fn sha256_file(path: &Path) -> String {
  hex::encode(Sha256::digest(std::fs::read(path).unwrap()))
}
