//! Shared test helpers for CLI integration tests.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Isolated project with its own cache root.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  /// Project requiring `requirements`, with `recipes` written to `recipes/`.
  pub fn project(requirements: &str, recipes: &[(&str, &str)]) -> Self {
    let env = Self {
      temp: TempDir::new().unwrap(),
    };
    env.write_file(
      "kiln.spec",
      &format!(
        "[app]
title = Hello
package.name = hello
package.domain = org.example
version = 1.2.0
requirements = {}
source.include_exts = py, txt
android.archs = arm64-v8a
",
        requirements
      ),
    );
    env.write_file("main.py", "print('hello')\n");
    env.write_file("data/readme.txt", "bundled\n");
    for (name, body) in recipes {
      env.write_file(&format!("recipes/{}.lua", name), body);
    }
    env
  }

  /// Write a file relative to the project directory.
  pub fn write_file(&self, relative_path: &str, content: &str) {
    let path = self.temp.path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
  }

  pub fn path(&self) -> &Path {
    self.temp.path()
  }

  /// Cache root (isolated per test).
  pub fn cache_path(&self) -> PathBuf {
    let p = self.temp.path().join("cache");
    std::fs::create_dir_all(&p).unwrap();
    dunce::canonicalize(&p).unwrap_or(p)
  }

  /// Command for the kiln binary, run from the project directory.
  pub fn kiln(&self) -> Command {
    let mut cmd = cargo_bin_cmd!("kiln");
    cmd
      .current_dir(self.path())
      .env("KILN_HOME", self.cache_path())
      .env("KILN_WORKERS", "2")
      .env_remove("KILN_RECIPE_PATH")
      .env_remove("KILN_PACKAGE_TOOL")
      .env_remove("KILN_KEYSTORE")
      .env_remove("KILN_KEYSTORE_PASSWD")
      .env_remove("KILN_KEYALIAS")
      .env_remove("KILN_ADB")
      .env_remove("RUST_LOG");
    cmd
  }

  /// Executable shell script at `relative_path`, for standing in for external tools.
  #[cfg(unix)]
  pub fn write_script(&self, relative_path: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    self.write_file(relative_path, &format!("#!/bin/sh\n{}\n", body));
    let path = self.path().join(relative_path);
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
  }

  /// Run `kiln --json <args>` and parse stdout.
  pub fn json(&self, args: &[&str]) -> (Option<i32>, serde_json::Value) {
    let output = self.kiln().arg("--json").args(args).output().unwrap();
    let value = serde_json::from_slice(&output.stdout).unwrap_or_else(|e| {
      panic!(
        "invalid JSON ({}): stdout={} stderr={}",
        e,
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
      )
    });
    (output.status.code(), value)
  }
}

/// Library recipe whose install writes `lib/<name>.so`.
pub fn library(name: &str, depends: &[&str]) -> String {
  let depends: Vec<String> = depends.iter().map(|d| format!("\"{}\"", d)).collect();
  format!(
    r#"return {{
  name = "{name}",
  version = "1.0",
  depends = {{ {deps} }},
  stages = {{ install = [[mkdir -p "$KILN_PREFIX/lib" && echo {name} > "$KILN_PREFIX/lib/{name}.so"]] }},
}}
"#,
    name = name,
    deps = depends.join(", "),
  )
}
