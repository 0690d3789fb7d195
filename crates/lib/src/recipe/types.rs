use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use super::version::{RecipeVersion, Requirement};
use crate::platform::TargetArch;

/// What the pipeline does with a recipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipeKind {
  /// Fetched and unpacked by the provisioner, never compiled.
  Toolchain,
  /// Language runtime, cross-compiled by the build engine.
  Runtime,
  /// Native library, cross-compiled by the build engine.
  Library,
}

impl RecipeKind {
  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "toolchain" => Some(Self::Toolchain),
      "runtime" => Some(Self::Runtime),
      "library" => Some(Self::Library),
      _ => None,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Toolchain => "toolchain",
      Self::Runtime => "runtime",
      Self::Library => "library",
    }
  }
}

impl fmt::Display for RecipeKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// `name@version`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RecipeId {
  pub name: String,
  pub version: RecipeVersion,
}

impl RecipeId {
  pub fn new(name: impl Into<String>, version: RecipeVersion) -> Self {
    Self {
      name: name.into(),
      version,
    }
  }
}

impl fmt::Display for RecipeId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}@{}", self.name, self.version)
  }
}

/// Shell commands for the configurable build stages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageCommands {
  pub configure: Option<String>,
  pub compile: Option<String>,
  pub install: Option<String>,
}

/// A recipe as declared in its Lua file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipeDef {
  pub id: RecipeId,
  pub kind: RecipeKind,
  pub depends: Vec<Requirement>,
  pub url: Option<String>,
  pub sha256: Option<String>,
  /// `None` means every architecture.
  pub archs: Option<Vec<TargetArch>>,
  pub min_api: Option<u32>,
  /// Absolute paths, resolved against the recipe file's directory.
  pub patches: Vec<PathBuf>,
  pub env: BTreeMap<String, String>,
  pub stages: StageCommands,
  /// Host triples a toolchain can run on; `None` means any host.
  pub hosts: Option<Vec<String>>,
  /// File the recipe was loaded from.
  pub origin: PathBuf,
}

impl RecipeDef {
  pub fn name(&self) -> &str {
    &self.id.name
  }

  pub fn version(&self) -> &RecipeVersion {
    &self.id.version
  }

  pub fn is_toolchain(&self) -> bool {
    self.kind == RecipeKind::Toolchain
  }

  /// Why this recipe cannot build for `arch` at native API level `api`, if it can't.
  pub fn platform_mismatch(&self, arch: TargetArch, api: u32) -> Option<String> {
    if let Some(archs) = &self.archs
      && !archs.contains(&arch)
    {
      let supported: Vec<&str> = archs.iter().map(|a| a.as_str()).collect();
      return Some(format!("supports only {}", supported.join(", ")));
    }
    if let Some(min_api) = self.min_api
      && api < min_api
    {
      return Some(format!("requires API level {} or newer", min_api));
    }
    None
  }

  pub fn supports_host(&self, host: &str) -> bool {
    self.hosts.as_ref().is_none_or(|hosts| hosts.iter().any(|h| h == host))
  }
}
