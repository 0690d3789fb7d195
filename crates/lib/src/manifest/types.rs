use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::platform::TargetArch;
use crate::recipe::Requirement;

/// A single problem found while loading a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
  pub line: Option<usize>,
  /// `section.key`, or the offending text for syntax errors.
  pub key: String,
  pub message: String,
}

impl ValidationIssue {
  pub fn at(line: usize, key: impl Into<String>, message: impl Into<String>) -> Self {
    Self {
      line: Some(line),
      key: key.into(),
      message: message.into(),
    }
  }

  pub fn for_key(key: impl Into<String>, message: impl Into<String>) -> Self {
    Self {
      line: None,
      key: key.into(),
      message: message.into(),
    }
  }
}

impl fmt::Display for ValidationIssue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.line {
      Some(line) => write!(f, "line {}: {}: {}", line, self.key, self.message),
      None => write!(f, "{}: {}", self.key, self.message),
    }
  }
}

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
  #[error("failed to read manifest {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid manifest {origin}:{}", format_issues(.issues))]
  Invalid {
    origin: String,
    issues: Vec<ValidationIssue>,
  },
}

fn format_issues(issues: &[ValidationIssue]) -> String {
  issues.iter().map(|i| format!("\n  {}", i)).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Orientation {
  #[serde(rename = "portrait")]
  Portrait,
  #[serde(rename = "landscape")]
  Landscape,
  #[serde(rename = "sensorPortrait")]
  SensorPortrait,
  #[serde(rename = "sensorLandscape")]
  SensorLandscape,
  #[serde(rename = "all")]
  All,
}

impl Orientation {
  pub const NAMES: &'static [&'static str] = &["portrait", "landscape", "sensorPortrait", "sensorLandscape", "all"];

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "portrait" => Some(Self::Portrait),
      "landscape" => Some(Self::Landscape),
      "sensorPortrait" => Some(Self::SensorPortrait),
      "sensorLandscape" => Some(Self::SensorLandscape),
      "all" => Some(Self::All),
      _ => None,
    }
  }

  /// Value of `android:screenOrientation`.
  pub fn screen_orientation(&self) -> &'static str {
    match self {
      Self::Portrait => "portrait",
      Self::Landscape => "landscape",
      Self::SensorPortrait => "sensorPortrait",
      Self::SensorLandscape => "sensorLandscape",
      Self::All => "fullSensor",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
  Apk,
  Aab,
}

impl ArtifactKind {
  pub fn extension(&self) -> &'static str {
    match self {
      Self::Apk => "apk",
      Self::Aab => "aab",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceLayout {
  /// Relative to the manifest directory.
  pub dir: PathBuf,
  pub include_exts: Vec<String>,
  pub include_patterns: Vec<String>,
  pub exclude_exts: Vec<String>,
  pub exclude_dirs: Vec<String>,
  pub exclude_patterns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AndroidConfig {
  /// Fully qualified, sorted and deduplicated.
  pub permissions: Vec<String>,
  pub api: u32,
  pub minapi: u32,
  pub ndk_api: u32,
  pub archs: Vec<TargetArch>,
  pub theme: String,
  pub release_artifact: ArtifactKind,
  pub meta_data: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppConfig {
  pub title: String,
  pub package_name: String,
  pub package_domain: String,
  pub version: String,
  pub version_code: u32,
  pub source: SourceLayout,
  /// Ordered and deduplicated.
  pub requirements: Vec<Requirement>,
  pub orientation: Orientation,
  pub fullscreen: bool,
  pub android: AndroidConfig,
  /// Relative to the manifest directory.
  pub local_recipes: Vec<PathBuf>,
}

/// Settings from the `[kiln]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KilnSettings {
  pub log_level: u8,
  pub build_dir: PathBuf,
  pub bin_dir: PathBuf,
  /// `None` means one worker per available CPU.
  pub workers: Option<usize>,
  pub warn_on_root: bool,
}

/// Validated build intent. Every field holds its declared or default value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Manifest {
  pub app: AppConfig,
  /// Pinned toolchain versions from `[toolchains]`.
  pub toolchains: BTreeMap<String, String>,
  pub kiln: KilnSettings,
  /// Tolerated problems such as unknown keys.
  pub warnings: Vec<String>,
  /// Directory the manifest was loaded from; relative paths resolve against it.
  #[serde(skip)]
  pub root: PathBuf,
}

impl Manifest {
  /// Application id, e.g. `org.example.demo`.
  pub fn package_id(&self) -> String {
    format!("{}.{}", self.app.package_domain, self.app.package_name)
  }

  pub fn source_dir(&self) -> PathBuf {
    self.root.join(&self.app.source.dir)
  }

  pub fn build_dir(&self) -> PathBuf {
    self.root.join(&self.kiln.build_dir)
  }

  pub fn bin_dir(&self) -> PathBuf {
    self.root.join(&self.kiln.bin_dir)
  }

  pub fn recipe_dirs(&self) -> Vec<PathBuf> {
    self.app.local_recipes.iter().map(|d| self.root.join(d)).collect()
  }

  /// Pinned requirements derived from `[toolchains]`.
  pub fn toolchain_requirements(&self) -> Vec<Requirement> {
    self
      .toolchains
      .iter()
      .filter_map(|(name, version)| {
        crate::recipe::RecipeVersion::parse(version)
          .ok()
          .map(|v| Requirement::pinned(name.clone(), v))
      })
      .collect()
  }
}
