//! The manifest model: loading and validating `kiln.spec`.
//!
//! [`load`] is a pure transform from text to a [`Manifest`]. Every problem in
//! a file is collected and reported together in [`ManifestError::Invalid`].

mod parse;
mod schema;
mod types;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;

pub use parse::{RawDocument, RawEntry, parse_document};
pub use schema::{DefaultValue, OptionSpec, SCHEMA, Value, ValueType};
pub use types::{
  AndroidConfig, AppConfig, ArtifactKind, KilnSettings, Manifest, ManifestError, Orientation, SourceLayout,
  ValidationIssue,
};

use crate::platform::TargetArch;
use crate::recipe::{RecipeVersion, Requirement, version::is_valid_recipe_name};

const PERMISSION_PREFIX: &str = "android.permission.";
const DEFAULT_RECIPE_DIR: &str = "recipes";

#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
  /// Reject unknown keys and sections instead of warning.
  pub strict: bool,
}

/// Parse and validate manifest text. `origin` names the source in errors.
pub fn load(source: &str, origin: &str, options: &LoadOptions) -> Result<Manifest, ManifestError> {
  let doc = parse_document(source);
  let mut eval = schema::evaluate(&doc, options.strict);
  let mut issues = doc.issues;
  issues.append(&mut eval.issues);

  let manifest = build_manifest(&eval, &mut issues);

  if !issues.is_empty() {
    issues.sort_by_key(|i| i.line.unwrap_or(usize::MAX));
    return Err(ManifestError::Invalid {
      origin: origin.to_string(),
      issues,
    });
  }

  debug!(
    package = %manifest.package_id(),
    requirements = manifest.app.requirements.len(),
    "manifest loaded"
  );
  Ok(manifest)
}

/// Load a manifest file. Relative paths in it resolve against its directory.
pub fn load_file(path: &Path, options: &LoadOptions) -> Result<Manifest, ManifestError> {
  let source = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
    path: path.to_path_buf(),
    source,
  })?;

  let mut manifest = load(&source, &path.display().to_string(), options)?;
  let parent = match path.parent() {
    Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
    _ => PathBuf::from("."),
  };
  manifest.root = dunce::canonicalize(&parent).unwrap_or(parent);

  if manifest.app.local_recipes.is_empty() && manifest.root.join(DEFAULT_RECIPE_DIR).is_dir() {
    manifest.app.local_recipes.push(PathBuf::from(DEFAULT_RECIPE_DIR));
  }

  Ok(manifest)
}

fn build_manifest(eval: &schema::Evaluation, issues: &mut Vec<ValidationIssue>) -> Manifest {
  let v = &eval.values;
  let string = |key: &str| v.string("app", key).unwrap_or_default();
  let list = |key: &str| v.list("app", key).unwrap_or_default();
  let int = |section: &str, key: &str| v.int(section, key).and_then(|i| u32::try_from(i).ok());

  let version = string("version");
  let version_code = int("app", "version.code").unwrap_or_else(|| derive_version_code(&version));

  let api = int("app", "android.api").unwrap_or(33);
  let minapi = int("app", "android.minapi").unwrap_or(21);
  let ndk_api = int("app", "android.ndk_api").unwrap_or(minapi);
  if minapi > api {
    issues.push(ValidationIssue::for_key(
      "app.android.minapi",
      format!("minimum API {} is greater than target API {}", minapi, api),
    ));
  }
  if ndk_api > minapi {
    issues.push(ValidationIssue::for_key(
      "app.android.ndk_api",
      format!("NDK API {} is greater than minimum API {}", ndk_api, minapi),
    ));
  }

  let mut requirements: Vec<Requirement> = Vec::new();
  for req in list("requirements").iter().filter_map(|r| Requirement::parse(r).ok()) {
    if !requirements.contains(&req) {
      requirements.push(req);
    }
  }

  let mut archs: Vec<TargetArch> = Vec::new();
  for arch in list("android.archs").iter().filter_map(|a| a.parse().ok()) {
    if !archs.contains(&arch) {
      archs.push(arch);
    }
  }

  let mut permissions: Vec<String> = list("android.permissions")
    .into_iter()
    .map(|p| {
      if p.contains('.') {
        p
      } else {
        format!("{}{}", PERMISSION_PREFIX, p)
      }
    })
    .collect();
  permissions.sort();
  permissions.dedup();

  let meta_data: BTreeMap<String, String> = list("android.meta_data")
    .iter()
    .filter_map(|item| item.split_once('='))
    .map(|(k, val)| (k.trim().to_string(), val.trim().to_string()))
    .collect();

  let toolchains = toolchain_pins(eval, issues);
  for name in toolchains.keys() {
    if requirements.iter().any(|r| &r.name == name && r.pin().is_some()) {
      issues.push(ValidationIssue::for_key(
        format!("toolchains.{}", name),
        "also pinned in app.requirements; pin it in one place",
      ));
    }
  }

  let exts = |key: &str| -> Vec<String> {
    list(key)
      .into_iter()
      .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
      .collect()
  };

  Manifest {
    app: AppConfig {
      title: string("title"),
      package_name: string("package.name"),
      package_domain: string("package.domain"),
      version,
      version_code,
      source: SourceLayout {
        dir: PathBuf::from(v.string("app", "source.dir").unwrap_or_else(|| ".".to_string())),
        include_exts: exts("source.include_exts"),
        include_patterns: list("source.include_patterns"),
        exclude_exts: exts("source.exclude_exts"),
        exclude_dirs: list("source.exclude_dirs"),
        exclude_patterns: list("source.exclude_patterns"),
      },
      requirements,
      orientation: Orientation::parse(&string("orientation")).unwrap_or(Orientation::Portrait),
      fullscreen: v.bool("app", "fullscreen").unwrap_or(false),
      android: AndroidConfig {
        permissions,
        api,
        minapi,
        ndk_api,
        archs,
        theme: string("android.theme"),
        release_artifact: match string("android.release_artifact").as_str() {
          "aab" => ArtifactKind::Aab,
          _ => ArtifactKind::Apk,
        },
        meta_data,
      },
      local_recipes: list("local_recipes").into_iter().map(PathBuf::from).collect(),
    },
    toolchains,
    kiln: KilnSettings {
      log_level: v.int("kiln", "log_level").and_then(|i| u8::try_from(i).ok()).unwrap_or(1),
      build_dir: PathBuf::from(v.string("kiln", "build_dir").unwrap_or_else(|| ".kiln".to_string())),
      bin_dir: PathBuf::from(v.string("kiln", "bin_dir").unwrap_or_else(|| "bin".to_string())),
      workers: v.int("kiln", "workers").and_then(|i| usize::try_from(i).ok()),
      warn_on_root: v.bool("kiln", "warn_on_root").unwrap_or(true),
    },
    warnings: eval.warnings.clone(),
    root: PathBuf::from("."),
  }
}

fn toolchain_pins(eval: &schema::Evaluation, issues: &mut Vec<ValidationIssue>) -> BTreeMap<String, String> {
  let mut pins = BTreeMap::new();
  for (name, version, line) in eval.free.get("toolchains").into_iter().flatten() {
    let key = format!("toolchains.{}", name);
    if !is_valid_recipe_name(name) {
      issues.push(ValidationIssue::at(*line, key, "invalid recipe name"));
      continue;
    }
    if RecipeVersion::parse(version).is_err() {
      issues.push(ValidationIssue::at(*line, key, "missing version"));
      continue;
    }
    pins.insert(name.clone(), version.clone());
  }
  pins
}

/// `major*10000 + minor*100 + patch` from the leading digits of each
/// component; never below 1.
pub fn derive_version_code(version: &str) -> u32 {
  let mut parts = [0u32; 3];
  for (slot, component) in parts.iter_mut().zip(version.split('.')) {
    let digits: String = component.chars().take_while(|c| c.is_ascii_digit()).collect();
    *slot = digits.parse().unwrap_or(0);
  }
  let code = parts[0]
    .saturating_mul(10000)
    .saturating_add(parts[1].saturating_mul(100))
    .saturating_add(parts[2]);
  code.max(1)
}
