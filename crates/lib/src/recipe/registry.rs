//! The set of recipes available to the resolver.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::RecipeError;
use super::lua::load_recipe_file;
use super::types::{RecipeDef, RecipeId};
use super::version::RecipeVersion;

#[derive(Debug, Clone, Default)]
pub struct RecipeRegistry {
  recipes: BTreeMap<String, BTreeMap<RecipeVersion, RecipeDef>>,
}

impl RecipeRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Load every recipe below `dirs`. Earlier directories take precedence when
  /// two files declare the same `name@version`.
  pub fn load(dirs: &[PathBuf]) -> Result<Self, RecipeError> {
    let mut registry = Self::new();
    for dir in dirs {
      if !dir.is_dir() {
        return Err(RecipeError::MissingDir { path: dir.clone() });
      }
      for file in recipe_files(dir)? {
        for recipe in load_recipe_file(&file)? {
          registry.insert(recipe);
        }
      }
    }
    debug!(recipes = registry.len(), "recipe registry loaded");
    Ok(registry)
  }

  /// Add a recipe unless one with the same identity exists. Returns whether
  /// it was added.
  pub fn insert(&mut self, recipe: RecipeDef) -> bool {
    let versions = self.recipes.entry(recipe.id.name.clone()).or_default();
    if let Some(existing) = versions.get(&recipe.id.version) {
      warn!(
        recipe = %recipe.id,
        kept = ?existing.origin,
        shadowed = ?recipe.origin,
        "duplicate recipe definition ignored"
      );
      return false;
    }
    versions.insert(recipe.id.version.clone(), recipe);
    true
  }

  pub fn get(&self, id: &RecipeId) -> Option<&RecipeDef> {
    self.recipes.get(&id.name)?.get(&id.version)
  }

  /// All registered versions of `name`, newest first.
  pub fn versions(&self, name: &str) -> impl Iterator<Item = &RecipeDef> {
    self.recipes.get(name).into_iter().flat_map(|v| v.values().rev())
  }

  pub fn contains_name(&self, name: &str) -> bool {
    self.recipes.contains_key(name)
  }

  pub fn len(&self) -> usize {
    self.recipes.values().map(BTreeMap::len).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn iter(&self) -> impl Iterator<Item = &RecipeDef> {
    self.recipes.values().flat_map(BTreeMap::values)
  }
}

/// Recipe files in `dir`: `*.lua` at the top level, then `<name>/recipe.lua`.
fn recipe_files(dir: &Path) -> Result<Vec<PathBuf>, RecipeError> {
  let read_err = |source| RecipeError::Read {
    path: dir.to_path_buf(),
    source,
  };

  let mut files = Vec::new();
  let mut nested = Vec::new();
  for entry in std::fs::read_dir(dir).map_err(read_err)? {
    let path = entry.map_err(read_err)?.path();
    if path.is_dir() {
      let candidate = path.join("recipe.lua");
      if candidate.is_file() {
        nested.push(candidate);
      }
    } else if path.extension().is_some_and(|ext| ext == "lua") {
      files.push(path);
    }
  }

  files.sort();
  nested.sort();
  files.extend(nested);
  Ok(files)
}

/// Directories listed in `KILN_RECIPE_PATH`, skipping entries that don't exist.
pub fn search_path() -> Vec<PathBuf> {
  let Some(value) = std::env::var_os("KILN_RECIPE_PATH") else {
    return Vec::new();
  };
  std::env::split_paths(&value)
    .filter(|p| !p.as_os_str().is_empty())
    .filter(|p| {
      let exists = p.is_dir();
      if !exists {
        warn!(path = ?p, "KILN_RECIPE_PATH entry is not a directory, skipping");
      }
      exists
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use serial_test::serial;
  use std::fs;
  use tempfile::TempDir;
  use tracing_test::traced_test;

  fn write(dir: &Path, rel: &str, body: &str) {
    let path = dir.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, body).unwrap();
  }

  #[test]
  fn loads_flat_and_nested_layouts() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "liba.lua", r#"return { name = "liba", version = "1.0" }"#);
    write(
      dir.path(),
      "libb/recipe.lua",
      r#"return { name = "libb", version = "2.0", depends = { "liba" } }"#,
    );
    write(dir.path(), "README.md", "not a recipe");

    let registry = RecipeRegistry::load(&[dir.path().to_path_buf()]).unwrap();
    assert_eq!(registry.len(), 2);
    assert!(registry.contains_name("liba"));
    assert!(registry.contains_name("libb"));
  }

  #[test]
  fn versions_are_newest_first() {
    let dir = TempDir::new().unwrap();
    write(
      dir.path(),
      "liba.lua",
      r#"return { { name = "liba", version = "1.9" }, { name = "liba", version = "1.10" } }"#,
    );
    let registry = RecipeRegistry::load(&[dir.path().to_path_buf()]).unwrap();
    let versions: Vec<&str> = registry.versions("liba").map(|r| r.version().as_str()).collect();
    assert_eq!(versions, vec!["1.10", "1.9"]);
  }

  #[test]
  fn earlier_directory_wins() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    write(first.path(), "liba.lua", r#"return { name = "liba", version = "1.0", env = { FROM = "first" } }"#);
    write(second.path(), "liba.lua", r#"return { name = "liba", version = "1.0", env = { FROM = "second" } }"#);

    let registry = RecipeRegistry::load(&[first.path().to_path_buf(), second.path().to_path_buf()]).unwrap();
    let recipe = registry.versions("liba").next().unwrap();
    assert_eq!(recipe.env.get("FROM").map(String::as_str), Some("first"));
  }

  #[test]
  fn missing_directory_is_an_error() {
    let dir = TempDir::new().unwrap();
    let err = RecipeRegistry::load(&[dir.path().join("nope")]).unwrap_err();
    assert!(matches!(err, RecipeError::MissingDir { .. }));
  }

  #[test]
  #[serial]
  #[traced_test]
  fn search_path_skips_missing_entries() {
    let dir = TempDir::new().unwrap();
    let joined = std::env::join_paths([dir.path().to_path_buf(), dir.path().join("missing")]).unwrap();
    temp_env::with_var("KILN_RECIPE_PATH", Some(joined), || {
      assert_eq!(search_path(), vec![dir.path().to_path_buf()]);
    });
    assert!(logs_contain("KILN_RECIPE_PATH entry is not a directory"));
  }
}
