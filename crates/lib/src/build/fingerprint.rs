//! Configuration fingerprints of build recipes.
//!
//! A fingerprint covers everything that can change a recipe's output: its
//! definition, the contents of its patches, the target, and the fingerprints
//! of its dependencies. Including dependency fingerprints means a change to one
//! recipe invalidates exactly that recipe and its transitive dependents.

use std::collections::BTreeMap;

use serde::Serialize;

use super::BuildError;
use crate::consts::CACHE_LAYOUT_VERSION;
use crate::platform::TargetArch;
use crate::recipe::{RecipeDef, RecipeId, RecipeKind, StageCommands};
use crate::resolve::BuildPlan;
use crate::util::hash::{Fingerprint, Fingerprinted, hash_file};

/// Everything a recipe's output may depend on.
///
/// Machine-local paths handed to stages (`KILN_STAGING`, `KILN_PREFIX`,
/// `KILN_DEP_*`, `KILN_TOOLCHAIN_*`, `KILN_RECIPE_DIR`, `HOME`) are left out
/// so the same inputs map to the same entry from any project or cache root.
/// Recipes must not bake them into their outputs; dependencies and toolchains
/// are covered through their own fingerprints instead.
#[derive(Serialize)]
struct RecipeInputs<'a> {
  layout: u32,
  id: &'a RecipeId,
  kind: RecipeKind,
  url: Option<&'a str>,
  sha256: Option<String>,
  env: &'a BTreeMap<String, String>,
  stages: &'a StageCommands,
  /// (file name, content hash) per patch, in application order.
  patches: Vec<(String, String)>,
  arch: TargetArch,
  ndk_api: u32,
  /// (dependency id, dependency fingerprint), sorted by id.
  deps: Vec<(String, String)>,
}

impl Fingerprinted for RecipeInputs<'_> {}

/// Fingerprint of a buildable recipe given its dependencies' fingerprints.
pub fn recipe_fingerprint(
  recipe: &RecipeDef,
  arch: TargetArch,
  ndk_api: u32,
  deps: &BTreeMap<RecipeId, Fingerprint>,
) -> Result<Fingerprint, BuildError> {
  let fail = |message: String| BuildError::Fingerprint {
    recipe: recipe.id.to_string(),
    message,
  };

  let mut patches = Vec::with_capacity(recipe.patches.len());
  for patch in &recipe.patches {
    let hash = hash_file(patch).map_err(|e| fail(e.to_string()))?;
    let name = patch
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_default();
    patches.push((name, hash.0));
  }

  let inputs = RecipeInputs {
    layout: CACHE_LAYOUT_VERSION,
    id: &recipe.id,
    kind: recipe.kind,
    url: recipe.url.as_deref(),
    sha256: recipe.sha256.as_ref().map(|s| s.to_ascii_lowercase()),
    env: &recipe.env,
    stages: &recipe.stages,
    patches,
    arch,
    ndk_api,
    deps: deps.iter().map(|(id, fp)| (id.to_string(), fp.0.clone())).collect(),
  };
  inputs.fingerprint().map_err(|e| fail(e.to_string()))
}

/// Fingerprints of every recipe in `plan`.
///
/// Toolchain fingerprints come from `toolchain_fingerprint`; buildable recipes
/// are fingerprinted in plan order so dependencies are always known first.
pub fn plan_fingerprints<F>(plan: &BuildPlan, toolchain_fingerprint: F) -> Result<BTreeMap<RecipeId, Fingerprint>, BuildError>
where
  F: Fn(&RecipeDef) -> Result<Fingerprint, BuildError>,
{
  let mut fingerprints: BTreeMap<RecipeId, Fingerprint> = BTreeMap::new();

  for step in plan.iter() {
    let fingerprint = if step.recipe.is_toolchain() {
      toolchain_fingerprint(&step.recipe)?
    } else {
      let mut deps = BTreeMap::new();
      for dep in &step.deps {
        let Some(fp) = fingerprints.get(dep) else {
          return Err(BuildError::Fingerprint {
            recipe: step.recipe.id.to_string(),
            message: format!("dependency {} is not in the plan", dep),
          });
        };
        deps.insert(dep.clone(), fp.clone());
      }
      recipe_fingerprint(&step.recipe, plan.arch, plan.ndk_api, &deps)?
    };
    fingerprints.insert(step.recipe.id.clone(), fingerprint);
  }

  Ok(fingerprints)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::recipe::RecipeRegistry;
  use crate::resolve::{Constraint, resolve_roots};
  use crate::recipe::Requirement;
  use crate::util::testutil::recipe;
  use tempfile::TempDir;

  fn plan(recipes: Vec<RecipeDef>, roots: &[&str]) -> BuildPlan {
    let mut registry = RecipeRegistry::new();
    for r in recipes {
      registry.insert(r);
    }
    let roots: Vec<Constraint> = roots
      .iter()
      .map(|r| Constraint::new(Requirement::parse(r).unwrap(), "requirements"))
      .collect();
    resolve_roots(&roots, &registry, TargetArch::Arm64V8a, 21).unwrap()
  }

  fn no_toolchains(r: &RecipeDef) -> Result<Fingerprint, BuildError> {
    Err(BuildError::MissingToolchain {
      recipe: "test".to_string(),
      toolchain: r.id.to_string(),
    })
  }

  fn fp_of(fps: &BTreeMap<RecipeId, Fingerprint>, name: &str) -> Fingerprint {
    fps.iter().find(|(id, _)| id.name == name).unwrap().1.clone()
  }

  #[test]
  fn recipe_location_is_not_part_of_the_fingerprint() {
    let mut here = recipe("libA", "1.0", &[]);
    here.origin = "/home/alice/project/recipes/libA.lua".into();
    let mut there = here.clone();
    there.origin = "/srv/ci/checkout/recipes/libA.lua".into();

    let a = plan_fingerprints(&plan(vec![here], &["libA"]), no_toolchains).unwrap();
    let b = plan_fingerprints(&plan(vec![there], &["libA"]), no_toolchains).unwrap();
    assert_eq!(fp_of(&a, "libA"), fp_of(&b, "libA"));
  }

  #[test]
  fn changing_a_recipe_invalidates_exactly_its_dependents() {
    let base = vec![
      recipe("libA", "1.0", &[]),
      recipe("libB", "1.0", &["libA"]),
      recipe("libC", "1.0", &[]),
    ];
    let before = plan_fingerprints(&plan(base.clone(), &["libB", "libC"]), no_toolchains).unwrap();

    let mut changed = base;
    changed[0].env.insert("CFLAGS".to_string(), "-O3".to_string());
    let after = plan_fingerprints(&plan(changed, &["libB", "libC"]), no_toolchains).unwrap();

    assert_ne!(fp_of(&before, "libA"), fp_of(&after, "libA"));
    assert_ne!(fp_of(&before, "libB"), fp_of(&after, "libB"));
    assert_eq!(fp_of(&before, "libC"), fp_of(&after, "libC"));
  }

  #[test]
  fn target_changes_the_fingerprint() {
    let r = recipe("libffi", "3.4.4", &[]);
    let deps = BTreeMap::new();
    let arm = recipe_fingerprint(&r, TargetArch::Arm64V8a, 21, &deps).unwrap();
    assert_eq!(arm, recipe_fingerprint(&r, TargetArch::Arm64V8a, 21, &deps).unwrap());
    assert_ne!(arm, recipe_fingerprint(&r, TargetArch::X86_64, 21, &deps).unwrap());
    assert_ne!(arm, recipe_fingerprint(&r, TargetArch::Arm64V8a, 24, &deps).unwrap());
  }

  #[test]
  fn patch_contents_are_hashed() {
    let temp = TempDir::new().unwrap();
    let patch = temp.path().join("fix.patch");
    std::fs::write(&patch, "--- a\n+++ b\n").unwrap();

    let mut r = recipe("libffi", "3.4.4", &[]);
    r.patches = vec![patch.clone()];
    let before = recipe_fingerprint(&r, TargetArch::Arm64V8a, 21, &BTreeMap::new()).unwrap();

    std::fs::write(&patch, "--- a\n+++ c\n").unwrap();
    let after = recipe_fingerprint(&r, TargetArch::Arm64V8a, 21, &BTreeMap::new()).unwrap();
    assert_ne!(before, after);

    std::fs::remove_file(&patch).unwrap();
    let err = recipe_fingerprint(&r, TargetArch::Arm64V8a, 21, &BTreeMap::new()).unwrap_err();
    assert!(err.to_string().contains("libffi@3.4.4"));
  }
}
