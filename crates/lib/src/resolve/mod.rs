//! Dependency resolution: manifest requirements → ordered [`BuildPlan`].

mod graph;
mod select;

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, info};

pub use graph::RecipeGraph;
pub use select::Constraint;

use crate::manifest::Manifest;
use crate::platform::TargetArch;
use crate::recipe::{RecipeDef, RecipeId, RecipeRegistry};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
  #[error("unresolved dependency {requirement} (required by {origin}): {reason}")]
  UnresolvedDependency {
    requirement: String,
    origin: String,
    reason: String,
  },

  #[error("conflicting pins for {name}: {first} (from {first_origin}) vs {second} (from {second_origin})")]
  ConflictingPins {
    name: String,
    first: String,
    first_origin: String,
    second: String,
    second_origin: String,
  },

  #[error("cyclic dependency: {}", .path.join(" -> "))]
  CyclicDependency { path: Vec<String> },

  #[error("{recipe} is not supported on {arch} with API level {api}: {reason}")]
  UnsupportedPlatform {
    recipe: String,
    arch: TargetArch,
    api: u32,
    reason: String,
  },

  #[error("invalid recipe {recipe}: {message}")]
  InvalidRecipe { recipe: String, message: String },
}

/// One recipe in a plan with its direct dependencies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanStep {
  #[serde(serialize_with = "serialize_id")]
  pub recipe: RecipeDef,
  pub deps: Vec<RecipeId>,
}

fn serialize_id<S: serde::Serializer>(recipe: &RecipeDef, serializer: S) -> Result<S::Ok, S::Error> {
  serializer.collect_str(&recipe.id)
}

/// Recipes for one manifest and target architecture, dependencies first.
/// Immutable for the duration of an invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildPlan {
  pub arch: TargetArch,
  pub ndk_api: u32,
  pub steps: Vec<PlanStep>,
}

impl BuildPlan {
  pub fn len(&self) -> usize {
    self.steps.len()
  }

  pub fn is_empty(&self) -> bool {
    self.steps.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &PlanStep> {
    self.steps.iter()
  }

  pub fn get(&self, name: &str) -> Option<&PlanStep> {
    self.steps.iter().find(|s| s.recipe.name() == name)
  }

  pub fn step(&self, id: &RecipeId) -> Option<&PlanStep> {
    self.steps.iter().find(|s| &s.recipe.id == id)
  }

  pub fn position(&self, name: &str) -> Option<usize> {
    self.steps.iter().position(|s| s.recipe.name() == name)
  }

  /// Steps the provisioner handles, in plan order.
  pub fn toolchains(&self) -> impl Iterator<Item = &PlanStep> {
    self.steps.iter().filter(|s| s.recipe.is_toolchain())
  }

  /// Steps the build engine compiles, in plan order.
  pub fn buildables(&self) -> impl Iterator<Item = &PlanStep> {
    self.steps.iter().filter(|s| !s.recipe.is_toolchain())
  }

  /// Names of every recipe that depends on `name`, directly or transitively.
  pub fn dependents_closure(&self, name: &str) -> BTreeSet<String> {
    let mut closure: BTreeSet<String> = BTreeSet::new();
    let mut frontier = vec![name.to_string()];
    while let Some(current) = frontier.pop() {
      for step in &self.steps {
        if step.deps.iter().any(|d| d.name == current) && closure.insert(step.recipe.name().to_string()) {
          frontier.push(step.recipe.name().to_string());
        }
      }
    }
    closure
  }
}

/// Resolve `manifest`'s requirements and toolchain pins for `arch`.
pub fn resolve(manifest: &Manifest, registry: &RecipeRegistry, arch: TargetArch) -> Result<BuildPlan, ResolveError> {
  let mut roots: Vec<Constraint> = manifest
    .app
    .requirements
    .iter()
    .map(|r| Constraint::new(r.clone(), "requirements"))
    .collect();
  roots.extend(
    manifest
      .toolchain_requirements()
      .into_iter()
      .map(|r| Constraint::new(r, "[toolchains]")),
  );

  resolve_roots(&roots, registry, arch, manifest.app.android.ndk_api)
}

/// Resolve explicit root constraints. [`resolve`] is the manifest front end.
pub fn resolve_roots(
  roots: &[Constraint],
  registry: &RecipeRegistry,
  arch: TargetArch,
  ndk_api: u32,
) -> Result<BuildPlan, ResolveError> {
  let selected = select::select(roots, registry)?;
  debug!(arch = %arch, selected = selected.len(), "versions selected");

  validate_kinds(&selected)?;

  let graph = RecipeGraph::from_selection(&selected);
  if let Some(cycle) = graph.find_cycle() {
    return Err(ResolveError::CyclicDependency {
      path: cycle.iter().map(ToString::to_string).collect(),
    });
  }

  for recipe in selected.values() {
    if let Some(reason) = recipe.platform_mismatch(arch, ndk_api) {
      return Err(ResolveError::UnsupportedPlatform {
        recipe: recipe.id.to_string(),
        arch,
        api: ndk_api,
        reason,
      });
    }
  }

  let by_id: BTreeMap<&RecipeId, &RecipeDef> = selected.values().map(|r| (&r.id, r)).collect();
  let steps: Vec<PlanStep> = graph
    .topological_order()
    .into_iter()
    .filter_map(|id| {
      let recipe = (*by_id.get(&id)?).clone();
      let deps = graph.dependencies(&id);
      Some(PlanStep { recipe, deps })
    })
    .collect();

  info!(
    arch = %arch,
    recipes = steps.len(),
    order = %steps.iter().map(|s| s.recipe.id.to_string()).collect::<Vec<_>>().join(", "),
    "build plan resolved"
  );

  Ok(BuildPlan { arch, ndk_api, steps })
}

/// Toolchains are provisioned before anything is built, so they may only
/// depend on other toolchains.
fn validate_kinds(selected: &BTreeMap<String, RecipeDef>) -> Result<(), ResolveError> {
  for recipe in selected.values().filter(|r| r.is_toolchain()) {
    for dep in &recipe.depends {
      if let Some(target) = selected.get(&dep.name)
        && !target.is_toolchain()
      {
        return Err(ResolveError::InvalidRecipe {
          recipe: recipe.id.to_string(),
          message: format!("toolchain depends on {} recipe {}", target.kind, target.id),
        });
      }
    }
  }
  Ok(())
}
