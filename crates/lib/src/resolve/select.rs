//! Version selection.
//!
//! Constraints are collected from the roots and from the recipes selected so
//! far; the selection is recomputed until it stops changing, since choosing a
//! different version can change which constraints are reachable.

use std::collections::{BTreeMap, VecDeque};

use tracing::trace;

use super::ResolveError;
use crate::recipe::{RecipeDef, RecipeRegistry, Requirement};

const MAX_ROUNDS: usize = 64;

/// A requirement and where it came from (`requirements`, `[toolchains]`, or a recipe id).
#[derive(Debug, Clone)]
pub struct Constraint {
  pub requirement: Requirement,
  pub origin: String,
}

impl Constraint {
  pub fn new(requirement: Requirement, origin: impl Into<String>) -> Self {
    Self {
      requirement,
      origin: origin.into(),
    }
  }
}

pub fn select(roots: &[Constraint], registry: &RecipeRegistry) -> Result<BTreeMap<String, RecipeDef>, ResolveError> {
  let mut selection: BTreeMap<String, RecipeDef> = BTreeMap::new();

  for round in 0..MAX_ROUNDS {
    let constraints = reachable_constraints(roots, &selection);
    let mut next = BTreeMap::new();
    for (name, constraints) in &constraints {
      next.insert(name.clone(), choose(name, constraints, registry)?.clone());
    }

    trace!(round, selected = next.len(), "version selection round");
    if next == selection {
      return Ok(selection);
    }
    selection = next;
  }

  Err(ResolveError::UnresolvedDependency {
    requirement: roots
      .iter()
      .map(|c| c.requirement.to_string())
      .collect::<Vec<_>>()
      .join(", "),
    origin: "requirements".to_string(),
    reason: format!("version selection did not settle after {} rounds", MAX_ROUNDS),
  })
}

fn reachable_constraints(roots: &[Constraint], selection: &BTreeMap<String, RecipeDef>) -> BTreeMap<String, Vec<Constraint>> {
  let mut constraints: BTreeMap<String, Vec<Constraint>> = BTreeMap::new();
  let mut queue: VecDeque<Constraint> = roots.iter().cloned().collect();
  let mut expanded: Vec<String> = Vec::new();

  while let Some(constraint) = queue.pop_front() {
    let name = constraint.requirement.name.clone();
    constraints.entry(name.clone()).or_default().push(constraint);

    if expanded.contains(&name) {
      continue;
    }
    expanded.push(name.clone());

    if let Some(recipe) = selection.get(&name) {
      let origin = recipe.id.to_string();
      for dep in &recipe.depends {
        queue.push_back(Constraint::new(dep.clone(), origin.clone()));
      }
    }
  }

  constraints
}

fn choose<'a>(name: &str, constraints: &[Constraint], registry: &'a RecipeRegistry) -> Result<&'a RecipeDef, ResolveError> {
  let first = &constraints[0];
  if !registry.contains_name(name) {
    return Err(ResolveError::UnresolvedDependency {
      requirement: first.requirement.to_string(),
      origin: first.origin.clone(),
      reason: format!("no recipe named '{}'", name),
    });
  }

  let pins: Vec<&Constraint> = constraints.iter().filter(|c| c.requirement.pin().is_some()).collect();

  if let Some(pin) = pins.first() {
    for other in &pins[1..] {
      if let (Some(a), Some(b)) = (pin.requirement.pin(), other.requirement.pin())
        && !a.same_as(b)
      {
        return Err(ResolveError::ConflictingPins {
          name: name.to_string(),
          first: pin.requirement.to_string(),
          first_origin: pin.origin.clone(),
          second: other.requirement.to_string(),
          second_origin: other.origin.clone(),
        });
      }
    }

    let Some(pinned) = pin.requirement.pin() else {
      return Err(unresolved(pin, "invalid pin"));
    };
    let Some(recipe) = registry.versions(name).find(|r| r.version().same_as(pinned)) else {
      return Err(unresolved(pin, &available(name, registry)));
    };
    if let Some(violated) = constraints.iter().find(|c| !c.requirement.matches(recipe.version())) {
      return Err(unresolved(
        violated,
        &format!("conflicts with pin {} from {}", pin.requirement, pin.origin),
      ));
    }
    return Ok(recipe);
  }

  if let Some(recipe) = registry
    .versions(name)
    .find(|r| constraints.iter().all(|c| c.requirement.matches(r.version())))
  {
    return Ok(recipe);
  }

  // Name the first constraint nothing satisfies on its own, else all of them.
  if let Some(lone) = constraints
    .iter()
    .find(|c| !registry.versions(name).any(|r| c.requirement.matches(r.version())))
  {
    return Err(unresolved(lone, &available(name, registry)));
  }
  Err(ResolveError::UnresolvedDependency {
    requirement: constraints
      .iter()
      .map(|c| c.requirement.to_string())
      .collect::<Vec<_>>()
      .join(", "),
    origin: constraints
      .iter()
      .map(|c| c.origin.as_str())
      .collect::<Vec<_>>()
      .join(", "),
    reason: format!("no single version satisfies every constraint; {}", available(name, registry)),
  })
}

fn unresolved(constraint: &Constraint, reason: &str) -> ResolveError {
  ResolveError::UnresolvedDependency {
    requirement: constraint.requirement.to_string(),
    origin: constraint.origin.clone(),
    reason: reason.to_string(),
  }
}

fn available(name: &str, registry: &RecipeRegistry) -> String {
  let versions: Vec<&str> = registry.versions(name).map(|r| r.version().as_str()).collect();
  format!("available versions: {}", versions.join(", "))
}
