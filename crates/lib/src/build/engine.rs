//! Parallel plan execution.
//!
//! A bounded pool of tasks consumes ready recipes (all dependencies done).
//! When a recipe finishes, its dependents' in-degree drops; when one fails,
//! its transitive dependents are skipped and independent branches carry on.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::execute::{BuildServices, RecipeInputs, realize_recipe};
use super::fingerprint::plan_fingerprints;
use super::{BuildConfig, BuildError, BuildReport, RecipeResult, staging};
use crate::recipe::RecipeId;
use crate::resolve::{BuildPlan, PlanStep};
use crate::store::StoreLayout;
use crate::tool::ToolRunner;
use crate::toolchain::{Fetcher, ToolchainHandle};
use crate::util::hash::Fingerprint;

/// Builds the buildable recipes of a plan.
#[derive(Clone)]
pub struct BuildEngine {
  layout: StoreLayout,
  fetcher: Fetcher,
  runner: Arc<dyn ToolRunner>,
  config: BuildConfig,
  cancel: CancellationToken,
}

impl BuildEngine {
  pub fn new(layout: StoreLayout, fetcher: Fetcher, runner: Arc<dyn ToolRunner>, config: BuildConfig) -> Self {
    Self {
      layout,
      fetcher,
      runner,
      config,
      cancel: CancellationToken::new(),
    }
  }

  /// Abort running stages and stop scheduling once `cancel` fires.
  pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
    self.cancel = cancel;
    self
  }

  pub fn config(&self) -> &BuildConfig {
    &self.config
  }

  /// Fingerprints of every recipe in `plan`, toolchains taken from `toolchains`.
  pub fn fingerprints(
    &self,
    plan: &BuildPlan,
    toolchains: &BTreeMap<String, ToolchainHandle>,
  ) -> Result<BTreeMap<RecipeId, Fingerprint>, BuildError> {
    plan_fingerprints(plan, |recipe| {
      toolchains
        .get(recipe.name())
        .map(|handle| handle.fingerprint.clone())
        .ok_or_else(|| BuildError::MissingToolchain {
          recipe: recipe.id.to_string(),
          toolchain: recipe.id.to_string(),
        })
    })
  }

  /// Build every buildable recipe of `plan` and compose the staging root.
  ///
  /// Recipe failures are collected in the report. `Err` is only returned when
  /// the plan cannot be started at all, or with [`BuildError::Cancelled`] after
  /// every running task has been aborted and awaited.
  pub async fn build(
    &self,
    plan: &BuildPlan,
    toolchains: &BTreeMap<String, ToolchainHandle>,
  ) -> Result<BuildReport, BuildError> {
    let fingerprints = self.fingerprints(plan, toolchains)?;
    let toolchains = Arc::new(toolchains.clone());
    let semaphore = Arc::new(Semaphore::new(self.config.workers));

    let buildables: BTreeMap<String, &PlanStep> = plan
      .buildables()
      .map(|step| (step.recipe.name().to_string(), step))
      .collect();
    let mut in_degree: BTreeMap<String, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, step) in &buildables {
      let deps: Vec<&RecipeId> = step.deps.iter().filter(|d| buildables.contains_key(&d.name)).collect();
      in_degree.insert(name.clone(), deps.len());
      for dep in deps {
        dependents.entry(dep.name.clone()).or_default().push(name.clone());
      }
    }

    // Ready queue ordered by plan position, so runs are deterministic when
    // workers == 1.
    let mut ready: BTreeSet<(usize, String)> = in_degree
      .iter()
      .filter(|(_, degree)| **degree == 0)
      .map(|(name, _)| (plan.position(name).unwrap_or(usize::MAX), name.clone()))
      .collect();

    let mut completed: BTreeMap<String, RecipeResult> = BTreeMap::new();
    let mut skipped: BTreeSet<String> = BTreeSet::new();
    let mut report = BuildReport::default();
    let mut tasks = JoinSet::new();

    info!(arch = %plan.arch, recipes = buildables.len(), workers = self.config.workers, "building plan");

    loop {
      while let Some((_, name)) = ready.pop_first() {
        let Some(step) = buildables.get(&name) else {
          continue;
        };
        let Some(fingerprint) = fingerprints.get(&step.recipe.id).cloned() else {
          continue;
        };
        let dep_outputs = transitive_outputs(plan, &step.recipe.id, &completed);
        let engine = self.clone();
        let recipe = step.recipe.clone();
        let toolchains = toolchains.clone();
        let semaphore = semaphore.clone();
        let (arch, ndk_api) = (plan.arch, plan.ndk_api);

        tasks.spawn(async move {
          let _permit = semaphore.acquire_owned().await;
          let services = BuildServices {
            layout: &engine.layout,
            fetcher: &engine.fetcher,
            runner: engine.runner.as_ref(),
            config: &engine.config,
          };
          let inputs = RecipeInputs {
            recipe: &recipe,
            fingerprint: &fingerprint,
            arch,
            ndk_api,
            dep_outputs: &dep_outputs,
            toolchains: &toolchains,
          };
          (name, realize_recipe(&services, &inputs).await)
        });
      }

      let joined = tokio::select! {
        biased;
        _ = self.cancel.cancelled() => {
          warn!(arch = %plan.arch, running = tasks.len(), "build cancelled, aborting stages");
          tasks.shutdown().await;
          return Err(BuildError::Cancelled);
        }
        joined = tasks.join_next() => joined,
      };
      let Some(joined) = joined else {
        break;
      };
      let (name, outcome) = match joined {
        Ok(finished) => finished,
        Err(join_error) => {
          // A panicked task cannot name its recipe; its dependents never become ready.
          error!(error = %join_error, "build task aborted");
          report.failures.push(BuildError::RecipeBuildError {
            recipe: "<unknown>".to_string(),
            stage: super::Stage::Install,
            cause: format!("build task aborted: {}", join_error),
            code: None,
            output: String::new(),
          });
          continue;
        }
      };

      match outcome {
        Ok(result) => {
          for dependent in dependents.get(&name).into_iter().flatten() {
            if skipped.contains(dependent) {
              continue;
            }
            if let Some(degree) = in_degree.get_mut(dependent) {
              *degree -= 1;
              if *degree == 0 {
                ready.insert((plan.position(dependent).unwrap_or(usize::MAX), dependent.clone()));
              }
            }
          }
          completed.insert(name, result);
        }
        Err(e) => {
          error!(recipe = %name, error = %e, "recipe failed");
          for dependent in plan.dependents_closure(&name) {
            if buildables.contains_key(&dependent) && skipped.insert(dependent.clone()) {
              warn!(recipe = %dependent, failed = %name, "skipping recipe due to failed dependency");
              report.skipped.push(BuildError::DependencyFailed {
                recipe: buildables[&dependent].recipe.id.to_string(),
                dependency: name.clone(),
              });
            }
          }
          report.failures.push(e);
        }
      }
    }

    report.recipes = plan
      .buildables()
      .filter_map(|step| completed.remove(step.recipe.name()))
      .collect();

    info!(
      arch = %plan.arch,
      built = report.built(),
      cached = report.cached(),
      failed = report.failures.len(),
      skipped = report.skipped.len(),
      "plan finished"
    );

    if report.is_success() {
      let root = self.config.staging_root.clone();
      staging::compose(&root, plan.arch, &report.recipes).map_err(|source| BuildError::Staging {
        path: root.clone(),
        source,
      })?;
      report.staging_root = Some(root);
    }

    Ok(report)
  }
}

/// `out/` dirs of every buildable recipe `id` depends on, directly or not.
fn transitive_outputs(
  plan: &BuildPlan,
  id: &RecipeId,
  completed: &BTreeMap<String, RecipeResult>,
) -> BTreeMap<String, PathBuf> {
  let mut outputs = BTreeMap::new();
  let mut frontier: Vec<&RecipeId> = plan.step(id).map(|s| s.deps.iter().collect()).unwrap_or_default();
  while let Some(dep) = frontier.pop() {
    if outputs.contains_key(&dep.name) {
      continue;
    }
    if let Some(result) = completed.get(&dep.name) {
      outputs.insert(dep.name.clone(), result.out_dir.clone());
    }
    if let Some(step) = plan.step(dep) {
      frontier.extend(step.deps.iter());
    }
  }
  outputs
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::build::RecipeOutcome;
  use crate::platform::TargetArch;
  use crate::recipe::{RecipeDef, RecipeRegistry, Requirement};
  use crate::resolve::{Constraint, resolve_roots};
  use crate::tool::ProcessRunner;
  use crate::toolchain::RetryPolicy;
  use crate::util::testutil::{failing_script, install_file_script, recipe};
  use tempfile::TempDir;

  fn engine(temp: &TempDir, workers: usize) -> BuildEngine {
    let layout = StoreLayout::new(temp.path().join("cache"));
    let fetcher = Fetcher::new(layout.clone(), RetryPolicy::immediate(1), None).unwrap();
    BuildEngine::new(
      layout,
      fetcher,
      Arc::new(ProcessRunner),
      BuildConfig::new(temp.path().join("staging"), workers),
    )
  }

  fn lib(name: &str, deps: &[&str]) -> RecipeDef {
    let mut r = recipe(name, "1.0", deps);
    r.stages.install = Some(install_file_script(&format!("lib/{}.so", name), name));
    r
  }

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

  #[tokio::test]
  async fn builds_in_dependency_order_and_composes_staging() {
    let temp = TempDir::new().unwrap();
    let engine = engine(&temp, 2);
    let mut app = lib("app", &["libA"]);
    #[cfg(unix)]
    {
      app.stages.install = Some("mkdir -p \"$KILN_PREFIX/lib\" && cp \"$KILN_DEP_LIBA/lib/libA.so\" \"$KILN_PREFIX/lib/copied.so\"".to_string());
    }
    let plan = plan(vec![lib("libA", &[]), app], &["app"]);

    let report = engine.build(&plan, &BTreeMap::new()).await.unwrap();
    assert!(report.is_success(), "{:?}", report.failures);
    assert_eq!(report.built(), 2);

    let staging = report.staging_root.unwrap();
    assert!(staging.join("lib/libA.so").exists());
    #[cfg(unix)]
    assert_eq!(std::fs::read_to_string(staging.join("lib/copied.so")).unwrap(), "libA");
  }

  #[tokio::test]
  async fn rerun_is_a_full_cache_hit() {
    let temp = TempDir::new().unwrap();
    let engine = engine(&temp, 2);
    let plan = plan(vec![lib("libA", &[]), lib("libB", &["libA"])], &["libB"]);

    engine.build(&plan, &BTreeMap::new()).await.unwrap();
    let again = engine.build(&plan, &BTreeMap::new()).await.unwrap();
    assert_eq!(again.built(), 0);
    assert_eq!(again.cached(), 2);
    assert!(again.recipes.iter().all(|r| r.outcome == RecipeOutcome::Cached));
  }

  #[tokio::test]
  async fn failure_skips_dependents_but_not_independent_branches() {
    let temp = TempDir::new().unwrap();
    let engine = engine(&temp, 1);
    let mut broken = lib("libA", &[]);
    broken.stages.compile = Some(failing_script("broken", 1));
    let mut also_broken = lib("libX", &[]);
    also_broken.stages.compile = Some(failing_script("also broken", 2));
    let plan = plan(
      vec![broken, lib("libB", &["libA"]), lib("libC", &[]), also_broken],
      &["libB", "libC", "libX"],
    );

    let report = engine.build(&plan, &BTreeMap::new()).await.unwrap();
    assert!(!report.is_success());
    assert_eq!(report.failures.len(), 2);
    assert_eq!(report.skipped.len(), 1);
    assert!(matches!(
      &report.skipped[0],
      BuildError::DependencyFailed { recipe, dependency } if recipe == "libB@1.0" && dependency == "libA"
    ));
    assert!(report.get("libC").is_some());
    assert!(report.staging_root.is_none());
  }

  #[tokio::test]
  #[cfg(unix)]
  async fn cancellation_aborts_running_stages_and_leaves_no_entries() {
    let temp = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    let engine = engine(&temp, 2).with_cancellation(cancel.clone());
    let mut slow = lib("libslow", &[]);
    slow.stages.compile = Some("sleep 30".to_string());
    let plan = plan(vec![slow, lib("libnext", &["libslow"])], &["libnext"]);

    let trigger = cancel.clone();
    tokio::spawn(async move {
      tokio::time::sleep(std::time::Duration::from_millis(200)).await;
      trigger.cancel();
    });

    let started = std::time::Instant::now();
    let err = engine.build(&plan, &BTreeMap::new()).await.unwrap_err();
    assert!(matches!(err, BuildError::Cancelled));
    assert!(started.elapsed() < std::time::Duration::from_secs(10));

    let builds = engine.layout.builds_dir(TargetArch::Arm64V8a);
    let leftovers: Vec<_> = std::fs::read_dir(&builds)
      .map(|entries| entries.flatten().map(|e| e.file_name()).collect())
      .unwrap_or_default();
    assert!(leftovers.is_empty(), "{:?}", leftovers);
  }

  #[tokio::test]
  async fn missing_toolchain_handle_is_reported() {
    let temp = TempDir::new().unwrap();
    let engine = engine(&temp, 1);
    let mut ndk = recipe("android-ndk", "25b", &[]);
    ndk.kind = crate::recipe::RecipeKind::Toolchain;
    let plan = plan(vec![ndk, lib("libA", &["android-ndk"])], &["libA"]);

    let err = engine.build(&plan, &BTreeMap::new()).await.unwrap_err();
    assert!(matches!(err, BuildError::MissingToolchain { .. }));
  }
}
