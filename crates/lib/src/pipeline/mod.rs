//! Orchestration driver.
//!
//! Runs the pipeline stages in strict sequence for every target architecture:
//! load the manifest and recipes, resolve one plan per architecture, provision
//! the toolchains of all plans, build every plan, then assemble one package per
//! architecture. No stage starts before the previous one has finished for all
//! architectures, and every independent failure of a stage is reported.

mod clean;
mod deploy;
mod error;
mod report;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use clean::{CleanReport, clean_cache, clean_project};
pub use deploy::{DEFAULT_ADB, DeployConfig, install};
pub use error::{Diagnostic, ErrorCategory, PipelineError};
pub use report::{ArchPlan, ArchReport, PipelineReport, PlanEntry, PlanReport, StageTimings};

use crate::build::{BuildConfig, BuildEngine, BuildError};
use crate::build::execute::entry_path;
use crate::build::fingerprint::plan_fingerprints;
use crate::consts::DEFAULT_MANIFEST;
use crate::manifest::{LoadOptions, Manifest, load_file};
use crate::package::{AssembleConfig, Assembler, BuildMode};
use crate::platform::{self, TargetArch};
use crate::recipe::RecipeRegistry;
use crate::recipe::registry::search_path;
use crate::resolve::{BuildPlan, resolve};
use crate::store::{EntryState, StoreLayout, Verify, inspect_entry};
use crate::store_lock::{LockMode, StoreLock};
use crate::tool::{ProcessRunner, ToolRunner};
use crate::toolchain::{ProvisionConfig, ProvisionError, Provisioner};
use crate::util::fs::sweep_temp_entries;

/// What to build and how, usually straight from the command line.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
  pub manifest_path: PathBuf,
  /// Target architectures; empty means the manifest's `android.archs`.
  pub archs: Vec<TargetArch>,
  pub mode: BuildMode,
  /// Discard the project build dir and every cache entry first.
  pub clean: bool,
  /// Reject unknown manifest keys instead of warning.
  pub strict: bool,
  /// Worker pool size; overrides `KILN_WORKERS` and the manifest.
  pub workers: Option<usize>,
}

impl PipelineOptions {
  pub fn new(manifest_path: impl Into<PathBuf>) -> Self {
    Self {
      manifest_path: manifest_path.into(),
      archs: Vec::new(),
      mode: BuildMode::Debug,
      clean: false,
      strict: false,
      workers: None,
    }
  }
}

impl Default for PipelineOptions {
  fn default() -> Self {
    Self::new(DEFAULT_MANIFEST)
  }
}

/// Worker pool size: explicit value, then `KILN_WORKERS`, then the manifest,
/// then the number of CPUs.
pub fn resolve_workers(explicit: Option<usize>, manifest: &Manifest) -> usize {
  let from_env = std::env::var("KILN_WORKERS").ok().and_then(|v| v.trim().parse::<usize>().ok());
  explicit
    .or(from_env)
    .or(manifest.kiln.workers)
    .filter(|n| *n > 0)
    .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1))
}

/// Target architectures for an invocation, in order and without duplicates.
pub fn target_archs(manifest: &Manifest, requested: &[TargetArch]) -> Result<Vec<TargetArch>, PipelineError> {
  let source = if requested.is_empty() {
    &manifest.app.android.archs
  } else {
    requested
  };
  let mut archs = Vec::new();
  for arch in source {
    if !archs.contains(arch) {
      archs.push(*arch);
    }
  }
  if archs.is_empty() {
    return Err(PipelineError::NoArchitectures);
  }
  Ok(archs)
}

/// Drives the pipeline against one cache root.
pub struct Pipeline {
  layout: StoreLayout,
  runner: Arc<dyn ToolRunner>,
  provision: ProvisionConfig,
  assemble: AssembleConfig,
  cancel: CancellationToken,
}

impl Pipeline {
  pub fn new(layout: StoreLayout, runner: Arc<dyn ToolRunner>) -> Self {
    Self {
      layout,
      runner,
      provision: ProvisionConfig::default(),
      assemble: AssembleConfig::default(),
      cancel: CancellationToken::new(),
    }
  }

  /// Cache root, proxy, packaging tool and signing credentials from the environment.
  pub fn from_env() -> Result<Self, PipelineError> {
    Ok(
      Self::new(StoreLayout::from_env()?, Arc::new(ProcessRunner))
        .with_provision_config(ProvisionConfig::from_env())
        .with_assemble_config(AssembleConfig::from_env(BuildMode::Debug)),
    )
  }

  pub fn with_provision_config(mut self, config: ProvisionConfig) -> Self {
    self.provision = config;
    self
  }

  /// Packaging settings. The build mode is taken from [`PipelineOptions`].
  pub fn with_assemble_config(mut self, config: AssembleConfig) -> Self {
    self.assemble = config;
    self
  }

  /// Token that interrupts [`Pipeline::run`] and [`Pipeline::deploy`].
  ///
  /// Once it fires, running stage processes are killed, in-flight tasks are
  /// awaited so their temporary entries are removed, and the run returns
  /// [`PipelineError::Interrupted`].
  pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
    self.cancel = cancel;
    self
  }

  pub fn layout(&self) -> &StoreLayout {
    &self.layout
  }

  pub fn runner(&self) -> &Arc<dyn ToolRunner> {
    &self.runner
  }

  /// Load the manifest and every recipe it can see.
  ///
  /// Recipe directories are the manifest's `local_recipes` followed by `KILN_RECIPE_PATH`.
  pub fn load(&self, manifest_path: &Path, strict: bool) -> Result<(Manifest, RecipeRegistry), PipelineError> {
    let manifest = load_file(manifest_path, &LoadOptions { strict })?;
    for warning in &manifest.warnings {
      warn!(manifest = ?manifest_path, "{}", warning);
    }

    let mut dirs = manifest.recipe_dirs();
    dirs.extend(search_path());
    let registry = RecipeRegistry::load(&dirs)?;
    debug!(recipes = registry.len(), dirs = dirs.len(), "recipes loaded");
    Ok((manifest, registry))
  }

  fn resolve_all(
    manifest: &Manifest,
    registry: &RecipeRegistry,
    archs: &[TargetArch],
  ) -> Result<Vec<BuildPlan>, PipelineError> {
    let mut plans = Vec::with_capacity(archs.len());
    let mut failures = Vec::new();
    for arch in archs {
      match resolve(manifest, registry, *arch) {
        Ok(plan) => plans.push(plan),
        Err(source) => failures.push((*arch, source)),
      }
    }
    if !failures.is_empty() {
      return Err(PipelineError::Resolve { failures });
    }
    Ok(plans)
  }

  /// Resolve and fingerprint without building anything.
  pub fn plan(&self, options: &PipelineOptions) -> Result<PlanReport, PipelineError> {
    let (manifest, registry) = self.load(&options.manifest_path, options.strict)?;
    let archs = target_archs(&manifest, &options.archs)?;
    let plans = Self::resolve_all(&manifest, &registry, &archs)?;
    let provisioner = Provisioner::new(self.layout.clone(), &self.provision)
      .map_err(|e| PipelineError::Provision { errors: vec![e] })?;

    let mut report = PlanReport {
      package_id: manifest.package_id(),
      version: manifest.app.version.clone(),
      archs: Vec::new(),
    };

    for plan in &plans {
      let fingerprints = plan_fingerprints(plan, |recipe| {
        provisioner.fingerprint(recipe).map_err(|e| BuildError::Fingerprint {
          recipe: recipe.id.to_string(),
          message: e.to_string(),
        })
      })
      .map_err(|e| PipelineError::Build {
        failures: vec![(plan.arch, e)],
      })?;

      let steps = plan
        .iter()
        .filter_map(|step| {
          let fingerprint = fingerprints.get(&step.recipe.id)?;
          let (entry, verify) = if step.recipe.is_toolchain() {
            let entry = self
              .layout
              .toolchain_dir(step.recipe.name(), &step.recipe.version().to_string(), fingerprint);
            (entry, Verify::Presence)
          } else {
            (entry_path(&self.layout, &step.recipe, plan.arch, fingerprint), Verify::Contents)
          };
          let cached = matches!(inspect_entry(&entry, &fingerprint.0, verify), EntryState::Valid(_));
          Some(PlanEntry {
            id: step.recipe.id.to_string(),
            kind: step.recipe.kind.as_str().to_string(),
            deps: step.deps.iter().map(ToString::to_string).collect(),
            fingerprint: fingerprint.0.clone(),
            cached,
          })
        })
        .collect();

      report.archs.push(ArchPlan {
        arch: plan.arch,
        ndk_api: plan.ndk_api,
        steps,
      });
    }
    Ok(report)
  }

  /// Run the whole pipeline.
  pub async fn run(&self, options: &PipelineOptions) -> Result<PipelineReport, PipelineError> {
    let mut timings = StageTimings::default();
    let started = Instant::now();

    let (manifest, registry) = self.load(&options.manifest_path, options.strict)?;
    let archs = target_archs(&manifest, &options.archs)?;
    let workers = resolve_workers(options.workers, &manifest);
    if manifest.kiln.warn_on_root && platform::is_root() {
      warn!("running as root: recipe scripts run with full privileges");
    }

    if options.clean {
      let mut cleaned = CleanReport::default();
      clean_project(&manifest, &mut cleaned)?;
      clean_cache(&self.layout, &mut cleaned)?;
      info!(removed = cleaned.removed.len(), bytes = cleaned.bytes_freed, "clean build requested");
    }

    let swept = self.sweep_if_idle(&archs);
    let _lock = StoreLock::acquire(&self.layout, LockMode::Shared, &format!("build {}", manifest.package_id()))?;
    timings.load = started.elapsed();

    let stage = Instant::now();
    self.check_cancelled()?;
    let plans = Self::resolve_all(&manifest, &registry, &archs)?;
    timings.resolve = stage.elapsed();
    info!(archs = ?archs, recipes = plans.iter().map(BuildPlan::len).sum::<usize>(), "plans resolved");

    let stage = Instant::now();
    let provisioner = Provisioner::new(self.layout.clone(), &self.provision)
      .map_err(|e| PipelineError::Provision { errors: vec![e] })?
      .with_cancellation(self.cancel.clone());
    let toolchains = provisioner.ensure_all(&plans, workers).await.map_err(|errors| {
      if errors.iter().any(|e| matches!(e, ProvisionError::Cancelled)) {
        PipelineError::Interrupted
      } else {
        PipelineError::Provision { errors }
      }
    })?;
    timings.provision = stage.elapsed();

    let stage = Instant::now();
    let mut builds = Vec::with_capacity(plans.len());
    let mut failures = Vec::new();
    for plan in &plans {
      let staging_root = manifest.build_dir().join("staging").join(plan.arch.as_str());
      let engine = BuildEngine::new(
        self.layout.clone(),
        provisioner.fetcher().clone(),
        self.runner.clone(),
        BuildConfig::new(staging_root, workers),
      )
      .with_cancellation(self.cancel.clone());
      match engine.build(plan, &toolchains).await {
        Ok(mut report) => {
          failures.extend(report.failures.drain(..).map(|e| (plan.arch, e)));
          failures.extend(report.skipped.drain(..).map(|e| (plan.arch, e)));
          builds.push(report);
        }
        Err(BuildError::Cancelled) => return Err(PipelineError::Interrupted),
        Err(e) => failures.push((plan.arch, e)),
      }
    }
    if !failures.is_empty() {
      return Err(PipelineError::Build { failures });
    }
    timings.build = stage.elapsed();

    let stage = Instant::now();
    let assembler = Assembler::new(
      self.runner.clone(),
      AssembleConfig {
        mode: options.mode,
        ..self.assemble.clone()
      },
    );
    let mut arch_reports = Vec::with_capacity(plans.len());
    for (plan, build) in plans.iter().zip(builds) {
      let staging_root = build
        .staging_root
        .clone()
        .unwrap_or_else(|| manifest.build_dir().join("staging").join(plan.arch.as_str()));
      let package = self
        .cancel
        .run_until_cancelled(assembler.assemble(&manifest, plan.arch, &staging_root))
        .await
        .ok_or(PipelineError::Interrupted)?
        .map_err(|source| PipelineError::Assemble { arch: plan.arch, source })?;
      arch_reports.push(ArchReport {
        arch: plan.arch,
        plan: plan.iter().map(|s| s.recipe.id.to_string()).collect(),
        build,
        package,
      });
    }
    timings.assemble = stage.elapsed();

    let mut toolchains: Vec<_> = toolchains.into_values().collect();
    toolchains.sort_by(|a, b| a.id.cmp(&b.id));

    info!(package = %manifest.package_id(), elapsed = ?started.elapsed(), "pipeline complete");
    Ok(PipelineReport {
      package_id: manifest.package_id(),
      version: manifest.app.version.clone(),
      mode: options.mode,
      warnings: manifest.warnings.clone(),
      toolchains,
      archs: arch_reports,
      swept,
      timings,
      deployed: None,
    })
  }

  /// Run the pipeline, then install the package of the first architecture.
  pub async fn deploy(&self, options: &PipelineOptions, config: &DeployConfig) -> Result<PipelineReport, PipelineError> {
    let mut report = self.run(options).await?;
    let Some(first) = report.archs.first() else {
      return Err(PipelineError::NoArchitectures);
    };
    let artifact = first.package.artifact.clone();
    self
      .cancel
      .run_until_cancelled(install(self.runner.as_ref(), config, &artifact))
      .await
      .ok_or(PipelineError::Interrupted)??;
    report.deployed = Some(artifact);
    Ok(report)
  }

  fn check_cancelled(&self) -> Result<(), PipelineError> {
    if self.cancel.is_cancelled() {
      return Err(PipelineError::Interrupted);
    }
    Ok(())
  }

  /// Remove the project build dir, and with `all` the cache contents too.
  ///
  /// With `all`, a missing manifest only skips the project part.
  pub fn clean(&self, manifest_path: &Path, all: bool) -> Result<CleanReport, PipelineError> {
    let mut report = CleanReport::default();
    if !all || manifest_path.exists() {
      let manifest = load_file(manifest_path, &LoadOptions::default())?;
      clean_project(&manifest, &mut report)?;
    }
    if all {
      clean_cache(&self.layout, &mut report)?;
    }
    Ok(report)
  }

  /// Sweep leftovers of crashed runs when no other invocation uses the cache.
  fn sweep_if_idle(&self, archs: &[TargetArch]) -> usize {
    let Ok(_lock) = StoreLock::acquire(&self.layout, LockMode::Exclusive, "sweep") else {
      debug!("cache in use, skipping sweep of temporary entries");
      return 0;
    };
    let mut swept = sweep_temp_entries(&self.layout.downloads_dir()) + sweep_temp_entries(&self.layout.toolchains_dir());
    for arch in archs {
      swept += sweep_temp_entries(&self.layout.builds_dir(*arch));
    }
    if swept > 0 {
      info!(swept, "removed leftovers of interrupted runs");
    }
    swept
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::manifest::load;
  use serial_test::serial;
  use tracing_test::traced_test;

  fn manifest(extra: &str) -> Manifest {
    let source = format!(
      "[app]\ntitle = Demo\npackage.name = demo\npackage.domain = org.example\nversion = 1.0\n{}",
      extra
    );
    load(&source, "kiln.spec", &LoadOptions::default()).unwrap()
  }

  #[test]
  #[serial]
  fn workers_precedence() {
    let m = manifest("[kiln]\nworkers = 3\n");
    temp_env::with_var("KILN_WORKERS", Some("5"), || {
      assert_eq!(resolve_workers(Some(2), &m), 2);
      assert_eq!(resolve_workers(None, &m), 5);
    });
    temp_env::with_var("KILN_WORKERS", None::<&str>, || {
      assert_eq!(resolve_workers(None, &m), 3);
      assert!(resolve_workers(None, &manifest("")) >= 1);
    });
  }

  #[test]
  #[traced_test]
  fn manifest_warnings_are_logged_once_with_the_path() {
    let temp = tempfile::TempDir::new().unwrap();
    let path = temp.path().join("kiln.spec");
    std::fs::write(
      &path,
      "[app]\ntitle = Demo\ntitle = Again\npackage.name = demo\npackage.domain = org.example\nversion = 1.0\n",
    )
    .unwrap();

    let pipeline = Pipeline::new(StoreLayout::new(temp.path().join("cache")), Arc::new(ProcessRunner));
    let (manifest, _) = pipeline.load(&path, false).unwrap();
    assert_eq!(manifest.warnings.len(), 1);
    assert!(logs_contain("duplicates line 2"));
    assert!(logs_contain("kiln.spec"));
    logs_assert(|lines: &[&str]| match lines.iter().filter(|l| l.contains("duplicates line 2")).count() {
      1 => Ok(()),
      n => Err(format!("warning logged {} times", n)),
    });
  }

  #[test]
  fn requested_archs_override_manifest_and_dedup() {
    let m = manifest("android.archs = x86_64\n");
    assert_eq!(target_archs(&m, &[]).unwrap(), vec![TargetArch::X86_64]);
    assert_eq!(
      target_archs(&m, &[TargetArch::Arm64V8a, TargetArch::Arm64V8a, TargetArch::X86]).unwrap(),
      vec![TargetArch::Arm64V8a, TargetArch::X86]
    );

    let mut empty = m.clone();
    empty.app.android.archs.clear();
    assert!(matches!(target_archs(&empty, &[]), Err(PipelineError::NoArchitectures)));
  }
}
