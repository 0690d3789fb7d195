//! Single recipe realization.
//!
//! Runs the stage sequence of one recipe inside a temporary directory next to
//! its cache entry and promotes the result once the completion marker is
//! written. Nothing is visible under the final key until then.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, info, warn};

use super::{BuildConfig, BuildError, RecipeOutcome, RecipeResult, Stage};
use crate::consts::{SOURCE_DATE_EPOCH, TMP_PREFIX};
use crate::platform::TargetArch;
use crate::recipe::RecipeDef;
use crate::store::{CompleteMarker, EntryState, StoreLayout, Verify, inspect_entry};
use crate::store_lock::KeyLock;
use crate::tool::{ToolInvocation, ToolRunner};
use crate::toolchain::{Fetcher, ToolchainHandle, unpack};
use crate::util::fs::remove_path;
use crate::util::hash::Fingerprint;

/// Everything a recipe needs from the rest of the plan.
pub struct RecipeInputs<'a> {
  pub recipe: &'a RecipeDef,
  pub fingerprint: &'a Fingerprint,
  pub arch: TargetArch,
  pub ndk_api: u32,
  /// `out/` dirs of every buildable dependency, direct or transitive.
  pub dep_outputs: &'a BTreeMap<String, PathBuf>,
  pub toolchains: &'a BTreeMap<String, ToolchainHandle>,
}

/// Services shared by all recipe builds of one engine.
pub struct BuildServices<'a> {
  pub layout: &'a StoreLayout,
  pub fetcher: &'a Fetcher,
  pub runner: &'a dyn ToolRunner,
  pub config: &'a BuildConfig,
}

/// Cache entry directory of a recipe.
pub fn entry_path(layout: &StoreLayout, recipe: &RecipeDef, arch: TargetArch, fingerprint: &Fingerprint) -> PathBuf {
  layout.build_dir(arch, recipe.name(), &recipe.version().to_string(), fingerprint)
}

/// Build `inputs.recipe` unless a valid cache entry exists.
pub async fn realize_recipe(services: &BuildServices<'_>, inputs: &RecipeInputs<'_>) -> Result<RecipeResult, BuildError> {
  let started = Instant::now();
  let recipe = inputs.recipe;
  let id = &recipe.id;
  let entry = entry_path(services.layout, recipe, inputs.arch, inputs.fingerprint);
  let cache_err = |e: std::io::Error| BuildError::stage(id, Stage::Cache, e);

  let result = |outcome| RecipeResult {
    id: id.clone(),
    fingerprint: inputs.fingerprint.clone(),
    out_dir: entry.join("out"),
    outcome,
    duration: started.elapsed(),
  };

  if let EntryState::Valid(_) = inspect_entry(&entry, &inputs.fingerprint.0, Verify::Contents) {
    debug!(recipe = %id, path = ?entry, "build cache hit");
    return Ok(result(RecipeOutcome::Cached));
  }

  let lock_key = format!("build-{}-{}-{}", inputs.arch, recipe.name(), inputs.fingerprint.short());
  let _lock = KeyLock::acquire(services.layout, &lock_key).await.map_err(cache_err)?;

  match inspect_entry(&entry, &inputs.fingerprint.0, Verify::Contents) {
    EntryState::Valid(_) => {
      debug!(recipe = %id, "built by another invocation");
      return Ok(result(RecipeOutcome::Cached));
    }
    EntryState::Invalid => {
      warn!(recipe = %id, path = ?entry, "removing invalid cache entry");
      remove_path(&entry).map_err(cache_err)?;
    }
    EntryState::Missing => {}
  }

  info!(recipe = %id, fingerprint = %inputs.fingerprint.short(), "building");

  let builds_dir = services.layout.builds_dir(inputs.arch);
  std::fs::create_dir_all(&builds_dir).map_err(cache_err)?;
  let work = tempfile::Builder::new()
    .prefix(&format!("{}{}-", TMP_PREFIX, inputs.fingerprint.short()))
    .tempdir_in(&builds_dir)
    .map_err(cache_err)?;

  let prefix = work.path().join("out");
  let scratch = work.path().join("tmp");
  let src_root = work.path().join("src");
  for dir in [&prefix, &scratch, &src_root] {
    std::fs::create_dir_all(dir).map_err(cache_err)?;
  }

  let src_dir = fetch_source(services, recipe, &src_root).await?;
  let env = stage_env(services.config, inputs, &prefix, &scratch);

  for patch in &recipe.patches {
    let invocation = ToolInvocation::new("patch")
      .args(["-p1", "-i"])
      .arg(patch.display().to_string())
      .clear_env()
      .envs(&env)
      .cwd(&src_dir);
    run_stage(services.runner, recipe, Stage::Patch, &invocation).await?;
  }

  let commands = [
    (Stage::Configure, &recipe.stages.configure),
    (Stage::Compile, &recipe.stages.compile),
    (Stage::Install, &recipe.stages.install),
  ];
  for (stage, command) in commands {
    let Some(command) = command else {
      debug!(recipe = %id, stage = %stage, "no command, skipping stage");
      continue;
    };
    let invocation = ToolInvocation::shell(command).clear_env().envs(&env).cwd(&src_dir);
    run_stage(services.runner, recipe, stage, &invocation).await?;
  }

  // Only out/ survives into the cache entry.
  remove_path(&src_root).map_err(cache_err)?;
  remove_path(&scratch).map_err(cache_err)?;
  CompleteMarker::write(work.path(), &inputs.fingerprint.0).map_err(|e| BuildError::stage(id, Stage::Cache, e))?;
  std::fs::rename(work.path(), &entry).map_err(cache_err)?;
  drop(work);

  info!(recipe = %id, path = ?entry, elapsed = ?started.elapsed(), "build complete");
  Ok(result(RecipeOutcome::Built))
}

/// Download and unpack the recipe source. Returns the directory stages run in.
async fn fetch_source(services: &BuildServices<'_>, recipe: &RecipeDef, src_root: &Path) -> Result<PathBuf, BuildError> {
  let (Some(url), Some(sha256)) = (&recipe.url, &recipe.sha256) else {
    return Ok(src_root.to_path_buf());
  };

  let (archive, cached) = services
    .fetcher
    .fetch(url, sha256)
    .await
    .map_err(|failure| BuildError::stage(&recipe.id, Stage::Fetch, failure))?;
  debug!(recipe = %recipe.id, archive = ?archive, cached, "source ready");

  let dest = src_root.to_path_buf();
  tokio::task::spawn_blocking(move || unpack::unpack(&archive, &dest))
    .await
    .map_err(|e| BuildError::stage(&recipe.id, Stage::Fetch, e))?
    .map_err(|e| BuildError::stage(&recipe.id, Stage::Fetch, format!("failed to unpack source: {}", e)))?;

  Ok(unpack::content_root(src_root))
}

async fn run_stage(
  runner: &dyn ToolRunner,
  recipe: &RecipeDef,
  stage: Stage,
  invocation: &ToolInvocation,
) -> Result<(), BuildError> {
  debug!(recipe = %recipe.id, stage = %stage, command = %invocation.command_line(), "running stage");
  let output = runner
    .run(invocation)
    .await
    .map_err(|e| BuildError::stage(&recipe.id, stage, format!("failed to start {}: {}", invocation.program, e)))?;

  if output.success {
    return Ok(());
  }

  let status = output
    .code
    .map(|c| format!("exit status {}", c))
    .unwrap_or_else(|| "terminated by signal".to_string());
  Err(BuildError::RecipeBuildError {
    recipe: recipe.id.to_string(),
    stage,
    cause: status,
    code: output.code,
    output: output.diagnostics(),
  })
}

/// Environment variable suffix for a recipe name (`android-ndk` → `ANDROID_NDK`).
pub fn env_name(name: &str) -> String {
  name
    .chars()
    .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
    .collect()
}

/// The isolated environment every stage of a recipe runs with.
pub fn stage_env(config: &BuildConfig, inputs: &RecipeInputs<'_>, prefix: &Path, scratch: &Path) -> BTreeMap<String, String> {
  let mut env = BTreeMap::new();

  let mut path_entries: Vec<PathBuf> = inputs.toolchains.values().map(|t| t.bin_dir()).collect();
  path_entries.extend(std::env::split_paths(&config.host_path));
  let path = std::env::join_paths(path_entries)
    .map(|p| p.to_string_lossy().into_owned())
    .unwrap_or_else(|_| config.host_path.clone());
  env.insert("PATH".to_string(), path);

  let recipe_dir = inputs.recipe.origin.parent().map(Path::to_path_buf).unwrap_or_default();
  let vars = [
    ("KILN_PREFIX", prefix.display().to_string()),
    ("KILN_ARCH", inputs.arch.to_string()),
    ("KILN_TARGET_TRIPLE", inputs.arch.triple().to_string()),
    ("KILN_CLANG_TARGET", inputs.arch.clang_target(inputs.ndk_api)),
    ("KILN_NDK_API", inputs.ndk_api.to_string()),
    ("KILN_JOBS", config.jobs.to_string()),
    ("KILN_STAGING", config.staging_root.display().to_string()),
    ("KILN_RECIPE_DIR", recipe_dir.display().to_string()),
    ("SOURCE_DATE_EPOCH", SOURCE_DATE_EPOCH.to_string()),
    ("HOME", scratch.display().to_string()),
    ("TMPDIR", scratch.display().to_string()),
    ("LANG", "C".to_string()),
  ];
  env.extend(vars.into_iter().map(|(k, v)| (k.to_string(), v)));

  for (name, out) in inputs.dep_outputs {
    env.insert(format!("KILN_DEP_{}", env_name(name)), out.display().to_string());
  }
  for (name, handle) in inputs.toolchains {
    env.insert(format!("KILN_TOOLCHAIN_{}", env_name(name)), handle.root.display().to_string());
  }

  // The shell on Windows cannot start without these.
  #[cfg(windows)]
  for key in ["SystemRoot", "windir", "ComSpec", "PATHEXT"] {
    if let Ok(value) = std::env::var(key) {
      env.insert(key.to_string(), value);
    }
  }

  env.extend(inputs.recipe.env.iter().map(|(k, v)| (k.clone(), v.clone())));
  env
}
