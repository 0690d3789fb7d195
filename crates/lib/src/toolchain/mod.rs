//! Toolchain provisioning.
//!
//! Toolchain recipes (NDK, SDK, host compilers) are fetched into the
//! content-addressed download cache, unpacked into
//! `toolchains/<name>-<version>-<fp16>/` and marked complete. A second
//! request for the same identity and checksum only checks the marker.
//!
//! # Submodules
//!
//! - [`fetch`] - verified, retried downloads
//! - [`unpack`] - archive extraction

pub mod fetch;
pub mod unpack;

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::consts::{CACHE_LAYOUT_VERSION, TMP_PREFIX};
use crate::platform::host_triple;
use crate::recipe::{RecipeDef, RecipeId};
use crate::resolve::BuildPlan;
use crate::store::{CompleteMarker, EntryState, MarkerError, StoreLayout, Verify, inspect_entry};
use crate::store_lock::KeyLock;
use crate::util::fs::{remove_path, sweep_temp_entries};
use crate::util::hash::{Fingerprint, Fingerprinted};

pub use fetch::{FetchError, FetchFailure, Fetcher, RetryPolicy};

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
  #[error("failed to fetch toolchain {toolchain} after {attempts} attempt(s): {cause}")]
  FetchError {
    toolchain: String,
    attempts: u32,
    cause: String,
  },

  #[error("checksum mismatch for toolchain {toolchain} from {url}: expected {expected}, got {actual}")]
  ChecksumMismatch {
    toolchain: String,
    url: String,
    expected: String,
    actual: String,
  },

  #[error("toolchain {toolchain} does not support host {host} (supported: {})", .supported.join(", "))]
  UnsupportedHost {
    toolchain: String,
    host: String,
    supported: Vec<String>,
  },

  #[error("toolchain {toolchain} declares no url/sha256")]
  MissingSource { toolchain: String },

  #[error("failed to unpack toolchain {toolchain}: {source}")]
  Unpack {
    toolchain: String,
    #[source]
    source: io::Error,
  },

  #[error("I/O error while provisioning {toolchain}: {source}")]
  Io {
    toolchain: String,
    #[source]
    source: io::Error,
  },

  #[error(transparent)]
  Marker(#[from] MarkerError),

  #[error("failed to compute fingerprint: {0}")]
  Fingerprint(#[from] serde_json::Error),

  #[error("failed to create HTTP client: {0}")]
  Client(#[from] reqwest::Error),

  #[error("provisioning cancelled")]
  Cancelled,
}

impl ProvisionError {
  fn from_fetch(toolchain: &RecipeId, failure: FetchFailure) -> Self {
    match failure.last {
      FetchError::ChecksumMismatch { url, expected, actual } => ProvisionError::ChecksumMismatch {
        toolchain: toolchain.to_string(),
        url,
        expected,
        actual,
      },
      last => ProvisionError::FetchError {
        toolchain: toolchain.to_string(),
        attempts: failure.attempts,
        cause: last.to_string(),
      },
    }
  }
}

/// Settings for a [`Provisioner`].
#[derive(Debug, Clone)]
pub struct ProvisionConfig {
  pub retry: RetryPolicy,
  /// Host triple matched against recipe `hosts` lists.
  pub host: String,
  pub proxy: Option<String>,
}

impl Default for ProvisionConfig {
  fn default() -> Self {
    Self {
      retry: RetryPolicy::default(),
      host: host_triple(),
      proxy: None,
    }
  }
}

impl ProvisionConfig {
  /// Defaults plus `KILN_HTTPS_PROXY`.
  pub fn from_env() -> Self {
    Self {
      proxy: std::env::var("KILN_HTTPS_PROXY").ok().filter(|p| !p.is_empty()),
      ..Self::default()
    }
  }
}

/// A provisioned toolchain, ready to use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolchainHandle {
  pub id: RecipeId,
  /// Directory holding the unpacked contents.
  pub root: PathBuf,
  pub fingerprint: Fingerprint,
  /// `true` if nothing had to be fetched or unpacked.
  pub cached: bool,
}

impl ToolchainHandle {
  pub fn bin_dir(&self) -> PathBuf {
    self.root.join("bin")
  }
}

/// Identity of a provisioned toolchain entry.
#[derive(Serialize)]
struct ToolchainKey<'a> {
  layout: u32,
  id: &'a RecipeId,
  url: &'a str,
  sha256: String,
}

impl Fingerprinted for ToolchainKey<'_> {}

#[derive(Debug, Clone)]
pub struct Provisioner {
  layout: StoreLayout,
  fetcher: Fetcher,
  host: String,
  cancel: CancellationToken,
}

impl Provisioner {
  pub fn new(layout: StoreLayout, config: &ProvisionConfig) -> Result<Self, ProvisionError> {
    let fetcher = Fetcher::new(layout.clone(), config.retry, config.proxy.as_deref())?;
    Ok(Self {
      layout,
      fetcher,
      host: config.host.clone(),
      cancel: CancellationToken::new(),
    })
  }

  /// Stop [`Provisioner::ensure_all`] once `cancel` fires.
  pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
    self.cancel = cancel;
    self
  }

  pub fn layout(&self) -> &StoreLayout {
    &self.layout
  }

  /// The download cache, shared with recipe source fetches.
  pub fn fetcher(&self) -> &Fetcher {
    &self.fetcher
  }

  /// Remove `.tmp-*` leftovers from crashed runs. Requires the store lock.
  pub fn sweep(&self) -> usize {
    sweep_temp_entries(&self.layout.downloads_dir()) + sweep_temp_entries(&self.layout.toolchains_dir())
  }

  pub fn fingerprint(&self, recipe: &RecipeDef) -> Result<Fingerprint, ProvisionError> {
    let (url, sha256) = source_of(recipe)?;
    let key = ToolchainKey {
      layout: CACHE_LAYOUT_VERSION,
      id: &recipe.id,
      url,
      sha256: sha256.to_ascii_lowercase(),
    };
    Ok(key.fingerprint()?)
  }

  /// Final cache location for `recipe`.
  pub fn entry_path(&self, recipe: &RecipeDef) -> Result<PathBuf, ProvisionError> {
    let fingerprint = self.fingerprint(recipe)?;
    Ok(
      self
        .layout
        .toolchain_dir(recipe.name(), &recipe.version().to_string(), &fingerprint),
    )
  }

  /// Make sure the toolchain for `recipe` is present and return its handle.
  pub async fn ensure(&self, recipe: &RecipeDef) -> Result<ToolchainHandle, ProvisionError> {
    let toolchain = recipe.id.to_string();
    if !recipe.supports_host(&self.host) {
      return Err(ProvisionError::UnsupportedHost {
        toolchain,
        host: self.host.clone(),
        supported: recipe.hosts.clone().unwrap_or_default(),
      });
    }

    let (url, sha256) = source_of(recipe)?;
    let fingerprint = self.fingerprint(recipe)?;
    let entry = self
      .layout
      .toolchain_dir(recipe.name(), &recipe.version().to_string(), &fingerprint);
    let io_err = |source| ProvisionError::Io {
      toolchain: toolchain.clone(),
      source,
    };

    if let EntryState::Valid(_) = inspect_entry(&entry, &fingerprint.0, Verify::Presence) {
      debug!(toolchain = %recipe.id, path = ?entry, "toolchain cache hit");
      return Ok(self.handle(recipe, &entry, fingerprint, true));
    }

    let _lock = KeyLock::acquire(&self.layout, &format!("toolchain-{}-{}", recipe.name(), fingerprint.short()))
      .await
      .map_err(io_err)?;

    match inspect_entry(&entry, &fingerprint.0, Verify::Presence) {
      EntryState::Valid(_) => {
        debug!(toolchain = %recipe.id, "toolchain provisioned by another worker");
        return Ok(self.handle(recipe, &entry, fingerprint, true));
      }
      EntryState::Invalid => {
        warn!(toolchain = %recipe.id, path = ?entry, "removing incomplete toolchain entry");
        remove_path(&entry).map_err(io_err)?;
      }
      EntryState::Missing => {}
    }

    info!(toolchain = %recipe.id, url = %url, "provisioning toolchain");
    let (archive, _) = self
      .fetcher
      .fetch(url, sha256)
      .await
      .map_err(|failure| ProvisionError::from_fetch(&recipe.id, failure))?;

    let toolchains = self.layout.toolchains_dir();
    std::fs::create_dir_all(&toolchains).map_err(io_err)?;
    let staging = tempfile::Builder::new()
      .prefix(TMP_PREFIX)
      .tempdir_in(&toolchains)
      .map_err(io_err)?;

    let dest = staging.path().to_path_buf();
    let unpacked = tokio::task::spawn_blocking(move || unpack::unpack(&archive, &dest))
      .await
      .map_err(|e| io_err(io::Error::other(e)))?;
    unpacked.map_err(|source| ProvisionError::Unpack {
      toolchain: toolchain.clone(),
      source,
    })?;

    CompleteMarker::write(staging.path(), &fingerprint.0)?;
    std::fs::rename(staging.path(), &entry).map_err(io_err)?;
    // The temp dir is gone after the rename; dropping it is a no-op.
    drop(staging);

    info!(toolchain = %recipe.id, path = ?entry, "toolchain ready");
    Ok(self.handle(recipe, &entry, fingerprint, false))
  }

  /// Provision every toolchain of `plans`, at most `workers` at a time.
  ///
  /// A toolchain shared by several plans is provisioned once. All failures
  /// are returned, not just the first. On cancellation the in-flight tasks
  /// are aborted and awaited, and the only error is [`ProvisionError::Cancelled`].
  pub async fn ensure_all<'a>(
    &self,
    plans: impl IntoIterator<Item = &'a BuildPlan>,
    workers: usize,
  ) -> Result<BTreeMap<String, ToolchainHandle>, Vec<ProvisionError>> {
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut tasks = JoinSet::new();

    let mut unique: BTreeMap<&RecipeId, &RecipeDef> = BTreeMap::new();
    for plan in plans {
      for step in plan.toolchains() {
        unique.entry(&step.recipe.id).or_insert(&step.recipe);
      }
    }

    for recipe in unique.into_values() {
      let provisioner = self.clone();
      let recipe = recipe.clone();
      let semaphore = semaphore.clone();
      tasks.spawn(async move {
        let _permit = semaphore.acquire_owned().await;
        let result = provisioner.ensure(&recipe).await;
        (recipe.id, result)
      });
    }

    let mut handles = BTreeMap::new();
    let mut errors = Vec::new();
    loop {
      let joined = tokio::select! {
        biased;
        _ = self.cancel.cancelled() => {
          warn!(running = tasks.len(), "provisioning cancelled");
          tasks.shutdown().await;
          return Err(vec![ProvisionError::Cancelled]);
        }
        joined = tasks.join_next() => joined,
      };
      let Some(joined) = joined else {
        break;
      };
      match joined {
        Ok((id, Ok(handle))) => {
          handles.insert(id.name, handle);
        }
        Ok((id, Err(e))) => {
          error!(toolchain = %id, error = %e, "toolchain provisioning failed");
          errors.push(e);
        }
        Err(e) => errors.push(ProvisionError::Io {
          toolchain: "<task>".to_string(),
          source: io::Error::other(e),
        }),
      }
    }

    if errors.is_empty() { Ok(handles) } else { Err(errors) }
  }

  fn handle(&self, recipe: &RecipeDef, entry: &std::path::Path, fingerprint: Fingerprint, cached: bool) -> ToolchainHandle {
    ToolchainHandle {
      id: recipe.id.clone(),
      root: unpack::content_root(entry),
      fingerprint,
      cached,
    }
  }
}

fn source_of(recipe: &RecipeDef) -> Result<(&str, &str), ProvisionError> {
  match (&recipe.url, &recipe.sha256) {
    (Some(url), Some(sha256)) => Ok((url, sha256)),
    _ => Err(ProvisionError::MissingSource {
      toolchain: recipe.id.to_string(),
    }),
  }
}
