use std::path::PathBuf;

use crate::consts::APP_NAME;

#[derive(Debug, thiserror::Error)]
#[error("cannot determine the cache directory: set KILN_HOME or {0}")]
pub struct NoCacheDir(&'static str);

/// Returns the user's home directory
#[cfg(windows)]
pub fn home_dir() -> Option<PathBuf> {
  std::env::var_os("USERPROFILE").map(PathBuf::from)
}

/// Returns the user's home directory
#[cfg(not(windows))]
pub fn home_dir() -> Option<PathBuf> {
  std::env::var_os("HOME").map(PathBuf::from)
}

/// Root of the shared artifact cache.
///
/// `KILN_HOME` wins; otherwise the platform cache directory is used.
pub fn cache_root() -> Result<PathBuf, NoCacheDir> {
  if let Some(home) = std::env::var_os("KILN_HOME")
    && !home.is_empty()
  {
    return Ok(PathBuf::from(home));
  }
  platform_cache_dir()
}

#[cfg(windows)]
fn platform_cache_dir() -> Result<PathBuf, NoCacheDir> {
  std::env::var_os("LOCALAPPDATA")
    .map(|dir| PathBuf::from(dir).join(APP_NAME).join("Cache"))
    .ok_or(NoCacheDir("LOCALAPPDATA"))
}

#[cfg(not(windows))]
fn platform_cache_dir() -> Result<PathBuf, NoCacheDir> {
  if let Some(xdg) = std::env::var_os("XDG_CACHE_HOME")
    && !xdg.is_empty()
  {
    return Ok(PathBuf::from(xdg).join(APP_NAME));
  }
  home_dir()
    .map(|home| home.join(".cache").join(APP_NAME))
    .ok_or(NoCacheDir("HOME"))
}
