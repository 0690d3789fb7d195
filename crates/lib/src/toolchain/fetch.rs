//! Content-addressed downloads.
//!
//! Files land in `downloads/<sha256>/<file>` only after their checksum has
//! been verified. While in flight they live in a `.tmp-*` file next to the
//! final location, which is deleted on drop and swept on the next run if the
//! process died.

use std::path::{Path, PathBuf};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::consts::TMP_PREFIX;
use crate::store::StoreLayout;
use crate::store_lock::KeyLock;

/// Bounded exponential backoff for transient fetch failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  pub attempts: u32,
  pub base_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      attempts: 3,
      base_delay: Duration::from_millis(500),
    }
  }
}

impl RetryPolicy {
  /// No waiting between attempts.
  pub fn immediate(attempts: u32) -> Self {
    Self {
      attempts,
      base_delay: Duration::ZERO,
    }
  }

  /// Delay after the given failed attempt (1-based): `base * 2^(attempt-1)`.
  pub fn delay_after(&self, attempt: u32) -> Duration {
    self.base_delay.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
  }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
  #[error("request to {url} failed: {message}")]
  Http { url: String, message: String },

  #[error("{url} returned HTTP {status}")]
  Status { url: String, status: u16 },

  #[error("checksum mismatch for {url}: expected {expected}, got {actual}")]
  ChecksumMismatch {
    url: String,
    expected: String,
    actual: String,
  },

  #[error("unsupported URL scheme: {url}")]
  UnsupportedScheme { url: String },

  #[error("I/O error while fetching {url}: {source}")]
  Io {
    url: String,
    #[source]
    source: std::io::Error,
  },
}

impl FetchError {
  /// Whether another attempt could succeed.
  pub fn is_retryable(&self) -> bool {
    !matches!(self, FetchError::UnsupportedScheme { .. })
  }
}

/// Every attempt failed; `last` is the final cause.
#[derive(Debug, thiserror::Error)]
#[error("giving up after {attempts} attempt(s): {last}")]
pub struct FetchFailure {
  pub attempts: u32,
  #[source]
  pub last: FetchError,
}

#[derive(Debug, Clone)]
pub struct Fetcher {
  layout: StoreLayout,
  client: reqwest::Client,
  retry: RetryPolicy,
}

impl Fetcher {
  /// `proxy` routes every request through the given proxy URL.
  pub fn new(layout: StoreLayout, retry: RetryPolicy, proxy: Option<&str>) -> Result<Self, reqwest::Error> {
    let mut builder = reqwest::Client::builder().user_agent(concat!("kiln/", env!("CARGO_PKG_VERSION")));
    if let Some(proxy) = proxy {
      builder = builder.proxy(reqwest::Proxy::all(proxy)?);
    }
    Ok(Self {
      layout,
      client: builder.build()?,
      retry,
    })
  }

  pub fn layout(&self) -> &StoreLayout {
    &self.layout
  }

  /// Final location of the download for `url` with checksum `sha256`.
  pub fn cached_path(&self, url: &str, sha256: &str) -> PathBuf {
    self.layout.download_dir(sha256).join(url_to_filename(url))
  }

  /// Return the verified local copy of `url`, downloading it if needed.
  ///
  /// The second return value is `true` on a cache hit.
  pub async fn fetch(&self, url: &str, sha256: &str) -> Result<(PathBuf, bool), FetchFailure> {
    let sha256 = sha256.to_ascii_lowercase();
    let dest = self.cached_path(url, &sha256);

    if dest.is_file() {
      debug!(path = ?dest, "download cache hit");
      return Ok((dest, true));
    }

    let io_failure = |source| FetchFailure {
      attempts: 0,
      last: FetchError::Io {
        url: url.to_string(),
        source,
      },
    };
    let _lock = KeyLock::acquire(&self.layout, &format!("download-{}", sha256))
      .await
      .map_err(io_failure)?;

    if dest.is_file() {
      debug!(path = ?dest, "downloaded by another worker");
      return Ok((dest, true));
    }

    let mut attempt = 0;
    loop {
      attempt += 1;
      match self.download_once(url, &sha256, &dest).await {
        Ok(size) => {
          info!(url = %url, size, attempt, "download complete");
          return Ok((dest, false));
        }
        Err(err) if err.is_retryable() && attempt < self.retry.attempts => {
          let delay = self.retry.delay_after(attempt);
          warn!(url = %url, attempt, error = %err, delay = ?delay, "fetch failed, retrying");
          tokio::time::sleep(delay).await;
        }
        Err(err) => {
          return Err(FetchFailure {
            attempts: attempt,
            last: err,
          });
        }
      }
    }
  }

  async fn download_once(&self, url: &str, sha256: &str, dest: &Path) -> Result<u64, FetchError> {
    let io_err = |source| FetchError::Io {
      url: url.to_string(),
      source,
    };

    let downloads = self.layout.downloads_dir();
    tokio::fs::create_dir_all(&downloads).await.map_err(io_err)?;
    let temp = tempfile::Builder::new()
      .prefix(TMP_PREFIX)
      .tempfile_in(&downloads)
      .map_err(io_err)?;
    let mut file = tokio::fs::File::from_std(temp.as_file().try_clone().map_err(io_err)?);
    let mut hasher = Sha256::new();
    let mut size: u64 = 0;

    if let Some(path) = file_url_path(url) {
      let mut source = tokio::fs::File::open(&path).await.map_err(io_err)?;
      let mut buffer = vec![0u8; 64 * 1024];
      loop {
        let n = source.read(&mut buffer).await.map_err(io_err)?;
        if n == 0 {
          break;
        }
        hasher.update(&buffer[..n]);
        file.write_all(&buffer[..n]).await.map_err(io_err)?;
        size += n as u64;
      }
    } else if url.starts_with("https://") || url.starts_with("http://") {
      debug!(url = %url, "requesting");
      let mut response = self.client.get(url).send().await.map_err(|e| FetchError::Http {
        url: url.to_string(),
        message: e.to_string(),
      })?;
      if !response.status().is_success() {
        return Err(FetchError::Status {
          url: url.to_string(),
          status: response.status().as_u16(),
        });
      }
      while let Some(chunk) = response.chunk().await.map_err(|e| FetchError::Http {
        url: url.to_string(),
        message: e.to_string(),
      })? {
        hasher.update(&chunk);
        file.write_all(&chunk).await.map_err(io_err)?;
        size += chunk.len() as u64;
      }
    } else {
      return Err(FetchError::UnsupportedScheme { url: url.to_string() });
    }

    file.flush().await.map_err(io_err)?;
    file.sync_all().await.map_err(io_err)?;
    drop(file);

    let actual = hex::encode(hasher.finalize());
    if actual != sha256 {
      return Err(FetchError::ChecksumMismatch {
        url: url.to_string(),
        expected: sha256.to_string(),
        actual,
      });
    }

    if let Some(parent) = dest.parent() {
      tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    temp.persist(dest).map_err(|e| io_err(e.error))?;
    Ok(size)
  }
}

/// Local path of a `file://` URL.
pub fn file_url_path(url: &str) -> Option<PathBuf> {
  let rest = url.strip_prefix("file://")?;
  // file:///C:/dir on Windows
  #[cfg(windows)]
  let rest = match rest.strip_prefix('/') {
    Some(stripped) if stripped.as_bytes().get(1) == Some(&b':') => stripped,
    _ => rest,
  };
  Some(PathBuf::from(rest))
}

/// Convert a URL to a safe filename.
///
/// Takes the last path component and sanitizes it. Falls back to a hash of
/// the URL if no suitable filename can be extracted.
pub fn url_to_filename(url: &str) -> String {
  if let Some(filename) = url.rsplit('/').next() {
    let filename = filename.split('?').next().unwrap_or(filename);

    let sanitized: String = filename
      .chars()
      .map(|c| {
        if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
          c
        } else {
          '_'
        }
      })
      .collect();

    if !sanitized.is_empty() && sanitized != "." && sanitized != ".." && !sanitized.starts_with(TMP_PREFIX) {
      return sanitized;
    }
  }

  let mut hasher = Sha256::new();
  hasher.update(url.as_bytes());
  format!("download_{}", &hex::encode(hasher.finalize())[..16])
}
