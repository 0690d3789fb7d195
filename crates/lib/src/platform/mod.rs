//! Host and target platform identification, plus well-known directories.

pub mod arch;
pub mod os;
pub mod paths;

use std::fmt;

pub use arch::{Arch, TargetArch, UnknownArch};
pub use os::{Os, UnknownOs};

/// The machine kiln runs on, e.g. `x86_64-linux`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostPlatform {
  pub arch: Arch,
  pub os: Os,
}

impl HostPlatform {
  pub fn new(arch: Arch, os: Os) -> Self {
    Self { arch, os }
  }

  /// Returns `None` if the OS or architecture is not supported
  pub fn current() -> Option<Self> {
    Some(Self {
      arch: Arch::current()?,
      os: Os::current()?,
    })
  }

  /// Host triple as used by recipe `hosts` lists (e.g. "aarch64-darwin").
  pub fn triple(&self) -> String {
    format!("{}-{}", self.arch, self.os)
  }

  /// Parse a `<arch>-<os>` triple.
  pub fn parse(triple: &str) -> Option<Self> {
    let (arch, os) = triple.split_once('-')?;
    Some(Self::new(Arch::from_name(arch)?, os.parse().ok()?))
  }
}

impl fmt::Display for HostPlatform {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.triple())
  }
}

/// Returns the host triple, or `"unknown"` on unsupported machines.
pub fn host_triple() -> String {
  HostPlatform::current()
    .map(|p| p.triple())
    .unwrap_or_else(|| format!("{}-{}", std::env::consts::ARCH, std::env::consts::OS))
}

/// Whether kiln runs with superuser privileges.
#[cfg(unix)]
pub fn is_root() -> bool {
  rustix::process::geteuid().is_root()
}

#[cfg(not(unix))]
pub fn is_root() -> bool {
  false
}
