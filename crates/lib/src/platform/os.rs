use std::fmt;
use std::str::FromStr;

/// Host operating system, as named in recipe `hosts` entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Os {
  Linux,
  MacOs,
  Windows,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown host OS '{0}' (expected linux, darwin or windows)")]
pub struct UnknownOs(pub String);

impl Os {
  pub fn current() -> Option<Self> {
    std::env::consts::OS.parse().ok()
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Linux => "linux",
      Self::MacOs => "darwin",
      Self::Windows => "windows",
    }
  }
}

impl FromStr for Os {
  type Err = UnknownOs;

  /// Accepts `macos` as an alias of `darwin`.
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "linux" => Ok(Self::Linux),
      "darwin" | "macos" => Ok(Self::MacOs),
      "windows" => Ok(Self::Windows),
      other => Err(UnknownOs(other.to_string())),
    }
  }
}

impl fmt::Display for Os {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}
