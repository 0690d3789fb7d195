use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// CPU architecture of the machine running kiln.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
  X86_64,
  Aarch64,
}

impl Arch {
  pub fn current() -> Option<Self> {
    Self::from_name(std::env::consts::ARCH)
  }

  pub fn from_name(name: &str) -> Option<Self> {
    match name {
      "x86_64" => Some(Self::X86_64),
      "aarch64" | "arm64" => Some(Self::Aarch64),
      _ => None,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::X86_64 => "x86_64",
      Self::Aarch64 => "aarch64",
    }
  }
}

impl fmt::Display for Arch {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

/// ABI of the device the package is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TargetArch {
  #[serde(rename = "armeabi-v7a")]
  ArmeabiV7a,
  #[serde(rename = "arm64-v8a")]
  Arm64V8a,
  #[serde(rename = "x86")]
  X86,
  #[serde(rename = "x86_64")]
  X86_64,
}

impl TargetArch {
  pub const ALL: [TargetArch; 4] = [Self::ArmeabiV7a, Self::Arm64V8a, Self::X86, Self::X86_64];

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::ArmeabiV7a => "armeabi-v7a",
      Self::Arm64V8a => "arm64-v8a",
      Self::X86 => "x86",
      Self::X86_64 => "x86_64",
    }
  }

  /// Compiler target triple, without the API level suffix.
  pub fn triple(&self) -> &'static str {
    match self {
      Self::ArmeabiV7a => "armv7a-linux-androideabi",
      Self::Arm64V8a => "aarch64-linux-android",
      Self::X86 => "i686-linux-android",
      Self::X86_64 => "x86_64-linux-android",
    }
  }

  /// Compiler target triple for a given native API level, e.g. `aarch64-linux-android21`.
  pub fn clang_target(&self, api: u32) -> String {
    format!("{}{}", self.triple(), api)
  }
}

impl fmt::Display for TargetArch {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown target architecture '{0}' (expected one of armeabi-v7a, arm64-v8a, x86, x86_64)")]
pub struct UnknownArch(pub String);

impl FromStr for TargetArch {
  type Err = UnknownArch;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::ALL
      .into_iter()
      .find(|arch| arch.as_str() == s)
      .ok_or_else(|| UnknownArch(s.to_string()))
  }
}
