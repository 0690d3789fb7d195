//! Recipe versions and requirement constraints.
//!
//! Versions with up to three numeric components (`3.11`, `1.2.13`) or valid
//! semver strings are ordered numerically. Anything else (`25b`, `r21e`) is
//! opaque: it can satisfy a pin or an unconstrained requirement, nothing else.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
  #[error("empty version")]
  Empty,

  #[error("invalid requirement '{requirement}': {reason}")]
  InvalidRequirement { requirement: String, reason: String },
}

#[derive(Debug, Clone)]
pub struct RecipeVersion {
  raw: String,
  semver: Option<semver::Version>,
  /// Number of numeric components written, used by `~=`.
  components: usize,
}

impl RecipeVersion {
  pub fn parse(raw: &str) -> Result<Self, VersionError> {
    let raw = raw.trim();
    if raw.is_empty() {
      return Err(VersionError::Empty);
    }

    let (semver, components) = normalize(raw);
    Ok(Self {
      raw: raw.to_string(),
      semver,
      components,
    })
  }

  pub fn as_str(&self) -> &str {
    &self.raw
  }

  pub fn semver(&self) -> Option<&semver::Version> {
    self.semver.as_ref()
  }

  pub fn is_opaque(&self) -> bool {
    self.semver.is_none()
  }

  /// Same version, allowing `1.0` to equal `1.0.0`.
  pub fn same_as(&self, other: &RecipeVersion) -> bool {
    match (&self.semver, &other.semver) {
      (Some(a), Some(b)) => a == b,
      _ => self.raw == other.raw,
    }
  }
}

fn normalize(raw: &str) -> (Option<semver::Version>, usize) {
  let trimmed = raw.strip_prefix('v').unwrap_or(raw);
  let parts: Vec<&str> = trimmed.split('.').collect();

  if parts.len() <= 3 && parts.iter().all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit())) {
    let mut numbers = [0u64; 3];
    for (slot, part) in numbers.iter_mut().zip(&parts) {
      match part.parse() {
        Ok(n) => *slot = n,
        Err(_) => return (None, 0),
      }
    }
    return (
      Some(semver::Version::new(numbers[0], numbers[1], numbers[2])),
      parts.len(),
    );
  }

  match semver::Version::parse(trimmed) {
    Ok(version) => (Some(version), 3),
    Err(_) => (None, 0),
  }
}

impl PartialEq for RecipeVersion {
  fn eq(&self, other: &Self) -> bool {
    self.cmp(other) == Ordering::Equal
  }
}

impl Eq for RecipeVersion {}

impl PartialOrd for RecipeVersion {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for RecipeVersion {
  /// Numeric versions sort above opaque ones; ties fall back to the raw text
  /// so the order stays total.
  fn cmp(&self, other: &Self) -> Ordering {
    match (&self.semver, &other.semver) {
      (Some(a), Some(b)) => a.cmp(b).then_with(|| self.raw.cmp(&other.raw)),
      (Some(_), None) => Ordering::Greater,
      (None, Some(_)) => Ordering::Less,
      (None, None) => self.raw.cmp(&other.raw),
    }
  }
}

impl std::hash::Hash for RecipeVersion {
  fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
    self.raw.hash(state);
  }
}

impl fmt::Display for RecipeVersion {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.raw)
  }
}

impl FromStr for RecipeVersion {
  type Err = VersionError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::parse(s)
  }
}

impl Serialize for RecipeVersion {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&self.raw)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
  Eq,
  Ne,
  Ge,
  Gt,
  Le,
  Lt,
  Compatible,
}

impl Op {
  pub fn as_str(&self) -> &'static str {
    match self {
      Op::Eq => "==",
      Op::Ne => "!=",
      Op::Ge => ">=",
      Op::Gt => ">",
      Op::Le => "<=",
      Op::Lt => "<",
      Op::Compatible => "~=",
    }
  }
}

/// Longest operators first so `>=` is not read as `>`.
const OPERATORS: [(&str, Op); 7] = [
  ("==", Op::Eq),
  ("!=", Op::Ne),
  (">=", Op::Ge),
  ("<=", Op::Le),
  ("~=", Op::Compatible),
  (">", Op::Gt),
  ("<", Op::Lt),
];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Constraint {
  pub op: Op,
  pub version: RecipeVersion,
}

impl Constraint {
  pub fn matches(&self, candidate: &RecipeVersion) -> bool {
    let target = &self.version;
    if self.op == Op::Eq {
      return candidate.same_as(target);
    }
    if self.op == Op::Ne {
      return !candidate.same_as(target);
    }

    let (Some(c), Some(t)) = (candidate.semver(), target.semver()) else {
      return false;
    };
    match self.op {
      Op::Ge => c >= t,
      Op::Gt => c > t,
      Op::Le => c <= t,
      Op::Lt => c < t,
      Op::Compatible => c >= t && compatible_upper_bound(target).is_none_or(|upper| *c < upper),
      Op::Eq | Op::Ne => false,
    }
  }
}

/// `~=1.4` allows `<2.0`; `~=1.4.5` allows `<1.5.0`; `~=1` has no upper bound.
fn compatible_upper_bound(version: &RecipeVersion) -> Option<semver::Version> {
  let v = version.semver()?;
  match version.components {
    0 | 1 => None,
    2 => Some(semver::Version::new(v.major + 1, 0, 0)),
    _ => Some(semver::Version::new(v.major, v.minor + 1, 0)),
  }
}

impl fmt::Display for Constraint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}{}", self.op.as_str(), self.version)
  }
}

/// A recipe name with an optional version constraint, e.g. `openssl>=1.1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Requirement {
  pub name: String,
  pub constraint: Option<Constraint>,
}

impl Requirement {
  pub fn any(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      constraint: None,
    }
  }

  pub fn pinned(name: impl Into<String>, version: RecipeVersion) -> Self {
    Self {
      name: name.into(),
      constraint: Some(Constraint { op: Op::Eq, version }),
    }
  }

  pub fn parse(text: &str) -> Result<Self, VersionError> {
    let text = text.trim();
    let invalid = |reason: &str| VersionError::InvalidRequirement {
      requirement: text.to_string(),
      reason: reason.to_string(),
    };

    let split = text.find(|c: char| matches!(c, '=' | '!' | '<' | '>' | '~'));
    let (name, rest) = match split {
      Some(idx) => (text[..idx].trim(), Some(text[idx..].trim())),
      None => (text, None),
    };

    if !is_valid_recipe_name(name) {
      return Err(invalid("names may only contain letters, digits, '-' and '_'"));
    }

    let constraint = match rest {
      None => None,
      Some(rest) => {
        let (op_text, op) = OPERATORS
          .iter()
          .find(|(prefix, _)| rest.starts_with(prefix))
          .copied()
          .ok_or_else(|| invalid("unknown operator"))?;
        let version_text = rest[op_text.len()..].trim();
        if version_text.contains(',') || version_text.contains(char::is_whitespace) {
          return Err(invalid("only one constraint per requirement is supported"));
        }
        let version = RecipeVersion::parse(version_text).map_err(|_| invalid("missing version"))?;
        Some(Constraint { op, version })
      }
    };

    Ok(Self {
      name: name.to_string(),
      constraint,
    })
  }

  /// The pinned version, if this is an `==` requirement.
  pub fn pin(&self) -> Option<&RecipeVersion> {
    match &self.constraint {
      Some(Constraint { op: Op::Eq, version }) => Some(version),
      _ => None,
    }
  }

  pub fn matches(&self, version: &RecipeVersion) -> bool {
    self.constraint.as_ref().is_none_or(|c| c.matches(version))
  }
}

impl fmt::Display for Requirement {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.constraint {
      Some(c) => write!(f, "{}{}", self.name, c),
      None => f.write_str(&self.name),
    }
  }
}

impl FromStr for Requirement {
  type Err = VersionError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::parse(s)
  }
}

impl Serialize for Requirement {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(self)
  }
}

pub fn is_valid_recipe_name(name: &str) -> bool {
  !name.is_empty()
    && name
      .bytes()
      .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
