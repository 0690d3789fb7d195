//! The typed option schema: name → {type, default, validator}.
//!
//! Raw entries are evaluated once against this table; everything downstream
//! reads the resulting typed [`Manifest`](super::Manifest).

use std::collections::{BTreeMap, BTreeSet};

use super::parse::RawDocument;
use super::types::{Orientation, ValidationIssue};
use crate::platform::TargetArch;
use crate::recipe::Requirement;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
  Str,
  /// Comma separated, items trimmed, empty items dropped.
  List,
  /// `0|1`, also `true|false`.
  Bool,
  Int,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultValue {
  Required,
  /// Coerced exactly like a declared value.
  Literal(&'static str),
  /// Computed from other options after evaluation.
  Derived,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
  Str(String),
  List(Vec<String>),
  Bool(bool),
  Int(i64),
}

type Validator = fn(&Value) -> Result<(), String>;

pub struct OptionSpec {
  pub section: &'static str,
  pub key: &'static str,
  pub ty: ValueType,
  pub default: DefaultValue,
  pub validator: Option<Validator>,
}

const fn opt(
  section: &'static str,
  key: &'static str,
  ty: ValueType,
  default: DefaultValue,
  validator: Option<Validator>,
) -> OptionSpec {
  OptionSpec {
    section,
    key,
    ty,
    default,
    validator,
  }
}

use DefaultValue::{Derived, Literal, Required};
use ValueType::{Bool, Int, List, Str};

pub const SCHEMA: &[OptionSpec] = &[
  opt("app", "title", Str, Required, Some(non_empty)),
  opt("app", "package.name", Str, Required, Some(identifier)),
  opt("app", "package.domain", Str, Required, Some(dotted_identifier)),
  opt("app", "version", Str, Required, Some(non_empty)),
  opt("app", "version.code", Int, Derived, Some(positive)),
  opt("app", "source.dir", Str, Literal("."), Some(non_empty)),
  opt("app", "source.include_exts", List, Literal("py,png,jpg,kv,atlas"), None),
  opt("app", "source.include_patterns", List, Literal(""), Some(patterns)),
  opt("app", "source.exclude_exts", List, Literal("spec"), None),
  opt("app", "source.exclude_dirs", List, Literal("tests,bin,venv,.kiln,.git"), None),
  opt("app", "source.exclude_patterns", List, Literal(""), Some(patterns)),
  opt("app", "requirements", List, Literal("python3"), Some(requirements)),
  opt("app", "orientation", Str, Literal("portrait"), Some(orientation)),
  opt("app", "fullscreen", Bool, Literal("0"), None),
  opt("app", "android.permissions", List, Literal(""), Some(permissions)),
  opt("app", "android.api", Int, Literal("33"), Some(positive)),
  opt("app", "android.minapi", Int, Literal("21"), Some(positive)),
  opt("app", "android.ndk_api", Int, Derived, Some(positive)),
  opt("app", "android.archs", List, Literal("arm64-v8a,armeabi-v7a"), Some(archs)),
  opt("app", "android.theme", Str, Literal("@android:style/Theme.NoTitleBar"), Some(non_empty)),
  opt("app", "android.release_artifact", Str, Literal("apk"), Some(release_artifact)),
  opt("app", "android.meta_data", List, Literal(""), Some(meta_data)),
  opt("app", "local_recipes", List, Derived, None),
  opt("kiln", "log_level", Int, Literal("1"), Some(log_level)),
  opt("kiln", "build_dir", Str, Literal(".kiln"), Some(non_empty)),
  opt("kiln", "bin_dir", Str, Literal("bin"), Some(non_empty)),
  opt("kiln", "workers", Int, Derived, Some(positive)),
  opt("kiln", "warn_on_root", Bool, Literal("1"), None),
];

/// Sections whose keys are free-form rather than schema options.
pub const FREE_SECTIONS: &[&str] = &["toolchains"];

pub fn lookup(section: &str, key: &str) -> Option<&'static OptionSpec> {
  SCHEMA.iter().find(|o| o.section == section && o.key == key)
}

pub fn coerce(ty: ValueType, raw: &str) -> Result<Value, String> {
  match ty {
    Str => Ok(Value::Str(raw.to_string())),
    List => Ok(Value::List(split_list(raw))),
    Bool => match raw {
      "1" | "true" => Ok(Value::Bool(true)),
      "0" | "false" => Ok(Value::Bool(false)),
      _ => Err(format!("expected a boolean (0 or 1), got '{}'", raw)),
    },
    Int => raw
      .parse::<i64>()
      .map(Value::Int)
      .map_err(|_| format!("expected an integer, got '{}'", raw)),
  }
}

pub fn split_list(raw: &str) -> Vec<String> {
  raw
    .split(',')
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(str::to_string)
    .collect()
}

/// Option values after coercion and defaulting, keyed by `(section, key)`.
#[derive(Debug, Default)]
pub struct Values {
  map: BTreeMap<(&'static str, &'static str), Value>,
}

impl Values {
  pub fn get(&self, section: &str, key: &str) -> Option<&Value> {
    let spec = lookup(section, key)?;
    self.map.get(&(spec.section, spec.key))
  }

  pub fn string(&self, section: &str, key: &str) -> Option<String> {
    match self.get(section, key)? {
      Value::Str(s) => Some(s.clone()),
      _ => None,
    }
  }

  pub fn list(&self, section: &str, key: &str) -> Option<Vec<String>> {
    match self.get(section, key)? {
      Value::List(items) => Some(items.clone()),
      _ => None,
    }
  }

  pub fn bool(&self, section: &str, key: &str) -> Option<bool> {
    match self.get(section, key)? {
      Value::Bool(b) => Some(*b),
      _ => None,
    }
  }

  pub fn int(&self, section: &str, key: &str) -> Option<i64> {
    match self.get(section, key)? {
      Value::Int(i) => Some(*i),
      _ => None,
    }
  }
}

/// Result of evaluating a raw document against [`SCHEMA`].
#[derive(Debug, Default)]
pub struct Evaluation {
  pub values: Values,
  /// Entries of free-form sections, in file order.
  pub free: BTreeMap<String, Vec<(String, String, usize)>>,
  pub issues: Vec<ValidationIssue>,
  pub warnings: Vec<String>,
}

pub fn evaluate(doc: &RawDocument, strict: bool) -> Evaluation {
  let mut eval = Evaluation::default();
  let mut seen: BTreeMap<(String, String), usize> = BTreeMap::new();
  let mut unknown_sections: BTreeSet<String> = BTreeSet::new();

  for entry in &doc.entries {
    let qualified = format!("{}.{}", entry.section, entry.key);

    if let Some(previous) = seen.insert((entry.section.clone(), entry.key.clone()), entry.line) {
      let message = format!(
        "line {}: {} duplicates line {}, last value wins",
        entry.line, qualified, previous
      );
      eval.warnings.push(message);
    }

    if FREE_SECTIONS.contains(&entry.section.as_str()) {
      eval
        .free
        .entry(entry.section.clone())
        .or_default()
        .push((entry.key.clone(), entry.value.clone(), entry.line));
      continue;
    }

    let known_section = SCHEMA.iter().any(|o| o.section == entry.section);
    let Some(spec) = lookup(&entry.section, &entry.key) else {
      if !known_section {
        if unknown_sections.insert(entry.section.clone()) {
          tolerate(
            &mut eval,
            strict,
            entry.line,
            &format!("[{}]", entry.section),
            "unknown section",
          );
        }
      } else {
        tolerate(&mut eval, strict, entry.line, &qualified, "unknown key");
      }
      continue;
    };

    let checked = coerce(spec.ty, &entry.value).and_then(|value| {
      if let Some(validate) = spec.validator {
        validate(&value)?;
      }
      Ok(value)
    });

    match checked {
      Ok(value) => {
        eval.values.map.insert((spec.section, spec.key), value);
      }
      Err(message) => {
        eval.values.map.remove(&(spec.section, spec.key));
        eval.issues.push(ValidationIssue::at(entry.line, qualified, message));
      }
    }
  }

  // Sections declared without any entries still count.
  for section in &doc.sections {
    let known = FREE_SECTIONS.contains(&section.as_str()) || SCHEMA.iter().any(|o| o.section == section);
    if !known && unknown_sections.insert(section.clone()) {
      tolerate(&mut eval, strict, 0, &format!("[{}]", section), "unknown section");
    }
  }

  let failed: BTreeSet<String> = eval.issues.iter().map(|i| i.key.clone()).collect();
  for spec in SCHEMA {
    if eval.values.map.contains_key(&(spec.section, spec.key)) {
      continue;
    }
    let qualified = format!("{}.{}", spec.section, spec.key);
    match spec.default {
      Required if !failed.contains(&qualified) => {
        eval
          .issues
          .push(ValidationIssue::for_key(qualified, "missing required key"));
      }
      Literal(raw) => {
        if let Ok(value) = coerce(spec.ty, raw) {
          eval.values.map.insert((spec.section, spec.key), value);
        }
      }
      Required | Derived => {}
    }
  }

  eval
}

fn tolerate(eval: &mut Evaluation, strict: bool, line: usize, key: &str, message: &str) {
  if strict {
    let issue = if line > 0 {
      ValidationIssue::at(line, key, message)
    } else {
      ValidationIssue::for_key(key, message)
    };
    eval.issues.push(issue);
  } else {
    let text = if line > 0 {
      format!("line {}: {}: {} (ignored)", line, key, message)
    } else {
      format!("{}: {} (ignored)", key, message)
    };
    eval.warnings.push(text);
  }
}

fn non_empty(value: &Value) -> Result<(), String> {
  match value {
    Value::Str(s) if s.trim().is_empty() => Err("must not be empty".to_string()),
    _ => Ok(()),
  }
}

fn is_identifier(s: &str) -> bool {
  let mut chars = s.chars();
  chars
    .next()
    .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
    && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn identifier(value: &Value) -> Result<(), String> {
  match value {
    Value::Str(s) if !is_identifier(s) => Err(format!(
      "'{}' is not a valid identifier (letters, digits and '_', not starting with a digit)",
      s
    )),
    _ => Ok(()),
  }
}

fn dotted_identifier(value: &Value) -> Result<(), String> {
  match value {
    Value::Str(s) if !s.split('.').all(is_identifier) => {
      Err(format!("'{}' is not a valid package domain (e.g. org.example)", s))
    }
    _ => Ok(()),
  }
}

fn positive(value: &Value) -> Result<(), String> {
  match value {
    Value::Int(i) if *i < 1 || *i > i64::from(u32::MAX) => Err(format!("must be a positive integer, got {}", i)),
    _ => Ok(()),
  }
}

fn log_level(value: &Value) -> Result<(), String> {
  match value {
    Value::Int(i) if !(0..=2).contains(i) => Err(format!("must be 0, 1 or 2, got {}", i)),
    _ => Ok(()),
  }
}

fn orientation(value: &Value) -> Result<(), String> {
  match value {
    Value::Str(s) if Orientation::parse(s).is_none() => Err(format!(
      "unknown orientation '{}' (expected one of {})",
      s,
      Orientation::NAMES.join(", ")
    )),
    _ => Ok(()),
  }
}

fn release_artifact(value: &Value) -> Result<(), String> {
  match value {
    Value::Str(s) if s != "apk" && s != "aab" => Err(format!("expected apk or aab, got '{}'", s)),
    _ => Ok(()),
  }
}

fn archs(value: &Value) -> Result<(), String> {
  let Value::List(items) = value else {
    return Ok(());
  };
  if items.is_empty() {
    return Err("at least one architecture is required".to_string());
  }
  for item in items {
    item.parse::<TargetArch>().map_err(|e| e.to_string())?;
  }
  Ok(())
}

fn requirements(value: &Value) -> Result<(), String> {
  let Value::List(items) = value else {
    return Ok(());
  };
  for item in items {
    Requirement::parse(item).map_err(|e| e.to_string())?;
  }
  Ok(())
}

fn patterns(value: &Value) -> Result<(), String> {
  let Value::List(items) = value else {
    return Ok(());
  };
  for item in items {
    glob::Pattern::new(item).map_err(|e| format!("invalid glob '{}': {}", item, e.msg))?;
  }
  Ok(())
}

fn permissions(value: &Value) -> Result<(), String> {
  let Value::List(items) = value else {
    return Ok(());
  };
  for item in items {
    if !item.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.') {
      return Err(format!("invalid permission name '{}'", item));
    }
  }
  Ok(())
}

fn meta_data(value: &Value) -> Result<(), String> {
  let Value::List(items) = value else {
    return Ok(());
  };
  for item in items {
    match item.split_once('=') {
      Some((k, _)) if !k.trim().is_empty() => {}
      _ => return Err(format!("expected 'name=value', got '{}'", item)),
    }
  }
  Ok(())
}
