//! Line-level parsing of the `kiln.spec` format into raw entries.

use super::types::ValidationIssue;

/// One `key = value` assignment with its location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
  pub section: String,
  pub key: String,
  pub value: String,
  pub line: usize,
}

#[derive(Debug, Default)]
pub struct RawDocument {
  pub entries: Vec<RawEntry>,
  /// Section names in order of first appearance.
  pub sections: Vec<String>,
  pub issues: Vec<ValidationIssue>,
}

/// Split `source` into sections and entries. Never fails; syntax problems are
/// collected as issues so they are reported together with schema errors.
pub fn parse_document(source: &str) -> RawDocument {
  let mut doc = RawDocument::default();
  let mut section: Option<String> = None;

  for (idx, raw_line) in source.lines().enumerate() {
    let line_no = idx + 1;
    let line = raw_line.trim_end();
    let trimmed = line.trim_start();

    if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
      continue;
    }

    // Continuation of the previous value.
    if line.starts_with(char::is_whitespace)
      && let Some(last) = doc.entries.last_mut()
      && section.as_deref() == Some(last.section.as_str())
    {
      if !last.value.is_empty() {
        last.value.push(' ');
      }
      last.value.push_str(trimmed);
      continue;
    }

    if let Some(rest) = trimmed.strip_prefix('[') {
      let Some(name) = rest.strip_suffix(']') else {
        doc.issues.push(ValidationIssue::at(line_no, trimmed, "unterminated section header"));
        continue;
      };
      let name = name.trim().to_string();
      if name.is_empty() {
        doc.issues.push(ValidationIssue::at(line_no, trimmed, "empty section name"));
        continue;
      }
      if !doc.sections.contains(&name) {
        doc.sections.push(name.clone());
      }
      section = Some(name);
      continue;
    }

    let Some((key, value)) = trimmed.split_once('=') else {
      doc
        .issues
        .push(ValidationIssue::at(line_no, trimmed, "expected 'key = value'"));
      continue;
    };
    let key = key.trim();
    if key.is_empty() {
      doc.issues.push(ValidationIssue::at(line_no, trimmed, "missing key before '='"));
      continue;
    }

    let Some(current) = &section else {
      doc
        .issues
        .push(ValidationIssue::at(line_no, key, "key appears before any [section] header"));
      continue;
    };

    doc.entries.push(RawEntry {
      section: current.clone(),
      key: key.to_string(),
      value: value.trim().to_string(),
      line: line_no,
    });
  }

  doc
}
