//! Terminal rendering of kiln reports.
//!
//! Text mode shows one row per plan step marked as pending (`+`) or cached
//! (`=`), and one block per produced package. `--json` prints the library's
//! report types unchanged.

use std::io::{self, Write};
use std::time::Duration;

use anyhow::Context;
use owo_colors::{OwoColorize, Stream};

use kiln_lib::pipeline::{ArchPlan, ArchReport, CleanReport, PipelineReport, PlanEntry, PlanReport};

/// Fingerprint characters shown in plan rows.
const FINGERPRINT_DISPLAY_LEN: usize = 12;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn from_flag(json: bool) -> Self {
    if json { OutputFormat::Json } else { OutputFormat::Text }
  }

  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

/// Leading glyph of a status line or plan row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
  /// A package was produced or installed.
  Done,
  Failed,
  Warning,
  Note,
  /// Plan step that will run.
  Build,
  /// Plan step served from the cache.
  Cached,
}

impl Marker {
  pub fn glyph(self) -> &'static str {
    match self {
      Marker::Done => "✓",
      Marker::Failed => "✗",
      Marker::Warning => "⚠",
      Marker::Note => "•",
      Marker::Build => "+",
      Marker::Cached => "=",
    }
  }

  pub fn for_step(step: &PlanEntry) -> Self {
    if step.cached { Marker::Cached } else { Marker::Build }
  }

  fn painted(self, stream: Stream) -> String {
    let glyph = self.glyph();
    match self {
      Marker::Done | Marker::Build => glyph.if_supports_color(stream, |s| s.green()).to_string(),
      Marker::Failed => glyph.if_supports_color(stream, |s| s.red()).to_string(),
      Marker::Warning => glyph.if_supports_color(stream, |s| s.yellow()).to_string(),
      Marker::Note => glyph.if_supports_color(stream, |s| s.blue()).to_string(),
      Marker::Cached => glyph.if_supports_color(stream, |s| s.dimmed()).to_string(),
    }
  }
}

/// Status line. Failures and warnings go to stderr, the rest to stdout.
pub fn status(marker: Marker, message: &str) {
  match marker {
    Marker::Failed => eprintln!(
      "{} {}",
      marker.painted(Stream::Stderr),
      message.if_supports_color(Stream::Stderr, |s| s.red())
    ),
    Marker::Warning => eprintln!(
      "{} {}",
      marker.painted(Stream::Stderr),
      message.if_supports_color(Stream::Stderr, |s| s.yellow())
    ),
    _ => println!("{} {}", marker.painted(Stream::Stdout), message),
  }
}

/// Tool output under a failure, indented and uncolored so it reads verbatim.
pub fn print_tool_output(output: &str) {
  for line in output.lines() {
    eprintln!("    {}", line);
  }
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}

pub fn short_fingerprint(fingerprint: &str) -> &str {
  fingerprint.get(..FINGERPRINT_DISPLAY_LEN).unwrap_or(fingerprint)
}

/// Binary-prefixed size, one decimal above a kibibyte.
pub fn human_size(bytes: u64) -> String {
  const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
  if bytes < 1024 {
    return format!("{} B", bytes);
  }
  let mut value = bytes as f64 / 1024.0;
  let mut unit = 0;
  while value >= 1024.0 && unit < UNITS.len() - 1 {
    value /= 1024.0;
    unit += 1;
  }
  format!("{:.1} {}", value, UNITS[unit])
}

/// Stage timing rounded to milliseconds.
pub fn elapsed(duration: Duration) -> String {
  let rounded = Duration::from_millis(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX));
  if rounded.is_zero() {
    return "0ms".to_string();
  }
  humantime::format_duration(rounded).to_string()
}

/// `  + libffi@3.4.4 [library 0123456789ab] <- android-ndk@25b`
pub fn write_plan_row(out: &mut impl Write, step: &PlanEntry) -> io::Result<()> {
  let tag = format!("[{} {}]", step.kind, short_fingerprint(&step.fingerprint));
  write!(
    out,
    "  {} {} {}",
    Marker::for_step(step).painted(Stream::Stdout),
    step.id,
    tag.if_supports_color(Stream::Stdout, |s| s.dimmed())
  )?;
  if !step.deps.is_empty() {
    write!(out, " <- {}", step.deps.join(", "))?;
  }
  writeln!(out)
}

fn write_field(out: &mut impl Write, label: &str, value: &str) -> io::Result<()> {
  writeln!(out, "  {}: {}", label.if_supports_color(Stream::Stdout, |s| s.dimmed()), value)
}

fn write_arch_plan(out: &mut impl Write, arch: &ArchPlan) -> io::Result<()> {
  writeln!(out, "{} (NDK API {})", arch.arch, arch.ndk_api)?;
  for step in &arch.steps {
    write_plan_row(out, step)?;
  }
  let cached = arch.steps.iter().filter(|s| s.cached).count();
  write_field(out, "Pending", &(arch.steps.len() - cached).to_string())?;
  write_field(out, "Cached", &cached.to_string())
}

pub fn write_plan(out: &mut impl Write, report: &PlanReport) -> io::Result<()> {
  writeln!(out, "Plan: {} {}", report.package_id, report.version)?;
  for arch in &report.archs {
    writeln!(out)?;
    write_arch_plan(out, arch)?;
  }
  Ok(())
}

/// `✓ arm64-v8a → bin/hello-1.2.0-arm64-v8a-debug.apk` plus recipe counts.
pub fn write_artifact(out: &mut impl Write, arch: &ArchReport) -> io::Result<()> {
  writeln!(
    out,
    "{} {} {} {}",
    Marker::Done.painted(Stream::Stdout),
    arch.arch,
    "→".if_supports_color(Stream::Stdout, |s| s.dimmed()),
    arch.package.artifact.display()
  )?;
  write_field(
    out,
    "Recipes",
    &format!("{} built, {} cached", arch.build.built(), arch.build.cached()),
  )?;
  write_field(out, "Files", &arch.package.app_files.to_string())?;
  write_field(out, "SHA-256", short_fingerprint(&arch.package.sha256))?;
  if arch.package.signed {
    write_field(out, "Signed", "yes")?;
  }
  Ok(())
}

/// Warnings on stderr, then one artifact block per arch and the run summary.
pub fn write_report(out: &mut impl Write, report: &PipelineReport) -> io::Result<()> {
  for warning in &report.warnings {
    status(Marker::Warning, warning);
  }
  if report.swept > 0 {
    writeln!(
      out,
      "{} Removed {} leftover(s) of interrupted runs",
      Marker::Note.painted(Stream::Stdout),
      report.swept
    )?;
  }

  writeln!(out)?;
  for arch in &report.archs {
    write_artifact(out, arch)?;
  }

  writeln!(out)?;
  write_field(out, "Package", &format!("{} {} ({})", report.package_id, report.version, report.mode))?;
  write_field(out, "Toolchains", &report.toolchains.len().to_string())?;
  write_field(out, "Provision", &elapsed(report.timings.provision))?;
  write_field(out, "Build", &elapsed(report.timings.build))?;
  write_field(out, "Assemble", &elapsed(report.timings.assemble))?;
  write_field(out, "Duration", &elapsed(report.timings.total()))
}

pub fn write_clean(out: &mut impl Write, report: &CleanReport, took: Duration) -> io::Result<()> {
  if report.removed.is_empty() {
    return writeln!(out, "{} Nothing to clean", Marker::Note.painted(Stream::Stdout));
  }
  writeln!(out, "{} Clean complete", Marker::Done.painted(Stream::Stdout))?;
  for path in &report.removed {
    writeln!(out, "  {}", path.display())?;
  }
  write_field(out, "Space freed", &human_size(report.bytes_freed))?;
  write_field(out, "Duration", &elapsed(took))
}
