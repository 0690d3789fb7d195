mod cmd;
mod output;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, fmt, reload};

use kiln_lib::consts::DEFAULT_MANIFEST;
use kiln_lib::manifest::{LoadOptions, load_file};
use kiln_lib::pipeline::{Diagnostic, ErrorCategory, PipelineError, PipelineOptions};
use kiln_lib::platform::TargetArch;

use cmd::BuildArgs;
use output::{Marker, OutputFormat, print_json, print_tool_output, status};

/// Time given to aborted tasks to finish their cleanup after an interrupt.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// kiln - build and package applications for Android from a kiln.spec manifest
#[derive(Parser)]
#[command(name = "kiln")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Increase log verbosity (-v info, -vv debug, -vvv trace)
  #[arg(short, long, action = ArgAction::Count, global = true)]
  verbose: u8,

  /// Print machine-readable JSON
  #[arg(long, global = true)]
  json: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Resolve, provision, build and package every target architecture
  Build(BuildArgs),

  /// Show the resolved build plan with fingerprints and cache status
  Plan {
    /// Path to the manifest
    #[arg(short = 'f', long = "file", default_value = DEFAULT_MANIFEST)]
    manifest: PathBuf,

    /// Target architecture, repeatable (default: app.android.archs)
    #[arg(short, long = "arch", value_name = "ARCH")]
    archs: Vec<TargetArch>,

    /// Reject unknown manifest keys
    #[arg(long)]
    strict: bool,
  },

  /// Remove the project build directory
  Clean {
    /// Path to the manifest
    #[arg(short = 'f', long = "file", default_value = DEFAULT_MANIFEST)]
    manifest: PathBuf,

    /// Also remove every cache entry (toolchains, downloads, builds)
    #[arg(long)]
    all: bool,
  },

  /// Build, then install the package on a connected device
  Deploy {
    #[command(flatten)]
    build: BuildArgs,

    /// Device serial passed to the installer
    #[arg(short, long)]
    serial: Option<String>,
  },
}

impl Commands {
  fn manifest(&self) -> &Path {
    match self {
      Commands::Build(args) | Commands::Deploy { build: args, .. } => &args.manifest,
      Commands::Plan { manifest, .. } | Commands::Clean { manifest, .. } => manifest,
    }
  }
}

/// Filter directive for a verbosity level: 0 warn, 1 info, 2 debug, 3+ trace.
fn level_filter(level: u8) -> String {
  let level = match level {
    0 => "warn",
    1 => "info",
    2 => "debug",
    _ => "trace",
  };
  format!("warn,kiln={level},kiln_lib={level}")
}

/// `RUST_LOG` wins; otherwise the more verbose of `-v` and the manifest's `log_level`.
///
/// The subscriber is installed before the manifest is read, so nothing the
/// loader logs is lost.
fn init_tracing(verbose: u8, manifest: &Path) {
  let from_env = EnvFilter::try_from_default_env().ok();
  let pinned = from_env.is_some();
  let (filter, handle) = reload::Layer::<EnvFilter, Registry>::new(
    from_env.unwrap_or_else(|| EnvFilter::new(level_filter(verbose))),
  );

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(std::io::stderr).without_time())
    .init();

  if pinned {
    return;
  }
  // Manifest warnings are reported when the command loads it.
  let Ok(configured) = load_file(manifest, &LoadOptions::default()).map(|m| m.kiln.log_level) else {
    return;
  };
  if configured > verbose
    && let Err(e) = handle.reload(EnvFilter::new(level_filter(configured)))
  {
    debug!(error = %e, "failed to apply manifest log level");
  }
}

async fn run(command: Commands, output: OutputFormat, cancel: CancellationToken) -> Result<()> {
  match command {
    Commands::Build(args) => cmd::cmd_build(&args, output, cancel).await,
    Commands::Plan {
      manifest,
      archs,
      strict,
    } => {
      let options = PipelineOptions {
        archs,
        strict,
        ..PipelineOptions::new(manifest)
      };
      cmd::cmd_plan(&options, output)
    }
    Commands::Clean { manifest, all } => cmd::cmd_clean(&manifest, all, output),
    Commands::Deploy { build, serial } => cmd::cmd_deploy(&build, serial, output, cancel).await,
  }
}

#[derive(Serialize)]
struct ErrorReport {
  category: ErrorCategory,
  exit_code: i32,
  errors: Vec<Diagnostic>,
}

/// Print `err` and return the exit code of its category.
fn report_error(err: &anyhow::Error, output: OutputFormat) -> u8 {
  let (category, diagnostics) = match err.downcast_ref::<PipelineError>() {
    Some(e) => (e.category(), e.diagnostics()),
    None => (
      ErrorCategory::Other,
      vec![Diagnostic {
        message: format!("{:#}", err),
        output: None,
      }],
    ),
  };
  let code = category.exit_code();

  if output.is_json() {
    let report = ErrorReport {
      category,
      exit_code: code,
      errors: diagnostics,
    };
    if print_json(&report).is_err() {
      eprintln!("{:#}", err);
    }
  } else {
    if let Some(e) = err.downcast_ref::<PipelineError>()
      && diagnostics.len() > 1
    {
      status(Marker::Failed, &e.to_string());
    }
    for diagnostic in &diagnostics {
      status(Marker::Failed, &diagnostic.message);
      if let Some(tool_output) = &diagnostic.output {
        print_tool_output(tool_output);
      }
    }
  }

  u8::try_from(code).unwrap_or(1)
}

/// Run `work` until it finishes. The first interrupt cancels it and waits for
/// the pipeline to kill its stages and remove temporary entries; a second one
/// stops waiting.
async fn until_done_or_interrupted<F>(work: F, cancel: CancellationToken) -> Result<()>
where
  F: Future<Output = Result<()>>,
{
  tokio::pin!(work);
  tokio::select! {
    result = &mut work => return result,
    Ok(()) = tokio::signal::ctrl_c() => {}
  }

  status(Marker::Warning, "Interrupted, stopping running stages...");
  cancel.cancel();
  tokio::select! {
    result = &mut work => match result {
      Ok(()) => Err(PipelineError::Interrupted.into()),
      Err(e) => Err(e),
    },
    Ok(()) = tokio::signal::ctrl_c() => {
      warn!("second interrupt, not waiting for cleanup");
      Err(PipelineError::Interrupted.into())
    }
  }
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  let output = OutputFormat::from_flag(cli.json);
  init_tracing(cli.verbose, cli.command.manifest());

  let runtime = match tokio::runtime::Runtime::new() {
    Ok(runtime) => runtime,
    Err(e) => {
      status(Marker::Failed, &format!("Failed to create async runtime: {}", e));
      return ExitCode::FAILURE;
    }
  };

  let cancel = CancellationToken::new();
  let result = runtime.block_on(until_done_or_interrupted(run(cli.command, output, cancel.clone()), cancel));
  runtime.shutdown_timeout(SHUTDOWN_GRACE);

  match result {
    Ok(()) => ExitCode::SUCCESS,
    Err(err) => ExitCode::from(report_error(&err, output)),
  }
}
