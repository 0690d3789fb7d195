//! External tool invocation.
//!
//! Every process kiln starts (recipe stage scripts, the packaging tool, the
//! signer, the device installer) goes through a [`ToolRunner`], so tests can
//! substitute a recording runner.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// A fully specified process launch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolInvocation {
  pub program: String,
  pub args: Vec<String>,
  pub env: BTreeMap<String, String>,
  /// Start from an empty environment instead of inheriting kiln's.
  pub clear_env: bool,
  pub cwd: Option<PathBuf>,
}

impl ToolInvocation {
  pub fn new(program: impl Into<String>) -> Self {
    Self {
      program: program.into(),
      ..Default::default()
    }
  }

  pub fn arg(mut self, arg: impl Into<String>) -> Self {
    self.args.push(arg.into());
    self
  }

  pub fn args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.args.extend(args.into_iter().map(Into::into));
    self
  }

  pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.env.insert(key.into(), value.into());
    self
  }

  pub fn envs(mut self, vars: &BTreeMap<String, String>) -> Self {
    self.env.extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
    self
  }

  pub fn clear_env(mut self) -> Self {
    self.clear_env = true;
    self
  }

  pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
    self.cwd = Some(cwd.into());
    self
  }

  /// Run `script` through the platform shell.
  pub fn shell(script: &str) -> Self {
    let (shell, args) = default_shell();
    Self::new(shell).args(args.iter().copied()).arg(script)
  }

  /// Program and arguments joined for display.
  pub fn command_line(&self) -> String {
    std::iter::once(self.program.as_str())
      .chain(self.args.iter().map(String::as_str))
      .collect::<Vec<_>>()
      .join(" ")
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
  /// Exit code, `None` when killed by a signal.
  pub code: Option<i32>,
  pub success: bool,
  pub stdout: String,
  pub stderr: String,
}

impl ToolOutput {
  /// Everything the tool printed: stdout followed by stderr, unabridged.
  pub fn diagnostics(&self) -> String {
    let mut text = String::with_capacity(self.stdout.len() + self.stderr.len() + 1);
    text.push_str(&self.stdout);
    if !self.stdout.is_empty() && !self.stdout.ends_with('\n') && !self.stderr.is_empty() {
      text.push('\n');
    }
    text.push_str(&self.stderr);
    text
  }
}

#[async_trait]
pub trait ToolRunner: Send + Sync {
  /// Run to completion. Only spawn failures are errors; a non-zero exit is
  /// reported through [`ToolOutput::success`].
  async fn run(&self, invocation: &ToolInvocation) -> std::io::Result<ToolOutput>;
}

/// Runs tools as child processes.
///
/// On unix each child leads its own process group; dropping the future kills
/// the whole group, so grandchildren started by a stage script go with it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl ToolRunner for ProcessRunner {
  async fn run(&self, invocation: &ToolInvocation) -> std::io::Result<ToolOutput> {
    let mut command = Command::new(&invocation.program);
    command
      .args(&invocation.args)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true);

    if invocation.clear_env {
      command.env_clear();
    }
    command.envs(&invocation.env);
    if let Some(cwd) = &invocation.cwd {
      command.current_dir(cwd);
    }

    #[cfg(unix)]
    command.process_group(0);

    debug!(program = %invocation.program, cwd = ?invocation.cwd, "spawning process");
    let child = command.spawn()?;
    let mut group = ProcessGroup::new(child.id());
    let output = child.wait_with_output().await?;
    group.disarm();

    let result = ToolOutput {
      code: output.status.code(),
      success: output.status.success(),
      stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
      stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };

    if !result.success {
      debug!(code = ?result.code, stderr = %result.stderr, "process failed");
    }
    Ok(result)
  }
}

/// Kills a child's process group unless disarmed.
struct ProcessGroup {
  leader: Option<u32>,
}

impl ProcessGroup {
  fn new(leader: Option<u32>) -> Self {
    Self { leader }
  }

  fn disarm(&mut self) {
    self.leader = None;
  }
}

impl Drop for ProcessGroup {
  fn drop(&mut self) {
    let Some(leader) = self.leader.take() else {
      return;
    };
    #[cfg(unix)]
    {
      use rustix::process::{Pid, Signal, kill_process_group};
      if let Some(pid) = i32::try_from(leader).ok().and_then(Pid::from_raw)
        && let Err(e) = kill_process_group(pid, Signal::KILL)
      {
        debug!(pid = leader, error = %e, "process group already gone");
      }
    }
    #[cfg(not(unix))]
    debug!(pid = leader, "abandoning process");
  }
}

/// Shell used for recipe scripts.
///
/// Always `/bin/sh` rather than `$SHELL`, which may source user profiles.
fn default_shell() -> (&'static str, &'static [&'static str]) {
  #[cfg(unix)]
  {
    ("/bin/sh", &["-c"])
  }

  #[cfg(windows)]
  {
    ("powershell.exe", &["-NoProfile", "-ExecutionPolicy", "Bypass", "-Command"])
  }
}
