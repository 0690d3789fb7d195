//! Installing a built package on a device.

use std::path::Path;

use tracing::info;

use super::error::PipelineError;
use crate::tool::{ToolInvocation, ToolRunner};

pub const DEFAULT_ADB: &str = "adb";

#[derive(Debug, Clone)]
pub struct DeployConfig {
  /// Device installer, `KILN_ADB` or `adb`.
  pub adb: String,
  /// Target device, passed as `-s <serial>`.
  pub serial: Option<String>,
}

impl DeployConfig {
  pub fn from_env(serial: Option<String>) -> Self {
    Self {
      adb: std::env::var("KILN_ADB")
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_ADB.to_string()),
      serial,
    }
  }

  fn invocation(&self, artifact: &Path) -> ToolInvocation {
    let mut invocation = ToolInvocation::new(&self.adb);
    if let Some(serial) = &self.serial {
      invocation = invocation.args(["-s", serial.as_str()]);
    }
    invocation.args(["install", "-r"]).arg(artifact.display().to_string())
  }
}

/// `adb [-s S] install -r <artifact>`.
pub async fn install(runner: &dyn ToolRunner, config: &DeployConfig, artifact: &Path) -> Result<(), PipelineError> {
  let fail = |message: String, output: String| PipelineError::Deploy {
    artifact: artifact.to_path_buf(),
    message,
    output,
  };

  info!(artifact = ?artifact, serial = ?config.serial, "installing package");
  let output = runner
    .run(&config.invocation(artifact))
    .await
    .map_err(|e| fail(format!("failed to start {}: {}", config.adb, e), String::new()))?;

  if !output.success {
    let status = output.code.map(|c| c.to_string()).unwrap_or_else(|| "unknown".to_string());
    return Err(fail(
      format!("{} exited with status {}", config.adb, status),
      output.diagnostics(),
    ));
  }
  // Older package managers report a rejected install on stdout with status 0.
  if let Some(line) = output.stdout.lines().find(|l| l.trim_start().starts_with("Failure [")) {
    return Err(fail(
      format!("{} rejected the package: {}", config.adb, line.trim()),
      output.diagnostics(),
    ));
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::testutil::RecordingRunner;
  use serial_test::serial;

  #[tokio::test]
  async fn installs_on_the_selected_device() {
    let runner = RecordingRunner::succeeding();
    let config = DeployConfig {
      adb: "adb".to_string(),
      serial: Some("emulator-5554".to_string()),
    };
    install(&runner, &config, Path::new("bin/app.apk")).await.unwrap();

    let calls = runner.calls();
    assert_eq!(calls[0].command_line(), "adb -s emulator-5554 install -r bin/app.apk");
  }

  #[tokio::test]
  async fn installer_failure_is_a_deploy_error() {
    let runner = RecordingRunner::failing(1, "adb: no devices/emulators found");
    let config = DeployConfig {
      adb: "adb".to_string(),
      serial: None,
    };
    let err = install(&runner, &config, Path::new("app.apk")).await.unwrap_err();

    assert_eq!(err.exit_code(), 7);
    let diagnostics = err.diagnostics();
    assert_eq!(diagnostics[0].output.as_deref(), Some("adb: no devices/emulators found"));
  }

  #[test]
  #[serial]
  fn installer_comes_from_env() {
    temp_env::with_var("KILN_ADB", Some("/opt/sdk/platform-tools/adb"), || {
      assert_eq!(DeployConfig::from_env(None).adb, "/opt/sdk/platform-tools/adb");
    });
    temp_env::with_var("KILN_ADB", None::<&str>, || {
      assert_eq!(DeployConfig::from_env(None).adb, DEFAULT_ADB);
    });
  }
}
