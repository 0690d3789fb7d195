//! Release signing through an external signing tool.

use std::path::{Path, PathBuf};

use tracing::info;

use super::AssembleError;
use crate::tool::{ToolInvocation, ToolRunner};

pub const DEFAULT_SIGN_TOOL: &str = "apksigner";

/// Name of the variable the keystore password is passed through.
const PASSWORD_VAR: &str = "KILN_KEYSTORE_PASSWD";

/// Credentials and tool for release signing, read from the environment.
#[derive(Clone, Default)]
pub struct SigningConfig {
  pub keystore: Option<PathBuf>,
  pub password: Option<String>,
  pub alias: Option<String>,
  pub tool: String,
}

impl std::fmt::Debug for SigningConfig {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SigningConfig")
      .field("keystore", &self.keystore)
      .field("password", &self.password.as_ref().map(|_| "<redacted>"))
      .field("alias", &self.alias)
      .field("tool", &self.tool)
      .finish()
  }
}

impl SigningConfig {
  /// `KILN_KEYSTORE`, `KILN_KEYSTORE_PASSWD`, `KILN_KEYALIAS` and `KILN_SIGN_TOOL`.
  pub fn from_env() -> Self {
    let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
    Self {
      keystore: var("KILN_KEYSTORE").map(PathBuf::from),
      password: var(PASSWORD_VAR),
      alias: var("KILN_KEYALIAS"),
      tool: var("KILN_SIGN_TOOL").unwrap_or_else(|| DEFAULT_SIGN_TOOL.to_string()),
    }
  }

  fn missing(&self) -> Vec<&'static str> {
    let mut missing = Vec::new();
    if self.keystore.is_none() {
      missing.push("KILN_KEYSTORE");
    }
    if self.password.is_none() {
      missing.push(PASSWORD_VAR);
    }
    if self.alias.is_none() {
      missing.push("KILN_KEYALIAS");
    }
    missing
  }
}

/// Sign `artifact` in place.
pub async fn sign(runner: &dyn ToolRunner, config: &SigningConfig, artifact: &Path) -> Result<(), AssembleError> {
  let (Some(keystore), Some(password), Some(alias)) = (&config.keystore, &config.password, &config.alias) else {
    return Err(AssembleError::SigningError {
      message: format!("release signing requires {}", config.missing().join(", ")),
      output: String::new(),
    });
  };
  if !keystore.is_file() {
    return Err(AssembleError::SigningError {
      message: format!("keystore {} does not exist", keystore.display()),
      output: String::new(),
    });
  }

  let invocation = ToolInvocation::new(&config.tool)
    .args(["sign", "--ks"])
    .arg(keystore.display().to_string())
    .args(["--ks-key-alias", alias.as_str()])
    .args(["--ks-pass", &format!("env:{}", PASSWORD_VAR)])
    .arg(artifact.display().to_string())
    .env(PASSWORD_VAR, password.as_str());

  info!(artifact = ?artifact, tool = %config.tool, "signing");
  let output = runner.run(&invocation).await.map_err(|e| AssembleError::SigningError {
    message: format!("failed to start {}: {}", config.tool, e),
    output: String::new(),
  })?;

  if !output.success {
    return Err(AssembleError::SigningError {
      message: format!(
        "{} exited with status {}",
        config.tool,
        output.code.map(|c| c.to_string()).unwrap_or_else(|| "unknown".to_string())
      ),
      output: output.diagnostics(),
    });
  }
  Ok(())
}
