//! Recipe definitions, the Lua loader and the registry.

pub mod lua;
pub mod registry;
pub mod types;
pub mod version;

use std::path::PathBuf;

pub use registry::RecipeRegistry;
pub use types::{RecipeDef, RecipeId, RecipeKind, StageCommands};
pub use version::{Constraint, Op, RecipeVersion, Requirement, VersionError};

#[derive(Debug, thiserror::Error)]
pub enum RecipeError {
  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("recipe directory not found: {path}")]
  MissingDir { path: PathBuf },

  #[error("failed to evaluate recipe file {path}: {message}")]
  Lua { path: PathBuf, message: String },

  #[error("invalid recipe in {path}: {message}")]
  Invalid { path: PathBuf, message: String },
}
