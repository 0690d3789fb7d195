//! Recipe build engine.
//!
//! Builds are keyed by a configuration fingerprint of the recipe, its
//! dependencies and the target, so identical inputs always map to the same
//! cache entry under `builds/<arch>/`.
//!
//! # Characteristics
//!
//! - **Cached**: a valid entry is reused and every stage skipped
//! - **Atomic**: work happens in a temporary directory that is renamed into
//!   place only after the completion marker is written
//! - **Not retried**: stage failures are deterministic and reported with the
//!   tool's exit status and output
//!
//! # Submodules
//!
//! - [`engine`] - worker pool over the plan
//! - [`execute`] - stage sequence of a single recipe
//! - [`fingerprint`] - cache keys
//! - [`staging`] - staging root composition

pub mod engine;
pub mod execute;
pub mod fingerprint;
pub mod staging;
mod types;

pub use engine::BuildEngine;
pub use types::*;
