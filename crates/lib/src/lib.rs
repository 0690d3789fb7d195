//! kiln-lib: build-descriptor compiler and packaging orchestrator.
//!
//! Turns a declarative `kiln.spec` manifest into an installable package:
//! - [`manifest`]: load and validate the manifest
//! - [`recipe`] and [`resolve`]: recipe definitions and per-architecture build plans
//! - [`toolchain`]: content-addressed toolchain provisioning
//! - [`build`]: cached, parallel recipe builds into a staging root
//! - [`package`]: package tree assembly, archiving and signing
//! - [`pipeline`]: the driver that runs all of the above in sequence

pub mod build;
pub mod consts;
pub mod manifest;
pub mod package;
pub mod pipeline;
pub mod platform;
pub mod recipe;
pub mod resolve;
pub mod store;
pub mod store_lock;
pub mod tool;
pub mod toolchain;
pub mod util;
