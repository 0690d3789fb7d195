//! End-to-end tests driving the kiln binary.

mod common;

#[cfg(unix)]
mod build_tests;
#[cfg(unix)]
mod deploy_tests;
