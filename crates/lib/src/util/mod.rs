//! Shared utilities.
//!
//! Hashing for fingerprints and cache verification, plus small filesystem helpers.

pub mod fs;
pub mod hash;

#[cfg(test)]
pub mod testutil;
