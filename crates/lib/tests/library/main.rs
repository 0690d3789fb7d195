mod common;

#[cfg(unix)]
mod pipeline_tests;
mod plan_tests;
