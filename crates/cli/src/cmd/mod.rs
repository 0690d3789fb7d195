mod build;
mod clean;
mod deploy;
mod plan;

pub use build::{BuildArgs, cmd_build};
pub use clean::cmd_clean;
pub use deploy::cmd_deploy;
pub use plan::cmd_plan;
