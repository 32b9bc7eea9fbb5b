pub mod env;
pub mod launcher;

pub use env::{combined_env, MountSpec};
pub use launcher::{LaunchReport, WorkloadLauncher, WorkloadSpec};
