pub mod cli;
pub mod config;
pub mod core;
pub mod errors;
pub mod image;
pub mod remote;
pub mod utils;
pub mod workload;

// Re-exports
pub use config::Settings;
pub use errors::{CntrError, CntrResult, ErrorCategory};
pub use image::{ImageBuilder, VmImageComposer};
pub use workload::{WorkloadLauncher, WorkloadSpec};
