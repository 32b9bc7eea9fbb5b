use clap::Parser;
use colored::Colorize;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use ignite_cntr::cli::{self, Cli};
use ignite_cntr::errors::{CntrError, ErrorCategory};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli::run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let category = e
                .downcast_ref::<CntrError>()
                .map(CntrError::category)
                .unwrap_or(ErrorCategory::Internal);
            eprintln!("{} {:#}", format!("{} error:", category).red().bold(), e);
            ExitCode::from(category.exit_code())
        }
    }
}
