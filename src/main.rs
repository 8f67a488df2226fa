//! Binary entry point for murmur.
//!
//! Loads `.env`, parses the command line, installs logging and runs one
//! storage command against the configured backend.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use anyhow::Context;
use clap::Parser;
use murmur::cli::{self, Cli};
use murmur::observability;
use std::process::ExitCode;

/// Main entry point.
#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env file is normal.
    let _ = dotenvy::dotenv();
    let args = Cli::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

async fn run(args: Cli) -> anyhow::Result<()> {
    let config =
        cli::load_config(args.config.as_deref()).context("failed to load configuration")?;
    observability::init_logging(&config.logging, args.verbose)
        .context("failed to initialize logging")?;

    let mut stdout = std::io::stdout().lock();
    cli::run(args.command, &config, &mut stdout)
        .await
        .context("command failed")?;
    Ok(())
}
