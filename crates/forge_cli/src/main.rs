//! forge CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: General error
//! - 2: Invalid arguments
//! - 3: Build failure
//! - 4: Configuration error
//! - 5: Provider error

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{filter::Directive, fmt, prelude::*, EnvFilter};

mod commands;

use commands::{Cli, Commands};

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const INVALID_ARGS: u8 = 2;
    pub const BUILD_FAILURE: u8 = 3;
    pub const CONFIG_ERROR: u8 = 4;
    pub const PROVIDER_ERROR: u8 = 5;
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        "forge=debug"
    } else if cli.quiet {
        "forge=warn"
    } else {
        "forge=info"
    };
    let filter = [level, "warn"]
        .iter()
        .filter_map(|directive| directive.parse::<Directive>().ok())
        .fold(EnvFilter::from_default_env(), |filter, directive| {
            filter.add_directive(directive)
        });

    // Already initialized in tests
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .try_init();

    let result = match cli.command {
        Commands::Generate(args) => commands::generate::execute(args).await,
        Commands::Build(args) => commands::build::execute(args).await,
        Commands::Deps(args) => commands::deps::execute(args).await,
    };

    match result {
        Ok(()) => ExitCode::from(ExitCodes::SUCCESS),
        Err(e) => {
            let exit_code = categorize_error(&e);
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_code)
        }
    }
}

/// Categorize error to determine exit code
fn categorize_error(e: &anyhow::Error) -> u8 {
    let msg = format!("{:#}", e).to_lowercase();

    if msg.contains("build failed") || msg.contains("generation failed") {
        ExitCodes::BUILD_FAILURE
    } else if msg.contains("configuration") || msg.contains("config") {
        ExitCodes::CONFIG_ERROR
    } else if msg.contains("provider") || msg.contains("api key") || msg.contains("transport") {
        ExitCodes::PROVIDER_ERROR
    } else if msg.contains("argument") || msg.contains("not found") || msg.contains("not a directory") {
        ExitCodes::INVALID_ARGS
    } else {
        ExitCodes::GENERAL_ERROR
    }
}
