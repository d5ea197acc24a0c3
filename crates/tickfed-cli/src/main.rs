mod cli;
mod commands;
mod error;
mod metadata;
mod output;

use clap::Parser;
use std::process::ExitCode;

use tickfed_core::{init_logging, FederationConfig};

use crate::cli::Cli;
use crate::error::CliError;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::from(error.exit_code())
        }
    }
}

async fn run() -> Result<(), CliError> {
    let cli = Cli::parse();

    let config = FederationConfig::from_path(&cli.config)?;

    let mut log_config = config.logging.clone().with_env_overrides();
    if let Some(level) = &cli.log_level {
        log_config.level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        log_config.format = format
            .parse()
            .map_err(|message: String| tickfed_core::ConfigError::Invalid(message))?;
    }
    init_logging(&log_config)?;

    let envelope = commands::run(&cli, config).await?;
    output::render(&envelope, cli.pretty)
}
