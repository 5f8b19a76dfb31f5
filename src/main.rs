mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use modstash::config::Config;
use modstash::observability::{DEFAULT_LOG_LEVEL, init_tracing};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let log_filter = init_tracing(DEFAULT_LOG_LEVEL);

    let config = match Config::load(cli.command.config_dir()) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    log_filter.set_level(&config.log.level);

    let result = match cli.command {
        Commands::Dump(args) => commands::dump(args, &config).await,
        Commands::Load(args) => commands::load(args, &config).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "Command failed");
            ExitCode::FAILURE
        }
    }
}
