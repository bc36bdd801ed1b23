//! ratecheck CLI entry point
//!
//! Parses arguments, initializes logging from the `[general]` section and
//! dispatches to the subcommand handlers. Errors are printed to stderr and
//! mapped to exit codes via [`CliError::exit_code`](error::CliError::exit_code).

mod cli;
mod commands;
mod error;
mod logging;
mod output;

use clap::Parser;

use ratecheck_core::config::GeneralConfig;

use crate::cli::{Cli, Commands};
use crate::error::CliError;
use crate::output::OutputWriter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // 설정 파일이 잘못되어도 `config validate`가 보고할 수 있도록 로깅은 기본값으로 시작
    let general = commands::load_config(&cli.config)
        .await
        .map(|config| config.general)
        .unwrap_or_else(|_| GeneralConfig::default());

    if let Err(e) = logging::init_tracing(&general, cli.log_level.as_deref()) {
        eprintln!("error: {e:#}");
        std::process::exit(CliError::Config(e.to_string()).exit_code());
    }

    let writer = OutputWriter::new(cli.output);
    if let Err(e) = dispatch(cli, &writer).await {
        tracing::error!(error = %e, exit_code = e.exit_code(), "command failed");
        eprintln!("error: {e}");
        std::process::exit(e.exit_code());
    }
}

async fn dispatch(cli: Cli, writer: &OutputWriter) -> Result<(), CliError> {
    match cli.command {
        Commands::Run(args) => commands::run::execute(args, &cli.config, writer).await,
        Commands::Render(args) => commands::render::execute(args, &cli.config, writer).await,
        Commands::Config(args) => commands::config::execute(args, &cli.config, writer).await,
    }
}
