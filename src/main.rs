//! Entry point for the `vaultaired` binary: parses the CLI (spec.md §6),
//! loads configuration, resolves the worker count, sets up logging, and
//! hands off to the supervisor for the lifetime of the process.

use clap::Parser;
use tracing::{debug, error, info};

use vaultaire_reader::cli::Cli;
use vaultaire_reader::config::ConfigFile;
use vaultaire_reader::{logging, supervisor};

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let mut config = match ConfigFile::try_from(cli.config.as_deref()) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("failed to load configuration: {error}");
            return std::process::ExitCode::FAILURE;
        }
    };
    config.pool = cli.pool.clone();
    config.user = cli.user.clone();
    config.broker = cli.broker.clone();
    config.debug = cli.debug;

    if let Err(error) = logging::init(config.debug) {
        eprintln!("failed to initialize logging: {error}");
        return std::process::ExitCode::FAILURE;
    }

    match config.as_json_pretty() {
        Ok(rendered) => debug!(config = %rendered, "resolved configuration"),
        Err(error) => debug!(%error, "failed to render configuration for logging"),
    }

    let workers = match cli.resolve_workers() {
        Ok(workers) => workers,
        Err(error) => {
            error!(%error, "failed to resolve worker count");
            return std::process::ExitCode::FAILURE;
        }
    };

    info!(
        broker = %config.broker,
        pool = %config.pool,
        user = %config.user,
        workers,
        "starting vaultaire reader daemon"
    );

    match supervisor::run(&config, workers).await {
        Ok(()) => {
            info!("shutdown complete");
            std::process::ExitCode::SUCCESS
        }
        Err(error) => {
            error!(%error, "daemon exited with a linked-task failure");
            std::process::ExitCode::FAILURE
        }
    }
}
