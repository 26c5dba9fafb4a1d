//! Parley CLI entry point

use clap::Parser;
use tracing::{error, info};

use parley_cli::{cli::Cli, commands::CommandDispatcher, config::load_configuration, error::Result};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    let config = load_configuration(&cli)?;
    setup_logging(cli.verbose, &config.log_level);

    match &cli.config {
        Some(path) => info!("Loaded configuration from: {}", path),
        None => info!("Using default configuration"),
    }
    info!("Connecting to {}", config.server.address());
    if let Err(e) = CommandDispatcher::execute(cli, config).await {
        error!("Command execution failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Setup logging from the verbose flag or the configured level
fn setup_logging(verbose: bool, configured: &str) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        configured.parse().unwrap_or(tracing::Level::INFO)
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
