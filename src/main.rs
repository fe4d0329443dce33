//! `reviewgate` application entry point.
//!
//! `reviewgate serve` runs the credential broker. `reviewgate token` runs
//! inside a review workflow and prints the acquired credential on stdout.
//! It uses `eyre` for opaque error handling at the application boundary,
//! converting domain-specific errors into human-readable reports.
//!
//! Configuration is loaded with layered precedence via `OrthoConfig`:
//! 1. Application defaults
//! 2. Configuration file (`~/.config/reviewgate/config.toml` or path from `REVIEWGATE_CONFIG_PATH`)
//! 3. Environment variables (`REVIEWGATE_*`)
//! 4. Command-line arguments

use std::sync::Arc;

use clap::Parser;
use eyre::{Report, Result as EyreResult};
use reviewgate::acquire::AcquisitionClient;
use reviewgate::broker::{self, CredentialBroker};
use reviewgate::config::{AppConfig, BrokerSettings, ClientSettings, Cli, Commands, load_config};
use reviewgate::error::{ReviewGateError, Result as ReviewGateResult};
use reviewgate::observability::init_logging;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Application entry point.
///
/// Loads configuration with layered precedence via `OrthoConfig`, then dispatches
/// to the appropriate subcommand handler.
#[tokio::main]
async fn main() -> EyreResult<()> {
    let cli = Cli::parse();
    if !init_logging() {
        warn!("a tracing subscriber was already installed");
    }

    let config = load_config(&cli).map_err(Report::from)?;

    run(&cli, &config).await.map_err(Report::from)
}

/// Execute the CLI command, returning domain-specific errors.
///
/// Keeps semantic errors inside the run loop so the CLI boundary owns
/// conversion to `eyre::Report`.
async fn run(cli: &Cli, config: &AppConfig) -> ReviewGateResult<()> {
    match &cli.command {
        Commands::Serve(_) => serve(config).await,
        Commands::Token(_) => print_token(config).await,
    }
}

/// Run the broker until interrupted.
async fn serve(config: &AppConfig) -> ReviewGateResult<()> {
    let settings = BrokerSettings::from_config(config)?;
    let broker = CredentialBroker::from_settings(&settings).await?;
    let listener =
        TcpListener::bind(settings.bind_addr)
            .await
            .map_err(|error| ReviewGateError::Server {
                message: format!("failed to bind {}: {error}", settings.bind_addr),
            })?;
    info!(bind_addr = %settings.bind_addr, "credential broker listening");

    broker::serve(listener, Arc::new(broker), shutdown_signal())
        .await
        .map_err(|error| ReviewGateError::Server {
            message: error.to_string(),
        })?;
    info!("credential broker stopped");
    Ok(())
}

/// Acquire the workflow credential and print it.
#[expect(
    clippy::print_stdout,
    reason = "the credential on stdout is the command's output"
)]
async fn print_token(config: &AppConfig) -> ReviewGateResult<()> {
    let settings = ClientSettings::from_config(config)?;
    let client = AcquisitionClient::from_environment(&settings, &mockable::DefaultEnv::new())?;
    let token = client.acquire_credential().await?;
    println!("{token}");
    Ok(())
}

/// Resolves on Ctrl-C. Never resolves if the signal handler cannot be installed.
async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(error = %error, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
