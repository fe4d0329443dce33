//! Command-line argument definitions for reviewgate.

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};

/// Command-line interface for reviewgate.
#[derive(Debug, Parser)]
#[command(name = "reviewgate")]
#[command(
    author,
    version,
    about = "Exchange workflow identity tokens for scoped GitHub App credentials"
)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file.
    #[arg(long, global = true)]
    pub config: Option<Utf8PathBuf>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the credential broker HTTP service.
    Serve(ServeArgs),

    /// Acquire a credential from inside a workflow run and print it.
    Token(TokenArgs),
}

/// Arguments for the `serve` subcommand.
#[derive(Debug, Default, Parser)]
pub struct ServeArgs {
    /// Socket address to listen on.
    #[arg(long)]
    pub bind_addr: Option<String>,
}

/// Arguments for the `token` subcommand.
#[derive(Debug, Default, Parser)]
pub struct TokenArgs {
    /// URL of the broker's exchange endpoint.
    #[arg(long)]
    pub broker_url: Option<String>,
}
