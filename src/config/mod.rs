//! Configuration system for reviewgate.
//!
//! This module provides the configuration structures and CLI definitions for the
//! reviewgate application. Configuration loading and precedence merging is
//! handled by the `ortho_config` crate. Precedence: CLI flags override
//! environment variables, which override configuration files, which override
//! defaults.
//!
//! The broker and the acquisition client read the same `[oidc]` section, so a
//! single file keeps the issuer and audience in agreement on both sides.
//!
//! # Example Configuration
//!
//! ```toml
//! [github]
//! app_id = 12345
//! private_key_path = "/etc/reviewgate/github-app.pem"
//!
//! [oidc]
//! issuer = "https://token.actions.githubusercontent.com"
//! audience = "reviewgate"
//! workflow_path = ".github/workflows/review.yml"
//!
//! [server]
//! bind_addr = "0.0.0.0:8080"
//!
//! [client]
//! broker_url = "https://reviewgate.example.com/exchange"
//! ```

mod cli;
mod loader;
mod settings;
mod types;


pub use cli::{Cli, Commands, ServeArgs, TokenArgs};
pub use loader::{env_var_names, load_config};
pub use settings::{BrokerSettings, ClientSettings, PrivateKeySource, TrustPolicy};
pub use types::{
    AppConfig, ClientConfig, DEFAULT_BIND_ADDR, DEFAULT_JWKS_CACHE_TTL_SECS, DEFAULT_LEEWAY_SECS,
    GitHubConfig, OidcConfig, ServerConfig,
};
