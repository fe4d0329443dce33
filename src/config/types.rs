//! Configuration data types for reviewgate.

use camino::Utf8PathBuf;
use ortho_config::{OrthoConfig, OrthoResult, PostMergeContext, PostMergeHook};
use serde::{Deserialize, Serialize};

/// Default socket address for the broker listener.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

/// Default lifetime of a cached issuer key set, in seconds.
pub const DEFAULT_JWKS_CACHE_TTL_SECS: u64 = 300;

/// Default clock skew tolerated when checking `exp` and `nbf`, in seconds.
pub const DEFAULT_LEEWAY_SECS: u64 = 60;

/// `GitHub` App configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GitHubConfig {
    /// The `GitHub` App ID.
    pub app_id: Option<u64>,

    /// Path to the `GitHub` App private key file.
    pub private_key_path: Option<Utf8PathBuf>,

    /// Inline PEM-encoded private key. Takes precedence over the path.
    pub private_key: Option<String>,

    /// Base URL of the `GitHub` REST API (for `GitHub` Enterprise).
    pub api_url: Option<String>,
}

/// Identity-token trust configuration shared by the broker and the client.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OidcConfig {
    /// Expected `iss` claim, also the base for key discovery.
    pub issuer: Option<String>,

    /// Expected `aud` claim, also the audience the client requests.
    pub audience: Option<String>,

    /// Workflow file the credential is pinned to, relative to the repository
    /// root (for example `.github/workflows/review.yml`).
    pub workflow_path: Option<String>,

    /// How long a fetched key set stays fresh.
    pub jwks_cache_ttl_secs: u64,

    /// Clock skew tolerated during expiry checks.
    pub leeway_secs: u64,
}

impl Default for OidcConfig {
    fn default() -> Self {
        Self {
            issuer: None,
            audience: None,
            workflow_path: None,
            jwks_cache_ttl_secs: DEFAULT_JWKS_CACHE_TTL_SECS,
            leeway_secs: DEFAULT_LEEWAY_SECS,
        }
    }
}

/// Broker listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address the exchange endpoint binds to.
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: String::from(DEFAULT_BIND_ADDR),
        }
    }
}

/// Acquisition client configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Full URL of the broker's exchange endpoint.
    pub broker_url: Option<String>,

    /// Token used when the runtime cannot issue identity tokens.
    ///
    /// When unset, the client falls back to `GITHUB_TOKEN`.
    pub fallback_token: Option<String>,
}

/// Root application configuration.
///
/// This structure is loaded from configuration files, environment variables,
/// and command-line arguments with layered precedence. The precedence order
/// (lowest to highest) is: defaults, configuration file, environment variables,
/// command-line arguments.
///
/// Configuration files are discovered in this order:
/// 1. Path specified via `REVIEWGATE_CONFIG_PATH` environment variable
/// 2. `.reviewgate.toml` in the current working directory
/// 3. `.reviewgate.toml` in the home directory
/// 4. `~/.config/reviewgate/config.toml` (XDG default)
#[derive(Debug, Clone, Default, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(
    prefix = "REVIEWGATE",
    post_merge_hook,
    discovery(
        app_name = "reviewgate",
        env_var = "REVIEWGATE_CONFIG_PATH",
        config_file_name = "config.toml",
        dotfile_name = ".reviewgate.toml",
        config_cli_long = "config",
        config_cli_visible = true,
    )
)]
pub struct AppConfig {
    /// `GitHub` App configuration.
    #[serde(default)]
    #[ortho_config(skip_cli)]
    pub github: GitHubConfig,

    /// Identity-token trust configuration.
    #[serde(default)]
    #[ortho_config(skip_cli)]
    pub oidc: OidcConfig,

    /// Broker listener configuration.
    #[serde(default)]
    #[ortho_config(skip_cli)]
    pub server: ServerConfig,

    /// Acquisition client configuration.
    #[serde(default)]
    #[ortho_config(skip_cli)]
    pub client: ClientConfig,
}

impl PostMergeHook for AppConfig {
    fn post_merge(&mut self, _ctx: &PostMergeContext) -> OrthoResult<()> {
        // Required values are checked by the settings builders, not here,
        // because `serve` and `token` need different subsets.
        for value in [
            &mut self.github.private_key,
            &mut self.github.api_url,
            &mut self.oidc.issuer,
            &mut self.oidc.audience,
            &mut self.oidc.workflow_path,
            &mut self.client.broker_url,
            &mut self.client.fallback_token,
        ] {
            normalise_optional(value);
        }
        self.server.bind_addr = self.server.bind_addr.trim().to_owned();
        Ok(())
    }
}

/// Trim an optional string in place, clearing it when nothing remains.
pub(crate) fn normalise_optional(value: &mut Option<String>) {
    *value = value
        .take()
        .map(|raw| raw.trim().to_owned())
        .filter(|trimmed| !trimmed.is_empty());
}
