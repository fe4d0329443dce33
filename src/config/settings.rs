//! Validated settings derived from the merged configuration.
//!
//! `AppConfig` keeps every field optional so that each subcommand can load
//! the same file. The builders here check the subset a subcommand needs and
//! report every missing field at once.

use std::net::SocketAddr;
use std::time::Duration;

use camino::Utf8PathBuf;

use super::AppConfig;
use crate::error::ConfigError;

/// Where the App private key comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrivateKeySource {
    /// PEM content supplied directly in configuration.
    Inline(String),
    /// Path to a PEM file.
    File(Utf8PathBuf),
}

/// Identity-token trust values shared by the broker and the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustPolicy {
    /// Expected `iss` claim.
    pub issuer: String,
    /// Expected `aud` claim.
    pub audience: String,
    /// Workflow file a credential is pinned to.
    pub workflow_path: String,
}

/// Everything the `serve` subcommand needs.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    /// The `GitHub` App ID.
    pub app_id: u64,
    /// The App private key.
    pub private_key: PrivateKeySource,
    /// Optional `GitHub` API base URL override.
    pub api_url: Option<String>,
    /// Identity-token trust values.
    pub trust: TrustPolicy,
    /// Lifetime of a cached issuer key set.
    pub jwks_cache_ttl: Duration,
    /// Clock skew tolerated during expiry checks, in seconds.
    pub leeway_secs: u64,
    /// Listener address.
    pub bind_addr: SocketAddr,
}

impl BrokerSettings {
    /// Validate the broker subset of `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingRequired`] naming every missing field,
    /// or [`ConfigError::InvalidValue`] if the bind address does not parse.
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        let mut missing = Vec::new();

        let app_id = config.github.app_id.filter(|id| *id != 0);
        if app_id.is_none() {
            missing.push("github.app_id");
        }
        let private_key = non_blank(config.github.private_key.as_deref())
            .map(|pem| PrivateKeySource::Inline(pem.to_owned()))
            .or_else(|| {
                config
                    .github
                    .private_key_path
                    .clone()
                    .map(PrivateKeySource::File)
            });
        if private_key.is_none() {
            missing.push("github.private_key_path");
        }
        let issuer = required(config.oidc.issuer.as_deref(), "oidc.issuer", &mut missing);
        let audience = required(config.oidc.audience.as_deref(), "oidc.audience", &mut missing);
        let workflow_path = required(
            config.oidc.workflow_path.as_deref(),
            "oidc.workflow_path",
            &mut missing,
        );

        let (Some(app_id), Some(private_key), Some(issuer), Some(audience), Some(workflow_path)) =
            (app_id, private_key, issuer, audience, workflow_path)
        else {
            return Err(ConfigError::MissingRequired {
                field: missing.join(", "),
            });
        };

        let bind_addr = config
            .server
            .bind_addr
            .trim()
            .parse::<SocketAddr>()
            .map_err(|error| ConfigError::InvalidValue {
                field: String::from("server.bind_addr"),
                reason: error.to_string(),
            })?;

        Ok(Self {
            app_id,
            private_key,
            api_url: non_blank(config.github.api_url.as_deref()).map(str::to_owned),
            trust: TrustPolicy {
                issuer: issuer.trim_end_matches('/').to_owned(),
                audience,
                workflow_path: workflow_path.trim_start_matches('/').to_owned(),
            },
            jwks_cache_ttl: Duration::from_secs(config.oidc.jwks_cache_ttl_secs),
            leeway_secs: config.oidc.leeway_secs,
            bind_addr,
        })
    }
}

/// Everything the `token` subcommand needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    /// Full URL of the broker's exchange endpoint.
    pub broker_url: String,
    /// Audience to request identity tokens for.
    pub audience: String,
    /// Token used when OIDC is unavailable, if configured.
    pub fallback_token: Option<String>,
}

impl ClientSettings {
    /// Validate the client subset of `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingRequired`] naming every missing field.
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        let mut missing = Vec::new();
        let broker_url = required(
            config.client.broker_url.as_deref(),
            "client.broker_url",
            &mut missing,
        );
        let audience = required(config.oidc.audience.as_deref(), "oidc.audience", &mut missing);

        let (Some(broker_url), Some(audience)) = (broker_url, audience) else {
            return Err(ConfigError::MissingRequired {
                field: missing.join(", "),
            });
        };

        Ok(Self {
            broker_url,
            audience,
            fallback_token: non_blank(config.client.fallback_token.as_deref()).map(str::to_owned),
        })
    }
}

/// Returns the trimmed value if it is present and not blank.
fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Returns the trimmed value or records `field` as missing.
fn required(value: Option<&str>, field: &'static str, missing: &mut Vec<&'static str>) -> Option<String> {
    let found = non_blank(value).map(str::to_owned);
    if found.is_none() {
        missing.push(field);
    }
    found
}
