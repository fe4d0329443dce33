//! Configuration loading with layered precedence.
//!
//! Precedence (lowest to highest): application defaults, configuration file,
//! environment variables, command-line arguments.
//!
//! Layers are composed by hand with `MergeComposer` instead of the derive's
//! `load()`: the CLI owns subcommand dispatch, and the environment layer must
//! fail fast on unparseable typed values (for example
//! `REVIEWGATE_GITHUB_APP_ID=abc`) where Figment would silently drop them.
//!
//! String fields (e.g., `REVIEWGATE_OIDC_ISSUER`) are always accepted. Integer
//! fields must parse or loading fails with [`ConfigError::InvalidValue`].

use camino::Utf8PathBuf;
use cap_std::ambient_authority;
use cap_std::fs_utf8::Dir;
use ortho_config::discovery::ConfigDiscovery;
use ortho_config::serde_json::{self, Map, Value};
use ortho_config::{MergeComposer, toml};

use crate::config::{AppConfig, Cli, Commands};
use crate::error::{ConfigError, Result};

/// The type of value expected from an environment variable.
#[derive(Clone, Copy)]
enum EnvVarType {
    /// String value (always accepted).
    String,
    /// Unsigned 64-bit integer. Invalid values return an error.
    U64,
}

/// Specification for a single environment variable mapping.
struct EnvVarSpec {
    /// The environment variable name (e.g., `REVIEWGATE_OIDC_ISSUER`).
    env_var: &'static str,
    /// The JSON path segments (e.g., `["oidc", "issuer"]`).
    path: &'static [&'static str],
    /// The expected value type.
    var_type: EnvVarType,
}

/// Table of all environment variables and their JSON paths.
const ENV_VAR_SPECS: &[EnvVarSpec] = &[
    // GitHub App fields
    EnvVarSpec {
        env_var: "REVIEWGATE_GITHUB_APP_ID",
        path: &["github", "app_id"],
        var_type: EnvVarType::U64,
    },
    EnvVarSpec {
        env_var: "REVIEWGATE_GITHUB_PRIVATE_KEY_PATH",
        path: &["github", "private_key_path"],
        var_type: EnvVarType::String,
    },
    EnvVarSpec {
        env_var: "REVIEWGATE_GITHUB_PRIVATE_KEY",
        path: &["github", "private_key"],
        var_type: EnvVarType::String,
    },
    EnvVarSpec {
        env_var: "REVIEWGATE_GITHUB_API_URL",
        path: &["github", "api_url"],
        var_type: EnvVarType::String,
    },
    // Identity-token trust fields
    EnvVarSpec {
        env_var: "REVIEWGATE_OIDC_ISSUER",
        path: &["oidc", "issuer"],
        var_type: EnvVarType::String,
    },
    EnvVarSpec {
        env_var: "REVIEWGATE_OIDC_AUDIENCE",
        path: &["oidc", "audience"],
        var_type: EnvVarType::String,
    },
    EnvVarSpec {
        env_var: "REVIEWGATE_OIDC_WORKFLOW_PATH",
        path: &["oidc", "workflow_path"],
        var_type: EnvVarType::String,
    },
    EnvVarSpec {
        env_var: "REVIEWGATE_OIDC_JWKS_CACHE_TTL_SECS",
        path: &["oidc", "jwks_cache_ttl_secs"],
        var_type: EnvVarType::U64,
    },
    EnvVarSpec {
        env_var: "REVIEWGATE_OIDC_LEEWAY_SECS",
        path: &["oidc", "leeway_secs"],
        var_type: EnvVarType::U64,
    },
    // Server fields
    EnvVarSpec {
        env_var: "REVIEWGATE_SERVER_BIND_ADDR",
        path: &["server", "bind_addr"],
        var_type: EnvVarType::String,
    },
    // Client fields
    EnvVarSpec {
        env_var: "REVIEWGATE_CLIENT_BROKER_URL",
        path: &["client", "broker_url"],
        var_type: EnvVarType::String,
    },
    EnvVarSpec {
        env_var: "REVIEWGATE_CLIENT_FALLBACK_TOKEN",
        path: &["client", "fallback_token"],
        var_type: EnvVarType::String,
    },
];

/// Returns the list of environment variable names recognised by the config loader.
///
/// Tests use this to clear every `REVIEWGATE_*` variable without keeping a
/// second list in sync.
#[must_use]
pub fn env_var_names() -> Vec<&'static str> {
    ENV_VAR_SPECS.iter().map(|spec| spec.env_var).collect()
}

/// Load a configuration file and push it to the composer.
fn load_config_file(path: &Utf8PathBuf, composer: &mut MergeComposer) -> Result<()> {
    let current_dir = Utf8PathBuf::from(".");
    let parent = path
        .parent()
        .filter(|p| !p.as_str().is_empty())
        .unwrap_or_else(|| current_dir.as_ref());
    let file_name = path.file_name().unwrap_or(path.as_str());

    let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(|e| {
        ConfigError::ParseError {
            message: format!("failed to open directory {parent}: {e}"),
        }
    })?;

    let content = dir
        .read_to_string(file_name)
        .map_err(|e| ConfigError::ParseError {
            message: format!("failed to read {path}: {e}"),
        })?;

    let value =
        toml::from_str::<serde_json::Value>(&content).map_err(|e| ConfigError::ParseError {
            message: format!("failed to parse {path}: {e}"),
        })?;

    composer.push_file(value, Some(path.clone()));
    Ok(())
}

/// Load configuration with full layer precedence.
///
/// Sources, later overriding earlier:
/// 1. Application defaults defined in the struct
/// 2. Configuration file (`--config`, `REVIEWGATE_CONFIG_PATH`, or XDG paths)
/// 3. Environment variables prefixed with `REVIEWGATE_`
/// 4. Command-line arguments (from the provided `Cli`)
///
/// # Errors
///
/// Returns `ConfigError` if configuration loading fails due to:
/// - An explicit `--config` path that does not exist
/// - Malformed configuration files
/// - Invalid typed environment variable values (e.g., non-numeric
///   `REVIEWGATE_GITHUB_APP_ID`)
pub fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut composer = MergeComposer::new();

    let defaults =
        serde_json::to_value(AppConfig::default()).map_err(|e| ConfigError::ParseError {
            message: format!("failed to serialise defaults: {e}"),
        })?;
    composer.push_defaults(defaults);

    let config_path = match cli.config.clone() {
        Some(path) if !path.exists() => {
            return Err(ConfigError::FileNotFound {
                path: path.into_std_path_buf(),
            }
            .into());
        }
        Some(path) => Some(path),
        None => discover_config_file(),
    };

    if let Some(ref path) = config_path {
        load_config_file(path, &mut composer)?;
    }

    let env_values = collect_env_vars()?;
    if !env_values.is_null() {
        composer.push_environment(env_values);
    }

    let cli_overrides = build_cli_overrides(cli);
    if !cli_overrides.is_null() {
        composer.push_cli(cli_overrides);
    }

    let config =
        AppConfig::merge_from_layers(composer.layers()).map_err(ConfigError::OrthoConfig)?;

    Ok(config)
}

/// Find the first existing configuration file via `ortho_config` discovery.
fn discover_config_file() -> Option<Utf8PathBuf> {
    let discovery = ConfigDiscovery::builder("reviewgate")
        .env_var("REVIEWGATE_CONFIG_PATH")
        .config_file_name("config.toml")
        .dotfile_name(".reviewgate.toml")
        .build();
    discovery
        .candidates()
        .into_iter()
        .filter(|p| p.exists())
        .find_map(|p| Utf8PathBuf::try_from(p).ok())
}

/// Collect `REVIEWGATE_*` environment variables into a JSON value.
///
/// # Errors
///
/// Returns `ConfigError::InvalidValue` if an integer variable does not parse.
fn collect_env_vars() -> Result<Value> {
    let mut root = Map::new();

    for spec in ENV_VAR_SPECS {
        let Ok(raw_value) = std::env::var(spec.env_var) else {
            continue;
        };

        let json_value = match spec.var_type {
            EnvVarType::String => Value::String(raw_value),
            EnvVarType::U64 => match raw_value.trim().parse::<u64>() {
                Ok(n) => Value::Number(n.into()),
                Err(_) => {
                    return Err(ConfigError::InvalidValue {
                        field: spec.env_var.to_owned(),
                        reason: format!("expected unsigned integer, got '{raw_value}'"),
                    }
                    .into());
                }
            },
        };

        insert_at_path(&mut root, spec.path, json_value);
    }

    if root.is_empty() {
        Ok(Value::Null)
    } else {
        Ok(Value::Object(root))
    }
}

/// Insert a value at a nested path in a JSON map.
///
/// For a path like `["oidc", "issuer"]`, this creates the intermediate
/// `oidc` object if needed and inserts `issuer` within it.
fn insert_at_path(root: &mut Map<String, Value>, path: &[&str], value: Value) {
    let Some((&field, parents)) = path.split_last() else {
        return;
    };

    let mut current = root;
    for &segment in parents {
        let entry = current
            .entry(segment.to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
        let Some(obj) = entry.as_object_mut() else {
            return;
        };
        current = obj;
    }

    current.insert(field.to_owned(), value);
}

/// Build a JSON value containing the subcommand's CLI overrides.
fn build_cli_overrides(cli: &Cli) -> Value {
    let mut root = Map::new();

    match &cli.command {
        Commands::Serve(args) => {
            if let Some(ref bind_addr) = args.bind_addr {
                insert_at_path(
                    &mut root,
                    &["server", "bind_addr"],
                    Value::String(bind_addr.clone()),
                );
            }
        }
        Commands::Token(args) => {
            if let Some(ref broker_url) = args.broker_url {
                insert_at_path(
                    &mut root,
                    &["client", "broker_url"],
                    Value::String(broker_url.clone()),
                );
            }
        }
    }

    if root.is_empty() {
        Value::Null
    } else {
        Value::Object(root)
    }
}
