//! GitHub App authentication and installation access.
//!
//! This module loads the App's RSA signing key, builds the App-level Octocrab
//! client, and exposes the [`InstallationAuthProvider`] capability the broker
//! uses to resolve installations, read repository metadata, and mint scoped
//! installation tokens.
//!
//! The App identity is loaded once at startup and shared read-only by every
//! request. Installation-scoped clients are derived per call and never cached.

mod installation;
mod pem_validation;

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use camino::Utf8Path;
use cap_std::ambient_authority;
use cap_std::fs_utf8::Dir;
use jsonwebtoken::EncodingKey;

use octocrab::Octocrab;
use octocrab::models::AppId;

use crate::config::PrivateKeySource;
use crate::error::GitHubError;
use pem_validation::parse_rsa_pem;

pub use installation::{
    InstallationAuthProvider, IssuedCredential, OctocrabInstallationProvider, PermissionLevel,
    RepositorySnapshot, TokenPermissions,
};

#[cfg(test)]
pub use installation::MockInstallationAuthProvider;

/// A boxed future for async trait methods.
///
/// This type alias enables `mockall::automock` compatibility and trait object
/// usage for the async capability traits in this crate.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Display path used in errors for keys supplied inline.
const INLINE_KEY_DISPLAY: &str = "<inline>";

/// Load a GitHub App RSA private key from the configured path.
///
/// Opens the parent directory of `key_path` using ambient authority,
/// reads the file contents, and parses them as a PEM-encoded RSA
/// private key suitable for JWT signing with RS256.
///
/// # Errors
///
/// Returns [`GitHubError::PrivateKeyLoadFailed`] if the directory or file
/// cannot be read, the file is empty, or it does not hold an unencrypted
/// RSA private key.
pub fn load_private_key(key_path: &Utf8Path) -> Result<EncodingKey, GitHubError> {
    let (dir, file_name) = open_key_directory(key_path)?;
    load_private_key_from_dir(&dir, file_name, key_path)
}

/// Load the App private key from either configured source.
///
/// # Errors
///
/// Returns [`GitHubError::PrivateKeyLoadFailed`] if the key cannot be read
/// or is not an unencrypted RSA private key.
pub fn load_private_key_from_source(
    source: &PrivateKeySource,
) -> Result<EncodingKey, GitHubError> {
    match source {
        PrivateKeySource::Inline(pem) => parse_rsa_pem(pem, Utf8Path::new(INLINE_KEY_DISPLAY)),
        PrivateKeySource::File(path) => load_private_key(path),
    }
}

/// Build an authenticated Octocrab client for GitHub App operations.
///
/// The client signs a fresh App JWT for each request. It is constructed
/// synchronously and makes no network calls.
///
/// # Tokio runtime
///
/// A Tokio runtime context must be active when this function is called
/// because Octocrab's builder spawns a Tower `Buffer` background task.
/// If no runtime is available the function returns an error instead of
/// panicking.
///
/// # Errors
///
/// Returns [`GitHubError::AuthenticationFailed`] if no Tokio runtime is
/// active, the base URL is invalid, or the HTTP client cannot be built.
pub fn build_app_client(
    app_id: u64,
    private_key: EncodingKey,
    api_url: Option<&str>,
) -> Result<Octocrab, GitHubError> {
    // Octocrab's build() spawns a Tower Buffer task via tokio::spawn and
    // panics without a runtime.
    let _handle =
        tokio::runtime::Handle::try_current().map_err(|_| GitHubError::AuthenticationFailed {
            message: String::from(
                "failed to build GitHub App client: \
                 no Tokio runtime context is active \
                 (Octocrab requires one for its Tower buffer task)",
            ),
        })?;

    let mut builder = Octocrab::builder().app(AppId(app_id), private_key);
    if let Some(url) = api_url {
        builder = builder
            .base_uri(url)
            .map_err(|error| GitHubError::AuthenticationFailed {
                message: format!("invalid GitHub API URL '{url}': {error}"),
            })?;
    }

    builder
        .build()
        .map_err(|error| GitHubError::AuthenticationFailed {
            message: format!("failed to build GitHub App client: {error}"),
        })
}

/// Trait for App-level credential checks.
///
/// Production code uses [`OctocrabAppClient`], while tests inject mock
/// implementations via `mockall`.
#[cfg_attr(test, mockall::automock)]
pub trait GitHubAppClient: Send + Sync {
    /// Validates that the App credentials are accepted by GitHub.
    ///
    /// Calls `GET /app` and verifies the response indicates a valid
    /// authenticated App.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails or returns an error response.
    fn validate_credentials(&self) -> BoxFuture<'_, Result<(), GitHubError>>;
}

/// Production implementation of [`GitHubAppClient`] using Octocrab.
pub struct OctocrabAppClient {
    client: Octocrab,
}

impl OctocrabAppClient {
    /// Creates a new `OctocrabAppClient` from an authenticated Octocrab
    /// instance.
    #[must_use]
    pub const fn new(client: Octocrab) -> Self {
        Self { client }
    }
}

impl GitHubAppClient for OctocrabAppClient {
    fn validate_credentials(&self) -> BoxFuture<'_, Result<(), GitHubError>> {
        Box::pin(async move {
            self.client
                .get::<serde_json::Value, _, ()>("/app", None)
                .await
                .map_err(|error| GitHubError::AuthenticationFailed {
                    message: format!("failed to validate GitHub App credentials: {error}"),
                })?;
            Ok(())
        })
    }
}

/// Validates credentials using the provided client.
///
/// The broker calls this once at startup so that a wrong App ID or key is a
/// fatal configuration error rather than a per-request 500.
///
/// # Errors
///
/// Returns [`GitHubError::AuthenticationFailed`] if the client rejects the
/// credentials or the API call fails.
pub async fn validate_with_client(client: &dyn GitHubAppClient) -> Result<(), GitHubError> {
    client.validate_credentials().await
}

/// Load a private key from an already-opened directory capability.
fn load_private_key_from_dir(
    dir: &Dir,
    file_name: &str,
    display_path: &Utf8Path,
) -> Result<EncodingKey, GitHubError> {
    let pem_contents =
        dir.read_to_string(file_name)
            .map_err(|error| GitHubError::PrivateKeyLoadFailed {
                path: PathBuf::from(display_path.as_std_path()),
                message: format!("failed to read file: {error}"),
            })?;
    parse_rsa_pem(&pem_contents, display_path)
}

/// Open the parent directory of the key path as a capability handle.
fn open_key_directory(key_path: &Utf8Path) -> Result<(Dir, &str), GitHubError> {
    let parent = key_path
        .parent()
        .filter(|p| !p.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let file_name = key_path
        .file_name()
        .ok_or_else(|| GitHubError::PrivateKeyLoadFailed {
            path: PathBuf::from(key_path.as_std_path()),
            message: "path does not contain a filename".to_owned(),
        })?;

    let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(|error| {
        GitHubError::PrivateKeyLoadFailed {
            path: PathBuf::from(key_path.as_std_path()),
            message: format!("failed to open parent directory: {error}"),
        }
    })?;

    Ok((dir, file_name))
}
