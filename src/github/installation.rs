//! Installation resolution, repository metadata, and token minting.

use std::fmt;

use chrono::{DateTime, Utc};
use octocrab::Octocrab;
use octocrab::models::InstallationId;
use serde::{Deserialize, Serialize};

use super::BoxFuture;
use crate::error::GitHubError;

/// Access level for a single installation token permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    /// Read-only access.
    Read,
    /// Read and write access.
    Write,
}

/// Permission set requested when minting an installation token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPermissions {
    /// Repository contents.
    pub contents: PermissionLevel,
    /// Pull requests, including review comments.
    pub pull_requests: PermissionLevel,
    /// Issues and issue comments.
    pub issues: PermissionLevel,
}

impl TokenPermissions {
    /// The minimal set a review workflow needs.
    pub const REVIEW: Self = Self {
        contents: PermissionLevel::Read,
        pull_requests: PermissionLevel::Write,
        issues: PermissionLevel::Write,
    };
}

/// Repository metadata fetched once per exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositorySnapshot {
    /// The repository's current default branch name.
    pub default_branch: String,
}

/// A minted installation access token scoped to one repository.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedCredential {
    /// The bearer token for GitHub API calls.
    pub token: String,
    /// When GitHub stops accepting the token.
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for IssuedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedCredential")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// The App capabilities the credential broker depends on.
///
/// Every method derives its client from the shared App identity; nothing is
/// cached between calls.
#[cfg_attr(test, mockall::automock)]
pub trait InstallationAuthProvider: Send + Sync {
    /// Find the installation of this App that serves `owner/repo`.
    ///
    /// # Errors
    ///
    /// Returns [`GitHubError::InstallationLookupFailed`] if the App is not
    /// installed or the API call fails.
    fn resolve_installation(&self, owner: &str, repo: &str)
    -> BoxFuture<'_, Result<u64, GitHubError>>;

    /// Fetch repository metadata with an installation-scoped client.
    ///
    /// # Errors
    ///
    /// Returns [`GitHubError::RepositoryFetchFailed`] if the client cannot be
    /// derived or the API call fails.
    fn get_repository(
        &self,
        installation_id: u64,
        owner: &str,
        repo: &str,
    ) -> BoxFuture<'_, Result<Option<RepositorySnapshot>, GitHubError>>;

    /// Mint an installation token limited to `repo` and `permissions`.
    ///
    /// # Errors
    ///
    /// Returns [`GitHubError::TokenAcquisitionFailed`] if GitHub refuses.
    fn mint_installation_token(
        &self,
        installation_id: u64,
        repo: &str,
        permissions: TokenPermissions,
    ) -> BoxFuture<'_, Result<IssuedCredential, GitHubError>>;
}

/// Request body for `POST /app/installations/{id}/access_tokens`.
#[derive(Debug, Serialize)]
struct AccessTokenRequest {
    repositories: Vec<String>,
    permissions: TokenPermissions,
}

/// Production [`InstallationAuthProvider`] backed by an App-level Octocrab.
pub struct OctocrabInstallationProvider {
    app: Octocrab,
}

impl OctocrabInstallationProvider {
    /// Wraps an App-authenticated client (see [`super::build_app_client`]).
    #[must_use]
    pub const fn new(app: Octocrab) -> Self {
        Self { app }
    }
}

impl InstallationAuthProvider for OctocrabInstallationProvider {
    fn resolve_installation(
        &self,
        owner: &str,
        repo: &str,
    ) -> BoxFuture<'_, Result<u64, GitHubError>> {
        let owner_login = owner.to_owned();
        let repo_name = repo.to_owned();
        Box::pin(async move {
            match self
                .app
                .apps()
                .get_repository_installation(&owner_login, &repo_name)
                .await
            {
                Ok(installation) => Ok(installation.id.0),
                Err(error) => Err(GitHubError::InstallationLookupFailed {
                    owner: owner_login,
                    repo: repo_name,
                    message: error.to_string(),
                }),
            }
        })
    }

    fn get_repository(
        &self,
        installation_id: u64,
        owner: &str,
        repo: &str,
    ) -> BoxFuture<'_, Result<Option<RepositorySnapshot>, GitHubError>> {
        let owner_login = owner.to_owned();
        let repo_name = repo.to_owned();
        Box::pin(async move {
            let failure = |message: String| GitHubError::RepositoryFetchFailed {
                owner: owner_login.clone(),
                repo: repo_name.clone(),
                message,
            };
            let scoped = self
                .app
                .installation(InstallationId(installation_id))
                .map_err(|error| failure(format!("failed to derive installation client: {error}")))?;
            let repository = scoped
                .repos(owner_login.as_str(), repo_name.as_str())
                .get()
                .await
                .map_err(|error| failure(error.to_string()))?;
            Ok(repository
                .default_branch
                .filter(|branch| !branch.is_empty())
                .map(|default_branch| RepositorySnapshot { default_branch }))
        })
    }

    fn mint_installation_token(
        &self,
        installation_id: u64,
        repo: &str,
        permissions: TokenPermissions,
    ) -> BoxFuture<'_, Result<IssuedCredential, GitHubError>> {
        let body = AccessTokenRequest {
            repositories: vec![repo.to_owned()],
            permissions,
        };
        Box::pin(async move {
            let route = format!("/app/installations/{installation_id}/access_tokens");
            self.app
                .post::<_, IssuedCredential>(route, Some(&body))
                .await
                .map_err(|error| GitHubError::TokenAcquisitionFailed {
                    message: error.to_string(),
                })
        })
    }
}
