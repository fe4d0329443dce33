//! Scenario state and the GitHub stand-in for credential exchange BDD tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{TimeDelta, Utc};
use reviewgate::error::{FailureKind, GitHubError};
use reviewgate::github::{
    BoxFuture, InstallationAuthProvider, IssuedCredential, RepositorySnapshot, TokenPermissions,
};
use rstest_bdd::Slot;
use rstest_bdd_macros::ScenarioState;
use serde_json::Value;

/// Convenience alias for step outcomes.
pub type StepResult<T> = Result<T, String>;

/// Installation id the stand-in reports.
const INSTALLATION_ID: u64 = 7;

/// A GitHub App installation stand-in that counts every call it receives.
#[derive(Debug, Default)]
pub struct RecordingGitHub {
    installed_on: Option<(String, String)>,
    default_branch: String,
    lookups: AtomicUsize,
    branch_fetches: AtomicUsize,
    mints: AtomicUsize,
}

impl RecordingGitHub {
    /// An App installed on `owner/repo` whose default branch is `branch`.
    pub fn installed(owner: &str, repo: &str, branch: &str) -> Self {
        Self {
            installed_on: Some((owner.to_owned(), repo.to_owned())),
            default_branch: branch.to_owned(),
            ..Self::default()
        }
    }

    /// An App with no installations.
    pub fn not_installed() -> Self {
        Self::default()
    }

    /// Total calls of any kind.
    pub fn calls(&self) -> usize {
        self.lookups() + self.branch_fetches() + self.mints()
    }

    /// Installation lookups received.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Repository fetches received.
    pub fn branch_fetches(&self) -> usize {
        self.branch_fetches.load(Ordering::SeqCst)
    }

    /// Tokens minted.
    pub fn mints(&self) -> usize {
        self.mints.load(Ordering::SeqCst)
    }

    fn is_installed_on(&self, owner: &str, repo: &str) -> bool {
        self.installed_on
            .as_ref()
            .is_some_and(|(o, r)| o == owner && r == repo)
    }
}

impl InstallationAuthProvider for RecordingGitHub {
    fn resolve_installation(
        &self,
        owner: &str,
        repo: &str,
    ) -> BoxFuture<'_, Result<u64, GitHubError>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let result = if self.is_installed_on(owner, repo) {
            Ok(INSTALLATION_ID)
        } else {
            Err(GitHubError::InstallationLookupFailed {
                owner: owner.to_owned(),
                repo: repo.to_owned(),
                message: String::from("404 Not Found"),
            })
        };
        Box::pin(async move { result })
    }

    fn get_repository(
        &self,
        _installation_id: u64,
        _owner: &str,
        _repo: &str,
    ) -> BoxFuture<'_, Result<Option<RepositorySnapshot>, GitHubError>> {
        self.branch_fetches.fetch_add(1, Ordering::SeqCst);
        let snapshot = RepositorySnapshot {
            default_branch: self.default_branch.clone(),
        };
        Box::pin(async move { Ok(Some(snapshot)) })
    }

    fn mint_installation_token(
        &self,
        _installation_id: u64,
        repo: &str,
        _permissions: TokenPermissions,
    ) -> BoxFuture<'_, Result<IssuedCredential, GitHubError>> {
        self.mints.fetch_add(1, Ordering::SeqCst);
        let credential = IssuedCredential {
            token: format!("ghs_{repo}"),
            expires_at: Utc::now() + TimeDelta::hours(1),
        };
        Box::pin(async move { Ok(credential) })
    }
}

/// Outcome of an exchange attempt.
#[derive(Clone, Debug)]
pub enum ExchangeOutcome {
    /// A token was minted.
    Minted {
        /// The minted token.
        token: String,
    },
    /// The exchange failed.
    Failed {
        /// The caller-facing failure class.
        kind: FailureKind,
        /// The `Display` representation of the error.
        message: String,
    },
}

/// State shared across credential exchange scenarios.
#[derive(Default, ScenarioState)]
pub struct CredentialExchangeState {
    /// The GitHub stand-in the broker talks to.
    pub(crate) github: Slot<Arc<RecordingGitHub>>,
    /// Claims of the identity token to present.
    pub(crate) claims: Slot<Value>,
    /// Outcome of the most recent exchange.
    pub(crate) outcome: Slot<ExchangeOutcome>,
}

/// Fixture providing fresh state for each scenario.
#[rstest::fixture]
pub fn credential_exchange_state() -> CredentialExchangeState {
    CredentialExchangeState::default()
}
