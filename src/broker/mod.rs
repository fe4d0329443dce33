//! The credential broker.
//!
//! A [`CredentialBroker`] turns a verified identity token into an
//! installation token scoped to one repository. Each exchange walks the
//! states of [`ExchangeState`] strictly in order:
//!
//! 1. verify the token signature and the phase-one claims,
//! 2. resolve the App installation for the repository,
//! 3. fetch the repository's default branch,
//! 4. verify the phase-two claims against that branch,
//! 5. mint the token.
//!
//! No GitHub call happens before phase one passes. The broker keeps no state
//! between exchanges beyond the shared App identity and key resolver.

mod http;
mod request;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::{BrokerSettings, TrustPolicy};
use crate::error::{ExchangeError, FailureKind, ReviewGateError};
use crate::github::{
    InstallationAuthProvider, IssuedCredential, OctocrabAppClient, OctocrabInstallationProvider,
    TokenPermissions, build_app_client, load_private_key_from_source, validate_with_client,
};
use crate::oidc::{
    JwksKeyResolver, RefBinding, TokenVerifier, verify_basic_claims, verify_ref_claims,
};

pub use http::{ErrorBody, build_router, extract_bearer, serve};
pub use request::ExchangeRequest;

/// Timeout for key-set discovery and fetches.
const JWKS_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// How far an exchange progressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    /// The request arrived; nothing is verified yet.
    Received,
    /// Signature and phase-one claims passed.
    BasicVerified,
    /// The App installation for the repository is known.
    InstallationResolved,
    /// Phase-two claims passed against the fetched default branch.
    RefVerified,
    /// An installation token was minted.
    Minted,
}

impl fmt::Display for ExchangeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "received",
            Self::BasicVerified => "basic_verified",
            Self::InstallationResolved => "installation_resolved",
            Self::RefVerified => "ref_verified",
            Self::Minted => "minted",
        };
        f.write_str(name)
    }
}

/// Exchanges identity tokens for repository-scoped installation tokens.
pub struct CredentialBroker {
    verifier: TokenVerifier,
    installations: Arc<dyn InstallationAuthProvider>,
    workflow_path: String,
    permissions: TokenPermissions,
}

impl CredentialBroker {
    /// Creates a broker that mints [`TokenPermissions::REVIEW`] tokens for
    /// runs of `policy.workflow_path`.
    #[must_use]
    pub fn new(
        verifier: TokenVerifier,
        installations: Arc<dyn InstallationAuthProvider>,
        policy: &TrustPolicy,
    ) -> Self {
        Self {
            verifier,
            installations,
            workflow_path: policy.workflow_path.clone(),
            permissions: TokenPermissions::REVIEW,
        }
    }

    /// Builds the production broker from validated settings.
    ///
    /// Loads the App key, checks the App credentials against GitHub once,
    /// and prepares a key resolver for the configured issuer.
    ///
    /// # Errors
    ///
    /// Returns [`ReviewGateError::GitHub`] if the key cannot be loaded or
    /// GitHub rejects the App credentials, or [`ReviewGateError::Server`] if
    /// the key-set HTTP client cannot be built.
    pub async fn from_settings(settings: &BrokerSettings) -> Result<Self, ReviewGateError> {
        let private_key = load_private_key_from_source(&settings.private_key)?;
        let app = build_app_client(settings.app_id, private_key, settings.api_url.as_deref())?;
        validate_with_client(&OctocrabAppClient::new(app.clone())).await?;
        info!(app_id = settings.app_id, "validated GitHub App credentials");

        let http = reqwest::Client::builder()
            .timeout(JWKS_FETCH_TIMEOUT)
            .build()
            .map_err(|error| ReviewGateError::Server {
                message: format!("failed to build key-set HTTP client: {error}"),
            })?;
        let keys = JwksKeyResolver::new(http, &settings.trust.issuer, settings.jwks_cache_ttl);
        let verifier = TokenVerifier::new(Arc::new(keys), &settings.trust, settings.leeway_secs);
        Ok(Self::new(
            verifier,
            Arc::new(OctocrabInstallationProvider::new(app)),
            &settings.trust,
        ))
    }

    /// Runs one exchange for `bearer` and `request`.
    ///
    /// The failure's [`ExchangeError::kind`] decides what the caller sees.
    /// Detail is logged here and nowhere else.
    ///
    /// # Errors
    ///
    /// Returns an [`ExchangeError`] classed as unauthorized for any signature
    /// or claim failure, or as internal for any GitHub failure.
    pub async fn exchange(
        &self,
        bearer: &str,
        request: &ExchangeRequest,
    ) -> Result<IssuedCredential, ExchangeError> {
        let mut state = ExchangeState::Received;
        let result = self.advance(bearer, request, &mut state).await;
        match &result {
            Ok(credential) => info!(
                owner = %request.owner,
                repo = %request.repo,
                run_id = %request.run_id,
                expires_at = %credential.expires_at,
                "minted installation token"
            ),
            Err(error) => log_failure(request, state, error),
        }
        result
    }

    async fn advance(
        &self,
        bearer: &str,
        request: &ExchangeRequest,
        state: &mut ExchangeState,
    ) -> Result<IssuedCredential, ExchangeError> {
        let claims = self.verifier.verify(bearer).await?;
        verify_basic_claims(&claims, &request.owner, &request.repo)?;
        *state = ExchangeState::BasicVerified;

        let installation_id = self
            .installations
            .resolve_installation(&request.owner, &request.repo)
            .await?;
        *state = ExchangeState::InstallationResolved;

        let snapshot = self
            .installations
            .get_repository(installation_id, &request.owner, &request.repo)
            .await?
            .ok_or_else(|| ExchangeError::DefaultBranchMissing {
                owner: request.owner.clone(),
                repo: request.repo.clone(),
            })?;

        verify_ref_claims(
            &claims,
            &RefBinding {
                owner: &request.owner,
                repo: &request.repo,
                default_branch: &snapshot.default_branch,
                workflow_path: &self.workflow_path,
                run_id: &request.run_id,
            },
        )?;
        *state = ExchangeState::RefVerified;

        let credential = self
            .installations
            .mint_installation_token(installation_id, &request.repo, self.permissions)
            .await?;
        *state = ExchangeState::Minted;
        Ok(credential)
    }
}

fn log_failure(request: &ExchangeRequest, state: ExchangeState, error: &ExchangeError) {
    match error.kind() {
        FailureKind::Internal => tracing::error!(
            owner = %request.owner,
            repo = %request.repo,
            run_id = %request.run_id,
            %state,
            error = %error,
            "credential exchange failed"
        ),
        FailureKind::Unauthorized | FailureKind::Malformed => warn!(
            owner = %request.owner,
            repo = %request.repo,
            run_id = %request.run_id,
            %state,
            error = %error,
            "credential exchange rejected"
        ),
    }
}
