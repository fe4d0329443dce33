//! Workflow runtime detection and identity-token requests.
//!
//! A GitHub Actions job that was granted `id-token: write` exposes a request
//! URL and a request token. Their absence means OIDC is unavailable, and the
//! client falls back to a locally supplied token.

use std::fmt;

use serde::Deserialize;

use super::transport::classify_transport_error;
use crate::broker::ExchangeRequest;
use crate::error::{AcquireError, AcquireStage};
use crate::github::BoxFuture;

/// Environment variable holding the identity-token request URL.
pub const ID_TOKEN_REQUEST_URL_VAR: &str = "ACTIONS_ID_TOKEN_REQUEST_URL";

/// Environment variable holding the bearer for the identity-token request.
pub const ID_TOKEN_REQUEST_TOKEN_VAR: &str = "ACTIONS_ID_TOKEN_REQUEST_TOKEN";

/// Environment variable holding `owner/repo` for the current run.
pub const REPOSITORY_VAR: &str = "GITHUB_REPOSITORY";

/// Environment variable holding the current run id.
pub const RUN_ID_VAR: &str = "GITHUB_RUN_ID";

/// Environment variable holding the job's own token.
pub const FALLBACK_TOKEN_VAR: &str = "GITHUB_TOKEN";

/// Where to ask the runtime for an identity token.
#[derive(Clone, PartialEq, Eq)]
pub struct IdTokenEndpoint {
    /// Request URL supplied by the runtime.
    pub url: String,
    request_token: String,
}

impl IdTokenEndpoint {
    /// Creates an endpoint from the runtime's URL and request token.
    #[must_use]
    pub const fn new(url: String, request_token: String) -> Self {
        Self { url, request_token }
    }
}

impl fmt::Debug for IdTokenEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdTokenEndpoint")
            .field("url", &self.url)
            .field("request_token", &"<redacted>")
            .finish()
    }
}

/// What the current process can use to obtain a credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowContext {
    /// OIDC is available; exchange an identity token for `request`.
    Oidc {
        /// The runtime's identity-token endpoint.
        endpoint: IdTokenEndpoint,
        /// The repository and run to request a credential for.
        request: ExchangeRequest,
    },
    /// OIDC is unavailable; use this token if there is one.
    Fallback {
        /// The locally supplied token.
        token: Option<String>,
    },
}

impl WorkflowContext {
    /// Inspects the environment.
    ///
    /// `configured_fallback` takes precedence over `GITHUB_TOKEN`.
    ///
    /// # Errors
    ///
    /// Returns [`AcquireError::MissingContext`] if OIDC is available but the
    /// repository or run id is missing or malformed.
    pub fn from_env<E: mockable::Env>(
        env: &E,
        configured_fallback: Option<&str>,
    ) -> Result<Self, AcquireError> {
        let request_url = non_empty(env, ID_TOKEN_REQUEST_URL_VAR);
        let runtime_bearer = non_empty(env, ID_TOKEN_REQUEST_TOKEN_VAR);
        let (Some(url), Some(request_token)) = (request_url, runtime_bearer) else {
            let token = configured_fallback
                .map(str::to_owned)
                .or_else(|| non_empty(env, FALLBACK_TOKEN_VAR));
            return Ok(Self::Fallback { token });
        };

        let repository = non_empty(env, REPOSITORY_VAR).ok_or_else(|| missing(REPOSITORY_VAR))?;
        let (owner, repo) = repository
            .split_once('/')
            .ok_or_else(|| missing("GITHUB_REPOSITORY in owner/repo form"))?;
        let run_id = non_empty(env, RUN_ID_VAR).ok_or_else(|| missing(RUN_ID_VAR))?;
        let request = ExchangeRequest::new(owner, repo, &run_id)
            .map_err(|error| missing(&error.to_string()))?;

        Ok(Self::Oidc {
            endpoint: IdTokenEndpoint::new(url, request_token),
            request,
        })
    }
}

fn non_empty<E: mockable::Env>(env: &E, name: &str) -> Option<String> {
    env.string(name)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn missing(field: &str) -> AcquireError {
    AcquireError::MissingContext {
        field: field.to_owned(),
    }
}

/// Obtains identity tokens from the workflow runtime.
#[cfg_attr(test, mockall::automock)]
pub trait IdTokenSource: Send + Sync {
    /// Requests a fresh identity token for `audience`.
    ///
    /// # Errors
    ///
    /// Returns [`AcquireError`] classed by [`AcquireStage::IdentityToken`].
    fn request_id_token(&self, audience: &str) -> BoxFuture<'_, Result<String, AcquireError>>;
}

#[derive(Debug, Deserialize)]
struct IdTokenResponse {
    value: String,
}

/// [`IdTokenSource`] that calls the GitHub Actions runtime.
#[derive(Debug)]
pub struct ActionsIdTokenSource {
    client: reqwest::Client,
    endpoint: IdTokenEndpoint,
}

impl ActionsIdTokenSource {
    /// Creates a source for `endpoint`.
    #[must_use]
    pub const fn new(client: reqwest::Client, endpoint: IdTokenEndpoint) -> Self {
        Self { client, endpoint }
    }
}

impl IdTokenSource for ActionsIdTokenSource {
    fn request_id_token(&self, audience: &str) -> BoxFuture<'_, Result<String, AcquireError>> {
        let requested_audience = audience.to_owned();
        Box::pin(async move {
            let stage = AcquireStage::IdentityToken;
            let response = self
                .client
                .get(&self.endpoint.url)
                .query(&[("audience", requested_audience.as_str())])
                .bearer_auth(&self.endpoint.request_token)
                .send()
                .await
                .map_err(|error| classify_transport_error(stage, &error))?;

            let status = response.status();
            if !status.is_success() {
                return Err(AcquireError::IdentityTokenRejected {
                    status: status.as_u16(),
                });
            }

            let body: IdTokenResponse = response
                .json()
                .await
                .map_err(|error| classify_transport_error(stage, &error))?;
            if body.value.trim().is_empty() {
                return Err(AcquireError::InvalidResponse {
                    stage,
                    message: String::from("identity token is empty"),
                });
            }
            Ok(body.value)
        })
    }
}
