//! The acquisition client run inside a review workflow.
//!
//! [`AcquisitionClient::acquire_credential`] obtains the bearer token the
//! workflow uses for GitHub API calls. With OIDC available it requests an
//! identity token from the runtime and exchanges it at the broker, retrying
//! transient failures per [`RetryPolicy`]. Without OIDC it returns a locally
//! supplied fallback token and never retries.
//!
//! Each client performs at most one acquisition. The first caller starts it;
//! every concurrent or later caller awaits the same result.

mod retry;
mod runtime;
mod transport;

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::Shared;
use tracing::info;

use crate::broker::ExchangeRequest;
use crate::config::ClientSettings;
use crate::error::{AcquireError, AcquireStage};
use crate::github::BoxFuture;

pub use retry::{DEFAULT_BACKOFF, RetryPolicy};
pub use runtime::{
    ActionsIdTokenSource, FALLBACK_TOKEN_VAR, ID_TOKEN_REQUEST_TOKEN_VAR,
    ID_TOKEN_REQUEST_URL_VAR, IdTokenEndpoint, IdTokenSource, REPOSITORY_VAR, RUN_ID_VAR,
    WorkflowContext,
};
pub use transport::{ExchangeTransport, HttpExchangeTransport};

#[cfg(test)]
pub use runtime::MockIdTokenSource;
#[cfg(test)]
pub use transport::MockExchangeTransport;

/// Connection and response timeout for each client request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

type PendingAcquisition = Shared<BoxFuture<'static, Result<String, AcquireError>>>;

/// The collaborators of an OIDC exchange.
pub struct ExchangePlan {
    /// The repository and run to request a credential for.
    pub request: ExchangeRequest,
    /// Audience to request identity tokens for.
    pub audience: String,
    /// Source of identity tokens.
    pub id_tokens: Box<dyn IdTokenSource>,
    /// Transport to the broker.
    pub transport: Box<dyn ExchangeTransport>,
    /// Retry schedule for the exchange.
    pub retry: RetryPolicy,
}

enum Strategy {
    Exchange(ExchangePlan),
    Fallback(Option<String>),
}

impl Strategy {
    async fn acquire(&self) -> Result<String, AcquireError> {
        match self {
            Self::Fallback(Some(token)) => {
                info!("OIDC is unavailable; using the fallback token");
                Ok(token.clone())
            }
            Self::Fallback(None) => Err(AcquireError::FallbackTokenMissing),
            Self::Exchange(plan) => {
                let credential = plan
                    .retry
                    .run(|attempt| async move {
                        let id_token = plan.id_tokens.request_id_token(&plan.audience).await?;
                        let issued = plan.transport.exchange(&id_token, &plan.request).await?;
                        info!(
                            attempt,
                            repository = %plan.request.repository(),
                            expires_at = %issued.expires_at,
                            "acquired installation token"
                        );
                        Ok(issued)
                    })
                    .await?;
                Ok(credential.token)
            }
        }
    }
}

/// Acquires the workflow's GitHub credential at most once.
pub struct AcquisitionClient {
    strategy: Arc<Strategy>,
    pending: OnceLock<PendingAcquisition>,
}

impl AcquisitionClient {
    /// Creates a client that exchanges identity tokens per `plan`.
    #[must_use]
    pub fn exchange(plan: ExchangePlan) -> Self {
        Self::with_strategy(Strategy::Exchange(plan))
    }

    /// Creates a client that returns `token` without contacting anything.
    #[must_use]
    pub fn fallback(token: Option<String>) -> Self {
        Self::with_strategy(Strategy::Fallback(token))
    }

    /// Creates the production client for the current process environment.
    ///
    /// # Errors
    ///
    /// Returns [`AcquireError::MissingContext`] if OIDC is available but the
    /// run context is incomplete, or [`AcquireError::Network`] if the HTTP
    /// client cannot be built.
    pub fn from_environment<E: mockable::Env>(
        settings: &ClientSettings,
        env: &E,
    ) -> Result<Self, AcquireError> {
        match WorkflowContext::from_env(env, settings.fallback_token.as_deref())? {
            WorkflowContext::Fallback { token } => Ok(Self::fallback(token)),
            WorkflowContext::Oidc { endpoint, request } => {
                let client = reqwest::Client::builder()
                    .timeout(REQUEST_TIMEOUT)
                    .build()
                    .map_err(|error| AcquireError::Network {
                        stage: AcquireStage::Exchange,
                        message: format!("failed to build HTTP client: {error}"),
                    })?;
                Ok(Self::exchange(ExchangePlan {
                    request,
                    audience: settings.audience.clone(),
                    id_tokens: Box::new(ActionsIdTokenSource::new(client.clone(), endpoint)),
                    transport: Box::new(HttpExchangeTransport::new(
                        client,
                        settings.broker_url.clone(),
                    )),
                    retry: RetryPolicy::default(),
                }))
            }
        }
    }

    fn with_strategy(strategy: Strategy) -> Self {
        Self {
            strategy: Arc::new(strategy),
            pending: OnceLock::new(),
        }
    }

    /// Returns the bearer token for GitHub API calls.
    ///
    /// Concurrent callers share one acquisition; the outcome, success or
    /// failure, is kept for the life of the client.
    ///
    /// # Errors
    ///
    /// Returns the [`AcquireError`] that ended the acquisition.
    pub async fn acquire_credential(&self) -> Result<String, AcquireError> {
        let pending = self
            .pending
            .get_or_init(|| {
                let strategy = Arc::clone(&self.strategy);
                async move { strategy.acquire().await }.boxed().shared()
            })
            .clone();
        pending.await
    }
}

#[cfg(test)]
mod tests;
