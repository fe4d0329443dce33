//! HTTP boundary for the credential broker.
//!
//! This is the only place an [`ExchangeError`] becomes a status code. Error
//! bodies carry a fixed message per status; the detail stays in the logs.

use std::future::Future;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::warn;

use super::{CredentialBroker, ExchangeRequest};
use crate::error::{ExchangeError, FailureKind};
use crate::github::IssuedCredential;

/// JSON body of every error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// A generic description of the failure class.
    pub error: String,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: &'static str,
}

impl ApiError {
    const fn from_kind(kind: FailureKind) -> Self {
        match kind {
            FailureKind::Malformed => Self {
                status: StatusCode::BAD_REQUEST,
                message: "malformed exchange request",
            },
            FailureKind::Unauthorized => Self {
                status: StatusCode::UNAUTHORIZED,
                message: "unauthorized",
            },
            FailureKind::Internal => Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: "internal error",
            },
        }
    }
}

impl From<ExchangeError> for ApiError {
    fn from(error: ExchangeError) -> Self {
        Self::from_kind(error.kind())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.message.to_owned(),
            }),
        )
            .into_response()
    }
}

#[derive(Debug, Serialize)]
struct HealthBody {
    status: &'static str,
}

/// Builds the broker's router: `POST /exchange` and `GET /healthz`.
#[must_use]
pub fn build_router(broker: Arc<CredentialBroker>) -> Router {
    Router::new()
        .route("/exchange", post(exchange))
        .route("/healthz", get(|| async { Json(HealthBody { status: "ok" }) }))
        .layer(TraceLayer::new_for_http())
        .with_state(broker)
}

/// Serves `broker` on `listener` until `shutdown` resolves.
///
/// # Errors
///
/// Returns the I/O error that stopped the server.
pub async fn serve<F>(
    listener: TcpListener,
    broker: Arc<CredentialBroker>,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, build_router(broker).into_make_service())
        .with_graceful_shutdown(shutdown)
        .await
}

/// Returns the bearer credential from an `Authorization` header.
///
/// The scheme is matched case-insensitively; an empty credential counts as
/// absent.
#[must_use]
pub fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, rest) = value.trim().split_once(' ')?;
    let credential = rest.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !credential.is_empty()).then_some(credential)
}

async fn exchange(
    State(broker): State<Arc<CredentialBroker>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<IssuedCredential>, ApiError> {
    let Some(bearer) = extract_bearer(&headers) else {
        warn!("exchange request without a bearer token");
        return Err(ExchangeError::MissingBearer.into());
    };

    let request = ExchangeRequest::from_json(&body).map_err(|error| {
        warn!(error = %error, "malformed exchange request");
        ApiError::from(error)
    })?;

    Ok(Json(broker.exchange(bearer, &request).await?))
}
