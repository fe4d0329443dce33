//! The exchange call to the credential broker, and transport-error
//! classification shared by both client calls.

use std::io::ErrorKind;

use reqwest::StatusCode;

use crate::broker::ExchangeRequest;
use crate::error::{AcquireError, AcquireStage};
use crate::github::{BoxFuture, IssuedCredential};

/// Sends exchange requests to the credential broker.
#[cfg_attr(test, mockall::automock)]
pub trait ExchangeTransport: Send + Sync {
    /// Presents `id_token` to the broker for `request`.
    ///
    /// # Errors
    ///
    /// Returns [`AcquireError::Unauthorized`] on a 401,
    /// [`AcquireError::ExchangeRejected`] on any other non-success status,
    /// or a network or decode failure.
    fn exchange(
        &self,
        id_token: &str,
        request: &ExchangeRequest,
    ) -> BoxFuture<'_, Result<IssuedCredential, AcquireError>>;
}

/// [`ExchangeTransport`] over HTTP.
#[derive(Debug)]
pub struct HttpExchangeTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpExchangeTransport {
    /// Creates a transport posting to the broker's exchange `url`.
    #[must_use]
    pub const fn new(client: reqwest::Client, url: String) -> Self {
        Self { client, url }
    }
}

impl ExchangeTransport for HttpExchangeTransport {
    fn exchange(
        &self,
        id_token: &str,
        request: &ExchangeRequest,
    ) -> BoxFuture<'_, Result<IssuedCredential, AcquireError>> {
        let bearer = id_token.to_owned();
        let body = request.clone();
        Box::pin(async move {
            let stage = AcquireStage::Exchange;
            let response = self
                .client
                .post(&self.url)
                .bearer_auth(bearer)
                .json(&body)
                .send()
                .await
                .map_err(|error| classify_transport_error(stage, &error))?;

            match response.status() {
                status if status.is_success() => response
                    .json::<IssuedCredential>()
                    .await
                    .map_err(|error| classify_transport_error(stage, &error)),
                StatusCode::UNAUTHORIZED => Err(AcquireError::Unauthorized),
                status => Err(AcquireError::ExchangeRejected {
                    status: status.as_u16(),
                }),
            }
        })
    }
}

/// Converts a `reqwest` failure into an [`AcquireError`] for `stage`.
///
/// Body decode failures are invalid responses. Everything else happened
/// below HTTP and is a network error, described by the most specific I/O
/// cause in the source chain.
pub(super) fn classify_transport_error(stage: AcquireStage, error: &reqwest::Error) -> AcquireError {
    if error.is_decode() {
        return AcquireError::InvalidResponse {
            stage,
            message: error.to_string(),
        };
    }

    let message = if error.is_timeout() {
        String::from("timed out")
    } else {
        io_error_kind_in_chain(error).map_or_else(|| error.to_string(), describe_io_kind)
    };
    AcquireError::Network { stage, message }
}

fn describe_io_kind(kind: ErrorKind) -> String {
    match kind {
        ErrorKind::ConnectionReset => String::from("connection reset"),
        ErrorKind::ConnectionAborted => String::from("connection aborted"),
        ErrorKind::ConnectionRefused => String::from("connection refused"),
        ErrorKind::TimedOut => String::from("timed out"),
        other => other.to_string(),
    }
}

/// Walk the error source chain looking for an `io::Error` kind.
fn io_error_kind_in_chain(error: &dyn std::error::Error) -> Option<ErrorKind> {
    let mut current: Option<&(dyn std::error::Error + 'static)> = error.source();
    while let Some(err) = current {
        if let Some(io_err) = err.downcast_ref::<std::io::Error>() {
            return Some(io_err.kind());
        }
        current = err.source();
    }
    None
}
