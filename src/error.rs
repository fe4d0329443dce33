//! Semantic error types for the reviewgate service and client.
//!
//! This module defines the error hierarchy for reviewgate, following the
//! principle of using semantic error enums (via `thiserror`) for conditions the
//! caller might inspect, retry, or map to an HTTP status, while reserving opaque
//! errors (`eyre::Report`) for the application boundary.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found at the expected path.
    #[error("configuration file not found: {path}")]
    FileNotFound {
        /// The path where the configuration file was expected.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("failed to parse configuration file: {message}")]
    ParseError {
        /// A description of the parse error.
        message: String,
    },

    /// A required configuration value is missing.
    #[error("missing required configuration: {field}")]
    MissingRequired {
        /// The name of the missing field.
        field: String,
    },

    /// A configuration value failed validation.
    #[error("invalid configuration value for '{field}': {reason}")]
    InvalidValue {
        /// The name of the invalid field.
        field: String,
        /// The reason the value is invalid.
        reason: String,
    },

    /// The `OrthoConfig` library returned an error during configuration loading.
    #[error("configuration loading failed: {0}")]
    OrthoConfig(Arc<ortho_config::OrthoError>),
}

/// Errors that can occur while talking to GitHub as the App.
#[derive(Debug, Error)]
pub enum GitHubError {
    /// GitHub App authentication failed.
    #[error("GitHub App authentication failed: {message}")]
    AuthenticationFailed {
        /// A description of the authentication failure.
        message: String,
    },

    /// Failed to load the GitHub App private key.
    #[error("failed to load private key from '{path}': {message}")]
    PrivateKeyLoadFailed {
        /// The path to the private key file, or `<inline>` for inline keys.
        path: PathBuf,
        /// A description of the failure.
        message: String,
    },

    /// The App is not installed on the repository, or the lookup failed.
    #[error("failed to resolve installation for '{owner}/{repo}': {message}")]
    InstallationLookupFailed {
        /// Repository owner.
        owner: String,
        /// Repository name.
        repo: String,
        /// A description of the failure.
        message: String,
    },

    /// Repository metadata could not be fetched.
    #[error("failed to fetch repository '{owner}/{repo}': {message}")]
    RepositoryFetchFailed {
        /// Repository owner.
        owner: String,
        /// Repository name.
        repo: String,
        /// A description of the failure.
        message: String,
    },

    /// Failed to mint an installation access token.
    #[error("failed to acquire installation token: {message}")]
    TokenAcquisitionFailed {
        /// A description of the token acquisition failure.
        message: String,
    },
}

/// Errors raised while verifying an identity token's signature and envelope.
#[derive(Debug, Error)]
pub enum OidcError {
    /// The token header names an algorithm other than RS256.
    #[error("unsupported signing algorithm {algorithm}")]
    UnsupportedAlgorithm {
        /// The algorithm named in the token header.
        algorithm: String,
    },

    /// The token header carries no `kid`.
    #[error("token header has no key id")]
    MissingKeyId,

    /// No published issuer key matches the token's `kid`.
    #[error("no issuer key matches key id '{kid}'")]
    KeyNotFound {
        /// The key id from the token header.
        kid: String,
    },

    /// The issuer's discovery document or key set could not be fetched.
    #[error("failed to fetch issuer keys from '{url}': {message}")]
    KeyFetchFailed {
        /// The URL that was requested.
        url: String,
        /// A description of the failure.
        message: String,
    },

    /// Decoding or validating the JWT failed.
    #[error("jwt error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

/// How an exchange failure is reported to the caller.
///
/// The HTTP boundary maps each kind to exactly one status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The request body did not match the exchange schema (400).
    Malformed,
    /// Signature or claim verification failed (401).
    Unauthorized,
    /// A GitHub call needed to finish the exchange failed (500).
    Internal,
}

/// Errors produced by the credential broker while serving one exchange.
///
/// Variants carry the diagnostic detail that is logged server-side. None of
/// it is returned to the caller.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// The `Authorization` header is missing or is not a bearer credential.
    #[error("missing or malformed bearer token")]
    MissingBearer,

    /// The request body failed schema validation.
    #[error("malformed exchange request: {reason}")]
    MalformedRequest {
        /// Why the body was rejected.
        reason: String,
    },

    /// The verified payload does not have the expected claim shape.
    #[error("identity token claims are malformed: {reason}")]
    ClaimSchema {
        /// Which claim was missing or mistyped.
        reason: String,
    },

    /// A repository, owner, event, or runner claim did not match.
    #[error("claim '{claim}' mismatch: expected '{expected}', got '{actual}'")]
    ClaimMismatch {
        /// The failing claim name.
        claim: &'static str,
        /// The value required for this exchange.
        expected: String,
        /// The value presented in the token.
        actual: String,
    },

    /// A ref, workflow, or run claim did not match.
    #[error("ref claim '{claim}' mismatch: expected '{expected}', got '{actual}'")]
    RefClaimMismatch {
        /// The failing claim name.
        claim: &'static str,
        /// The value required for this exchange.
        expected: String,
        /// The value presented in the token.
        actual: String,
    },

    /// The identity token failed signature, issuer, audience, or expiry checks.
    #[error("identity token rejected: {0}")]
    Oidc(#[from] OidcError),

    /// A GitHub call failed after phase-1 verification succeeded.
    #[error(transparent)]
    Upstream(#[from] GitHubError),

    /// The repository has no default branch to pin against.
    #[error("repository '{owner}/{repo}' reports no default branch")]
    DefaultBranchMissing {
        /// Repository owner.
        owner: String,
        /// Repository name.
        repo: String,
    },
}

impl ExchangeError {
    /// Returns the caller-facing failure class for this error.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::MalformedRequest { .. } => FailureKind::Malformed,
            Self::MissingBearer
            | Self::Oidc(_)
            | Self::ClaimSchema { .. }
            | Self::ClaimMismatch { .. }
            | Self::RefClaimMismatch { .. } => FailureKind::Unauthorized,
            Self::Upstream(_) | Self::DefaultBranchMissing { .. } => FailureKind::Internal,
        }
    }
}

/// Which network call an acquisition failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireStage {
    /// The request to the CI runtime for an identity token.
    IdentityToken,
    /// The call to the credential broker.
    Exchange,
}

impl std::fmt::Display for AcquireStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IdentityToken => f.write_str("identity token request"),
            Self::Exchange => f.write_str("credential exchange"),
        }
    }
}

/// Errors that can occur while acquiring a credential inside a workflow run.
#[derive(Debug, Clone, Error)]
pub enum AcquireError {
    /// The call failed below HTTP: reset, aborted, timed out, or unreachable.
    #[error("{stage} failed: network error: {message}")]
    Network {
        /// The call that failed.
        stage: AcquireStage,
        /// A description of the transport failure.
        message: String,
    },

    /// The broker rejected the identity token.
    #[error("credential exchange unauthorized")]
    Unauthorized,

    /// The broker answered with a non-success status other than 401.
    #[error("credential exchange failed with HTTP {status}")]
    ExchangeRejected {
        /// The HTTP status code returned by the broker.
        status: u16,
    },

    /// The CI runtime refused to issue an identity token.
    #[error("identity token request failed with HTTP {status}")]
    IdentityTokenRejected {
        /// The HTTP status code returned by the runtime.
        status: u16,
    },

    /// A response body could not be decoded.
    #[error("{stage} returned an invalid response: {message}")]
    InvalidResponse {
        /// The call whose response was invalid.
        stage: AcquireStage,
        /// A description of the decode failure.
        message: String,
    },

    /// A value needed to build the exchange request is unavailable.
    #[error("missing workflow context: {field}")]
    MissingContext {
        /// The missing environment variable or setting.
        field: String,
    },

    /// OIDC is unavailable and no fallback token was supplied.
    #[error("OIDC is unavailable and no fallback token is configured")]
    FallbackTokenMissing,
}

impl AcquireError {
    /// Returns whether a fresh attempt could plausibly succeed.
    ///
    /// Network failures from either call and non-401 error responses from the
    /// exchange call are transient. A 401 is final.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Network { .. } | Self::ExchangeRejected { .. } => true,
            Self::InvalidResponse { stage, .. } => matches!(stage, AcquireStage::Exchange),
            Self::Unauthorized
            | Self::IdentityTokenRejected { .. }
            | Self::MissingContext { .. }
            | Self::FallbackTokenMissing => false,
        }
    }
}

/// Top-level error type for the reviewgate application.
///
/// This enum aggregates all domain-specific errors into a single type that can
/// be used throughout the application. At the application boundary (main.rs),
/// these errors are converted to `eyre::Report` for human-readable reporting.
#[derive(Debug, Error)]
pub enum ReviewGateError {
    /// An error occurred during configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An error occurred during GitHub operations.
    #[error(transparent)]
    GitHub(#[from] GitHubError),

    /// An error occurred while acquiring a credential.
    #[error(transparent)]
    Acquire(#[from] AcquireError),

    /// The broker could not bind or serve its listener.
    #[error("server error: {message}")]
    Server {
        /// A description of the server failure.
        message: String,
    },
}

/// A specialised `Result` type for reviewgate operations.
pub type Result<T> = std::result::Result<T, ReviewGateError>;
