//! Identity-token verification.
//!
//! [`TokenVerifier`] checks a bearer token's signature against the issuer's
//! published keys and enforces the issuer, audience, and expiry envelope.
//! The resulting [`ClaimSet`] is then checked in two phases by
//! [`verify_basic_claims`] and [`verify_ref_claims`].

mod claims;
mod jwks;

use std::sync::Arc;

use jsonwebtoken::{Algorithm, Validation, decode, decode_header};

use crate::config::TrustPolicy;
use crate::error::OidcError;

pub use claims::{
    BasicClaims, ClaimSet, RefBinding, RefClaims, RunId, TRUSTED_EVENT,
    TRUSTED_RUNNER_ENVIRONMENT, verify_basic_claims, verify_ref_claims,
};
pub use jwks::{JwksKeyResolver, MIN_REFRESH_INTERVAL, PublicKeyResolver, StaticKeyResolver};

#[cfg(test)]
pub use jwks::MockPublicKeyResolver;

/// Verifies identity-token signatures and envelopes.
pub struct TokenVerifier {
    keys: Arc<dyn PublicKeyResolver>,
    issuer: String,
    audience: String,
    leeway_secs: u64,
}

impl TokenVerifier {
    /// Creates a verifier that trusts `policy`'s issuer and audience.
    #[must_use]
    pub fn new(keys: Arc<dyn PublicKeyResolver>, policy: &TrustPolicy, leeway_secs: u64) -> Self {
        Self {
            keys,
            issuer: policy.issuer.clone(),
            audience: policy.audience.clone(),
            leeway_secs,
        }
    }

    /// Verifies `token` and returns its payload.
    ///
    /// Only RS256 tokens carrying `exp`, `iss`, and `aud` are accepted.
    ///
    /// # Errors
    ///
    /// Returns [`OidcError`] if the header is unusable, no issuer key matches,
    /// or signature or envelope validation fails.
    pub async fn verify(&self, token: &str) -> Result<ClaimSet, OidcError> {
        let header = decode_header(token)?;
        if header.alg != Algorithm::RS256 {
            return Err(OidcError::UnsupportedAlgorithm {
                algorithm: format!("{:?}", header.alg),
            });
        }
        let kid = header.kid.ok_or(OidcError::MissingKeyId)?;
        let key = self.keys.decoding_key(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_audience(&[self.audience.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        validation.leeway = self.leeway_secs;

        Ok(decode::<ClaimSet>(token, &key, &validation)?.claims)
    }
}
