//! Issuer signing-key resolution.
//!
//! [`JwksKeyResolver`] finds the issuer's key set through OIDC discovery and
//! keeps it for a configurable TTL. A token whose `kid` is not in the cached
//! set triggers one refetch, so key rotation takes effect without waiting
//! for the TTL.
//!
//! Refreshes are serialised and throttled: concurrent callers that find the
//! cache cold share one fetch, and no fetch is attempted within
//! [`MIN_REFRESH_INTERVAL`] of the previous attempt, whether it succeeded
//! or failed.

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::DecodingKey;
use jsonwebtoken::jwk::{AlgorithmParameters, Jwk, JwkSet, KeyAlgorithm};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::error::OidcError;
use crate::github::BoxFuture;

/// Minimum time between two fetches of the issuer key set.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

/// Resolves the issuer key that signed a token.
#[cfg_attr(test, mockall::automock)]
pub trait PublicKeyResolver: Send + Sync {
    /// Returns the RS256 verification key published under `kid`.
    ///
    /// # Errors
    ///
    /// Returns [`OidcError::KeyNotFound`] if the issuer publishes no such
    /// key, or [`OidcError::KeyFetchFailed`] if the key set is unreachable.
    fn decoding_key(&self, kid: &str) -> BoxFuture<'_, Result<DecodingKey, OidcError>>;
}

/// A resolver over a fixed key set.
///
/// Useful when the issuer's keys are pinned in configuration and in tests.
#[derive(Debug, Clone)]
pub struct StaticKeyResolver {
    keys: Arc<JwkSet>,
}

impl StaticKeyResolver {
    /// Wraps a key set.
    #[must_use]
    pub fn new(keys: JwkSet) -> Self {
        Self {
            keys: Arc::new(keys),
        }
    }
}

impl PublicKeyResolver for StaticKeyResolver {
    fn decoding_key(&self, kid: &str) -> BoxFuture<'_, Result<DecodingKey, OidcError>> {
        let result = find_rsa_key(&self.keys, kid);
        Box::pin(async move { result })
    }
}

#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    jwks_uri: String,
}

#[derive(Debug, Clone)]
struct FetchFailure {
    url: String,
    message: String,
}

impl FetchFailure {
    fn to_error(&self) -> OidcError {
        OidcError::KeyFetchFailed {
            url: self.url.clone(),
            message: self.message.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct KeyCache {
    keys: Option<Arc<JwkSet>>,
    fetched_at: Option<Instant>,
    attempted_at: Option<Instant>,
    last_failure: Option<FetchFailure>,
}

impl KeyCache {
    /// Answers from the cache, or returns `None` when a fetch is due.
    ///
    /// Inside the throttle window the last good key set is served even past
    /// its TTL, and a failed fetch keeps failing without touching the issuer.
    fn settled(&self, kid: &str, ttl: Duration) -> Option<Result<Arc<JwkSet>, OidcError>> {
        let fresh = self.fetched_at.is_some_and(|at| at.elapsed() < ttl);
        if let Some(keys) = self.keys.as_ref().filter(|set| fresh && set.find(kid).is_some()) {
            return Some(Ok(Arc::clone(keys)));
        }

        let throttled = self
            .attempted_at
            .is_some_and(|at| at.elapsed() < MIN_REFRESH_INTERVAL);
        if !throttled {
            return None;
        }
        match (&self.keys, &self.last_failure) {
            (Some(keys), _) => Some(Ok(Arc::clone(keys))),
            (None, Some(failure)) => Some(Err(failure.to_error())),
            (None, None) => None,
        }
    }
}

/// Discovers and caches the issuer's published key set.
#[derive(Debug)]
pub struct JwksKeyResolver {
    client: reqwest::Client,
    discovery_url: String,
    ttl: Duration,
    cache: RwLock<KeyCache>,
    refresh_gate: Mutex<()>,
}

impl JwksKeyResolver {
    /// Creates a resolver for `issuer`.
    ///
    /// No request is made until the first token is verified.
    #[must_use]
    pub fn new(client: reqwest::Client, issuer: &str, ttl: Duration) -> Self {
        Self {
            client,
            discovery_url: format!(
                "{}/.well-known/openid-configuration",
                issuer.trim_end_matches('/')
            ),
            ttl,
            cache: RwLock::new(KeyCache::default()),
            refresh_gate: Mutex::new(()),
        }
    }

    async fn resolve(&self, kid: &str) -> Result<DecodingKey, OidcError> {
        let settled = self.cache.read().await.settled(kid, self.ttl);
        let keys = match settled {
            Some(result) => result?,
            None => self.refresh(kid).await?,
        };
        find_rsa_key(&keys, kid)
    }

    async fn refresh(&self, kid: &str) -> Result<Arc<JwkSet>, OidcError> {
        let _refreshing = self.refresh_gate.lock().await;

        // Whoever held the gate before us may already have fetched.
        let settled = self.cache.read().await.settled(kid, self.ttl);
        if let Some(result) = settled {
            return result;
        }

        let fetched = self.fetch_key_set().await;
        let now = Instant::now();
        let mut cache = self.cache.write().await;
        cache.attempted_at = Some(now);
        match fetched {
            Ok(keys) => {
                cache.keys = Some(Arc::clone(&keys));
                cache.fetched_at = Some(now);
                cache.last_failure = None;
                Ok(keys)
            }
            Err(failure) => {
                tracing::warn!(
                    url = %failure.url,
                    error = %failure.message,
                    "failed to refresh issuer key set"
                );
                let error = failure.to_error();
                cache.last_failure = Some(failure);
                Err(error)
            }
        }
    }

    async fn fetch_key_set(&self) -> Result<Arc<JwkSet>, FetchFailure> {
        let discovery: DiscoveryDocument = self.fetch_json(&self.discovery_url).await?;
        let keys = self.fetch_json::<JwkSet>(&discovery.jwks_uri).await?;
        tracing::debug!(
            jwks_uri = %discovery.jwks_uri,
            key_count = keys.keys.len(),
            "refreshed issuer key set"
        );
        Ok(Arc::new(keys))
    }

    async fn fetch_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchFailure> {
        let failure = |error: reqwest::Error| FetchFailure {
            url: url.to_owned(),
            message: error.to_string(),
        };
        self.client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(failure)?
            .json::<T>()
            .await
            .map_err(failure)
    }
}

impl PublicKeyResolver for JwksKeyResolver {
    fn decoding_key(&self, kid: &str) -> BoxFuture<'_, Result<DecodingKey, OidcError>> {
        let requested = kid.to_owned();
        Box::pin(async move { self.resolve(&requested).await })
    }
}

/// Looks up `kid` and accepts it only if it is an RSA key usable for RS256.
fn find_rsa_key(keys: &JwkSet, kid: &str) -> Result<DecodingKey, OidcError> {
    let jwk = keys.find(kid).ok_or_else(|| OidcError::KeyNotFound {
        kid: kid.to_owned(),
    })?;
    ensure_rs256_key(jwk, kid)?;
    Ok(DecodingKey::from_jwk(jwk)?)
}

fn ensure_rs256_key(jwk: &Jwk, kid: &str) -> Result<(), OidcError> {
    let algorithm_ok = jwk
        .common
        .key_algorithm
        .is_none_or(|algorithm| algorithm == KeyAlgorithm::RS256);
    if algorithm_ok && matches!(jwk.algorithm, AlgorithmParameters::RSA(_)) {
        Ok(())
    } else {
        Err(OidcError::UnsupportedAlgorithm {
            algorithm: format!("key '{kid}' is not an RS256 key"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn published_keys() -> JwkSet {
        serde_json::from_str(include_str!("../../tests/fixtures/test_jwks.json"))
            .expect("fixture key set should parse")
    }

    #[rstest]
    #[tokio::test]
    async fn static_resolver_finds_published_key(published_keys: JwkSet) {
        let resolver = StaticKeyResolver::new(published_keys);
        let result = resolver.decoding_key("test-key-1").await;
        assert!(result.is_ok(), "expected key, got {:?}", result.err());
    }

    #[rstest]
    #[tokio::test]
    async fn static_resolver_reports_unknown_kid(published_keys: JwkSet) {
        let resolver = StaticKeyResolver::new(published_keys);
        let result = resolver.decoding_key("rotated-away").await;
        assert!(
            matches!(result, Err(OidcError::KeyNotFound { ref kid }) if kid == "rotated-away"),
            "expected KeyNotFound, got {:?}",
            result.err()
        );
    }

    #[rstest]
    fn non_rsa_keys_are_rejected() {
        let keys: JwkSet = serde_json::from_value(serde_json::json!({
            "keys": [{
                "kty": "EC",
                "kid": "ec-key",
                "crv": "P-256",
                "x": "f83OJ3D2xF1Bg8vub9tLe1gHMzV76e8Tus9uPHvRVEU",
                "y": "x_FEzRu9m36HLN_tue659LNpXW6pCyStikYjKIWI5a0"
            }]
        }))
        .expect("EC key set should parse");
        let result = find_rsa_key(&keys, "ec-key");
        assert!(
            matches!(result, Err(OidcError::UnsupportedAlgorithm { .. })),
            "expected UnsupportedAlgorithm, got {:?}",
            result.err()
        );
    }

    #[rstest]
    #[case("https://token.actions.githubusercontent.com")]
    #[case("https://token.actions.githubusercontent.com/")]
    fn discovery_url_is_derived_from_issuer(#[case] issuer: &str) {
        let resolver = JwksKeyResolver::new(reqwest::Client::new(), issuer, Duration::from_secs(60));
        assert_eq!(
            resolver.discovery_url,
            "https://token.actions.githubusercontent.com/.well-known/openid-configuration"
        );
    }
}
