//! Two-phase verification of identity-token claims.
//!
//! Phase one ([`verify_basic_claims`]) needs nothing but the request and the
//! verified payload, so it runs before the broker makes any GitHub call.
//! Phase two ([`verify_ref_claims`]) needs the repository's default branch,
//! which the broker only learns after phase one has passed.
//!
//! Both phases first deserialise the claim bag into a narrow record. A
//! missing or mistyped claim is a schema failure, never a silent default.

use std::fmt;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::ExchangeError;

/// The only workflow trigger trusted to request a credential.
pub const TRUSTED_EVENT: &str = "workflow_dispatch";

/// The only runner environment trusted to request a credential.
pub const TRUSTED_RUNNER_ENVIRONMENT: &str = "github-hosted";

/// A signature-verified token payload.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct ClaimSet(Value);

impl ClaimSet {
    /// Wraps an already-verified claim map.
    #[must_use]
    pub const fn new(claims: Map<String, Value>) -> Self {
        Self(Value::Object(claims))
    }

    /// Returns the raw value of one claim.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    fn extract<'a, T: Deserialize<'a>>(&'a self) -> Result<T, ExchangeError> {
        T::deserialize(&self.0).map_err(|error| ExchangeError::ClaimSchema {
            reason: error.to_string(),
        })
    }
}

/// A workflow run identifier, normalised to a trimmed non-empty string.
///
/// GitHub reports run ids as numbers in some places and strings in others,
/// so both forms deserialise. Serialisation always produces a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunId(String);

impl RunId {
    /// Normalises `raw` into a run id.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem if `raw` is blank.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(String::from("run_id must not be empty"));
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the normalised string form.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for RunId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// A `run_id` value as it appears on the wire: text or a non-negative integer.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawRunId {
    Text(String),
    Number(u64),
}

impl RawRunId {
    fn read<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Self::deserialize(deserializer).map_err(|_| {
            de::Error::custom("run_id must be a string or a non-negative integer")
        })
    }
}

impl<'de> Deserialize<'de> for RunId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match RawRunId::read(deserializer)? {
            RawRunId::Text(text) => Self::parse(&text).map_err(de::Error::custom),
            RawRunId::Number(number) => Ok(Self(number.to_string())),
        }
    }
}

/// Reads the `run_id` claim without normalising it.
///
/// Only the requested run id is trimmed; the signed claim must match it
/// exactly.
fn verbatim_run_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match RawRunId::read(deserializer)? {
        RawRunId::Text(text) => text,
        RawRunId::Number(number) => number.to_string(),
    })
}

/// Claims checked before any GitHub call.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BasicClaims {
    /// `owner/repo` the workflow ran in.
    pub repository: String,
    /// Owner login of that repository.
    pub repository_owner: String,
    /// The event that triggered the run.
    pub event_name: String,
    /// `github-hosted` or `self-hosted`.
    pub runner_environment: String,
}

/// Claims checked against the repository's trusted default branch.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RefClaims {
    /// The git ref the run executed on.
    #[serde(rename = "ref")]
    pub git_ref: String,
    /// `owner/repo/path@ref` of the workflow definition that ran.
    pub job_workflow_ref: String,
    /// The run that the token was issued to, exactly as claimed.
    #[serde(deserialize_with = "verbatim_run_id")]
    pub run_id: String,
}

/// Trusted values phase two compares the ref claims against.
#[derive(Debug, Clone, Copy)]
pub struct RefBinding<'a> {
    /// Requested repository owner.
    pub owner: &'a str,
    /// Requested repository name.
    pub repo: &'a str,
    /// Default branch fetched from GitHub for this exchange.
    pub default_branch: &'a str,
    /// Configured workflow file, relative to the repository root.
    pub workflow_path: &'a str,
    /// Requested run id.
    pub run_id: &'a RunId,
}

impl RefBinding<'_> {
    /// The only ref a credential may be minted for.
    #[must_use]
    pub fn trusted_ref(&self) -> String {
        format!("refs/heads/{}", self.default_branch)
    }

    /// The exact `job_workflow_ref` a trusted run presents.
    #[must_use]
    pub fn expected_workflow_ref(&self) -> String {
        format!(
            "{}/{}/{}@{}",
            self.owner,
            self.repo,
            self.workflow_path,
            self.trusted_ref()
        )
    }
}

/// Phase one: bind the token to the requested repository and a trusted
/// trigger on a hosted runner.
///
/// Checks run in a fixed order and stop at the first mismatch.
///
/// # Errors
///
/// Returns [`ExchangeError::ClaimSchema`] if a claim is missing or not a
/// string, or [`ExchangeError::ClaimMismatch`] naming the first failing claim.
pub fn verify_basic_claims(
    payload: &ClaimSet,
    owner: &str,
    repo: &str,
) -> Result<BasicClaims, ExchangeError> {
    let claims: BasicClaims = payload.extract()?;

    let repository = format!("{owner}/{repo}");
    expect_claim("repository", &repository, &claims.repository, mismatch)?;
    expect_claim("repository_owner", owner, &claims.repository_owner, mismatch)?;
    expect_claim("event_name", TRUSTED_EVENT, &claims.event_name, mismatch)?;
    expect_claim(
        "runner_environment",
        TRUSTED_RUNNER_ENVIRONMENT,
        &claims.runner_environment,
        mismatch,
    )?;

    Ok(claims)
}

/// Phase two: pin the token to the default branch, the configured workflow
/// file at that branch, and the requesting run.
///
/// # Errors
///
/// Returns [`ExchangeError::ClaimSchema`] if a claim is missing or mistyped,
/// or [`ExchangeError::RefClaimMismatch`] naming the first failing claim.
pub fn verify_ref_claims(
    payload: &ClaimSet,
    binding: &RefBinding<'_>,
) -> Result<RefClaims, ExchangeError> {
    let claims: RefClaims = payload.extract()?;

    expect_claim("ref", &binding.trusted_ref(), &claims.git_ref, ref_mismatch)?;
    expect_claim(
        "job_workflow_ref",
        &binding.expected_workflow_ref(),
        &claims.job_workflow_ref,
        ref_mismatch,
    )?;
    expect_claim(
        "run_id",
        binding.run_id.as_str(),
        &claims.run_id,
        ref_mismatch,
    )?;

    Ok(claims)
}

fn expect_claim(
    claim: &'static str,
    expected: &str,
    actual: &str,
    failure: fn(&'static str, &str, &str) -> ExchangeError,
) -> Result<(), ExchangeError> {
    if expected == actual {
        Ok(())
    } else {
        Err(failure(claim, expected, actual))
    }
}

fn mismatch(claim: &'static str, expected: &str, actual: &str) -> ExchangeError {
    ExchangeError::ClaimMismatch {
        claim,
        expected: expected.to_owned(),
        actual: actual.to_owned(),
    }
}

fn ref_mismatch(claim: &'static str, expected: &str, actual: &str) -> ExchangeError {
    ExchangeError::RefClaimMismatch {
        claim,
        expected: expected.to_owned(),
        actual: actual.to_owned(),
    }
}
