//! Given and When step definitions for credential exchange BDD tests.

use std::sync::Arc;

use reviewgate::broker::{CredentialBroker, ExchangeRequest};
use reviewgate::oidc::{StaticKeyResolver, TokenVerifier};
use rstest_bdd_macros::{given, when};
use serde_json::Value;

use super::state::{CredentialExchangeState, ExchangeOutcome, RecordingGitHub, StepResult};
use crate::test_utils::{WORKFLOW_PATH, fixture_jwks, sign, trust_policy, trusted_claims};

fn split_repository(repository: &str) -> StepResult<(&str, &str)> {
    repository
        .split_once('/')
        .ok_or_else(|| format!("expected owner/repo, got {repository}"))
}

fn read_claims(state: &CredentialExchangeState) -> StepResult<Value> {
    state
        .claims
        .get()
        .ok_or_else(|| String::from("claims should be set"))
}

#[given("the App is installed on {repository} with default branch {branch}")]
fn app_installed(
    credential_exchange_state: &CredentialExchangeState,
    repository: String,
    branch: String,
) -> StepResult<()> {
    let (owner, repo) = split_repository(&repository)?;
    credential_exchange_state
        .github
        .set(Arc::new(RecordingGitHub::installed(owner, repo, &branch)));
    Ok(())
}

#[given("the App is not installed on {repository}")]
fn app_not_installed(
    credential_exchange_state: &CredentialExchangeState,
    repository: String,
) -> StepResult<()> {
    split_repository(&repository)?;
    credential_exchange_state
        .github
        .set(Arc::new(RecordingGitHub::not_installed()));
    Ok(())
}

#[given("an identity token for a trusted dispatch of {repository} run {run_id}")]
fn trusted_identity_token(
    credential_exchange_state: &CredentialExchangeState,
    repository: String,
    run_id: String,
) -> StepResult<()> {
    let (owner, repo) = split_repository(&repository)?;
    credential_exchange_state
        .claims
        .set(trusted_claims(owner, repo, &run_id));
    Ok(())
}

#[given("the token claims event {event}")]
fn token_claims_event(
    credential_exchange_state: &CredentialExchangeState,
    event: String,
) -> StepResult<()> {
    let mut claims = read_claims(credential_exchange_state)?;
    claims["event_name"] = Value::String(event);
    credential_exchange_state.claims.set(claims);
    Ok(())
}

#[given("the token was issued on branch {branch}")]
fn token_issued_on_branch(
    credential_exchange_state: &CredentialExchangeState,
    branch: String,
) -> StepResult<()> {
    let mut claims = read_claims(credential_exchange_state)?;
    let repository = claims["repository"]
        .as_str()
        .ok_or_else(|| String::from("repository claim should be a string"))?
        .to_owned();
    claims["ref"] = Value::String(format!("refs/heads/{branch}"));
    claims["job_workflow_ref"] =
        Value::String(format!("{repository}/{WORKFLOW_PATH}@refs/heads/{branch}"));
    credential_exchange_state.claims.set(claims);
    Ok(())
}

#[when("the token is exchanged for {repository} run {run_id}")]
fn exchange_token(
    credential_exchange_state: &CredentialExchangeState,
    repository: String,
    run_id: String,
) -> StepResult<()> {
    let (owner, repo) = split_repository(&repository)?;
    let request =
        ExchangeRequest::new(owner, repo, &run_id).map_err(|e| format!("bad request: {e}"))?;
    let github = credential_exchange_state
        .github
        .get()
        .ok_or_else(|| String::from("GitHub stand-in should be set"))?;
    let bearer = sign(&read_claims(credential_exchange_state)?);

    let policy = trust_policy();
    let verifier = TokenVerifier::new(
        Arc::new(StaticKeyResolver::new(fixture_jwks())),
        &policy,
        0,
    );
    let broker = CredentialBroker::new(verifier, github, &policy);

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| format!("failed to create tokio runtime: {e}"))?;
    let result = rt.block_on(broker.exchange(&bearer, &request));

    credential_exchange_state.outcome.set(match result {
        Ok(credential) => ExchangeOutcome::Minted {
            token: credential.token,
        },
        Err(error) => ExchangeOutcome::Failed {
            kind: error.kind(),
            message: error.to_string(),
        },
    });
    Ok(())
}
