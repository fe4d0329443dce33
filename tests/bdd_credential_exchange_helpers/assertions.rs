//! Then step definitions for credential exchange BDD tests.

use std::sync::Arc;

use reviewgate::error::FailureKind;
use rstest_bdd_macros::then;

use super::state::{CredentialExchangeState, ExchangeOutcome, RecordingGitHub, StepResult};

fn get_outcome(state: &CredentialExchangeState) -> StepResult<ExchangeOutcome> {
    state
        .outcome
        .get()
        .ok_or_else(|| String::from("outcome should be set"))
}

fn get_github(state: &CredentialExchangeState) -> StepResult<Arc<RecordingGitHub>> {
    state
        .github
        .get()
        .ok_or_else(|| String::from("GitHub stand-in should be set"))
}

fn expect_failure(state: &CredentialExchangeState, expected: FailureKind) -> StepResult<()> {
    match get_outcome(state)? {
        ExchangeOutcome::Minted { token } => {
            Err(format!("expected a {expected:?} failure, got token {token}"))
        }
        ExchangeOutcome::Failed { kind, .. } if kind == expected => Ok(()),
        ExchangeOutcome::Failed { kind, message } => {
            Err(format!("expected {expected:?}, got {kind:?}: {message}"))
        }
    }
}

#[then("the exchange succeeds")]
fn exchange_succeeds(credential_exchange_state: &CredentialExchangeState) -> StepResult<()> {
    match get_outcome(credential_exchange_state)? {
        ExchangeOutcome::Minted { token } if token == "ghs_widgets" => Ok(()),
        ExchangeOutcome::Minted { token } => Err(format!("unexpected token {token}")),
        ExchangeOutcome::Failed { message, .. } => {
            Err(format!("expected the exchange to succeed, got: {message}"))
        }
    }
}

#[then("the exchange is refused as unauthorized")]
fn exchange_unauthorized(credential_exchange_state: &CredentialExchangeState) -> StepResult<()> {
    expect_failure(credential_exchange_state, FailureKind::Unauthorized)
}

#[then("the exchange fails internally")]
fn exchange_internal(credential_exchange_state: &CredentialExchangeState) -> StepResult<()> {
    expect_failure(credential_exchange_state, FailureKind::Internal)
}

#[then("an installation token was minted")]
fn token_minted(credential_exchange_state: &CredentialExchangeState) -> StepResult<()> {
    let mints = get_github(credential_exchange_state)?.mints();
    if mints == 1 {
        Ok(())
    } else {
        Err(format!("expected one mint, saw {mints}"))
    }
}

#[then("no installation token was minted")]
fn no_token_minted(credential_exchange_state: &CredentialExchangeState) -> StepResult<()> {
    let mints = get_github(credential_exchange_state)?.mints();
    if mints == 0 {
        Ok(())
    } else {
        Err(format!("expected no mint, saw {mints}"))
    }
}

#[then("GitHub was not contacted")]
fn github_not_contacted(credential_exchange_state: &CredentialExchangeState) -> StepResult<()> {
    let calls = get_github(credential_exchange_state)?.calls();
    if calls == 0 {
        Ok(())
    } else {
        Err(format!("expected no GitHub calls, saw {calls}"))
    }
}

#[then("the default branch was looked up")]
fn default_branch_looked_up(
    credential_exchange_state: &CredentialExchangeState,
) -> StepResult<()> {
    let github = get_github(credential_exchange_state)?;
    if github.lookups() == 1 && github.branch_fetches() == 1 {
        Ok(())
    } else {
        Err(format!(
            "expected one lookup and one branch fetch, saw {} and {}",
            github.lookups(),
            github.branch_fetches()
        ))
    }
}
