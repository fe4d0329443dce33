//! Unit tests for environment detection, retry, fallback and single-flight.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::*;
use crate::github::IssuedCredential;
use chrono::{TimeDelta, Utc};
use futures_util::future::join_all;
use mockable::MockEnv;
use rstest::rstest;
use tokio::time::Instant;

fn env_with_vars(mappings: &'static [(&'static str, &'static str)]) -> MockEnv {
    let mut env = MockEnv::new();
    env.expect_string().returning(move |key| {
        mappings
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| String::from(*v))
    });
    env
}

const OIDC_ENV: &[(&str, &str)] = &[
    (ID_TOKEN_REQUEST_URL_VAR, "https://runtime.example/token?api-version=2.0"),
    (ID_TOKEN_REQUEST_TOKEN_VAR, "runtime-bearer"),
    (REPOSITORY_VAR, "acme/widgets"),
    (RUN_ID_VAR, "123456"),
];

fn request() -> ExchangeRequest {
    ExchangeRequest::new("acme", "widgets", "123456").expect("valid request")
}

fn issued(token: &str) -> IssuedCredential {
    IssuedCredential {
        token: token.to_owned(),
        expires_at: Utc::now() + TimeDelta::hours(1),
    }
}

fn reset() -> AcquireError {
    AcquireError::Network {
        stage: AcquireStage::Exchange,
        message: String::from("connection reset"),
    }
}

fn plan(id_tokens: MockIdTokenSource, transport: MockExchangeTransport) -> ExchangePlan {
    ExchangePlan {
        request: request(),
        audience: String::from("reviewgate"),
        id_tokens: Box::new(id_tokens),
        transport: Box::new(transport),
        retry: RetryPolicy::default(),
    }
}

/// An identity-token source that numbers each token it issues.
fn counting_id_tokens(expected_calls: usize) -> MockIdTokenSource {
    let issued_count = Arc::new(AtomicUsize::new(0));
    let mut source = MockIdTokenSource::new();
    source
        .expect_request_id_token()
        .withf(|audience| audience == "reviewgate")
        .times(expected_calls)
        .returning(move |_| {
            let n = issued_count.fetch_add(1, Ordering::SeqCst) + 1;
            Box::pin(async move { Ok(format!("id-token-{n}")) })
        });
    source
}

#[rstest]
fn context_without_oidc_uses_github_token() {
    let env = env_with_vars(&[(FALLBACK_TOKEN_VAR, "ghs_job_token")]);
    let context = WorkflowContext::from_env(&env, None).expect("context should resolve");
    assert_eq!(
        context,
        WorkflowContext::Fallback {
            token: Some(String::from("ghs_job_token"))
        }
    );
}

#[rstest]
fn configured_fallback_wins_over_github_token() {
    let env = env_with_vars(&[(FALLBACK_TOKEN_VAR, "ghs_job_token")]);
    let context =
        WorkflowContext::from_env(&env, Some("ghp_configured")).expect("context should resolve");
    assert_eq!(
        context,
        WorkflowContext::Fallback {
            token: Some(String::from("ghp_configured"))
        }
    );
}

#[rstest]
#[case::no_variables(&[])]
#[case::only_url(&[(ID_TOKEN_REQUEST_URL_VAR, "https://runtime.example/token")])]
#[case::blank_request_token(&[
    (ID_TOKEN_REQUEST_URL_VAR, "https://runtime.example/token"),
    (ID_TOKEN_REQUEST_TOKEN_VAR, "  "),
])]
fn incomplete_oidc_variables_mean_fallback(
    #[case] vars: &'static [(&'static str, &'static str)],
) {
    let env = env_with_vars(vars);
    let context = WorkflowContext::from_env(&env, None).expect("context should resolve");
    assert_eq!(context, WorkflowContext::Fallback { token: None });
}

#[rstest]
fn oidc_context_carries_repository_and_run() {
    let env = env_with_vars(OIDC_ENV);
    let context = WorkflowContext::from_env(&env, Some("ignored")).expect("context should resolve");
    let WorkflowContext::Oidc { endpoint, request } = context else {
        panic!("expected an OIDC context");
    };
    assert_eq!(endpoint.url, "https://runtime.example/token?api-version=2.0");
    assert_eq!(request.repository(), "acme/widgets");
    assert_eq!(request.run_id.as_str(), "123456");
}

#[rstest]
#[case::missing_repository(
    &[
        (ID_TOKEN_REQUEST_URL_VAR, "https://runtime.example/token"),
        (ID_TOKEN_REQUEST_TOKEN_VAR, "runtime-bearer"),
        (RUN_ID_VAR, "123456"),
    ],
    "GITHUB_REPOSITORY"
)]
#[case::repository_without_slash(
    &[
        (ID_TOKEN_REQUEST_URL_VAR, "https://runtime.example/token"),
        (ID_TOKEN_REQUEST_TOKEN_VAR, "runtime-bearer"),
        (REPOSITORY_VAR, "widgets"),
        (RUN_ID_VAR, "123456"),
    ],
    "owner/repo"
)]
#[case::missing_run_id(
    &[
        (ID_TOKEN_REQUEST_URL_VAR, "https://runtime.example/token"),
        (ID_TOKEN_REQUEST_TOKEN_VAR, "runtime-bearer"),
        (REPOSITORY_VAR, "acme/widgets"),
    ],
    "GITHUB_RUN_ID"
)]
fn incomplete_run_context_is_reported(
    #[case] vars: &'static [(&'static str, &'static str)],
    #[case] expected_field: &str,
) {
    let env = env_with_vars(vars);
    let result = WorkflowContext::from_env(&env, None);
    match result {
        Err(AcquireError::MissingContext { field }) => assert!(
            field.contains(expected_field),
            "expected field mentioning {expected_field}, got {field}"
        ),
        other => panic!("expected MissingContext, got {other:?}"),
    }
}

#[rstest]
fn endpoint_debug_redacts_request_token() {
    let endpoint = IdTokenEndpoint::new(
        String::from("https://runtime.example/token"),
        String::from("runtime-bearer"),
    );
    let debug = format!("{endpoint:?}");
    assert!(!debug.contains("runtime-bearer"));
    assert!(debug.contains("<redacted>"));
}

#[tokio::test]
async fn fallback_client_returns_supplied_token() {
    let client = AcquisitionClient::fallback(Some(String::from("ghs_job_token")));
    let token = client.acquire_credential().await.expect("fallback token");
    assert_eq!(token, "ghs_job_token");
}

#[tokio::test]
async fn fallback_client_without_token_fails() {
    let client = AcquisitionClient::fallback(None);
    let result = client.acquire_credential().await;
    assert!(matches!(result, Err(AcquireError::FallbackTokenMissing)));
}

#[tokio::test]
async fn client_from_environment_without_oidc_uses_configured_token() {
    let env = env_with_vars(&[]);
    let settings = ClientSettings {
        broker_url: String::from("https://broker.example/exchange"),
        audience: String::from("reviewgate"),
        fallback_token: Some(String::from("ghp_configured")),
    };
    let client = AcquisitionClient::from_environment(&settings, &env).expect("client");
    let token = client.acquire_credential().await.expect("fallback token");
    assert_eq!(token, "ghp_configured");
}

#[tokio::test]
async fn exchange_presents_identity_token_and_request() {
    let mut transport = MockExchangeTransport::new();
    transport
        .expect_exchange()
        .withf(|id_token, body| {
            id_token == "id-token-1" && body.repository() == "acme/widgets"
        })
        .times(1)
        .returning(|_, _| Box::pin(async { Ok(issued("ghs_minted")) }));
    let client = AcquisitionClient::exchange(plan(counting_id_tokens(1), transport));

    let token = client.acquire_credential().await.expect("credential");
    assert_eq!(token, "ghs_minted");
}

#[tokio::test(start_paused = true)]
async fn transient_failures_retry_with_backoff_and_fresh_identity_tokens() {
    let seen: Arc<Mutex<Vec<(String, Instant)>>> = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&seen);
    let mut transport = MockExchangeTransport::new();
    transport
        .expect_exchange()
        .times(3)
        .returning(move |id_token, _| {
            let mut calls = recorded.lock().expect("lock");
            calls.push((id_token.to_owned(), Instant::now()));
            let attempt = calls.len();
            Box::pin(async move {
                if attempt < 3 {
                    Err(reset())
                } else {
                    Ok(issued("ghs_after_retry"))
                }
            })
        });
    let client = AcquisitionClient::exchange(plan(counting_id_tokens(3), transport));

    let token = client.acquire_credential().await.expect("credential");
    assert_eq!(token, "ghs_after_retry");

    let calls = seen.lock().expect("lock");
    let tokens: Vec<&str> = calls.iter().map(|(token, _)| token.as_str()).collect();
    assert_eq!(tokens, ["id-token-1", "id-token-2", "id-token-3"]);
    let gaps: Vec<Duration> = calls
        .windows(2)
        .filter_map(|pair| match pair {
            [(_, first), (_, second)] => Some(second.duration_since(*first)),
            _ => None,
        })
        .collect();
    assert_eq!(gaps.len(), 2);
    assert!(gaps.first().is_some_and(|gap| *gap >= Duration::from_millis(250)));
    assert!(gaps.get(1).is_some_and(|gap| *gap >= Duration::from_millis(750)));
}

#[tokio::test(start_paused = true)]
async fn rejected_exchange_is_attempted_three_times() {
    let mut transport = MockExchangeTransport::new();
    transport
        .expect_exchange()
        .times(3)
        .returning(|_, _| Box::pin(async { Err(AcquireError::ExchangeRejected { status: 502 }) }));
    let client = AcquisitionClient::exchange(plan(counting_id_tokens(3), transport));

    let result = client.acquire_credential().await;
    assert!(matches!(
        result,
        Err(AcquireError::ExchangeRejected { status: 502 })
    ));
}

#[tokio::test(start_paused = true)]
async fn unauthorized_exchange_is_attempted_once() {
    let mut transport = MockExchangeTransport::new();
    transport
        .expect_exchange()
        .times(1)
        .returning(|_, _| Box::pin(async { Err(AcquireError::Unauthorized) }));
    let client = AcquisitionClient::exchange(plan(counting_id_tokens(1), transport));

    let result = client.acquire_credential().await;
    assert!(matches!(result, Err(AcquireError::Unauthorized)));
}

#[tokio::test(start_paused = true)]
async fn refused_identity_token_skips_the_exchange() {
    let mut source = MockIdTokenSource::new();
    source
        .expect_request_id_token()
        .times(1)
        .returning(|_| Box::pin(async { Err(AcquireError::IdentityTokenRejected { status: 403 }) }));
    let mut transport = MockExchangeTransport::new();
    transport.expect_exchange().times(0);
    let client = AcquisitionClient::exchange(plan(source, transport));

    let result = client.acquire_credential().await;
    assert!(matches!(
        result,
        Err(AcquireError::IdentityTokenRejected { status: 403 })
    ));
}

#[tokio::test(start_paused = true)]
async fn concurrent_callers_share_one_acquisition() {
    let mut transport = MockExchangeTransport::new();
    transport.expect_exchange().times(1).returning(|_, _| {
        Box::pin(async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(issued("ghs_shared"))
        })
    });
    let client = AcquisitionClient::exchange(plan(counting_id_tokens(1), transport));

    let results = join_all((0..8).map(|_| client.acquire_credential())).await;
    assert_eq!(results.len(), 8);
    for result in results {
        assert_eq!(result.expect("credential"), "ghs_shared");
    }
}

#[tokio::test(start_paused = true)]
async fn failed_acquisition_is_not_repeated() {
    let mut transport = MockExchangeTransport::new();
    transport
        .expect_exchange()
        .times(1)
        .returning(|_, _| Box::pin(async { Err(AcquireError::Unauthorized) }));
    let client = AcquisitionClient::exchange(plan(counting_id_tokens(1), transport));

    assert!(client.acquire_credential().await.is_err());
    assert!(matches!(
        client.acquire_credential().await,
        Err(AcquireError::Unauthorized)
    ));
}
