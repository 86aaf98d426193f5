//! Retry, circuit breaker and fallback behavior against mock upstreams

use crate::fixtures::*;
use crate::helpers::*;
use crate::mock_providers::*;
use gateway_core::{ErrorKind, InboundFormat};
use gateway_providers::ProviderClient;
use gateway_resilience::CircuitState;
use std::time::Duration;

#[tokio::test]
async fn test_transient_failures_are_retried() {
    init_tracing();
    let mock = MockAzure::new().await;
    mock.mock_flaky(2, 502, "resp_ok", "recovered").await;
    let client = azure_client(&mock, &ResilienceOptions::default());

    let protected = client
        .create_response(&simple_request("gpt-4o"), &request_context(InboundFormat::OpenAi))
        .await;
    assert_eq!(protected.metadata.attempts, 3);
    assert!(!protected.metadata.fallback_used);
    assert_eq!(protected.into_result().unwrap().text(), "recovered");
    assert_eq!(mock.requests().await.len(), 3);

    let metrics = client.breaker_metrics();
    assert_eq!(metrics.state, CircuitState::Closed);
    assert_eq!(metrics.consecutive_failures, 0);
}

#[tokio::test]
async fn test_breaker_opens_and_short_circuits() {
    let mock = MockAzure::new().await;
    mock.mock_error(500, "server_error", "boom", None).await;
    let options = ResilienceOptions {
        max_attempts: 1,
        failure_threshold: 3,
        fallback_enabled: false,
    };
    let client = azure_client(&mock, &options);
    let context = request_context(InboundFormat::OpenAi);
    let request = simple_request("gpt-4o");

    for _ in 0..3 {
        let protected = client.create_response(&request, &context).await;
        assert!(!protected.metadata.circuit_breaker_used);
        assert!(protected.result.is_err());
    }
    assert_eq!(client.breaker_metrics().state, CircuitState::Open);
    assert_eq!(mock.requests().await.len(), 3);

    let rejected = client.create_response(&request, &context).await;
    assert!(rejected.metadata.circuit_breaker_used);
    let error = rejected.into_result().unwrap_err();
    assert_eq!(error.kind(), ErrorKind::ServiceUnavailable);
    assert!(error.retry_after().is_some());
    assert_eq!(mock.requests().await.len(), 3, "open breaker must not reach upstream");
    assert_eq!(client.breaker_metrics().total_rejections, 1);
}

#[tokio::test]
async fn test_client_errors_do_not_open_breaker() {
    let mock = MockAzure::new().await;
    mock.mock_error(400, "invalid_request_error", "bad input", None).await;
    let options = ResilienceOptions {
        max_attempts: 1,
        failure_threshold: 2,
        fallback_enabled: false,
    };
    let client = azure_client(&mock, &options);

    for _ in 0..4 {
        let error = client
            .create_response(&simple_request("gpt-4o"), &request_context(InboundFormat::OpenAi))
            .await
            .into_result()
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::ProviderError);
    }
    assert_eq!(client.breaker_metrics().state, CircuitState::Closed);
    assert_eq!(mock.requests().await.len(), 4);
}

#[tokio::test]
async fn test_exhausted_retries_degrade_to_placeholder() {
    let mock = MockAzure::new().await;
    mock.mock_error(503, "overloaded", "try later", None).await;
    let options = ResilienceOptions {
        max_attempts: 2,
        failure_threshold: 10,
        fallback_enabled: true,
    };
    let client = azure_client(&mock, &options);

    let protected = client
        .create_response(&simple_request("gpt-4o"), &request_context(InboundFormat::Claude))
        .await;
    assert_eq!(protected.metadata.attempts, 2);
    assert!(protected.metadata.fallback_used);
    let response = protected.into_result().unwrap();
    assert!(response.id.starts_with("fallback_"));
    assert!(!response.text().is_empty());
}

#[tokio::test]
async fn test_streams_are_never_degraded() {
    let mock = MockAzure::new().await;
    mock.mock_error(503, "overloaded", "try later", None).await;
    let options = ResilienceOptions {
        max_attempts: 1,
        failure_threshold: 10,
        fallback_enabled: true,
    };
    let client = azure_client(&mock, &options);

    let protected = client
        .create_response_stream(&streaming_request("gpt-4o"), &request_context(InboundFormat::OpenAi))
        .await;
    assert!(!protected.metadata.fallback_used);
    let error = match protected.result {
        Ok(_) => panic!("stream should not be established"),
        Err(error) => error,
    };
    assert_eq!(error.kind(), ErrorKind::ServiceUnavailable);
}

#[tokio::test]
async fn test_rate_limit_retry_after_is_propagated() {
    let mock = MockAzure::new().await;
    mock.mock_error(429, "rate_limit_exceeded", "slow down", Some(7)).await;
    let options = ResilienceOptions {
        max_attempts: 1,
        failure_threshold: 10,
        fallback_enabled: false,
    };
    let client = azure_client(&mock, &options);

    let error = client
        .create_response(&simple_request("gpt-4o"), &request_context(InboundFormat::OpenAi))
        .await
        .into_result()
        .unwrap_err();
    assert_eq!(error.status_code().as_u16(), 503);
    assert_eq!(error.retry_after(), Some(Duration::from_secs(7)));
}

#[tokio::test]
async fn test_bedrock_throttling_is_retried() {
    let mock = MockBedrock::new().await;
    mock.mock_error(429, "ThrottlingException", "Too many requests").await;
    let options = ResilienceOptions {
        max_attempts: 3,
        failure_threshold: 10,
        fallback_enabled: false,
    };
    let client = bedrock_client(&mock, &options);

    let protected = client
        .create_response(&simple_request(BEDROCK_MODEL), &request_context(InboundFormat::Claude))
        .await;
    assert_eq!(protected.metadata.attempts, 3);
    assert_eq!(protected.into_result().unwrap_err().kind(), ErrorKind::ServiceUnavailable);
    assert_eq!(mock.requests().await.len(), 3);
}
