//! Test helper utilities for integration tests

use crate::mock_providers::{MockAzure, MockBedrock, AZURE_DEPLOYMENT};
use gateway_config::{AzureSettings, BedrockSettings, GatewayConfig, ModelRoute};
use gateway_core::{CorrelationId, InboundFormat};
use gateway_providers::{
    AzureClient, AzureClientConfig, BedrockClient, BedrockClientConfig, RequestContext,
    TransformLimits,
};
use gateway_resilience::{
    CircuitBreaker, CircuitBreakerConfig, FallbackConfig, FallbackHandler, ResilientExecutor,
    RetryConfig, RetryPolicy,
};
use once_cell::sync::Lazy;
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Initialize tracing for tests (only once)
static TRACING: Lazy<()> = Lazy::new(|| {
    if std::env::var("TEST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
});

/// Initialize tracing for tests
pub fn init_tracing() {
    Lazy::force(&TRACING);
}

/// Resilience knobs for a test client
#[derive(Debug, Clone)]
pub struct ResilienceOptions {
    /// Attempts per call
    pub max_attempts: u32,
    /// Breaker threshold
    pub failure_threshold: u32,
    /// Serve placeholders for degradable operations
    pub fallback_enabled: bool,
}

impl Default for ResilienceOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            failure_threshold: 5,
            fallback_enabled: false,
        }
    }
}

/// Retry configuration with millisecond delays
pub fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        jitter_factor: 0.0,
        timeout: Duration::from_secs(5),
        ..RetryConfig::default()
    }
}

/// Executor for `provider` with fast retries
pub fn test_executor(provider: &str, options: &ResilienceOptions) -> ResilientExecutor {
    let retry = Arc::new(RetryPolicy::new(fast_retry(options.max_attempts)));
    let breaker = CircuitBreaker::new(
        provider,
        CircuitBreakerConfig {
            failure_threshold: options.failure_threshold,
            cooldown: Duration::from_secs(60),
        },
    );
    let fallback = FallbackHandler::new(FallbackConfig {
        enabled: options.fallback_enabled,
        ..FallbackConfig::default()
    });
    ResilientExecutor::new(Arc::new(breaker), Arc::clone(&retry), retry, Arc::new(fallback))
}

/// Azure client pointed at `mock`
pub fn azure_client(mock: &MockAzure, options: &ResilienceOptions) -> AzureClient {
    azure_client_at(&mock.base_url(), Duration::from_secs(5), options)
}

/// Azure client pointed at `base_url` with the given connect and idle timeout
pub fn azure_client_at(base_url: &str, timeout: Duration, options: &ResilienceOptions) -> AzureClient {
    AzureClient::new(
        AzureClientConfig::new(base_url, "test-key", AZURE_DEPLOYMENT)
            .with_timeout(timeout)
            .allow_insecure(),
        TransformLimits::default(),
        test_executor("azure", options),
    )
    .expect("Failed to build Azure client")
}

/// Bedrock client pointed at `mock`
pub fn bedrock_client(mock: &MockBedrock, options: &ResilienceOptions) -> BedrockClient {
    BedrockClient::new(
        BedrockClientConfig::new("us-east-1", "test-key")
            .with_base_url(mock.base_url())
            .with_timeout(Duration::from_secs(5))
            .allow_insecure(),
        TransformLimits::default(),
        test_executor("bedrock", options),
    )
    .expect("Failed to build Bedrock client")
}

/// Request context with a fixed correlation id
pub fn request_context(format: InboundFormat) -> RequestContext {
    RequestContext::new(CorrelationId::new("test-correlation"), format)
}

/// Gateway configuration with both providers pointed at mocks.
///
/// `anthropic.` models go to Bedrock, everything else to Azure.
pub fn gateway_config(azure: &MockAzure, bedrock: &MockBedrock) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.resilience.retry.max_attempts = 2;
    config.resilience.retry.base_delay = Duration::from_millis(5);
    config.resilience.retry.max_delay = Duration::from_millis(20);
    config.resilience.fallback.enabled = false;
    config.providers.azure = Some(AzureSettings {
        base_url: azure.base_url(),
        api_key: SecretString::new("azure-key".to_string()),
        api_version: "2025-04-01-preview".to_string(),
        deployment: AZURE_DEPLOYMENT.to_string(),
        timeout: Duration::from_secs(5),
        allow_insecure_endpoint: true,
    });
    config.providers.bedrock = Some(BedrockSettings {
        base_url: bedrock.base_url(),
        api_key: SecretString::new("bedrock-key".to_string()),
        region: "us-east-1".to_string(),
        timeout: Duration::from_secs(5),
        allow_insecure_endpoint: true,
    });
    config.routing.default_provider = Some("azure".to_string());
    config.routing.model_routes = vec![ModelRoute {
        prefix: "anthropic.".to_string(),
        provider: "bedrock".to_string(),
    }];
    config
}
