//! Azure OpenAI Responses API client.
//!
//! URL structure: `{base_url}/deployments/{deployment}/responses`, bearer
//! authentication and an `api-version` header.

use crate::client::{rejected, ProviderClient, RequestContext, CREATE_RESPONSE, CREATE_RESPONSE_STREAM};
use crate::http::{self, ProviderConfigError};
use crate::transform::azure::{decode_response, encode_request, AzureRequest, AzureStreamDecoder, PROVIDER};
use crate::transform::TransformLimits;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use gateway_core::{ChunkStream, UnifiedRequest, UnifiedResponse};
use gateway_resilience::{CallContext, CircuitBreakerMetrics, Protected, ResilientExecutor};
use gateway_telemetry::provider_span;
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tracing::{debug, Instrument};
use url::Url;

/// Default API version
pub const DEFAULT_API_VERSION: &str = "2025-04-01-preview";

/// Azure OpenAI client configuration
#[derive(Debug, Clone)]
pub struct AzureClientConfig {
    /// Resource base URL, e.g. `https://my-resource.openai.azure.com/openai`
    pub base_url: String,
    /// API key
    pub api_key: SecretString,
    /// API version
    pub api_version: String,
    /// Deployment name
    pub deployment: String,
    /// Connect and read-idle timeout; also bounds a whole non-streaming call
    pub timeout: Duration,
    /// Accept plain `http` base URLs (test servers only)
    pub allow_insecure_endpoint: bool,
}

impl AzureClientConfig {
    /// Create a configuration with default version and timeout
    #[must_use]
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        deployment: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: SecretString::new(api_key.into()),
            api_version: DEFAULT_API_VERSION.to_string(),
            deployment: deployment.into(),
            timeout: Duration::from_secs(120),
            allow_insecure_endpoint: false,
        }
    }

    /// Set the timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the API version
    #[must_use]
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    /// Accept `http` base URLs
    #[must_use]
    pub fn allow_insecure(mut self) -> Self {
        self.allow_insecure_endpoint = true;
        self
    }
}

/// Azure OpenAI Responses API client
pub struct AzureClient {
    endpoint: Url,
    api_key: SecretString,
    api_version: String,
    timeout: Duration,
    client: Client,
    limits: TransformLimits,
    executor: ResilientExecutor,
}

impl std::fmt::Debug for AzureClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureClient")
            .field("endpoint", &self.endpoint.as_str())
            .field("api_version", &self.api_version)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl AzureClient {
    /// Create a client
    ///
    /// # Errors
    /// Returns error if the configuration is invalid or the HTTP client cannot be created
    pub fn new(
        config: AzureClientConfig,
        limits: TransformLimits,
        executor: ResilientExecutor,
    ) -> Result<Self, ProviderConfigError> {
        let base = http::validate_base_url(&config.base_url, config.allow_insecure_endpoint)?;
        if config.api_key.expose_secret().trim().is_empty() {
            return Err(ProviderConfigError::MissingCredentials { provider: PROVIDER });
        }
        if config.deployment.trim().is_empty() {
            return Err(ProviderConfigError::InvalidValue {
                field: "deployment",
                reason: "must not be empty".to_string(),
            });
        }
        if config.api_version.trim().is_empty() {
            return Err(ProviderConfigError::InvalidValue {
                field: "api_version",
                reason: "must not be empty".to_string(),
            });
        }
        check_retry_bounds(&executor)?;
        let client = http::build_http_client(config.timeout)?;

        Ok(Self {
            endpoint: http::endpoint(&base, &["deployments", &config.deployment, "responses"]),
            api_key: config.api_key,
            api_version: config.api_version,
            timeout: config.timeout,
            client,
            limits,
            executor,
        })
    }

    /// Responses endpoint
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn post(&self, body: &AzureRequest) -> RequestBuilder {
        self.client
            .post(self.endpoint.clone())
            .bearer_auth(self.api_key.expose_secret())
            .header("api-version", &self.api_version)
            .json(body)
    }
}

/// Retry bounds must allow at least one attempt
pub(crate) fn check_retry_bounds(executor: &ResilientExecutor) -> Result<(), ProviderConfigError> {
    for policy in [executor.retry_policy(), executor.streaming_retry_policy()] {
        let config = policy.config();
        if config.max_attempts == 0 {
            return Err(ProviderConfigError::InvalidValue {
                field: "retry.max_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if config.timeout.is_zero() {
            return Err(ProviderConfigError::InvalidValue {
                field: "retry.timeout",
                reason: "must be positive".to_string(),
            });
        }
    }
    Ok(())
}

#[async_trait]
impl ProviderClient for AzureClient {
    fn id(&self) -> &str {
        PROVIDER
    }

    fn breaker_metrics(&self) -> CircuitBreakerMetrics {
        self.executor.breaker().metrics()
    }

    fn supports_response_chaining(&self) -> bool {
        true
    }

    async fn create_response(
        &self,
        request: &UnifiedRequest,
        context: &RequestContext,
    ) -> Protected<UnifiedResponse> {
        let body = match encode_request(request, false) {
            Ok(body) => body,
            Err(error) => return rejected(error),
        };
        let call = CallContext {
            correlation_id: &context.correlation_id,
            format: context.format,
            operation: CREATE_RESPONSE,
            provider: PROVIDER,
            model: &request.model,
        };
        debug!(
            correlation_id = %context.correlation_id,
            url = %self.endpoint,
            items = body.input.len(),
            "Sending request to Azure OpenAI"
        );

        let body = &body;
        let model = request.model.as_str();
        self.executor
            .execute(call, move || async move {
                let builder = http::bounded(self.post(body), self.timeout);
                let response = http::send(builder, PROVIDER, self.timeout).await?;
                let bytes = http::read_body(response, self.limits.max_response_size, PROVIDER).await?;
                decode_response(&bytes, model, &self.limits)
            })
            .instrument(provider_span(PROVIDER, &request.model))
            .await
    }

    async fn create_response_stream(
        &self,
        request: &UnifiedRequest,
        context: &RequestContext,
    ) -> Protected<ChunkStream> {
        let body = match encode_request(request, true) {
            Ok(body) => body,
            Err(error) => return rejected(error),
        };
        let call = CallContext {
            correlation_id: &context.correlation_id,
            format: context.format,
            operation: CREATE_RESPONSE_STREAM,
            provider: PROVIDER,
            model: &request.model,
        };
        debug!(
            correlation_id = %context.correlation_id,
            url = %self.endpoint,
            "Starting streaming request to Azure OpenAI"
        );

        let body = &body;
        let protected = self
            .executor
            .execute_stream(call, move || async move {
                http::send(
                    self.post(body).header(reqwest::header::ACCEPT, "text/event-stream"),
                    PROVIDER,
                    self.timeout,
                )
                .await
            })
            .instrument(provider_span(PROVIDER, &request.model))
            .await;

        let decoder = AzureStreamDecoder::new(request.model.clone(), self.limits);
        protected.map(|response| http::decode_stream(response.bytes_stream().eventsource(), decoder, PROVIDER))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_resilience::{CircuitBreaker, FallbackHandler, RetryConfig, RetryPolicy};
    use std::sync::Arc;

    fn executor(max_attempts: u32) -> ResilientExecutor {
        let retry = Arc::new(RetryPolicy::new(RetryConfig {
            max_attempts,
            ..RetryConfig::default()
        }));
        ResilientExecutor::new(
            Arc::new(CircuitBreaker::with_defaults(PROVIDER)),
            Arc::clone(&retry),
            retry,
            Arc::new(FallbackHandler::default()),
        )
    }

    #[test]
    fn test_endpoint_layout() {
        let client = AzureClient::new(
            AzureClientConfig::new("https://res.openai.azure.com/openai/", "key", "gpt-4o"),
            TransformLimits::default(),
            executor(3),
        )
        .unwrap();
        assert_eq!(
            client.endpoint().as_str(),
            "https://res.openai.azure.com/openai/deployments/gpt-4o/responses"
        );
        assert!(client.supports_response_chaining());
    }

    #[test]
    fn test_construction_fails_fast() {
        let base = || AzureClientConfig::new("https://res.openai.azure.com", "key", "gpt-4o");

        let insecure = AzureClientConfig {
            base_url: "http://res.openai.azure.com".into(),
            ..base()
        };
        assert!(matches!(
            AzureClient::new(insecure, TransformLimits::default(), executor(3)),
            Err(ProviderConfigError::InsecureUrl(_))
        ));

        let no_key = AzureClientConfig {
            api_key: SecretString::new("  ".into()),
            ..base()
        };
        assert!(matches!(
            AzureClient::new(no_key, TransformLimits::default(), executor(3)),
            Err(ProviderConfigError::MissingCredentials { .. })
        ));

        let no_deployment = AzureClientConfig {
            deployment: String::new(),
            ..base()
        };
        assert!(AzureClient::new(no_deployment, TransformLimits::default(), executor(3)).is_err());

        assert!(matches!(
            AzureClient::new(base().with_timeout(Duration::ZERO), TransformLimits::default(), executor(3)),
            Err(ProviderConfigError::InvalidValue { field: "timeout", .. })
        ));

        assert!(matches!(
            AzureClient::new(base(), TransformLimits::default(), executor(0)),
            Err(ProviderConfigError::InvalidValue {
                field: "retry.max_attempts",
                ..
            })
        ));
    }
}
