//! AWS Bedrock Converse API client.
//!
//! Uses `POST /model/{modelId}/converse` for buffered calls and
//! `/converse-stream` (AWS event-stream framing) for streams. Authentication
//! is a Bedrock API key sent as a bearer token; the region travels in the
//! `X-Amz-Region` header.

use crate::azure::check_retry_bounds;
use crate::client::{rejected, ProviderClient, RequestContext, CREATE_RESPONSE, CREATE_RESPONSE_STREAM};
use crate::http::{self, ProviderConfigError};
use crate::transform::bedrock::{decode_response, encode_request, BedrockRequest, BedrockStreamDecoder, PROVIDER};
use crate::transform::TransformLimits;
use async_trait::async_trait;
use gateway_core::{ChunkStream, UnifiedRequest, UnifiedResponse};
use gateway_resilience::{CallContext, CircuitBreakerMetrics, Protected, ResilientExecutor};
use gateway_telemetry::provider_span;
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tracing::{debug, Instrument};
use url::Url;

/// Bedrock client configuration
#[derive(Debug, Clone)]
pub struct BedrockClientConfig {
    /// Runtime base URL, e.g. `https://bedrock-runtime.us-east-1.amazonaws.com`
    pub base_url: String,
    /// Bedrock API key
    pub api_key: SecretString,
    /// AWS region
    pub region: String,
    /// Connect and read-idle timeout; also bounds a whole non-streaming call
    pub timeout: Duration,
    /// Accept plain `http` base URLs (test servers only)
    pub allow_insecure_endpoint: bool,
}

impl BedrockClientConfig {
    /// Create a configuration for the public runtime endpoint of `region`
    #[must_use]
    pub fn new(region: impl Into<String>, api_key: impl Into<String>) -> Self {
        let region = region.into();
        Self {
            base_url: format!("https://bedrock-runtime.{region}.amazonaws.com"),
            api_key: SecretString::new(api_key.into()),
            region,
            timeout: Duration::from_secs(120),
            allow_insecure_endpoint: false,
        }
    }

    /// Override the base URL
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Accept `http` base URLs
    #[must_use]
    pub fn allow_insecure(mut self) -> Self {
        self.allow_insecure_endpoint = true;
        self
    }
}

/// AWS Bedrock Converse client
pub struct BedrockClient {
    base: Url,
    api_key: SecretString,
    region: String,
    timeout: Duration,
    client: Client,
    limits: TransformLimits,
    executor: ResilientExecutor,
}

impl std::fmt::Debug for BedrockClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BedrockClient")
            .field("base", &self.base.as_str())
            .field("region", &self.region)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl BedrockClient {
    /// Create a client
    ///
    /// # Errors
    /// Returns error if the configuration is invalid or the HTTP client cannot be created
    pub fn new(
        config: BedrockClientConfig,
        limits: TransformLimits,
        executor: ResilientExecutor,
    ) -> Result<Self, ProviderConfigError> {
        let base = http::validate_base_url(&config.base_url, config.allow_insecure_endpoint)?;
        if config.api_key.expose_secret().trim().is_empty() {
            return Err(ProviderConfigError::MissingCredentials { provider: PROVIDER });
        }
        if config.region.trim().is_empty() {
            return Err(ProviderConfigError::InvalidValue {
                field: "region",
                reason: "must not be empty".to_string(),
            });
        }
        check_retry_bounds(&executor)?;
        let client = http::build_http_client(config.timeout)?;

        Ok(Self {
            base,
            api_key: config.api_key,
            region: config.region,
            timeout: config.timeout,
            client,
            limits,
            executor,
        })
    }

    /// Converse endpoint for `model`, with the model id percent-encoded as one segment
    #[must_use]
    pub fn converse_url(&self, model: &str, stream: bool) -> Url {
        let action = if stream { "converse-stream" } else { "converse" };
        http::endpoint(&self.base, &["model", model, action])
    }

    fn post(&self, url: Url, body: &BedrockRequest) -> RequestBuilder {
        self.client
            .post(url)
            .bearer_auth(self.api_key.expose_secret())
            .header("X-Amz-Region", &self.region)
            .json(body)
    }
}

#[async_trait]
impl ProviderClient for BedrockClient {
    fn id(&self) -> &str {
        PROVIDER
    }

    fn breaker_metrics(&self) -> CircuitBreakerMetrics {
        self.executor.breaker().metrics()
    }

    async fn create_response(
        &self,
        request: &UnifiedRequest,
        context: &RequestContext,
    ) -> Protected<UnifiedResponse> {
        let body = match encode_request(request) {
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
        let url = self.converse_url(&request.model, false);
        debug!(
            correlation_id = %context.correlation_id,
            url = %url,
            messages = body.messages.len(),
            "Sending request to Bedrock"
        );

        let body = &body;
        let url = &url;
        let model = request.model.as_str();
        self.executor
            .execute(call, move || async move {
                let builder = http::bounded(self.post(url.clone(), body), self.timeout);
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
        let body = match encode_request(request) {
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
        let url = self.converse_url(&request.model, true);
        debug!(
            correlation_id = %context.correlation_id,
            url = %url,
            "Starting streaming request to Bedrock"
        );

        let body = &body;
        let url = &url;
        let protected = self
            .executor
            .execute_stream(call, move || async move {
                http::send(
                    self.post(url.clone(), body)
                        .header(reqwest::header::ACCEPT, "application/vnd.amazon.eventstream"),
                    PROVIDER,
                    self.timeout,
                )
                .await
            })
            .instrument(provider_span(PROVIDER, &request.model))
            .await;

        let decoder = BedrockStreamDecoder::new(request.model.clone(), self.limits);
        protected.map(|response| http::decode_stream(response.bytes_stream(), decoder, PROVIDER))
    }
}
