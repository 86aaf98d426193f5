//! Provider client trait.

use async_trait::async_trait;
use gateway_core::{ChunkStream, CorrelationId, InboundFormat, UnifiedRequest, UnifiedResponse};
use gateway_resilience::{CallMetadata, CircuitBreakerMetrics, Protected};

/// Operation name of a buffered call
pub const CREATE_RESPONSE: &str = "create_response";

/// Operation name of a streamed call
pub const CREATE_RESPONSE_STREAM: &str = "create_response_stream";

/// Per-call context handed to a provider client
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Correlation id of the inbound request
    pub correlation_id: CorrelationId,
    /// Caller's wire format, used to pick the fallback placeholder
    pub format: InboundFormat,
}

impl RequestContext {
    /// Create a context
    #[must_use]
    pub fn new(correlation_id: CorrelationId, format: InboundFormat) -> Self {
        Self {
            correlation_id,
            format,
        }
    }
}

/// An upstream LLM provider behind the resilience stack
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Provider id (`azure`, `bedrock`)
    fn id(&self) -> &str;

    /// Metrics of the breaker guarding this provider
    fn breaker_metrics(&self) -> CircuitBreakerMetrics;

    /// Whether the upstream keeps earlier turns server-side and accepts
    /// `previous_response_id`. Providers that do not must receive the full
    /// message history on every call.
    fn supports_response_chaining(&self) -> bool {
        false
    }

    /// Buffered call
    async fn create_response(
        &self,
        request: &UnifiedRequest,
        context: &RequestContext,
    ) -> Protected<UnifiedResponse>;

    /// Streamed call. Retries cover only stream establishment.
    async fn create_response_stream(
        &self,
        request: &UnifiedRequest,
        context: &RequestContext,
    ) -> Protected<ChunkStream>;
}

/// Protected result for a call that failed before reaching the upstream
pub(crate) fn rejected<T>(error: gateway_core::GatewayError) -> Protected<T> {
    Protected {
        result: Err(error),
        metadata: CallMetadata::default(),
    }
}
