//! Graceful degradation once the breaker rejects a call or retries run out.
//!
//! Degradable operations get a placeholder response rendered for the caller's
//! format. Everything else gets a synthesized `ServiceUnavailable` error with a
//! retry hint. Streaming is never degraded.

use gateway_core::{
    CorrelationId, FinishReason, GatewayError, GatewayResult, InboundFormat, OutputItem,
    UnifiedResponse, Usage,
};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{info, warn};

/// Default placeholder served for degraded responses
pub const DEFAULT_PLACEHOLDER: &str =
    "The service is temporarily unavailable. Please try again shortly.";

/// Fallback configuration
#[derive(Debug, Clone)]
pub struct FallbackConfig {
    /// Whether degradation is enabled at all
    pub enabled: bool,
    /// Operation names that may be answered with a placeholder
    pub degradable_operations: HashSet<String>,
    /// Placeholder text when no per-format text is set
    pub placeholder_text: String,
    /// Per-format placeholder overrides
    pub format_placeholders: HashMap<InboundFormat, String>,
    /// Retry hint when the triggering error carries none
    pub retry_after: Duration,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            degradable_operations: HashSet::from(["create_response".to_string()]),
            placeholder_text: DEFAULT_PLACEHOLDER.to_string(),
            format_placeholders: HashMap::new(),
            retry_after: Duration::from_secs(30),
        }
    }
}

/// What the fallback is asked to degrade
#[derive(Debug, Clone, Copy)]
pub struct FallbackContext<'a> {
    /// Operation name
    pub operation: &'a str,
    /// Correlation id of the inbound request
    pub correlation_id: &'a CorrelationId,
    /// Provider that failed
    pub provider: &'a str,
    /// Requested model
    pub model: &'a str,
    /// Caller's wire format
    pub format: InboundFormat,
    /// Whether the caller asked for a stream
    pub streaming: bool,
    /// The failure that triggered degradation
    pub error: &'a GatewayError,
}

/// Outcome of graceful degradation
#[derive(Debug, Clone)]
pub struct FallbackResult {
    /// Whether a substitute response was produced
    pub success: bool,
    /// Substitute response
    pub data: Option<UnifiedResponse>,
    /// Error to surface when no substitute was produced
    pub error: Option<GatewayError>,
    /// Whether a substitute was served
    pub fallback_used: bool,
}

impl FallbackResult {
    fn degraded(response: UnifiedResponse) -> Self {
        Self {
            success: true,
            data: Some(response),
            error: None,
            fallback_used: true,
        }
    }

    fn unavailable(error: GatewayError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            fallback_used: false,
        }
    }

    /// Convert to a Result
    ///
    /// # Errors
    /// Returns the synthesized error when no substitute was produced
    pub fn into_result(self) -> GatewayResult<UnifiedResponse> {
        match (self.data, self.error) {
            (Some(response), _) => Ok(response),
            (None, Some(error)) => Err(error),
            (None, None) => Err(GatewayError::internal("fallback produced no outcome")),
        }
    }
}

/// Graceful degradation handler
#[derive(Debug, Clone, Default)]
pub struct FallbackHandler {
    config: FallbackConfig,
}

impl FallbackHandler {
    /// Create a handler
    #[must_use]
    pub fn new(config: FallbackConfig) -> Self {
        Self { config }
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &FallbackConfig {
        &self.config
    }

    /// Whether `context` may be answered with a placeholder
    #[must_use]
    pub fn is_degradable(&self, context: &FallbackContext<'_>) -> bool {
        self.config.enabled
            && !context.streaming
            && self.config.degradable_operations.contains(context.operation)
    }

    /// Degrade a failed call. Never fails: every internal problem collapses to
    /// a synthesized `ServiceUnavailable` error.
    #[must_use]
    pub fn execute_graceful_degradation(&self, context: &FallbackContext<'_>) -> FallbackResult {
        if self.is_degradable(context) {
            match self.placeholder_response(context) {
                Ok(response) => {
                    info!(
                        correlation_id = %context.correlation_id,
                        provider = %context.provider,
                        operation = context.operation,
                        error_kind = %context.error.kind(),
                        "Serving degraded placeholder response"
                    );
                    return FallbackResult::degraded(response);
                }
                Err(reason) => {
                    warn!(
                        correlation_id = %context.correlation_id,
                        provider = %context.provider,
                        reason = %reason,
                        "Fallback could not build placeholder"
                    );
                }
            }
        }
        FallbackResult::unavailable(self.unavailable_error(context))
    }

    /// Synthesized error for a failed call that is not degraded
    #[must_use]
    pub fn unavailable_error(&self, context: &FallbackContext<'_>) -> GatewayError {
        let retry_after = context.error.retry_after().unwrap_or(self.config.retry_after);
        GatewayError::service_unavailable(
            format!("Upstream provider '{}' is unavailable", context.provider),
            Some(retry_after),
        )
    }

    fn placeholder_response(&self, context: &FallbackContext<'_>) -> Result<UnifiedResponse, String> {
        let text = self
            .config
            .format_placeholders
            .get(&context.format)
            .unwrap_or(&self.config.placeholder_text);
        if text.trim().is_empty() {
            return Err("placeholder text is empty".to_string());
        }

        Ok(UnifiedResponse::new(
            format!("fallback_{}", uuid::Uuid::new_v4().simple()),
            context.model,
        )
        .with_output(OutputItem::Text { text: text.clone() })
        .with_finish_reason(FinishReason::Stop)
        .with_usage(Usage::new(0, 0)))
    }
}
