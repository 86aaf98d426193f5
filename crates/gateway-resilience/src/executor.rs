//! Composition of retry, circuit breaker and fallback around one upstream call.
//!
//! Every attempt made by the retry policy goes through the breaker. When the
//! breaker rejects or retries are exhausted on a retryable failure, the
//! fallback decides between a placeholder and a synthesized error. A call cut
//! off by the retry policy's overall timeout fails with `Timeout` as is.

use crate::circuit_breaker::CircuitBreaker;
use crate::fallback::{FallbackContext, FallbackHandler};
use crate::retry::{AttemptOutcome, RetryContext, RetryPolicy, RetryResult};
use gateway_core::{
    CorrelationId, ErrorKind, GatewayError, GatewayResult, InboundFormat, UnifiedResponse,
};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Identifies the protected call
#[derive(Debug, Clone, Copy)]
pub struct CallContext<'a> {
    /// Correlation id of the inbound request
    pub correlation_id: &'a CorrelationId,
    /// Caller's wire format
    pub format: InboundFormat,
    /// Operation name (`create_response`, `create_response_stream`)
    pub operation: &'a str,
    /// Upstream provider id
    pub provider: &'a str,
    /// Requested model
    pub model: &'a str,
}

/// How the protected call went
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CallMetadata {
    /// Attempts made
    pub attempts: u32,
    /// Wall time in milliseconds, backoff included
    pub total_duration_ms: u64,
    /// Whether the breaker short-circuited an attempt
    pub circuit_breaker_used: bool,
    /// Whether a placeholder was served instead of an upstream response
    pub fallback_used: bool,
}

/// Result of a protected call plus its metadata
#[derive(Debug)]
pub struct Protected<T> {
    /// Final result
    pub result: GatewayResult<T>,
    /// Call metadata
    pub metadata: CallMetadata,
}

impl<T> Protected<T> {
    /// Convert to a Result
    ///
    /// # Errors
    /// Returns the final error
    pub fn into_result(self) -> GatewayResult<T> {
        self.result
    }

    /// Transform the success value, keeping the metadata
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Protected<U> {
        Protected {
            result: self.result.map(f),
            metadata: self.metadata,
        }
    }
}

/// Retry, breaker and fallback for one upstream
#[derive(Debug, Clone)]
pub struct ResilientExecutor {
    breaker: Arc<CircuitBreaker>,
    retry: Arc<RetryPolicy>,
    streaming_retry: Arc<RetryPolicy>,
    fallback: Arc<FallbackHandler>,
}

impl ResilientExecutor {
    /// Create an executor
    #[must_use]
    pub fn new(
        breaker: Arc<CircuitBreaker>,
        retry: Arc<RetryPolicy>,
        streaming_retry: Arc<RetryPolicy>,
        fallback: Arc<FallbackHandler>,
    ) -> Self {
        Self {
            breaker,
            retry,
            streaming_retry,
            fallback,
        }
    }

    /// Breaker guarding this upstream
    #[must_use]
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Retry policy for non-streaming calls
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Retry policy for stream establishment
    #[must_use]
    pub fn streaming_retry_policy(&self) -> &RetryPolicy {
        &self.streaming_retry
    }

    /// Protect a non-streaming call. May be answered with a placeholder.
    pub async fn execute<F, Fut>(
        &self,
        context: CallContext<'_>,
        operation: F,
    ) -> Protected<UnifiedResponse>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = GatewayResult<UnifiedResponse>>,
    {
        let outcome = self.run(&self.retry, context, operation).await;
        self.finish(outcome, context, false, &self.retry)
    }

    /// Protect the establishment of a stream. Never degraded.
    pub async fn execute_stream<T, F, Fut>(&self, context: CallContext<'_>, operation: F) -> Protected<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let outcome = self.run(&self.streaming_retry, context, operation).await;
        let metadata = metadata_of(&outcome);
        let deadline_exceeded = outcome.deadline_exceeded;

        let result = match outcome.result {
            Err(error) if !deadline_exceeded && self.triggers_fallback(&error, &self.streaming_retry) => {
                Err(self.fallback.unavailable_error(&fallback_context(context, &error, true)))
            }
            other => other,
        };
        Protected { result, metadata }
    }

    async fn run<T, F, Fut>(
        &self,
        policy: &RetryPolicy,
        context: CallContext<'_>,
        mut operation: F,
    ) -> RetryResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let breaker = &self.breaker;
        let retry_context = RetryContext {
            correlation_id: context.correlation_id,
            operation: context.operation,
            provider: context.provider,
        };

        policy
            .execute_with_retry(
                || {
                    // Futures are lazy: a rejected attempt drops this unpolled.
                    let attempt = operation();
                    async move {
                        breaker
                            .execute(move || attempt, context.correlation_id, context.operation)
                            .await
                    }
                },
                retry_context,
            )
            .await
    }

    fn finish(
        &self,
        outcome: RetryResult<UnifiedResponse>,
        context: CallContext<'_>,
        streaming: bool,
        policy: &RetryPolicy,
    ) -> Protected<UnifiedResponse> {
        let mut metadata = metadata_of(&outcome);
        let deadline_exceeded = outcome.deadline_exceeded;

        let result = match outcome.result {
            Err(error) if !deadline_exceeded && self.triggers_fallback(&error, policy) => {
                let degraded = self
                    .fallback
                    .execute_graceful_degradation(&fallback_context(context, &error, streaming));
                metadata.fallback_used = degraded.fallback_used;
                degraded.into_result()
            }
            other => other,
        };
        Protected { result, metadata }
    }

    fn triggers_fallback(&self, error: &GatewayError, policy: &RetryPolicy) -> bool {
        let triggered = matches!(error, GatewayError::CircuitBreakerOpen { .. }) || policy.is_retryable(error);
        if triggered {
            debug!(
                breaker = %self.breaker.name(),
                error_kind = %error.kind(),
                "Upstream call exhausted, invoking fallback"
            );
        }
        triggered
    }
}

fn fallback_context<'a>(
    context: CallContext<'a>,
    error: &'a GatewayError,
    streaming: bool,
) -> FallbackContext<'a> {
    FallbackContext {
        operation: context.operation,
        correlation_id: context.correlation_id,
        provider: context.provider,
        model: context.model,
        format: context.format,
        streaming,
        error,
    }
}

fn metadata_of<T>(outcome: &RetryResult<T>) -> CallMetadata {
    CallMetadata {
        attempts: outcome.attempt_count(),
        total_duration_ms: u64::try_from(outcome.total_duration.as_millis()).unwrap_or(u64::MAX),
        circuit_breaker_used: outcome.attempts.iter().any(|a| {
            matches!(
                a.outcome,
                AttemptOutcome::Failure {
                    kind: ErrorKind::CircuitBreakerOpen,
                    ..
                }
            )
        }),
        fallback_used: false,
    }
}
