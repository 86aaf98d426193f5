//! # Gateway Resilience
//!
//! Resilience patterns for the LLM protocol gateway:
//! - Error mapper classifying upstream failures and rendering client errors
//! - Circuit breaker per upstream provider
//! - Retry policy with jittered exponential backoff and an overall timeout
//! - Fallback handler for graceful degradation
//! - Executor composing the three around one upstream call

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod circuit_breaker;
pub mod error_mapper;
pub mod executor;
pub mod fallback;
pub mod retry;

// Re-export main types
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitBreakerRegistry,
    CircuitState,
};
pub use error_mapper::{
    classify, into_gateway_error, is_upstream_fault, parse_error_body, to_client_response,
    ClientErrorResponse, ParsedErrorBody, UpstreamFailure,
};
pub use executor::{CallContext, CallMetadata, Protected, ResilientExecutor};
pub use fallback::{FallbackConfig, FallbackContext, FallbackHandler, FallbackResult};
pub use retry::{
    AttemptOutcome, RetryAttempt, RetryConfig, RetryContext, RetryMetricsSnapshot, RetryPolicy,
    RetryResult, RetryableErrors,
};
