//! Request spans carrying the correlation id.

use tracing::{info_span, Span};

/// Span wrapping the handling of one inbound call.
///
/// Every event emitted inside the span inherits `correlation_id` and `operation`.
pub fn request_span(correlation_id: &str, operation: &'static str) -> Span {
    info_span!("gateway_request", correlation_id = %correlation_id, operation = operation)
}

/// Child span for one upstream provider call.
pub fn provider_span(provider: &str, model: &str) -> Span {
    info_span!("provider_call", provider = %provider, model = %model)
}
