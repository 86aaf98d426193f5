//! Upstream failure classification and client error rendering.
//!
//! [`classify`] and [`into_gateway_error`] turn any upstream failure (socket
//! error, timeout, HTTP error response, undecodable payload) into exactly one
//! canonical [`ErrorKind`]. [`to_client_response`] renders a [`GatewayError`]
//! as the caller-facing status and body. Both are pure.

use gateway_core::{CorrelationId, ErrorKind, GatewayError, InboundFormat, ProviderErrorType};
use http::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

/// A failure observed while talking to an upstream, before classification
#[derive(Debug, Clone)]
pub enum UpstreamFailure {
    /// Socket-level failure, optionally with an OS/transport code (`ECONNRESET`, ...)
    Transport {
        /// Transport error code, if known
        code: Option<String>,
        /// Error message
        message: String,
    },
    /// The attempt exceeded its time bound
    TimedOut {
        /// Bound that was exceeded
        after: Duration,
    },
    /// Upstream answered with a non-success HTTP status
    Http {
        /// Provider id
        provider: String,
        /// HTTP status
        status: u16,
        /// Response body (possibly truncated)
        body: String,
        /// Parsed `Retry-After` header
        retry_after: Option<Duration>,
        /// Error type header (`x-amzn-ErrorType`), if any
        error_type_header: Option<String>,
    },
    /// Upstream answered 2xx but the payload failed structural validation
    Decode {
        /// Provider id
        provider: String,
        /// What was wrong
        message: String,
    },
    /// Anything else
    Other {
        /// Error message
        message: String,
    },
}

const TIMEOUT_CODES: &[&str] = &["ETIMEDOUT", "ESOCKETTIMEDOUT", "ECONNABORTED"];
const NETWORK_CODES: &[&str] = &[
    "ECONNREFUSED",
    "ECONNRESET",
    "ENOTFOUND",
    "EAI_AGAIN",
    "EPIPE",
    "EHOSTUNREACH",
    "ENETUNREACH",
    "ENETDOWN",
    "CONNECT",
    "TLS",
];

/// Body shapes the supported providers use for errors
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<ErrorDetail>,
    #[serde(default, alias = "Message")]
    message: Option<String>,
    #[serde(default, rename = "__type")]
    aws_type: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    code: Option<Value>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

/// Code and message extracted from an upstream error body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedErrorBody {
    /// Provider error code (`context_length_exceeded`, `ThrottlingException`, ...)
    pub code: Option<String>,
    /// Human-readable message
    pub message: String,
}

/// Extract code and message from an upstream error body, tolerating any shape
pub fn parse_error_body(body: &str, error_type_header: Option<&str>) -> ParsedErrorBody {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let detail = parsed.error.unwrap_or_default();

    let code = detail
        .code
        .and_then(|c| match c {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .or(detail.kind)
        .or(parsed.code)
        .or(parsed.aws_type)
        .or_else(|| error_type_header.map(str::to_string))
        .map(|c| c.split([':', '#']).next().unwrap_or_default().to_string())
        .filter(|c| !c.is_empty());

    let message = detail
        .message
        .or(parsed.message)
        .unwrap_or_else(|| body.chars().take(512).collect());

    ParsedErrorBody { code, message }
}

fn provider_subtype(status: u16, parsed: &ParsedErrorBody) -> ProviderErrorType {
    let code = parsed.code.as_deref().unwrap_or_default().to_ascii_lowercase();
    let message = parsed.message.to_ascii_lowercase();

    if code.contains("context_length")
        || message.contains("context length")
        || message.contains("too many tokens")
        || message.contains("input is too long")
    {
        return ProviderErrorType::ContextLengthExceeded;
    }
    if code.contains("content_filter")
        || code.contains("responsibleaipolicyviolation")
        || message.contains("content filter")
    {
        return ProviderErrorType::ContentFiltered;
    }
    if code.contains("overloaded") || code.contains("modelnotready") || status == 529 {
        return ProviderErrorType::Overloaded;
    }
    match status {
        400 | 422 => ProviderErrorType::BadRequest,
        404 => ProviderErrorType::NotFound,
        500..=599 => ProviderErrorType::ServerError,
        _ => ProviderErrorType::Other(
            parsed
                .code
                .clone()
                .unwrap_or_else(|| format!("http_{status}")),
        ),
    }
}

fn transport_kind(code: Option<&str>) -> ErrorKind {
    match code.map(str::to_ascii_uppercase) {
        Some(code) if TIMEOUT_CODES.contains(&code.as_str()) => ErrorKind::Timeout,
        Some(code) if NETWORK_CODES.contains(&code.as_str()) => ErrorKind::Network,
        // Transport failures without a recognised code are still transport failures.
        _ => ErrorKind::Network,
    }
}

fn http_kind(status: u16, parsed: &ParsedErrorBody) -> ErrorKind {
    let code = parsed.code.as_deref().unwrap_or_default();
    match status {
        401 => ErrorKind::Authentication,
        403 => ErrorKind::Authorization,
        408 => ErrorKind::Timeout,
        413 => ErrorKind::Validation,
        429 if code.eq_ignore_ascii_case("ModelNotReadyException") => ErrorKind::ProviderError,
        429 => ErrorKind::RateLimit,
        503 => ErrorKind::ServiceUnavailable,
        400..=599 => ErrorKind::ProviderError,
        _ => ErrorKind::Internal,
    }
}

/// Classify an upstream failure. Total: every input maps to exactly one kind.
pub fn classify(failure: &UpstreamFailure) -> ErrorKind {
    match failure {
        UpstreamFailure::Transport { code, .. } => transport_kind(code.as_deref()),
        UpstreamFailure::TimedOut { .. } => ErrorKind::Timeout,
        UpstreamFailure::Http {
            status,
            body,
            error_type_header,
            ..
        } => http_kind(*status, &parse_error_body(body, error_type_header.as_deref())),
        UpstreamFailure::Decode { .. } => ErrorKind::ProviderError,
        UpstreamFailure::Other { .. } => ErrorKind::Internal,
    }
}

/// Classify and convert an upstream failure into a typed gateway error
pub fn into_gateway_error(failure: UpstreamFailure) -> GatewayError {
    match failure {
        UpstreamFailure::Transport { code, message } => match transport_kind(code.as_deref()) {
            ErrorKind::Timeout => GatewayError::timeout(Duration::ZERO),
            _ => GatewayError::network(match code {
                Some(code) => format!("{code}: {message}"),
                None => message,
            }),
        },
        UpstreamFailure::TimedOut { after } => GatewayError::timeout(after),
        UpstreamFailure::Http {
            provider,
            status,
            body,
            retry_after,
            error_type_header,
        } => {
            let parsed = parse_error_body(&body, error_type_header.as_deref());
            match http_kind(status, &parsed) {
                ErrorKind::Authentication => GatewayError::authentication(parsed.message),
                ErrorKind::Authorization => GatewayError::authorization(parsed.message),
                ErrorKind::Timeout => GatewayError::timeout(Duration::ZERO),
                ErrorKind::Validation => GatewayError::validation(parsed.message),
                ErrorKind::RateLimit => GatewayError::rate_limit(parsed.message, retry_after),
                ErrorKind::ServiceUnavailable => {
                    GatewayError::service_unavailable(parsed.message, retry_after)
                }
                ErrorKind::ProviderError => {
                    let subtype = provider_subtype(status, &parsed);
                    GatewayError::provider(provider, subtype, parsed.message, Some(status))
                }
                _ => GatewayError::internal(format!("unexpected upstream status {status}")),
            }
        }
        UpstreamFailure::Decode { provider, message } => {
            GatewayError::invalid_response(provider, message)
        }
        UpstreamFailure::Other { message } => GatewayError::internal(message),
    }
}

/// Whether an error reflects upstream health (as opposed to a caller or credential problem)
pub fn is_upstream_fault(error: &GatewayError) -> bool {
    match error {
        GatewayError::Network { .. }
        | GatewayError::Timeout { .. }
        | GatewayError::RateLimit { .. }
        | GatewayError::ServiceUnavailable { .. }
        | GatewayError::Internal { .. } => true,
        GatewayError::Provider { error_type, .. } => !matches!(
            error_type,
            ProviderErrorType::BadRequest
                | ProviderErrorType::NotFound
                | ProviderErrorType::ContentFiltered
                | ProviderErrorType::ContextLengthExceeded
        ),
        GatewayError::Validation { .. }
        | GatewayError::Authentication { .. }
        | GatewayError::Authorization { .. }
        | GatewayError::CircuitBreakerOpen { .. } => false,
    }
}

/// Caller-facing error payload
#[derive(Debug, Clone, PartialEq)]
pub struct ClientErrorResponse {
    /// HTTP status
    pub status: StatusCode,
    /// `Retry-After` in whole seconds, when known
    pub retry_after_secs: Option<u64>,
    /// JSON body in the caller's wire format
    pub body: Value,
}

fn public_message(error: &GatewayError) -> String {
    match error {
        GatewayError::Validation { message, .. } => message.clone(),
        GatewayError::Authentication { .. } => "Upstream provider rejected the gateway credentials".to_string(),
        GatewayError::Authorization { .. } => "Upstream provider denied access to the requested resource".to_string(),
        GatewayError::RateLimit { .. } => "Upstream provider rate limit exceeded".to_string(),
        GatewayError::Network { .. } => "Could not reach the upstream provider".to_string(),
        GatewayError::Timeout { .. } => "The upstream provider did not respond in time".to_string(),
        GatewayError::CircuitBreakerOpen { .. } | GatewayError::ServiceUnavailable { .. } => {
            "The upstream provider is temporarily unavailable".to_string()
        }
        GatewayError::Provider { error_type, .. } => match error_type {
            ProviderErrorType::ContentFiltered => {
                "The request was blocked by the upstream content filter".to_string()
            }
            ProviderErrorType::ContextLengthExceeded => {
                "The request exceeds the model context window".to_string()
            }
            ProviderErrorType::NotFound => "The requested model or deployment was not found".to_string(),
            ProviderErrorType::BadRequest => "The upstream provider rejected the request".to_string(),
            _ => "The upstream provider returned an error".to_string(),
        },
        GatewayError::Internal { .. } => "Internal server error".to_string(),
    }
}

/// Render an error for the caller.
///
/// Raw upstream messages and error details only appear when `development_mode` is set.
pub fn to_client_response(
    error: &GatewayError,
    correlation_id: &CorrelationId,
    format: InboundFormat,
    development_mode: bool,
) -> ClientErrorResponse {
    let message = public_message(error);
    let retry_after_secs = error.retry_after().map(|d| d.as_secs().max(1));

    let mut body = match format {
        InboundFormat::Claude => json!({
            "type": "error",
            "error": {
                "type": error.error_type(),
                "message": message,
            },
            "correlation_id": correlation_id.as_str(),
        }),
        InboundFormat::OpenAi => json!({
            "error": {
                "message": message,
                "type": error.error_type(),
                "param": match error {
                    GatewayError::Validation { field, .. } => json!(field),
                    _ => Value::Null,
                },
                "code": error.error_code(),
            },
            "correlation_id": correlation_id.as_str(),
        }),
    };

    if development_mode {
        body["error"]["details"] = json!({
            "kind": error.kind().as_str(),
            "upstream_status": error.upstream_status(),
            "raw": error.to_string(),
        });
    }

    ClientErrorResponse {
        status: error.status_code(),
        retry_after_secs,
        body,
    }
}
