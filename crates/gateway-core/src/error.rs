//! Error taxonomy for the gateway.
//!
//! Every failure that crosses a component boundary is a [`GatewayError`]. Each
//! variant corresponds to exactly one canonical [`ErrorKind`], which is what the
//! retry policy, the circuit breaker and the client error renderer reason about.

use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using `GatewayError`
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Canonical error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connection refused, reset, DNS failure and similar transport errors
    Network,
    /// An attempt or the whole call exceeded its time bound
    Timeout,
    /// The request (or a decoded payload) violated a shape or size rule
    Validation,
    /// Upstream rejected the credentials
    Authentication,
    /// Upstream refused access to the resource
    Authorization,
    /// Upstream throttled the call
    RateLimit,
    /// The circuit breaker rejected the call without invoking upstream
    CircuitBreakerOpen,
    /// Upstream (or the gateway itself) cannot serve right now
    ServiceUnavailable,
    /// Upstream returned a provider-specific error
    ProviderError,
    /// Anything that could not be classified
    Internal,
}

impl ErrorKind {
    /// Stable snake_case name, used in configuration and logs
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Validation => "validation",
            Self::Authentication => "authentication",
            Self::Authorization => "authorization",
            Self::RateLimit => "rate_limit",
            Self::CircuitBreakerOpen => "circuit_breaker_open",
            Self::ServiceUnavailable => "service_unavailable",
            Self::ProviderError => "provider_error",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider-specific subtype carried by [`ErrorKind::ProviderError`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorType {
    /// Upstream rejected the translated request
    BadRequest,
    /// Deployment or model does not exist
    NotFound,
    /// Content was blocked by an upstream safety filter
    ContentFiltered,
    /// Prompt exceeded the model context window
    ContextLengthExceeded,
    /// Upstream reported it is overloaded
    Overloaded,
    /// Upstream payload failed structural validation
    InvalidResponse,
    /// Upstream 5xx
    ServerError,
    /// Any other provider error code
    Other(String),
}

impl ProviderErrorType {
    /// Stable name of the subtype
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::BadRequest => "bad_request",
            Self::NotFound => "not_found",
            Self::ContentFiltered => "content_filtered",
            Self::ContextLengthExceeded => "context_length_exceeded",
            Self::Overloaded => "overloaded",
            Self::InvalidResponse => "invalid_response",
            Self::ServerError => "server_error",
            Self::Other(code) => code,
        }
    }
}

impl fmt::Display for ProviderErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Gateway error covering every canonical kind
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Transport failure
    #[error("Network error: {message}")]
    Network {
        /// Error message
        message: String,
    },

    /// Time bound exceeded
    #[error("Request timed out after {duration:?}")]
    Timeout {
        /// Bound that was exceeded
        duration: Duration,
    },

    /// Request or payload validation failed
    #[error("Validation error: {message}")]
    Validation {
        /// Error message
        message: String,
        /// Offending field, if known
        field: Option<String>,
    },

    /// Credentials rejected
    #[error("Authentication failed: {message}")]
    Authentication {
        /// Error message
        message: String,
    },

    /// Access denied
    #[error("Authorization denied: {message}")]
    Authorization {
        /// Error message
        message: String,
    },

    /// Upstream throttling
    #[error("Rate limit exceeded: {message}")]
    RateLimit {
        /// Error message
        message: String,
        /// Upstream retry hint
        retry_after: Option<Duration>,
    },

    /// Breaker rejected the call
    #[error("Circuit breaker open: {name}")]
    CircuitBreakerOpen {
        /// Breaker name (provider id)
        name: String,
        /// Time until the breaker admits a probe
        retry_after: Option<Duration>,
    },

    /// Service cannot serve right now
    #[error("Service unavailable: {message}")]
    ServiceUnavailable {
        /// Error message
        message: String,
        /// Retry hint for the caller
        retry_after: Option<Duration>,
    },

    /// Provider-specific error
    #[error("Provider error: {provider} ({error_type}) - {message}")]
    Provider {
        /// Provider that returned the error
        provider: String,
        /// Provider error subtype
        error_type: ProviderErrorType,
        /// Raw upstream message
        message: String,
        /// Upstream HTTP status, if any
        status: Option<u16>,
    },

    /// Unclassified failure
    #[error("Internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

impl GatewayError {
    /// Canonical kind of this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network { .. } => ErrorKind::Network,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Authentication { .. } => ErrorKind::Authentication,
            Self::Authorization { .. } => ErrorKind::Authorization,
            Self::RateLimit { .. } => ErrorKind::RateLimit,
            Self::CircuitBreakerOpen { .. } => ErrorKind::CircuitBreakerOpen,
            Self::ServiceUnavailable { .. } => ErrorKind::ServiceUnavailable,
            Self::Provider { .. } => ErrorKind::ProviderError,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// HTTP status code presented to the caller
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::Authentication { .. } => StatusCode::UNAUTHORIZED,
            Self::Authorization { .. } => StatusCode::FORBIDDEN,
            Self::RateLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Network { .. } => StatusCode::BAD_GATEWAY,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::CircuitBreakerOpen { .. } | Self::ServiceUnavailable { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::Provider {
                error_type, status, ..
            } => match error_type {
                ProviderErrorType::BadRequest
                | ProviderErrorType::ContentFiltered
                | ProviderErrorType::ContextLengthExceeded => StatusCode::BAD_REQUEST,
                ProviderErrorType::NotFound => StatusCode::NOT_FOUND,
                ProviderErrorType::Overloaded => StatusCode::SERVICE_UNAVAILABLE,
                _ => status
                    .and_then(|code| StatusCode::from_u16(code).ok())
                    .filter(StatusCode::is_server_error)
                    .unwrap_or(StatusCode::BAD_GATEWAY),
            },
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Error type string for API responses
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "invalid_request_error",
            Self::Authentication { .. } => "authentication_error",
            Self::Authorization { .. } => "permission_error",
            Self::RateLimit { .. } => "rate_limit_error",
            Self::Network { .. } | Self::Provider { .. } => "api_error",
            Self::Timeout { .. } => "timeout_error",
            Self::CircuitBreakerOpen { .. } | Self::ServiceUnavailable { .. } => "overloaded_error",
            Self::Internal { .. } => "internal_error",
        }
    }

    /// Error code for programmatic handling
    #[must_use]
    pub fn error_code(&self) -> &str {
        match self {
            Self::Provider { error_type, .. } => error_type.as_str(),
            other => other.kind().as_str(),
        }
    }

    /// Retry hint carried by the error, if any
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimit { retry_after, .. }
            | Self::CircuitBreakerOpen { retry_after, .. }
            | Self::ServiceUnavailable { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Upstream HTTP status, for provider errors
    #[must_use]
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            Self::Provider { status, .. } => *status,
            _ => None,
        }
    }

    /// Create a network error
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a timeout error
    #[must_use]
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: None,
        }
    }

    /// Create a validation error for a specific field
    pub fn validation_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create an authentication error
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Create an authorization error
    pub fn authorization(message: impl Into<String>) -> Self {
        Self::Authorization {
            message: message.into(),
        }
    }

    /// Create a rate limit error
    pub fn rate_limit(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::RateLimit {
            message: message.into(),
            retry_after,
        }
    }

    /// Create a circuit-open error
    pub fn circuit_open(name: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::CircuitBreakerOpen {
            name: name.into(),
            retry_after,
        }
    }

    /// Create a service unavailable error
    pub fn service_unavailable(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::ServiceUnavailable {
            message: message.into(),
            retry_after,
        }
    }

    /// Create a provider error
    pub fn provider(
        provider: impl Into<String>,
        error_type: ProviderErrorType,
        message: impl Into<String>,
        status: Option<u16>,
    ) -> Self {
        Self::Provider {
            provider: provider.into(),
            error_type,
            message: message.into(),
            status,
        }
    }

    /// Create an invalid-response provider error (malformed upstream payload)
    pub fn invalid_response(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::provider(provider, ProviderErrorType::InvalidResponse, message, None)
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}
