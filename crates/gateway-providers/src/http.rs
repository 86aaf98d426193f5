//! HTTP plumbing shared by the provider clients.

use crate::transform::StreamDecoder;
use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use gateway_core::{ChunkStream, GatewayError, GatewayResult};
use gateway_resilience::{into_gateway_error, UpstreamFailure};
use reqwest::{Client, RequestBuilder, Response};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;
use url::Url;

/// Upper bound on the error body kept for classification
const MAX_ERROR_BODY: usize = 64 * 1024;

/// Invalid provider client configuration, reported at construction
#[derive(Debug, Error)]
pub enum ProviderConfigError {
    /// Base URL failed to parse
    #[error("invalid base URL '{url}': {reason}")]
    InvalidUrl {
        /// Offending URL
        url: String,
        /// Parse error
        reason: String,
    },

    /// Base URL is not HTTPS
    #[error("base URL must use https: {0}")]
    InsecureUrl(String),

    /// API key is empty
    #[error("{provider} api key must not be empty")]
    MissingCredentials {
        /// Provider id
        provider: &'static str,
    },

    /// A required value is missing or out of range
    #[error("invalid {field}: {reason}")]
    InvalidValue {
        /// Field name
        field: &'static str,
        /// What is wrong
        reason: String,
    },

    /// HTTP client could not be built
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// Parse and check a base URL. Trailing slashes are trimmed so path segments
/// can be appended.
pub(crate) fn validate_base_url(raw: &str, allow_insecure: bool) -> Result<Url, ProviderConfigError> {
    let url = Url::parse(raw.trim_end_matches('/')).map_err(|e| ProviderConfigError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "https" => {}
        "http" if allow_insecure => {}
        _ => return Err(ProviderConfigError::InsecureUrl(raw.to_string())),
    }
    if url.cannot_be_a_base() {
        return Err(ProviderConfigError::InvalidUrl {
            url: raw.to_string(),
            reason: "cannot be a base URL".to_string(),
        });
    }
    Ok(url)
}

/// Check the timeout and build a pooled client.
///
/// `timeout` bounds connecting and each read, so a stream that keeps
/// producing data is never cut off. Non-streaming calls add a total bound
/// per request through [`bounded`].
pub(crate) fn build_http_client(timeout: Duration) -> Result<Client, ProviderConfigError> {
    if timeout.is_zero() {
        return Err(ProviderConfigError::InvalidValue {
            field: "timeout",
            reason: "must be positive".to_string(),
        });
    }
    Client::builder()
        .connect_timeout(timeout)
        .read_timeout(timeout)
        .pool_max_idle_per_host(100)
        .build()
        .map_err(|e| ProviderConfigError::Client(e.to_string()))
}

/// Bound a whole non-streaming exchange, body included
pub(crate) fn bounded(request: RequestBuilder, timeout: Duration) -> RequestBuilder {
    request.timeout(timeout)
}

/// Append path segments to a base URL
pub(crate) fn endpoint(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

/// Classify a reqwest transport error
pub(crate) fn transport_failure(error: &reqwest::Error, timeout: Duration) -> UpstreamFailure {
    if error.is_timeout() {
        UpstreamFailure::TimedOut { after: timeout }
    } else if error.is_connect() {
        UpstreamFailure::Transport {
            code: Some("ECONNREFUSED".to_string()),
            message: error.to_string(),
        }
    } else {
        UpstreamFailure::Transport {
            code: None,
            message: error.to_string(),
        }
    }
}

fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Send a request and turn every non-2xx answer into a classified error
pub(crate) async fn send(
    request: RequestBuilder,
    provider: &str,
    timeout: Duration,
) -> GatewayResult<Response> {
    let response = request
        .send()
        .await
        .map_err(|e| into_gateway_error(transport_failure(&e, timeout)))?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = retry_after(&response);
    let error_type_header = response
        .headers()
        .get("x-amzn-errortype")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = read_body(response, MAX_ERROR_BODY, provider)
        .await
        .map(|b| String::from_utf8_lossy(&b).into_owned())
        .unwrap_or_default();

    Err(into_gateway_error(UpstreamFailure::Http {
        provider: provider.to_string(),
        status: status.as_u16(),
        body,
        retry_after,
        error_type_header,
    }))
}

/// Read a response body, refusing anything larger than `limit` bytes
pub(crate) async fn read_body(response: Response, limit: usize, provider: &str) -> GatewayResult<Bytes> {
    if let Some(length) = response.content_length() {
        if usize::try_from(length).map_or(true, |l| l > limit) {
            return Err(GatewayError::validation_field(
                format!("{provider} response of {length} bytes exceeds limit of {limit} bytes"),
                "response",
            ));
        }
    }

    let mut body = BytesMut::new();
    let mut stream = Box::pin(response.bytes_stream());
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| {
            into_gateway_error(UpstreamFailure::Transport {
                code: None,
                message: e.to_string(),
            })
        })?;
        if body.len() + chunk.len() > limit {
            return Err(GatewayError::validation_field(
                format!("{provider} response exceeds limit of {limit} bytes"),
                "response",
            ));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body.freeze())
}

/// Pump upstream frames through a decoder.
///
/// The returned stream owns the upstream body; dropping it closes the
/// connection. A clean end runs the decoder's `finish`. A transport or framing
/// error mid-stream runs `interrupt`, so callers always see a terminal chunk
/// and can tell a truncated stream from a complete one.
pub(crate) fn decode_stream<S, E, D>(frames: S, mut decoder: D, provider: &'static str) -> ChunkStream
where
    S: Stream<Item = Result<D::Frame, E>> + Send + 'static,
    E: std::fmt::Display + Send,
    D: StreamDecoder,
{
    Box::pin(async_stream::stream! {
        let mut frames = Box::pin(frames);
        let mut interrupted = false;
        while let Some(next) = frames.next().await {
            match next {
                Ok(frame) => {
                    for chunk in decoder.push(frame) {
                        yield chunk;
                    }
                    if decoder.is_complete() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(provider = provider, error = %e, "Upstream stream interrupted");
                    interrupted = true;
                    break;
                }
            }
        }
        let tail = if interrupted { decoder.interrupt() } else { decoder.finish() };
        for chunk in tail {
            yield chunk;
        }
    })
}
