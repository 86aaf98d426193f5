//! Inbound wire formats.
//!
//! Callers speak either the Claude Messages API or the OpenAI Chat Completions
//! API. Each submodule converts its request shape into a [`UnifiedRequest`] and
//! renders [`UnifiedResponse`]s and stream chunks back into the same shape.
//!
//! [`UnifiedRequest`]: crate::request::UnifiedRequest
//! [`UnifiedResponse`]: crate::response::UnifiedResponse

pub mod claude;
pub mod openai;

use crate::request::ImageSource;

/// A server-sent event ready to be written to the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event name (`event:` line), omitted for OpenAI streams
    pub event: Option<String>,
    /// Data payload (`data:` line)
    pub data: String,
}

impl SseEvent {
    /// Event with a name
    pub fn named(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            data: data.into(),
        }
    }

    /// Event with only a data line
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
        }
    }

    /// Wire representation, including the blank-line terminator
    #[must_use]
    pub fn to_sse_string(&self) -> String {
        match &self.event {
            Some(event) => format!("event: {event}\ndata: {}\n\n", self.data),
            None => format!("data: {}\n\n", self.data),
        }
    }
}

/// Split a `data:<media>;base64,<payload>` URL into media type and payload
pub fn parse_data_url(url: &str) -> Option<(String, String)> {
    let remainder = url.strip_prefix("data:")?;
    let (metadata, data) = remainder.split_once(',')?;
    if !metadata.ends_with(";base64") {
        return None;
    }
    let media_type = metadata
        .split(';')
        .next()
        .filter(|m| !m.is_empty())
        .unwrap_or("application/octet-stream");
    Some((media_type.to_string(), data.to_string()))
}

/// Image source for a URL that may be a base64 data URL
pub(crate) fn image_source_from_url(url: String) -> ImageSource {
    match parse_data_url(&url) {
        Some((media_type, data)) => ImageSource::Base64 { media_type, data },
        None => ImageSource::Url { url },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_data_url() {
        assert_eq!(
            parse_data_url("data:image/png;base64,AAAA"),
            Some(("image/png".to_string(), "AAAA".to_string()))
        );
        assert_eq!(parse_data_url("https://example.com/a.png"), None);
        assert_eq!(parse_data_url("data:text/plain,hello"), None);
    }

    #[test]
    fn test_sse_string() {
        assert_eq!(
            SseEvent::named("ping", "{}").to_sse_string(),
            "event: ping\ndata: {}\n\n"
        );
        assert_eq!(SseEvent::data("[DONE]").to_sse_string(), "data: [DONE]\n\n");
    }
}
