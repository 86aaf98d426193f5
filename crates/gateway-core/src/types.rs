//! Validated domain types (newtypes) shared across the gateway.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Maximum accepted length of a conversation identifier.
pub const MAX_CONVERSATION_ID_LEN: usize = 256;

/// Validation error for domain types
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Conversation id was empty
    #[error("conversation id must not be empty")]
    EmptyConversationId,

    /// Conversation id exceeded the allowed length
    #[error("conversation id too long: {len} > {max}")]
    ConversationIdTooLong {
        /// Actual length
        len: usize,
        /// Maximum allowed length
        max: usize,
    },

    /// Unknown inbound wire format
    #[error("unknown inbound format: {0}")]
    UnknownFormat(String),
}

/// Correlation identifier attached to every log line and error for one inbound call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a fresh random correlation id
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Wrap an existing id (for example one forwarded by the HTTP layer)
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::generate()
    }
}

/// Identifier of a multi-turn conversation tracked by the continuity manager.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConversationId(String);

impl ConversationId {
    /// Create a validated conversation id
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ValidationError::EmptyConversationId);
        }
        if id.len() > MAX_CONVERSATION_ID_LEN {
            return Err(ValidationError::ConversationIdTooLong {
                len: id.len(),
                max: MAX_CONVERSATION_ID_LEN,
            });
        }
        Ok(Self(id))
    }

    /// Generate a fresh random conversation id
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("conv_{}", uuid::Uuid::new_v4().simple()))
    }

    /// Borrow the id as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ConversationId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ConversationId> for String {
    fn from(id: ConversationId) -> Self {
        id.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Wire format the caller spoke; responses and errors are rendered back in the same format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InboundFormat {
    /// Anthropic Claude Messages API
    Claude,
    /// OpenAI Chat Completions API
    #[serde(rename = "openai")]
    OpenAi,
}

impl InboundFormat {
    /// Stable lowercase name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::OpenAi => "openai",
        }
    }
}

impl fmt::Display for InboundFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for InboundFormat {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "claude" | "anthropic" => Ok(Self::Claude),
            "openai" => Ok(Self::OpenAi),
            other => Err(ValidationError::UnknownFormat(other.to_string())),
        }
    }
}
