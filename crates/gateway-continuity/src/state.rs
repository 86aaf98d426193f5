//! Conversation state types.

use chrono::{DateTime, Utc};
use gateway_core::{
    ConversationId, CorrelationId, FinishReason, UnifiedRequest, UnifiedResponse, Usage,
};
use serde::Serialize;
use std::fmt;

/// Rough size class of a request's context
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextComplexity {
    /// Short text-only exchange
    Simple,
    /// Longer exchange, or tools or images involved
    Moderate,
    /// Long context, or tools and images together
    Complex,
}

const MODERATE_MESSAGES: usize = 4;
const COMPLEX_MESSAGES: usize = 20;
const MODERATE_TEXT_LEN: usize = 4_000;
const COMPLEX_TEXT_LEN: usize = 32_000;

impl ContextComplexity {
    /// Classify a request by message count, text length, tools and images
    #[must_use]
    pub fn classify(request: &UnifiedRequest) -> Self {
        let messages = request.messages.len();
        let text_len = request.total_text_len();
        let has_tools = request.tools.as_ref().is_some_and(|t| !t.is_empty())
            || request.messages.iter().any(|m| m.content.has_tool_blocks());
        let has_images = request.messages.iter().any(|m| m.content.has_images());

        if messages > COMPLEX_MESSAGES || text_len > COMPLEX_TEXT_LEN || (has_tools && has_images) {
            Self::Complex
        } else if messages > MODERATE_MESSAGES || text_len > MODERATE_TEXT_LEN || has_tools || has_images {
            Self::Moderate
        } else {
            Self::Simple
        }
    }

    /// Stable lowercase name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Moderate => "moderate",
            Self::Complex => "complex",
        }
    }
}

impl fmt::Display for ContextComplexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded request/response turn
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationEntry {
    /// Conversation the turn belongs to
    pub conversation_id: ConversationId,
    /// Correlation id of the inbound call
    pub correlation_id: CorrelationId,
    /// When the turn completed
    pub timestamp: DateTime<Utc>,
    /// Provider-issued response id
    pub response_id: Option<String>,
    /// Model that answered
    pub model: String,
    /// Messages sent upstream
    pub request_messages: usize,
    /// Characters of generated output
    pub output_chars: usize,
    /// Token usage
    pub usage: Usage,
    /// Why generation stopped
    pub finish_reason: Option<FinishReason>,
    /// Upstream latency in milliseconds
    pub response_time_ms: u64,
    /// Complexity of the request context
    pub complexity: ContextComplexity,
    /// Whether a later request may chain onto `response_id`
    pub chainable: bool,
}

impl ConversationEntry {
    /// Build an entry from a completed turn, stamped now
    #[must_use]
    pub fn from_turn(
        conversation_id: ConversationId,
        correlation_id: CorrelationId,
        request: &UnifiedRequest,
        response: &UnifiedResponse,
        response_time_ms: u64,
    ) -> Self {
        Self {
            conversation_id,
            correlation_id,
            timestamp: Utc::now(),
            response_id: Some(response.id.clone()).filter(|id| !id.is_empty()),
            model: response.model.clone(),
            request_messages: request.messages.len(),
            output_chars: response.completion_len(),
            usage: response.usage,
            finish_reason: response.finish_reason,
            response_time_ms,
            complexity: ContextComplexity::classify(request),
            chainable: true,
        }
    }

    /// Mark whether the response id can be chained onto. Turns served by a
    /// provider without server-side history are not.
    #[must_use]
    pub fn with_chainable(mut self, chainable: bool) -> Self {
        self.chainable = chainable;
        self
    }

    /// Override the timestamp
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Aggregate counters of one conversation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConversationMetrics {
    /// Turns recorded
    pub total_turns: u64,
    /// Prompt tokens across turns
    pub total_prompt_tokens: u64,
    /// Completion tokens across turns
    pub total_completion_tokens: u64,
    /// Upstream latency across turns
    pub total_response_time_ms: u64,
    /// Failed calls
    pub error_count: u64,
}

impl ConversationMetrics {
    /// Mean upstream latency
    #[must_use]
    pub fn average_response_time_ms(&self) -> u64 {
        self.total_response_time_ms
            .checked_div(self.total_turns)
            .unwrap_or_default()
    }

    pub(crate) fn record(&mut self, entry: &ConversationEntry) {
        self.total_turns += 1;
        self.total_prompt_tokens += u64::from(entry.usage.prompt_tokens);
        self.total_completion_tokens += u64::from(entry.usage.completion_tokens);
        self.total_response_time_ms += entry.response_time_ms;
    }
}

/// Tracked state of one conversation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationState {
    /// Conversation id
    pub conversation_id: ConversationId,
    /// First seen
    pub created_at: DateTime<Utc>,
    /// Last recorded activity
    pub last_updated: DateTime<Utc>,
    /// Most recent provider response id, for chaining
    pub last_response_id: Option<String>,
    /// History, oldest first
    pub history: Vec<ConversationEntry>,
    /// Counters
    pub metrics: ConversationMetrics,
    /// Set once the conversation is archived
    pub archived_at: Option<DateTime<Utc>>,
}

impl ConversationState {
    /// Fresh state with no history
    #[must_use]
    pub fn new(conversation_id: ConversationId) -> Self {
        let now = Utc::now();
        Self {
            conversation_id,
            created_at: now,
            last_updated: now,
            last_response_id: None,
            history: Vec::new(),
            metrics: ConversationMetrics::default(),
            archived_at: None,
        }
    }

    /// Append an entry, keeping at most `max_len` newest entries.
    ///
    /// Returns the number of entries trimmed.
    pub fn push_entry(&mut self, entry: ConversationEntry, max_len: usize) -> usize {
        if self.history.is_empty() || entry.timestamp > self.last_updated {
            self.last_updated = entry.timestamp;
        }
        if !entry.chainable {
            self.last_response_id = None;
        } else if entry.response_id.is_some() {
            self.last_response_id.clone_from(&entry.response_id);
        }
        self.metrics.record(&entry);
        self.history.push(entry);

        let excess = self.history.len().saturating_sub(max_len.max(1));
        self.history.drain(..excess);
        excess
    }

    /// Drop entries older than `cutoff`, returning how many were removed
    pub fn retain_since(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.history.len();
        self.history.retain(|entry| entry.timestamp >= cutoff);
        before - self.history.len()
    }
}
