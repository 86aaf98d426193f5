//! Response types for the gateway.

use serde::{Deserialize, Serialize};

/// Provider-agnostic response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedResponse {
    /// Provider-issued response id
    pub id: String,
    /// Creation time (unix seconds)
    pub created: i64,
    /// Model that produced the response
    pub model: String,
    /// Ordered typed outputs
    pub output: Vec<OutputItem>,
    /// Why generation stopped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    /// Token usage
    pub usage: Usage,
}

impl UnifiedResponse {
    /// Create an empty response stamped with the current time
    #[must_use]
    pub fn new(id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created: chrono::Utc::now().timestamp(),
            model: model.into(),
            output: Vec::new(),
            finish_reason: None,
            usage: Usage::default(),
        }
    }

    /// Add an output item
    #[must_use]
    pub fn with_output(mut self, item: OutputItem) -> Self {
        self.output.push(item);
        self
    }

    /// Set the finish reason
    #[must_use]
    pub fn with_finish_reason(mut self, reason: FinishReason) -> Self {
        self.finish_reason = Some(reason);
        self
    }

    /// Set usage
    #[must_use]
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    /// Concatenated text outputs
    #[must_use]
    pub fn text(&self) -> String {
        self.output
            .iter()
            .filter_map(|item| match item {
                OutputItem::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Tool calls in output order
    pub fn tool_calls(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.output.iter().filter_map(|item| match item {
            OutputItem::ToolCall {
                id,
                name,
                arguments,
            } => Some((id.as_str(), name.as_str(), arguments.as_str())),
            _ => None,
        })
    }

    /// Characters of text across all outputs
    #[must_use]
    pub fn completion_len(&self) -> usize {
        self.output.iter().map(OutputItem::text_len).sum()
    }
}

/// Typed output item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputItem {
    /// Generated text
    Text {
        /// Text content
        text: String,
    },
    /// Tool call requested by the model
    ToolCall {
        /// Call id
        id: String,
        /// Tool name
        name: String,
        /// JSON-encoded arguments
        arguments: String,
    },
    /// Tool output echoed by the provider
    ToolResult {
        /// Id of the call this answers
        tool_use_id: String,
        /// Output text
        content: String,
    },
    /// Reasoning summary
    Reasoning {
        /// Reasoning text
        text: String,
    },
}

impl OutputItem {
    /// Characters of text carried by this item
    #[must_use]
    pub fn text_len(&self) -> usize {
        match self {
            Self::Text { text } | Self::Reasoning { text } => text.chars().count(),
            Self::ToolCall { arguments, .. } => arguments.chars().count(),
            Self::ToolResult { content, .. } => content.chars().count(),
        }
    }
}

/// Finish reason, normalized across providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural stop or stop sequence
    Stop,
    /// Output token limit reached
    MaxTokens,
    /// Model requested a tool call
    ToolUse,
}

/// Token usage statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt tokens
    pub prompt_tokens: u32,
    /// Completion tokens
    pub completion_tokens: u32,
    /// Always `prompt_tokens + completion_tokens`
    pub total_tokens: u32,
    /// Reasoning tokens (subset of completion)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u32>,
}

impl Usage {
    /// Create usage; the total is derived
    #[must_use]
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
            reasoning_tokens: None,
        }
    }

    /// Attach a reasoning token count
    #[must_use]
    pub fn with_reasoning(mut self, reasoning_tokens: Option<u32>) -> Self {
        self.reasoning_tokens = reasoning_tokens;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_total_is_sum() {
        let usage = Usage::new(10, 20);
        assert_eq!(usage.total_tokens, 30);
        assert_eq!(Usage::new(u32::MAX, 1).total_tokens, u32::MAX);
    }

    #[test]
    fn test_response_accessors() {
        let response = UnifiedResponse::new("resp_1", "gpt-4o")
            .with_output(OutputItem::Text {
                text: "Hello ".into(),
            })
            .with_output(OutputItem::ToolCall {
                id: "call_1".into(),
                name: "lookup".into(),
                arguments: "{}".into(),
            })
            .with_output(OutputItem::Text {
                text: "world".into(),
            })
            .with_finish_reason(FinishReason::ToolUse);

        assert_eq!(response.text(), "Hello world");
        assert_eq!(response.tool_calls().count(), 1);
        assert_eq!(response.completion_len(), 13);
    }

    #[test]
    fn test_output_serialization() {
        let json = serde_json::to_value(OutputItem::Reasoning {
            text: "thinking".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "reasoning");
        assert_eq!(
            serde_json::to_value(FinishReason::MaxTokens).unwrap(),
            "max_tokens"
        );
    }
}
