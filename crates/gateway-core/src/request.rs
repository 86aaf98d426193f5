//! Request types for the gateway.
//!
//! [`UnifiedRequest`] is the provider-agnostic representation every inbound
//! format is normalized into and every provider encoder starts from.

use crate::error::{GatewayError, GatewayResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Bounds applied when validating a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestLimits {
    /// Maximum number of messages
    pub max_messages: usize,
    /// Maximum characters of text in a single message
    pub max_message_length: usize,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            max_messages: 1_000,
            max_message_length: 1_000_000,
        }
    }
}

/// Provider-agnostic request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedRequest {
    /// Target model name
    pub model: String,

    /// Ordered conversation messages
    pub messages: Vec<Message>,

    /// System instructions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    /// Sampling temperature (0.0 - 2.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Nucleus sampling (0.0 - 1.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Maximum output tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Stop sequences
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,

    /// Tool definitions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,

    /// Tool choice
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,

    /// Provider-issued id of the previous response, for server-side chaining
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,

    /// Stream the response
    #[serde(default)]
    pub stream: bool,
}

impl UnifiedRequest {
    /// Create a new request builder
    #[must_use]
    pub fn builder() -> UnifiedRequestBuilder {
        UnifiedRequestBuilder::default()
    }

    /// Validate the request against the given limits
    pub fn validate(&self, limits: &RequestLimits) -> GatewayResult<()> {
        if self.model.trim().is_empty() {
            return Err(GatewayError::validation_field("model is required", "model"));
        }
        if self.messages.is_empty() {
            return Err(GatewayError::validation_field(
                "at least one message is required",
                "messages",
            ));
        }
        if self.messages.len() > limits.max_messages {
            return Err(GatewayError::validation_field(
                format!(
                    "too many messages: {} > {}",
                    self.messages.len(),
                    limits.max_messages
                ),
                "messages",
            ));
        }
        for (index, message) in self.messages.iter().enumerate() {
            let len = message.content.text_len();
            if len > limits.max_message_length {
                return Err(GatewayError::validation_field(
                    format!(
                        "message {index} too long: {len} > {} characters",
                        limits.max_message_length
                    ),
                    format!("messages[{index}]"),
                ));
            }
        }
        if let Some(temperature) = self.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(GatewayError::validation_field(
                    format!("temperature {temperature} must be between 0.0 and 2.0"),
                    "temperature",
                ));
            }
        }
        if let Some(top_p) = self.top_p {
            if !(0.0..=1.0).contains(&top_p) {
                return Err(GatewayError::validation_field(
                    format!("top_p {top_p} must be between 0.0 and 1.0"),
                    "top_p",
                ));
            }
        }
        if self.max_tokens == Some(0) {
            return Err(GatewayError::validation_field(
                "max_tokens must be positive",
                "max_tokens",
            ));
        }
        if let Some(tools) = &self.tools {
            if let Some(index) = tools.iter().position(|t| t.name.trim().is_empty()) {
                return Err(GatewayError::validation_field(
                    "tool name must not be empty",
                    format!("tools[{index}]"),
                ));
            }
        }
        Ok(())
    }

    /// Total characters of text across all messages and the system prompt
    #[must_use]
    pub fn total_text_len(&self) -> usize {
        self.system.as_ref().map_or(0, String::len)
            + self
                .messages
                .iter()
                .map(|m| m.content.text_len())
                .sum::<usize>()
    }
}

/// Builder for `UnifiedRequest`
#[derive(Debug, Default)]
pub struct UnifiedRequestBuilder {
    model: Option<String>,
    messages: Vec<Message>,
    system: Option<String>,
    temperature: Option<f32>,
    top_p: Option<f32>,
    max_tokens: Option<u32>,
    stop_sequences: Option<Vec<String>>,
    tools: Option<Vec<ToolDefinition>>,
    tool_choice: Option<ToolChoice>,
    previous_response_id: Option<String>,
    stream: bool,
}

impl UnifiedRequestBuilder {
    /// Set the model
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the messages
    #[must_use]
    pub fn messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    /// Add a message
    #[must_use]
    pub fn message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    /// Set the system prompt
    #[must_use]
    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Set the temperature
    #[must_use]
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set top_p
    #[must_use]
    pub fn top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    /// Set max_tokens
    #[must_use]
    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set stop sequences
    #[must_use]
    pub fn stop_sequences(mut self, stop: Vec<String>) -> Self {
        self.stop_sequences = Some(stop);
        self
    }

    /// Set tools
    #[must_use]
    pub fn tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Set tool_choice
    #[must_use]
    pub fn tool_choice(mut self, tool_choice: ToolChoice) -> Self {
        self.tool_choice = Some(tool_choice);
        self
    }

    /// Set the previous response id
    #[must_use]
    pub fn previous_response_id(mut self, id: impl Into<String>) -> Self {
        self.previous_response_id = Some(id.into());
        self
    }

    /// Enable streaming
    #[must_use]
    pub fn stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Build the request, validating it against default limits
    pub fn build(self) -> GatewayResult<UnifiedRequest> {
        let model = self
            .model
            .ok_or_else(|| GatewayError::validation_field("model is required", "model"))?;

        let request = UnifiedRequest {
            model,
            messages: self.messages,
            system: self.system,
            temperature: self.temperature,
            top_p: self.top_p,
            max_tokens: self.max_tokens,
            stop_sequences: self.stop_sequences,
            tools: self.tools,
            tool_choice: self.tool_choice,
            previous_response_id: self.previous_response_id,
            stream: self.stream,
        };
        request.validate(&RequestLimits::default())?;
        Ok(request)
    }
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions appearing inside the message list
    System,
    /// User turn
    User,
    /// Assistant turn
    Assistant,
    /// Tool output turn
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::Tool => write!(f, "tool"),
        }
    }
}

/// A single conversation message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the author
    pub role: Role,
    /// Message content
    pub content: MessageContent,
}

impl Message {
    /// Create a message
    #[must_use]
    pub fn new(role: Role, content: MessageContent) -> Self {
        Self { role, content }
    }

    /// Create a user text message
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, MessageContent::Text(text.into()))
    }

    /// Create an assistant text message
    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, MessageContent::Text(text.into()))
    }

    /// Create a system text message
    #[must_use]
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, MessageContent::Text(text.into()))
    }

    /// Create a tool output message
    #[must_use]
    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(
            Role::Tool,
            MessageContent::Blocks(vec![ContentBlock::ToolResult {
                tool_use_id: tool_use_id.into(),
                content: content.into(),
                is_error: false,
            }]),
        )
    }
}

/// Message content (plain text or typed blocks)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text
    Text(String),
    /// Typed content blocks
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// Concatenated text of all text blocks
    #[must_use]
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }

    /// Characters of text carried by this content, including tool payloads
    #[must_use]
    pub fn text_len(&self) -> usize {
        match self {
            Self::Text(text) => text.chars().count(),
            Self::Blocks(blocks) => blocks.iter().map(ContentBlock::text_len).sum(),
        }
    }

    /// Borrow the blocks, if any
    #[must_use]
    pub fn blocks(&self) -> &[ContentBlock] {
        match self {
            Self::Text(_) => &[],
            Self::Blocks(blocks) => blocks,
        }
    }

    /// Whether any image block is present
    #[must_use]
    pub fn has_images(&self) -> bool {
        self.blocks()
            .iter()
            .any(|b| matches!(b, ContentBlock::Image { .. }))
    }

    /// Whether any tool-use or tool-result block is present
    #[must_use]
    pub fn has_tool_blocks(&self) -> bool {
        self.blocks().iter().any(|b| {
            matches!(
                b,
                ContentBlock::ToolUse { .. } | ContentBlock::ToolResult { .. }
            )
        })
    }

    /// Whether the content is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.is_empty(),
            Self::Blocks(blocks) => blocks.is_empty(),
        }
    }
}

/// Typed content block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Text
    Text {
        /// Text content
        text: String,
    },
    /// Image
    Image {
        /// Image source
        source: ImageSource,
    },
    /// Tool invocation issued by the assistant
    ToolUse {
        /// Call id
        id: String,
        /// Tool name
        name: String,
        /// Tool input
        input: Value,
    },
    /// Output of a tool invocation
    ToolResult {
        /// Id of the call this answers
        tool_use_id: String,
        /// Output text
        content: String,
        /// Whether the tool failed
        #[serde(default)]
        is_error: bool,
    },
}

impl ContentBlock {
    fn text_len(&self) -> usize {
        match self {
            Self::Text { text } => text.chars().count(),
            Self::Image { .. } => 0,
            Self::ToolUse { input, .. } => input.to_string().chars().count(),
            Self::ToolResult { content, .. } => content.chars().count(),
        }
    }
}

/// Image source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageSource {
    /// Inline base64 bytes
    Base64 {
        /// MIME type, e.g. `image/png`
        media_type: String,
        /// Base64 payload
        data: String,
    },
    /// Remote URL
    Url {
        /// Image URL
        url: String,
    },
}

/// Tool definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name
    pub name: String,
    /// Tool description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema of the tool input
    pub input_schema: Value,
}

/// Tool choice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolChoice {
    /// Model decides
    Auto,
    /// Model must call some tool
    Any,
    /// Model must not call tools
    None,
    /// Model must call the named tool
    Tool {
        /// Tool name
        name: String,
    },
}
