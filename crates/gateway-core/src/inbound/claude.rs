//! Claude Messages API wire shapes.

use super::{image_source_from_url, SseEvent};
use crate::error::{GatewayError, GatewayResult};
use crate::request::{
    ContentBlock, ImageSource, Message, MessageContent, Role, ToolChoice, ToolDefinition,
    UnifiedRequest,
};
use crate::response::{FinishReason, OutputItem, UnifiedResponse, Usage};
use crate::streaming::{ChunkDelta, StreamChunk};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Claude Messages request
#[derive(Debug, Clone, Deserialize)]
pub struct ClaudeRequest {
    /// Model name
    pub model: String,
    /// Conversation messages
    pub messages: Vec<ClaudeMessage>,
    /// System prompt
    #[serde(default)]
    pub system: Option<ClaudeSystem>,
    /// Maximum output tokens
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Temperature
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Top-p
    #[serde(default)]
    pub top_p: Option<f32>,
    /// Stop sequences
    #[serde(default)]
    pub stop_sequences: Option<Vec<String>>,
    /// Tool definitions
    #[serde(default)]
    pub tools: Option<Vec<ClaudeTool>>,
    /// Tool choice
    #[serde(default)]
    pub tool_choice: Option<ClaudeToolChoice>,
    /// Stream the response
    #[serde(default)]
    pub stream: bool,
    /// Caller metadata (accepted, not forwarded)
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// Claude message
#[derive(Debug, Clone, Deserialize)]
pub struct ClaudeMessage {
    /// Author role
    pub role: ClaudeRole,
    /// Content
    pub content: ClaudeContent,
}

/// Claude roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaudeRole {
    /// User turn
    User,
    /// Assistant turn
    Assistant,
}

/// String or block content
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ClaudeContent {
    /// Plain text
    Text(String),
    /// Typed blocks
    Blocks(Vec<ClaudeBlock>),
}

/// System prompt, as a string or text blocks
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ClaudeSystem {
    /// Plain text
    Text(String),
    /// Text blocks
    Blocks(Vec<ClaudeBlock>),
}

/// Claude content block
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClaudeBlock {
    /// Text block
    Text {
        /// Text
        text: String,
    },
    /// Image block
    Image {
        /// Image source
        source: ClaudeImageSource,
    },
    /// Tool invocation from an earlier assistant turn
    ToolUse {
        /// Call id
        id: String,
        /// Tool name
        name: String,
        /// Tool input
        #[serde(default)]
        input: Value,
    },
    /// Tool output supplied by the caller
    ToolResult {
        /// Id of the answered call
        tool_use_id: String,
        /// Output
        #[serde(default)]
        content: Option<ClaudeToolResultContent>,
        /// Whether the tool failed
        #[serde(default)]
        is_error: Option<bool>,
    },
    /// Thinking and other block types not forwarded upstream
    #[serde(other)]
    Unsupported,
}

/// Claude image source
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClaudeImageSource {
    /// Inline base64
    Base64 {
        /// MIME type
        media_type: String,
        /// Payload
        data: String,
    },
    /// Remote URL
    Url {
        /// URL
        url: String,
    },
}

/// Tool result content
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ClaudeToolResultContent {
    /// Plain text
    Text(String),
    /// Blocks (text blocks are kept)
    Blocks(Vec<ClaudeBlock>),
}

/// Claude tool definition
#[derive(Debug, Clone, Deserialize)]
pub struct ClaudeTool {
    /// Tool name
    pub name: String,
    /// Tool description
    #[serde(default)]
    pub description: Option<String>,
    /// Input schema
    pub input_schema: Value,
}

/// Claude tool choice
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClaudeToolChoice {
    /// Model decides
    Auto,
    /// Some tool must be called
    Any,
    /// Named tool must be called
    Tool {
        /// Tool name
        name: String,
    },
    /// No tools
    None,
}

fn blocks_text(blocks: &[ClaudeBlock]) -> String {
    blocks
        .iter()
        .filter_map(|b| match b {
            ClaudeBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn convert_block(block: ClaudeBlock) -> Option<ContentBlock> {
    match block {
        ClaudeBlock::Text { text } => Some(ContentBlock::Text { text }),
        ClaudeBlock::Image { source } => Some(ContentBlock::Image {
            source: match source {
                ClaudeImageSource::Base64 { media_type, data } => {
                    ImageSource::Base64 { media_type, data }
                }
                ClaudeImageSource::Url { url } => image_source_from_url(url),
            },
        }),
        ClaudeBlock::ToolUse { id, name, input } => Some(ContentBlock::ToolUse { id, name, input }),
        ClaudeBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => Some(ContentBlock::ToolResult {
            tool_use_id,
            content: match content {
                Some(ClaudeToolResultContent::Text(text)) => text,
                Some(ClaudeToolResultContent::Blocks(blocks)) => blocks_text(&blocks),
                None => String::new(),
            },
            is_error: is_error.unwrap_or(false),
        }),
        ClaudeBlock::Unsupported => None,
    }
}

impl ClaudeRequest {
    /// Normalize into a unified request
    pub fn into_unified(self) -> GatewayResult<UnifiedRequest> {
        if self.messages.is_empty() {
            return Err(GatewayError::validation_field(
                "messages must not be empty",
                "messages",
            ));
        }

        let messages = self
            .messages
            .into_iter()
            .map(|m| {
                let role = match m.role {
                    ClaudeRole::User => Role::User,
                    ClaudeRole::Assistant => Role::Assistant,
                };
                let content = match m.content {
                    ClaudeContent::Text(text) => MessageContent::Text(text),
                    ClaudeContent::Blocks(blocks) => MessageContent::Blocks(
                        blocks.into_iter().filter_map(convert_block).collect(),
                    ),
                };
                Message::new(role, content)
            })
            .collect();

        let system = self.system.map(|s| match s {
            ClaudeSystem::Text(text) => text,
            ClaudeSystem::Blocks(blocks) => blocks_text(&blocks),
        });

        let tools = self.tools.map(|tools| {
            tools
                .into_iter()
                .map(|t| ToolDefinition {
                    name: t.name,
                    description: t.description,
                    input_schema: t.input_schema,
                })
                .collect()
        });

        let tool_choice = self.tool_choice.map(|c| match c {
            ClaudeToolChoice::Auto => ToolChoice::Auto,
            ClaudeToolChoice::Any => ToolChoice::Any,
            ClaudeToolChoice::None => ToolChoice::None,
            ClaudeToolChoice::Tool { name } => ToolChoice::Tool { name },
        });

        Ok(UnifiedRequest {
            model: self.model,
            messages,
            system: system.filter(|s| !s.is_empty()),
            temperature: self.temperature,
            top_p: self.top_p,
            max_tokens: self.max_tokens,
            stop_sequences: self.stop_sequences,
            tools,
            tool_choice,
            previous_response_id: None,
            stream: self.stream,
        })
    }
}

/// Claude Messages response
#[derive(Debug, Clone, Serialize)]
pub struct ClaudeResponse {
    /// Response id
    pub id: String,
    /// Always `message`
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Always `assistant`
    pub role: &'static str,
    /// Model
    pub model: String,
    /// Content blocks
    pub content: Vec<Value>,
    /// Stop reason
    pub stop_reason: Option<&'static str>,
    /// Matched stop sequence (never reported by the supported upstreams)
    pub stop_sequence: Option<String>,
    /// Usage
    pub usage: ClaudeUsage,
}

/// Claude usage block
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ClaudeUsage {
    /// Prompt tokens
    pub input_tokens: u32,
    /// Completion tokens
    pub output_tokens: u32,
}

impl From<Usage> for ClaudeUsage {
    fn from(usage: Usage) -> Self {
        Self {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        }
    }
}

/// Claude spelling of a finish reason
pub fn stop_reason(reason: FinishReason) -> &'static str {
    match reason {
        FinishReason::Stop => "end_turn",
        FinishReason::MaxTokens => "max_tokens",
        FinishReason::ToolUse => "tool_use",
    }
}

fn parse_arguments(arguments: &str) -> Value {
    if arguments.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(arguments).unwrap_or_else(|_| json!({}))
}

impl From<&UnifiedResponse> for ClaudeResponse {
    fn from(response: &UnifiedResponse) -> Self {
        let content = response
            .output
            .iter()
            .map(|item| match item {
                OutputItem::Text { text } => json!({"type": "text", "text": text}),
                OutputItem::ToolCall {
                    id,
                    name,
                    arguments,
                } => json!({
                    "type": "tool_use",
                    "id": id,
                    "name": name,
                    "input": parse_arguments(arguments),
                }),
                OutputItem::Reasoning { text } => json!({"type": "thinking", "thinking": text}),
                OutputItem::ToolResult { content, .. } => json!({"type": "text", "text": content}),
            })
            .collect();

        Self {
            id: response.id.clone(),
            kind: "message",
            role: "assistant",
            model: response.model.clone(),
            content,
            stop_reason: Some(stop_reason(response.finish_reason.unwrap_or(FinishReason::Stop))),
            stop_sequence: None,
            usage: response.usage.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum OpenBlock {
    Text,
    Thinking,
    Tool(String),
}

/// Renders stream chunks as the Claude SSE event sequence
#[derive(Debug, Default)]
pub struct ClaudeStreamEncoder {
    started: bool,
    finished: bool,
    open: Option<OpenBlock>,
    next_index: usize,
}

impl ClaudeStreamEncoder {
    /// Create an encoder for one response
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn current_index(&self) -> usize {
        self.next_index.saturating_sub(1)
    }

    fn close_block(&mut self, events: &mut Vec<SseEvent>) {
        if self.open.take().is_some() {
            events.push(SseEvent::named(
                "content_block_stop",
                json!({"type": "content_block_stop", "index": self.current_index()}).to_string(),
            ));
        }
    }

    fn open_block(&mut self, block: OpenBlock, content_block: Value, events: &mut Vec<SseEvent>) {
        self.close_block(events);
        events.push(SseEvent::named(
            "content_block_start",
            json!({
                "type": "content_block_start",
                "index": self.next_index,
                "content_block": content_block,
            })
            .to_string(),
        ));
        self.next_index += 1;
        self.open = Some(block);
    }

    fn block_delta(&self, delta: Value, events: &mut Vec<SseEvent>) {
        events.push(SseEvent::named(
            "content_block_delta",
            json!({
                "type": "content_block_delta",
                "index": self.current_index(),
                "delta": delta,
            })
            .to_string(),
        ));
    }

    /// Encode one chunk; returns zero or more SSE events
    pub fn encode(&mut self, chunk: &StreamChunk) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }

        if !self.started {
            self.started = true;
            events.push(SseEvent::named(
                "message_start",
                json!({
                    "type": "message_start",
                    "message": {
                        "id": chunk.id,
                        "type": "message",
                        "role": "assistant",
                        "model": chunk.model,
                        "content": [],
                        "stop_reason": null,
                        "stop_sequence": null,
                        "usage": {"input_tokens": 0, "output_tokens": 0},
                    },
                })
                .to_string(),
            ));
        }

        match &chunk.delta {
            Some(ChunkDelta::Text { text }) => {
                if self.open != Some(OpenBlock::Text) {
                    self.open_block(OpenBlock::Text, json!({"type": "text", "text": ""}), &mut events);
                }
                self.block_delta(json!({"type": "text_delta", "text": text}), &mut events);
            }
            Some(ChunkDelta::Reasoning { text }) => {
                if self.open != Some(OpenBlock::Thinking) {
                    self.open_block(
                        OpenBlock::Thinking,
                        json!({"type": "thinking", "thinking": ""}),
                        &mut events,
                    );
                }
                self.block_delta(json!({"type": "thinking_delta", "thinking": text}), &mut events);
            }
            Some(ChunkDelta::ToolCall {
                id,
                name,
                arguments,
            }) => {
                if self.open.as_ref() != Some(&OpenBlock::Tool(id.clone())) {
                    self.open_block(
                        OpenBlock::Tool(id.clone()),
                        json!({
                            "type": "tool_use",
                            "id": id,
                            "name": name.clone().unwrap_or_default(),
                            "input": {},
                        }),
                        &mut events,
                    );
                }
                if !arguments.is_empty() {
                    self.block_delta(
                        json!({"type": "input_json_delta", "partial_json": arguments}),
                        &mut events,
                    );
                }
            }
            None => {}
        }

        if chunk.is_complete {
            self.finished = true;
            self.close_block(&mut events);
            let usage = chunk.usage.unwrap_or_default();
            events.push(SseEvent::named(
                "message_delta",
                json!({
                    "type": "message_delta",
                    "delta": {
                        "stop_reason": stop_reason(chunk.finish_reason.unwrap_or(FinishReason::Stop)),
                        "stop_sequence": null,
                    },
                    "usage": {
                        "input_tokens": usage.prompt_tokens,
                        "output_tokens": usage.completion_tokens,
                    },
                })
                .to_string(),
            ));
            events.push(SseEvent::named(
                "message_stop",
                json!({"type": "message_stop"}).to_string(),
            ));
        }

        events
    }
}
