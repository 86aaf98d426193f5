//! OpenAI Chat Completions wire shapes.

use super::{image_source_from_url, SseEvent};
use crate::error::{GatewayError, GatewayResult};
use crate::request::{
    ContentBlock, Message, MessageContent, Role, ToolChoice, ToolDefinition, UnifiedRequest,
};
use crate::response::{FinishReason, UnifiedResponse, Usage};
use crate::streaming::{ChunkDelta, StreamChunk};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

/// Chat Completions request
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiRequest {
    /// Model name
    pub model: String,
    /// Messages
    pub messages: Vec<OpenAiMessage>,
    /// Maximum output tokens (legacy name)
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Maximum output tokens
    #[serde(default)]
    pub max_completion_tokens: Option<u32>,
    /// Temperature
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Top-p
    #[serde(default)]
    pub top_p: Option<f32>,
    /// Stop sequences
    #[serde(default)]
    pub stop: Option<OpenAiStop>,
    /// Tools
    #[serde(default)]
    pub tools: Option<Vec<OpenAiTool>>,
    /// Tool choice
    #[serde(default)]
    pub tool_choice: Option<OpenAiToolChoice>,
    /// Stream the response
    #[serde(default)]
    pub stream: bool,
}

/// Chat message
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiMessage {
    /// Role
    pub role: OpenAiRole,
    /// Content
    #[serde(default)]
    pub content: Option<OpenAiContent>,
    /// Tool calls issued by an assistant turn
    #[serde(default)]
    pub tool_calls: Option<Vec<OpenAiToolCall>>,
    /// Call answered by a tool turn
    #[serde(default)]
    pub tool_call_id: Option<String>,
}

/// Chat roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenAiRole {
    /// System
    System,
    /// Developer (treated as system)
    Developer,
    /// User
    User,
    /// Assistant
    Assistant,
    /// Tool output
    Tool,
}

/// Text or parts
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OpenAiContent {
    /// Plain text
    Text(String),
    /// Content parts
    Parts(Vec<OpenAiPart>),
}

impl OpenAiContent {
    fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    OpenAiPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Content part
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OpenAiPart {
    /// Text part
    Text {
        /// Text
        text: String,
    },
    /// Image part
    ImageUrl {
        /// Image reference
        image_url: OpenAiImageUrl,
    },
    /// Audio, file and other parts not forwarded upstream
    #[serde(other)]
    Unsupported,
}

/// Image reference
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiImageUrl {
    /// URL or data URL
    pub url: String,
}

/// Tool call in an assistant message
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiToolCall {
    /// Call id
    pub id: String,
    /// Function
    pub function: OpenAiFunctionCall,
}

/// Function call
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiFunctionCall {
    /// Function name
    pub name: String,
    /// JSON-encoded arguments
    #[serde(default)]
    pub arguments: String,
}

/// `stop` as a string or list
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OpenAiStop {
    /// Single sequence
    One(String),
    /// Several sequences
    Many(Vec<String>),
}

/// Tool definition
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiTool {
    /// Always `function`
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    /// Function definition
    pub function: OpenAiFunction,
}

/// Function definition
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiFunction {
    /// Name
    pub name: String,
    /// Description
    #[serde(default)]
    pub description: Option<String>,
    /// JSON schema of the parameters
    #[serde(default)]
    pub parameters: Option<Value>,
}

/// Tool choice, as a mode string or a named function
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OpenAiToolChoice {
    /// `auto`, `none` or `required`
    Mode(String),
    /// Named function
    Named {
        /// Function selector
        function: OpenAiNamedFunction,
    },
}

/// Named function selector
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiNamedFunction {
    /// Function name
    pub name: String,
}

fn convert_assistant(message: OpenAiMessage) -> Message {
    let mut blocks = Vec::new();
    if let Some(content) = &message.content {
        let text = content.text();
        if !text.is_empty() {
            blocks.push(ContentBlock::Text { text });
        }
    }
    for call in message.tool_calls.unwrap_or_default() {
        let input = if call.function.arguments.trim().is_empty() {
            json!({})
        } else {
            serde_json::from_str(&call.function.arguments)
                .unwrap_or(Value::String(call.function.arguments))
        };
        blocks.push(ContentBlock::ToolUse {
            id: call.id,
            name: call.function.name,
            input,
        });
    }
    match blocks.as_slice() {
        [ContentBlock::Text { text }] => Message::assistant(text.clone()),
        _ => Message::new(Role::Assistant, MessageContent::Blocks(blocks)),
    }
}

fn convert_user(content: Option<OpenAiContent>) -> Message {
    match content {
        Some(OpenAiContent::Parts(parts)) => {
            let blocks = parts
                .into_iter()
                .filter_map(|part| match part {
                    OpenAiPart::Text { text } => Some(ContentBlock::Text { text }),
                    OpenAiPart::ImageUrl { image_url } => Some(ContentBlock::Image {
                        source: image_source_from_url(image_url.url),
                    }),
                    OpenAiPart::Unsupported => None,
                })
                .collect();
            Message::new(Role::User, MessageContent::Blocks(blocks))
        }
        Some(OpenAiContent::Text(text)) => Message::user(text),
        None => Message::user(""),
    }
}

impl OpenAiRequest {
    /// Normalize into a unified request
    pub fn into_unified(self) -> GatewayResult<UnifiedRequest> {
        let mut system_parts = Vec::new();
        let mut messages = Vec::with_capacity(self.messages.len());

        for (index, message) in self.messages.into_iter().enumerate() {
            match message.role {
                OpenAiRole::System | OpenAiRole::Developer => {
                    if let Some(content) = &message.content {
                        system_parts.push(content.text());
                    }
                }
                OpenAiRole::User => messages.push(convert_user(message.content)),
                OpenAiRole::Assistant => messages.push(convert_assistant(message)),
                OpenAiRole::Tool => {
                    let tool_use_id = message.tool_call_id.ok_or_else(|| {
                        GatewayError::validation_field(
                            "tool message requires tool_call_id",
                            format!("messages[{index}].tool_call_id"),
                        )
                    })?;
                    let content = message.content.map(|c| c.text()).unwrap_or_default();
                    messages.push(Message::tool_result(tool_use_id, content));
                }
            }
        }

        if messages.is_empty() {
            return Err(GatewayError::validation_field(
                "at least one non-system message is required",
                "messages",
            ));
        }

        let tools = self.tools.map(|tools| {
            tools
                .into_iter()
                .map(|t| ToolDefinition {
                    name: t.function.name,
                    description: t.function.description,
                    input_schema: t
                        .function
                        .parameters
                        .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
                })
                .collect()
        });

        let tool_choice = match self.tool_choice {
            None => None,
            Some(OpenAiToolChoice::Named { function }) => Some(ToolChoice::Tool {
                name: function.name,
            }),
            Some(OpenAiToolChoice::Mode(mode)) => Some(match mode.as_str() {
                "auto" => ToolChoice::Auto,
                "none" => ToolChoice::None,
                "required" => ToolChoice::Any,
                other => {
                    return Err(GatewayError::validation_field(
                        format!("unsupported tool_choice '{other}'"),
                        "tool_choice",
                    ))
                }
            }),
        };

        let stop_sequences = self.stop.map(|stop| match stop {
            OpenAiStop::One(s) => vec![s],
            OpenAiStop::Many(v) => v,
        });

        let system = system_parts
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");

        Ok(UnifiedRequest {
            model: self.model,
            messages,
            system: (!system.is_empty()).then_some(system),
            temperature: self.temperature,
            top_p: self.top_p,
            max_tokens: self.max_completion_tokens.or(self.max_tokens),
            stop_sequences,
            tools,
            tool_choice,
            previous_response_id: None,
            stream: self.stream,
        })
    }
}

/// OpenAI spelling of a finish reason
pub fn finish_reason(reason: FinishReason) -> &'static str {
    match reason {
        FinishReason::Stop => "stop",
        FinishReason::MaxTokens => "length",
        FinishReason::ToolUse => "tool_calls",
    }
}

/// `chat.completion` response
#[derive(Debug, Clone, Serialize)]
pub struct OpenAiResponse {
    /// Response id
    pub id: String,
    /// Always `chat.completion`
    pub object: &'static str,
    /// Creation time
    pub created: i64,
    /// Model
    pub model: String,
    /// Single choice
    pub choices: Vec<OpenAiChoice>,
    /// Usage
    pub usage: OpenAiUsage,
}

/// Response choice
#[derive(Debug, Clone, Serialize)]
pub struct OpenAiChoice {
    /// Index (always 0)
    pub index: u32,
    /// Assistant message
    pub message: Value,
    /// Finish reason
    pub finish_reason: &'static str,
}

/// Usage block
#[derive(Debug, Clone, Serialize)]
pub struct OpenAiUsage {
    /// Prompt tokens
    pub prompt_tokens: u32,
    /// Completion tokens
    pub completion_tokens: u32,
    /// Total tokens
    pub total_tokens: u32,
    /// Reasoning breakdown
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_tokens_details: Option<Value>,
}

impl From<Usage> for OpenAiUsage {
    fn from(usage: Usage) -> Self {
        Self {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
            completion_tokens_details: usage
                .reasoning_tokens
                .map(|r| json!({"reasoning_tokens": r})),
        }
    }
}

impl From<&UnifiedResponse> for OpenAiResponse {
    fn from(response: &UnifiedResponse) -> Self {
        let text = response.text();
        let tool_calls: Vec<Value> = response
            .tool_calls()
            .map(|(id, name, arguments)| {
                json!({
                    "id": id,
                    "type": "function",
                    "function": {"name": name, "arguments": arguments},
                })
            })
            .collect();

        let mut message = json!({
            "role": "assistant",
            "content": if text.is_empty() && !tool_calls.is_empty() { Value::Null } else { Value::String(text) },
        });
        if !tool_calls.is_empty() {
            message["tool_calls"] = Value::Array(tool_calls);
        }

        Self {
            id: response.id.clone(),
            object: "chat.completion",
            created: response.created,
            model: response.model.clone(),
            choices: vec![OpenAiChoice {
                index: 0,
                message,
                finish_reason: finish_reason(response.finish_reason.unwrap_or(FinishReason::Stop)),
            }],
            usage: response.usage.into(),
        }
    }
}

/// Renders stream chunks as `chat.completion.chunk` events followed by `[DONE]`
#[derive(Debug)]
pub struct OpenAiStreamEncoder {
    created: i64,
    role_sent: bool,
    finished: bool,
    tool_indexes: HashMap<String, usize>,
}

impl Default for OpenAiStreamEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenAiStreamEncoder {
    /// Create an encoder for one response
    #[must_use]
    pub fn new() -> Self {
        Self {
            created: chrono::Utc::now().timestamp(),
            role_sent: false,
            finished: false,
            tool_indexes: HashMap::new(),
        }
    }

    fn chunk_event(&self, chunk: &StreamChunk, delta: Value, finish: Option<&str>, usage: Option<Value>) -> SseEvent {
        let mut body = json!({
            "id": chunk.id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": chunk.model,
            "choices": [{"index": 0, "delta": delta, "finish_reason": finish}],
        });
        if let Some(usage) = usage {
            body["usage"] = usage;
        }
        SseEvent::data(body.to_string())
    }

    /// Encode one chunk; returns zero or more SSE events
    pub fn encode(&mut self, chunk: &StreamChunk) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }

        let mut delta = match &chunk.delta {
            Some(ChunkDelta::Text { text }) => Some(json!({"content": text})),
            Some(ChunkDelta::ToolCall {
                id,
                name,
                arguments,
            }) => {
                let next = self.tool_indexes.len();
                let (index, first) = match self.tool_indexes.get(id) {
                    Some(&index) => (index, false),
                    None => {
                        self.tool_indexes.insert(id.clone(), next);
                        (next, true)
                    }
                };
                let mut call = json!({"index": index, "function": {"arguments": arguments}});
                if first {
                    call["id"] = json!(id);
                    call["type"] = json!("function");
                    call["function"]["name"] = json!(name.clone().unwrap_or_default());
                }
                Some(json!({"tool_calls": [call]}))
            }
            Some(ChunkDelta::Reasoning { .. }) | None => None,
        };

        if !self.role_sent && (delta.is_some() || chunk.is_complete) {
            self.role_sent = true;
            let with_role = delta.take().map_or_else(
                || json!({"role": "assistant", "content": ""}),
                |mut d| {
                    d["role"] = json!("assistant");
                    d
                },
            );
            events.push(self.chunk_event(chunk, with_role, None, None));
        }
        if let Some(delta) = delta {
            events.push(self.chunk_event(chunk, delta, None, None));
        }

        if chunk.is_complete {
            self.finished = true;
            let reason = finish_reason(chunk.finish_reason.unwrap_or(FinishReason::Stop));
            let usage = chunk
                .usage
                .map(|u| serde_json::to_value(OpenAiUsage::from(u)).unwrap_or(Value::Null));
            events.push(self.chunk_event(chunk, json!({}), Some(reason), usage));
            events.push(SseEvent::data("[DONE]"));
        }

        events
    }
}
