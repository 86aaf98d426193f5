//! AWS Bedrock Converse API transformer.
//!
//! System text goes to the dedicated `system` slot. Tool results travel as
//! `user` messages and adjacent same-role messages are merged, since Converse
//! requires strict user/assistant alternation.

use super::eventstream::EventStreamDecoder;
use super::sanitize::redact_pii;
use super::{StreamDecoder, TransformLimits};
use bytes::Bytes;
use gateway_core::{
    ChunkDelta, ContentBlock, FinishReason, GatewayError, GatewayResult, ImageSource, Message,
    MessageContent, OutputItem, Role, StreamChunk, ToolChoice, UnifiedRequest, UnifiedResponse,
    Usage,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Provider id used in errors and logs
pub const PROVIDER: &str = "bedrock";

// ============================================================================
// Request types
// ============================================================================

/// Converse request body
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BedrockRequest {
    /// Alternating conversation messages
    pub messages: Vec<BedrockMessage>,
    /// System prompt blocks
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub system: Vec<SystemBlock>,
    /// Sampling parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inference_config: Option<InferenceConfig>,
    /// Tools
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_config: Option<ToolConfig>,
}

/// One Converse message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BedrockMessage {
    /// `user` or `assistant`
    pub role: &'static str,
    /// Content blocks
    pub content: Vec<BedrockContent>,
}

/// Content block, externally tagged as Converse expects
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BedrockContent {
    /// Text
    Text(String),
    /// Inline image
    Image(ImageBlock),
    /// Tool call made by the assistant
    ToolUse(ToolUseBlock),
    /// Tool output sent back by the user
    ToolResult(ToolResultBlock),
}

/// Inline image
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageBlock {
    /// `png`, `jpeg`, `gif` or `webp`
    pub format: &'static str,
    /// Image bytes
    pub source: ImageBytes,
}

/// Base64 image payload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageBytes {
    /// Base64 data
    pub bytes: String,
}

/// Tool call
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUseBlock {
    /// Call id
    pub tool_use_id: String,
    /// Tool name
    pub name: String,
    /// Tool input
    pub input: Value,
}

/// Tool output
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultBlock {
    /// Id of the call this answers
    pub tool_use_id: String,
    /// Output blocks
    pub content: Vec<ToolResultContent>,
    /// `success` or `error`
    pub status: &'static str,
}

/// Tool output block
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ToolResultContent {
    /// Text output
    Text(String),
}

/// System prompt block
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemBlock {
    /// Text
    pub text: String,
}

/// Sampling parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceConfig {
    /// Output token ceiling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Sampling temperature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Nucleus sampling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Stop sequences
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
}

impl InferenceConfig {
    fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Tool configuration
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolConfig {
    /// Tool specs
    pub tools: Vec<ToolSpecEntry>,
    /// Tool choice
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
}

/// Wrapper around one tool spec
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpecEntry {
    /// Spec
    pub tool_spec: ToolSpec,
}

/// Tool spec
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpec {
    /// Tool name
    pub name: String,
    /// Description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Input schema wrapper
    pub input_schema: InputSchema,
}

/// JSON schema wrapper
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputSchema {
    /// Schema
    pub json: Value,
}

// ============================================================================
// Encode
// ============================================================================

fn image_format(media_type: &str) -> Option<&'static str> {
    match media_type {
        "image/png" => Some("png"),
        "image/jpeg" | "image/jpg" => Some("jpeg"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

fn encode_blocks(
    message: &Message,
    index: usize,
    system: &mut Vec<SystemBlock>,
) -> GatewayResult<Vec<BedrockContent>> {
    let field = || format!("messages[{index}]");

    let blocks = match &message.content {
        MessageContent::Text(text) => {
            if message.role == Role::Tool {
                return Err(GatewayError::validation_field(
                    "tool message must carry a tool_result block",
                    field(),
                ));
            }
            if message.role == Role::System {
                if !text.is_empty() {
                    system.push(SystemBlock { text: text.clone() });
                }
                return Ok(Vec::new());
            }
            return Ok(if text.is_empty() {
                Vec::new()
            } else {
                vec![BedrockContent::Text(text.clone())]
            });
        }
        MessageContent::Blocks(blocks) => blocks,
    };

    if message.role == Role::System {
        let text = message.content.text();
        if !text.is_empty() {
            system.push(SystemBlock { text });
        }
        return Ok(Vec::new());
    }

    let mut content = Vec::with_capacity(blocks.len());
    for block in blocks {
        match block {
            ContentBlock::Text { text } => {
                if !text.is_empty() {
                    content.push(BedrockContent::Text(text.clone()));
                }
            }
            ContentBlock::Image { source } => match source {
                ImageSource::Base64 { media_type, data } => {
                    let format = image_format(media_type).ok_or_else(|| {
                        GatewayError::validation_field(
                            format!("unsupported image media type: {media_type}"),
                            field(),
                        )
                    })?;
                    content.push(BedrockContent::Image(ImageBlock {
                        format,
                        source: ImageBytes {
                            bytes: data.clone(),
                        },
                    }));
                }
                ImageSource::Url { url } => {
                    debug!(provider = PROVIDER, "URL images are not supported, sending placeholder");
                    content.push(BedrockContent::Text(format!("[image: {url}]")));
                }
            },
            ContentBlock::ToolUse { id, name, input } => {
                content.push(BedrockContent::ToolUse(ToolUseBlock {
                    tool_use_id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                }));
            }
            ContentBlock::ToolResult {
                tool_use_id,
                content: output,
                is_error,
            } => {
                content.push(BedrockContent::ToolResult(ToolResultBlock {
                    tool_use_id: tool_use_id.clone(),
                    content: vec![ToolResultContent::Text(output.clone())],
                    status: if *is_error { "error" } else { "success" },
                }));
            }
        }
    }
    Ok(content)
}

fn encode_tool_choice(choice: &ToolChoice) -> Option<Value> {
    match choice {
        ToolChoice::Auto => Some(json!({ "auto": {} })),
        ToolChoice::Any => Some(json!({ "any": {} })),
        ToolChoice::Tool { name } => Some(json!({ "tool": { "name": name } })),
        ToolChoice::None => None,
    }
}

/// Encode a unified request as a Converse body.
///
/// # Errors
/// Returns a validation error for shapes Converse cannot express
pub fn encode_request(request: &UnifiedRequest) -> GatewayResult<BedrockRequest> {
    let mut system = Vec::new();
    if let Some(text) = request.system.as_deref().filter(|s| !s.is_empty()) {
        system.push(SystemBlock {
            text: text.to_string(),
        });
    }

    let mut messages: Vec<BedrockMessage> = Vec::with_capacity(request.messages.len());
    for (index, message) in request.messages.iter().enumerate() {
        let content = encode_blocks(message, index, &mut system)?;
        if content.is_empty() {
            continue;
        }
        let role = match message.role {
            Role::Assistant => "assistant",
            _ => "user",
        };
        match messages.last_mut() {
            Some(last) if last.role == role => last.content.extend(content),
            _ => messages.push(BedrockMessage { role, content }),
        }
    }

    if request.previous_response_id.is_some() {
        debug!(provider = PROVIDER, "previous_response_id is not supported, dropping");
    }

    let inference_config = InferenceConfig {
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        top_p: request.top_p,
        stop_sequences: request.stop_sequences.clone().unwrap_or_default(),
    };

    let tool_config = request
        .tools
        .as_ref()
        .filter(|tools| !tools.is_empty())
        .map(|tools| ToolConfig {
            tools: tools
                .iter()
                .map(|tool| ToolSpecEntry {
                    tool_spec: ToolSpec {
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        input_schema: InputSchema {
                            json: tool.input_schema.clone(),
                        },
                    },
                })
                .collect(),
            tool_choice: request.tool_choice.as_ref().and_then(encode_tool_choice),
        });

    Ok(BedrockRequest {
        messages,
        system,
        inference_config: (!inference_config.is_empty()).then_some(inference_config),
        tool_config,
    })
}

// ============================================================================
// Decode
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConverseResponse {
    output: ConverseOutput,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<BedrockUsage>,
}

#[derive(Debug, Deserialize)]
struct ConverseOutput {
    #[serde(default)]
    message: Option<ConverseMessage>,
}

#[derive(Debug, Deserialize)]
struct ConverseMessage {
    #[serde(default)]
    content: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BedrockUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

impl BedrockUsage {
    fn to_usage(&self) -> Usage {
        Usage::new(self.input_tokens, self.output_tokens)
    }
}

fn map_stop_reason(reason: &str) -> Option<FinishReason> {
    match reason {
        "end_turn" | "stop_sequence" => Some(FinishReason::Stop),
        "max_tokens" => Some(FinishReason::MaxTokens),
        "tool_use" => Some(FinishReason::ToolUse),
        "guardrail_intervened" | "content_filtered" => {
            warn!(provider = PROVIDER, stop_reason = reason, "Response blocked by content filter");
            Some(FinishReason::Stop)
        }
        other => {
            debug!(provider = PROVIDER, stop_reason = other, "Unknown stop reason");
            None
        }
    }
}

fn decode_block(block: &Value) -> Option<OutputItem> {
    if let Some(text) = block.get("text").and_then(Value::as_str) {
        return Some(OutputItem::Text {
            text: redact_pii(text).into_owned(),
        });
    }
    if let Some(tool) = block.get("toolUse").filter(|v| v.is_object()) {
        let id = tool.get("toolUseId").and_then(Value::as_str)?;
        let name = tool.get("name").and_then(Value::as_str)?;
        let arguments = tool.get("input").map_or_else(|| "{}".to_string(), Value::to_string);
        return Some(OutputItem::ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments,
        });
    }
    if let Some(text) = block
        .pointer("/reasoningContent/reasoningText/text")
        .and_then(Value::as_str)
    {
        return Some(OutputItem::Reasoning {
            text: redact_pii(text).into_owned(),
        });
    }
    None
}

/// Decode a buffered Converse body.
///
/// # Errors
/// Validation errors for size violations, provider errors for malformed responses
pub fn decode_response(
    body: &[u8],
    model: &str,
    limits: &TransformLimits,
) -> GatewayResult<UnifiedResponse> {
    limits.check_response_size(body.len())?;
    let response: ConverseResponse = serde_json::from_slice(body).map_err(|e| {
        GatewayError::invalid_response(PROVIDER, format!("malformed response body: {e}"))
    })?;
    let message = response
        .output
        .message
        .ok_or_else(|| GatewayError::invalid_response(PROVIDER, "response has no output message"))?;
    limits.check_choices_count(message.content.len())?;

    let mut output = Vec::with_capacity(message.content.len());
    for block in &message.content {
        match decode_block(block) {
            Some(item) => output.push(item),
            None => debug!(provider = PROVIDER, "Skipping unknown content block"),
        }
    }
    limits.check_completion_length(output.iter().map(OutputItem::text_len).sum())?;

    let mut decoded = UnifiedResponse::new(format!("bedrock_{}", uuid::Uuid::new_v4().simple()), model);
    decoded.output = output;
    decoded.finish_reason = response.stop_reason.as_deref().and_then(map_stop_reason);
    decoded.usage = response.usage.as_ref().map(BedrockUsage::to_usage).unwrap_or_default();
    Ok(decoded)
}

// ============================================================================
// Stream decode
// ============================================================================

/// Incremental decoder for Converse event streams.
///
/// Emits exactly one `is_complete` chunk over its lifetime.
#[derive(Debug)]
pub struct BedrockStreamDecoder {
    frames: EventStreamDecoder,
    limits: TransformLimits,
    response_id: String,
    model: String,
    tool_ids: HashMap<u64, String>,
    stop_reason: Option<FinishReason>,
    completion_len: usize,
    complete: bool,
}

impl BedrockStreamDecoder {
    /// Create a decoder for a stream requested with `model`
    #[must_use]
    pub fn new(model: impl Into<String>, limits: TransformLimits) -> Self {
        Self {
            frames: EventStreamDecoder::new(limits.max_response_size),
            limits,
            response_id: format!("bedrock_{}", uuid::Uuid::new_v4().simple()),
            model: model.into(),
            tool_ids: HashMap::new(),
            stop_reason: None,
            completion_len: 0,
            complete: false,
        }
    }

    /// Whether the terminal chunk has been emitted
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Feed raw bytes, returning the chunks they complete
    pub fn push(&mut self, bytes: &[u8]) -> Vec<StreamChunk> {
        if self.complete {
            return Vec::new();
        }
        let mut chunks = Vec::new();
        let messages = match self.frames.push(bytes) {
            Ok(messages) => messages,
            Err(e) => {
                warn!(provider = PROVIDER, error = %e, "Undecodable event-stream frame, terminating");
                chunks.push(self.terminate_empty());
                return chunks;
            }
        };

        for message in messages {
            match message.message_type() {
                Some("event") | None => {
                    let event_type = message.event_type().unwrap_or_default().to_string();
                    match serde_json::from_slice::<Value>(&message.payload) {
                        Ok(payload) => self.handle_event(&event_type, &payload, &mut chunks),
                        Err(e) => {
                            warn!(
                                provider = PROVIDER,
                                event_type = %event_type,
                                error = %e,
                                size = message.payload.len(),
                                "Malformed stream event"
                            );
                            chunks.push(self.terminate_empty());
                        }
                    }
                }
                Some(kind) => {
                    warn!(
                        provider = PROVIDER,
                        message_type = kind,
                        exception = message.exception_type().unwrap_or("unknown"),
                        "Upstream stream exception"
                    );
                    chunks.push(self.terminate_empty());
                }
            }
            if self.complete {
                break;
            }
        }
        chunks
    }

    /// Guarantee termination once the upstream closes.
    ///
    /// A stream that reached `messageStop` but omitted `metadata` ends
    /// normally without usage; anything shorter is interrupted.
    pub fn finish(&mut self) -> Vec<StreamChunk> {
        if self.complete {
            return Vec::new();
        }
        if self.frames.pending_len() > 0 {
            debug!(
                provider = PROVIDER,
                pending = self.frames.pending_len(),
                "Discarding truncated trailing frame"
            );
        }
        if self.stop_reason.is_none() {
            debug!(provider = PROVIDER, "Stream closed before messageStop");
            return vec![self.terminate_empty()];
        }
        self.complete = true;
        vec![StreamChunk::completed(
            &self.response_id,
            &self.model,
            self.stop_reason,
            None,
        )]
    }

    fn terminate_empty(&mut self) -> StreamChunk {
        self.complete = true;
        StreamChunk::interrupted(&self.response_id, &self.model)
    }

    fn delta(&self, delta: ChunkDelta) -> StreamChunk {
        StreamChunk::delta(&self.response_id, &self.model, delta)
    }

    fn push_text(&mut self, text: &str, reasoning: bool, chunks: &mut Vec<StreamChunk>) {
        if text.is_empty() {
            return;
        }
        self.completion_len += text.chars().count();
        if self.limits.check_completion_length(self.completion_len).is_err() {
            warn!(
                provider = PROVIDER,
                length = self.completion_len,
                "Streamed completion exceeds length limit, terminating"
            );
            let chunk = self.terminate_empty();
            chunks.push(chunk);
            return;
        }
        let text = redact_pii(text).into_owned();
        chunks.push(self.delta(if reasoning {
            ChunkDelta::Reasoning { text }
        } else {
            ChunkDelta::Text { text }
        }));
    }

    fn handle_event(&mut self, event_type: &str, payload: &Value, chunks: &mut Vec<StreamChunk>) {
        let index = payload
            .get("contentBlockIndex")
            .and_then(Value::as_u64)
            .unwrap_or_default();

        match event_type {
            "messageStart" | "contentBlockStop" => {}
            "contentBlockStart" => {
                if let Some(tool) = payload.pointer("/start/toolUse") {
                    let id = tool
                        .get("toolUseId")
                        .and_then(Value::as_str)
                        .map_or_else(|| format!("tool_{index}"), str::to_string);
                    let name = tool.get("name").and_then(Value::as_str).map(str::to_string);
                    self.tool_ids.insert(index, id.clone());
                    chunks.push(self.delta(ChunkDelta::ToolCall {
                        id,
                        name,
                        arguments: String::new(),
                    }));
                }
            }
            "contentBlockDelta" => {
                let Some(delta) = payload.get("delta") else {
                    debug!(provider = PROVIDER, "contentBlockDelta without delta");
                    return;
                };
                if let Some(text) = delta.get("text").and_then(Value::as_str) {
                    self.push_text(text, false, chunks);
                } else if let Some(input) = delta.pointer("/toolUse/input").and_then(Value::as_str) {
                    let id = self
                        .tool_ids
                        .get(&index)
                        .cloned()
                        .unwrap_or_else(|| format!("tool_{index}"));
                    chunks.push(self.delta(ChunkDelta::ToolCall {
                        id,
                        name: None,
                        arguments: input.to_string(),
                    }));
                } else if let Some(text) = delta.pointer("/reasoningContent/text").and_then(Value::as_str) {
                    self.push_text(text, true, chunks);
                } else {
                    debug!(provider = PROVIDER, "Skipping unknown content delta");
                }
            }
            "messageStop" => {
                self.stop_reason = payload
                    .get("stopReason")
                    .and_then(Value::as_str)
                    .and_then(map_stop_reason);
            }
            "metadata" => {
                let usage = payload
                    .get("usage")
                    .and_then(|u| serde_json::from_value::<BedrockUsage>(u.clone()).ok())
                    .map(|u| u.to_usage());
                self.complete = true;
                chunks.push(StreamChunk::completed(
                    &self.response_id,
                    &self.model,
                    self.stop_reason,
                    usage,
                ));
            }
            other => {
                debug!(provider = PROVIDER, event_type = other, "Skipping stream event");
            }
        }
    }
}

impl StreamDecoder for BedrockStreamDecoder {
    type Frame = Bytes;

    fn push(&mut self, bytes: Bytes) -> Vec<StreamChunk> {
        Self::push(self, &bytes)
    }

    fn finish(&mut self) -> Vec<StreamChunk> {
        Self::finish(self)
    }

    fn interrupt(&mut self) -> Vec<StreamChunk> {
        if self.complete {
            return Vec::new();
        }
        vec![self.terminate_empty()]
    }

    fn is_complete(&self) -> bool {
        Self::is_complete(self)
    }
}
