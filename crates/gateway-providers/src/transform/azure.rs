//! Azure OpenAI Responses API transformer.
//!
//! System text is inlined as the first `system` message item. Tool calls and
//! tool results become `function_call` / `function_call_output` input items.

use super::sanitize::redact_pii;
use super::{StreamDecoder, TransformLimits};
use eventsource_stream::Event;
use gateway_core::{
    ChunkDelta, ContentBlock, FinishReason, GatewayError, GatewayResult, ImageSource, Message,
    MessageContent, OutputItem, ProviderErrorType, Role, StreamChunk, ToolChoice, UnifiedRequest, UnifiedResponse,
    Usage,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Provider id used in errors and logs
pub const PROVIDER: &str = "azure";

// ============================================================================
// Request types
// ============================================================================

/// Responses API request body
#[derive(Debug, Clone, Serialize)]
pub struct AzureRequest {
    /// Model (deployment model name)
    pub model: String,
    /// Input items
    pub input: Vec<InputItem>,
    /// Sampling temperature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Nucleus sampling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Output token ceiling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    /// Function tools
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<AzureTool>,
    /// Tool choice
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    /// Server-side conversation chaining
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,
    /// Stream the response
    pub stream: bool,
}

/// One input item
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputItem {
    /// Chat message
    Message {
        /// `system`, `user` or `assistant`
        role: &'static str,
        /// Content parts
        content: Vec<InputContent>,
    },
    /// Earlier tool call made by the model
    FunctionCall {
        /// Call id
        call_id: String,
        /// Function name
        name: String,
        /// JSON-encoded arguments
        arguments: String,
    },
    /// Tool output for an earlier call
    FunctionCallOutput {
        /// Call id
        call_id: String,
        /// Tool output
        output: String,
    },
}

/// Message content part
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputContent {
    /// Text sent by the user or system
    InputText {
        /// Text
        text: String,
    },
    /// Text previously produced by the assistant
    OutputText {
        /// Text
        text: String,
    },
    /// Image, as a URL or data URL
    InputImage {
        /// URL
        image_url: String,
    },
}

/// Function tool definition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AzureTool {
    /// Always `function`
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Function name
    pub name: String,
    /// Description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema of the arguments
    pub parameters: Value,
}

// ============================================================================
// Encode
// ============================================================================

/// Encode a unified request as a Responses API body.
///
/// # Errors
/// Returns a validation error for shapes Azure cannot express
pub fn encode_request(request: &UnifiedRequest, stream: bool) -> GatewayResult<AzureRequest> {
    let mut input = Vec::with_capacity(request.messages.len() + 1);

    if let Some(system) = request.system.as_deref().filter(|s| !s.is_empty()) {
        input.push(InputItem::Message {
            role: "system",
            content: vec![InputContent::InputText {
                text: system.to_string(),
            }],
        });
    }

    for (index, message) in request.messages.iter().enumerate() {
        encode_message(message, index, &mut input)?;
    }

    if let Some(stop) = request.stop_sequences.as_ref().filter(|s| !s.is_empty()) {
        debug!(
            count = stop.len(),
            "Stop sequences are not supported by the Responses API, dropping"
        );
    }

    Ok(AzureRequest {
        model: request.model.clone(),
        input,
        temperature: request.temperature,
        top_p: request.top_p,
        max_output_tokens: request.max_tokens,
        tools: request
            .tools
            .iter()
            .flatten()
            .map(|tool| AzureTool {
                kind: "function",
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.input_schema.clone(),
            })
            .collect(),
        tool_choice: request.tool_choice.as_ref().map(encode_tool_choice),
        previous_response_id: request.previous_response_id.clone(),
        stream,
    })
}

fn encode_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => Value::from("auto"),
        ToolChoice::None => Value::from("none"),
        ToolChoice::Any => Value::from("required"),
        ToolChoice::Tool { name } => serde_json::json!({ "type": "function", "name": name }),
    }
}

fn encode_message(message: &Message, index: usize, input: &mut Vec<InputItem>) -> GatewayResult<()> {
    let role = match message.role {
        Role::System => "system",
        Role::User | Role::Tool => "user",
        Role::Assistant => "assistant",
    };
    let text_part = |text: String| match message.role {
        Role::Assistant => InputContent::OutputText { text },
        _ => InputContent::InputText { text },
    };

    let blocks = match &message.content {
        MessageContent::Text(text) => {
            if message.role == Role::Tool {
                return Err(GatewayError::validation_field(
                    "tool message must carry a tool_result block",
                    format!("messages[{index}]"),
                ));
            }
            if !text.is_empty() {
                input.push(InputItem::Message {
                    role,
                    content: vec![text_part(text.clone())],
                });
            }
            return Ok(());
        }
        MessageContent::Blocks(blocks) => blocks,
    };

    let mut parts = Vec::new();
    let flush = |parts: &mut Vec<InputContent>, input: &mut Vec<InputItem>| {
        if !parts.is_empty() {
            input.push(InputItem::Message {
                role,
                content: std::mem::take(parts),
            });
        }
    };

    for block in blocks {
        match block {
            ContentBlock::Text { text } => parts.push(text_part(text.clone())),
            ContentBlock::Image { source } => parts.push(InputContent::InputImage {
                image_url: match source {
                    ImageSource::Base64 { media_type, data } => {
                        format!("data:{media_type};base64,{data}")
                    }
                    ImageSource::Url { url } => url.clone(),
                },
            }),
            ContentBlock::ToolUse { id, name, input: args } => {
                flush(&mut parts, input);
                input.push(InputItem::FunctionCall {
                    call_id: id.clone(),
                    name: name.clone(),
                    arguments: args.to_string(),
                });
            }
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } => {
                flush(&mut parts, input);
                input.push(InputItem::FunctionCallOutput {
                    call_id: tool_use_id.clone(),
                    output: content.clone(),
                });
            }
        }
    }
    flush(&mut parts, input);
    Ok(())
}

// ============================================================================
// Response types
// ============================================================================

#[derive(Debug, Deserialize)]
struct AzureResponse {
    id: String,
    #[serde(default)]
    created_at: Option<f64>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    incomplete_details: Option<IncompleteDetails>,
    #[serde(default)]
    error: Option<AzureResponseError>,
    #[serde(default)]
    output: Vec<AzureOutputItem>,
    #[serde(default)]
    usage: Option<AzureUsage>,
}

#[derive(Debug, Deserialize)]
struct IncompleteDetails {
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AzureResponseError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AzureOutputItem {
    Message {
        #[serde(default)]
        content: Vec<AzureOutputContent>,
    },
    FunctionCall {
        call_id: String,
        name: String,
        #[serde(default)]
        arguments: String,
    },
    Reasoning {
        #[serde(default)]
        summary: Vec<SummaryPart>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AzureOutputContent {
    OutputText {
        text: String,
    },
    Refusal {
        refusal: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct SummaryPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
struct AzureUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
    #[serde(default)]
    output_tokens_details: Option<OutputTokensDetails>,
}

#[derive(Debug, Default, Deserialize)]
struct OutputTokensDetails {
    #[serde(default)]
    reasoning_tokens: Option<u32>,
}

impl AzureUsage {
    fn to_usage(&self) -> Usage {
        Usage::new(self.input_tokens, self.output_tokens).with_reasoning(
            self.output_tokens_details
                .as_ref()
                .and_then(|d| d.reasoning_tokens),
        )
    }
}

// ============================================================================
// Decode
// ============================================================================

fn finish_reason(response: &AzureResponse, has_tool_calls: bool) -> Option<FinishReason> {
    match response.status.as_deref() {
        Some("incomplete") => {
            let reason = response
                .incomplete_details
                .as_ref()
                .and_then(|d| d.reason.as_deref());
            if reason == Some("content_filter") {
                warn!(provider = PROVIDER, "Response truncated by content filter");
                Some(FinishReason::Stop)
            } else {
                Some(FinishReason::MaxTokens)
            }
        }
        _ if has_tool_calls => Some(FinishReason::ToolUse),
        Some("completed") | None => Some(FinishReason::Stop),
        Some(_) => None,
    }
}

fn failed_response_error(response: &AzureResponse) -> GatewayError {
    let (code, message) = response
        .error
        .as_ref()
        .map(|e| (e.code.clone(), e.message.clone()))
        .unwrap_or_default();
    let message = message.unwrap_or_else(|| "response failed".to_string());
    let subtype = match code.as_deref() {
        Some(c) if c.contains("content_filter") => ProviderErrorType::ContentFiltered,
        Some("rate_limit_exceeded") => return GatewayError::rate_limit(message, None),
        Some("server_error") | None => ProviderErrorType::ServerError,
        Some(other) => ProviderErrorType::Other(other.to_string()),
    };
    GatewayError::provider(PROVIDER, subtype, message, None)
}

fn convert_response(
    response: AzureResponse,
    fallback_model: &str,
    limits: &TransformLimits,
) -> GatewayResult<UnifiedResponse> {
    if response.status.as_deref() == Some("failed") {
        return Err(failed_response_error(&response));
    }
    limits.check_choices_count(response.output.len())?;

    let mut output = Vec::new();
    for item in &response.output {
        match item {
            AzureOutputItem::Message { content } => {
                for part in content {
                    match part {
                        AzureOutputContent::OutputText { text } => output.push(OutputItem::Text {
                            text: redact_pii(text).into_owned(),
                        }),
                        AzureOutputContent::Refusal { refusal } => output.push(OutputItem::Text {
                            text: redact_pii(refusal).into_owned(),
                        }),
                        AzureOutputContent::Unknown => {
                            debug!(provider = PROVIDER, "Skipping unknown message content part");
                        }
                    }
                }
            }
            AzureOutputItem::FunctionCall {
                call_id,
                name,
                arguments,
            } => output.push(OutputItem::ToolCall {
                id: call_id.clone(),
                name: name.clone(),
                arguments: arguments.clone(),
            }),
            AzureOutputItem::Reasoning { summary } => {
                let text: String = summary.iter().map(|p| p.text.as_str()).collect();
                if !text.is_empty() {
                    output.push(OutputItem::Reasoning {
                        text: redact_pii(&text).into_owned(),
                    });
                }
            }
            AzureOutputItem::Unknown => {
                debug!(provider = PROVIDER, "Skipping unknown output item");
            }
        }
    }

    let completion_len: usize = output.iter().map(OutputItem::text_len).sum();
    limits.check_completion_length(completion_len)?;

    let has_tool_calls = output
        .iter()
        .any(|item| matches!(item, OutputItem::ToolCall { .. }));

    #[allow(clippy::cast_possible_truncation)]
    let created = response
        .created_at
        .map_or_else(|| chrono::Utc::now().timestamp(), |t| t as i64);

    Ok(UnifiedResponse {
        id: response.id.clone(),
        created,
        model: response
            .model
            .clone()
            .unwrap_or_else(|| fallback_model.to_string()),
        finish_reason: finish_reason(&response, has_tool_calls),
        usage: response.usage.as_ref().map(AzureUsage::to_usage).unwrap_or_default(),
        output,
    })
}

/// Decode a buffered Responses API body.
///
/// # Errors
/// Validation errors for size violations, provider errors for malformed or failed responses
pub fn decode_response(
    body: &[u8],
    fallback_model: &str,
    limits: &TransformLimits,
) -> GatewayResult<UnifiedResponse> {
    limits.check_response_size(body.len())?;
    let response: AzureResponse = serde_json::from_slice(body).map_err(|e| {
        GatewayError::invalid_response(PROVIDER, format!("malformed response body: {e}"))
    })?;
    convert_response(response, fallback_model, limits)
}

// ============================================================================
// Stream decode
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum AzureStreamEvent {
    #[serde(rename = "response.created")]
    Created { response: StreamResponseHeader },
    #[serde(rename = "response.output_item.added")]
    OutputItemAdded { item: StreamItem },
    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta { delta: String },
    #[serde(rename = "response.refusal.delta")]
    RefusalDelta { delta: String },
    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta { item_id: String, delta: String },
    #[serde(rename = "response.reasoning_summary_text.delta")]
    ReasoningSummaryTextDelta { delta: String },
    #[serde(rename = "response.completed")]
    Completed { response: AzureResponse },
    #[serde(rename = "response.incomplete")]
    Incomplete { response: AzureResponse },
    #[serde(rename = "response.failed")]
    Failed { response: AzureResponse },
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        code: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct StreamResponseHeader {
    id: String,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamItem {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    call_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

const KNOWN_EVENTS: &[&str] = &[
    "response.created",
    "response.output_item.added",
    "response.output_text.delta",
    "response.refusal.delta",
    "response.function_call_arguments.delta",
    "response.reasoning_summary_text.delta",
    "response.completed",
    "response.incomplete",
    "response.failed",
    "error",
];

/// Incremental decoder for Responses API SSE events.
///
/// Emits exactly one `is_complete` chunk over its lifetime.
#[derive(Debug)]
pub struct AzureStreamDecoder {
    limits: TransformLimits,
    response_id: String,
    model: String,
    call_ids: HashMap<String, String>,
    completion_len: usize,
    complete: bool,
}

impl AzureStreamDecoder {
    /// Create a decoder for a stream requested with `model`
    #[must_use]
    pub fn new(model: impl Into<String>, limits: TransformLimits) -> Self {
        Self {
            limits,
            response_id: format!("resp_{}", uuid::Uuid::new_v4().simple()),
            model: model.into(),
            call_ids: HashMap::new(),
            completion_len: 0,
            complete: false,
        }
    }

    /// Whether the terminal chunk has been emitted
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Feed one SSE event, returning the chunks it completes
    pub fn push(&mut self, event: &Event) -> Vec<StreamChunk> {
        let mut chunks = Vec::new();
        if self.complete {
            return chunks;
        }
        if self.limits.check_response_size(event.data.len()).is_err() {
            warn!(
                provider = PROVIDER,
                size = event.data.len(),
                "Stream event exceeds size limit, terminating"
            );
            chunks.push(self.terminate_empty());
            return chunks;
        }
        self.handle_event(Some(event.event.as_str()), &event.data, &mut chunks);
        chunks
    }

    /// Guarantee termination once the upstream closes
    pub fn finish(&mut self) -> Vec<StreamChunk> {
        if self.complete {
            return Vec::new();
        }
        debug!(provider = PROVIDER, "Stream closed without terminal event");
        vec![self.terminate_empty()]
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
        let delta = if reasoning {
            ChunkDelta::Reasoning { text }
        } else {
            ChunkDelta::Text { text }
        };
        chunks.push(self.delta(delta));
    }

    fn handle_event(&mut self, name: Option<&str>, data: &str, chunks: &mut Vec<StreamChunk>) {
        let data = data.trim();
        if data.is_empty() || data == "[DONE]" {
            return;
        }

        let value: Value = match serde_json::from_str(data) {
            Ok(value) => value,
            Err(e) => {
                warn!(provider = PROVIDER, error = %e, size = data.len(), "Malformed stream event");
                let chunk = self.terminate_empty();
                chunks.push(chunk);
                return;
            }
        };

        let event_type = value
            .get("type")
            .and_then(Value::as_str)
            .or(name)
            .unwrap_or_default()
            .to_string();
        if !KNOWN_EVENTS.contains(&event_type.as_str()) {
            debug!(provider = PROVIDER, event_type = %event_type, "Skipping stream event");
            return;
        }

        let mut value = value;
        if value.get("type").is_none() {
            value["type"] = Value::from(event_type.clone());
        }

        let event: AzureStreamEvent = match serde_json::from_value(value) {
            Ok(event) => event,
            Err(e) => {
                warn!(provider = PROVIDER, event_type = %event_type, error = %e, "Malformed stream event");
                let chunk = self.terminate_empty();
                chunks.push(chunk);
                return;
            }
        };

        match event {
            AzureStreamEvent::Created { response } => {
                self.response_id = response.id;
                if let Some(model) = response.model {
                    self.model = model;
                }
            }
            AzureStreamEvent::OutputItemAdded { item } => {
                if item.kind == "function_call" {
                    let call_id = item.call_id.or_else(|| item.id.clone()).unwrap_or_default();
                    if let Some(item_id) = item.id {
                        self.call_ids.insert(item_id, call_id.clone());
                    }
                    chunks.push(self.delta(ChunkDelta::ToolCall {
                        id: call_id,
                        name: item.name,
                        arguments: String::new(),
                    }));
                }
            }
            AzureStreamEvent::OutputTextDelta { delta } | AzureStreamEvent::RefusalDelta { delta } => {
                self.push_text(&delta, false, chunks);
            }
            AzureStreamEvent::ReasoningSummaryTextDelta { delta } => {
                self.push_text(&delta, true, chunks);
            }
            AzureStreamEvent::FunctionCallArgumentsDelta { item_id, delta } => {
                let id = self.call_ids.get(&item_id).cloned().unwrap_or(item_id);
                chunks.push(self.delta(ChunkDelta::ToolCall {
                    id,
                    name: None,
                    arguments: delta,
                }));
            }
            AzureStreamEvent::Completed { response } | AzureStreamEvent::Incomplete { response } => {
                let has_tool_calls = !self.call_ids.is_empty()
                    || response
                        .output
                        .iter()
                        .any(|item| matches!(item, AzureOutputItem::FunctionCall { .. }));
                let finish = finish_reason(&response, has_tool_calls);
                let usage = response.usage.as_ref().map(AzureUsage::to_usage);
                self.complete = true;
                chunks.push(StreamChunk::completed(&self.response_id, &self.model, finish, usage));
            }
            AzureStreamEvent::Failed { response } => {
                let error = failed_response_error(&response);
                warn!(provider = PROVIDER, error = %error, "Upstream reported failed response");
                let chunk = self.terminate_empty();
                chunks.push(chunk);
            }
            AzureStreamEvent::Error { code, message } => {
                warn!(
                    provider = PROVIDER,
                    code = code.as_deref().unwrap_or("unknown"),
                    message_len = message.as_deref().map_or(0, str::len),
                    "Upstream stream error event"
                );
                let chunk = self.terminate_empty();
                chunks.push(chunk);
            }
        }
    }
}

impl StreamDecoder for AzureStreamDecoder {
    type Frame = Event;

    fn push(&mut self, event: Event) -> Vec<StreamChunk> {
        Self::push(self, &event)
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
