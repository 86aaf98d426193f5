//! Test fixtures and sample payloads for integration tests

use gateway_core::{Message, UnifiedRequest};
use gateway_providers::transform::eventstream::encode_frame;
use serde_json::{json, Value};

/// Create a simple single-turn request
pub fn simple_request(model: &str) -> UnifiedRequest {
    UnifiedRequest::builder()
        .model(model)
        .message(Message::user("Hello, how are you?"))
        .build()
        .expect("Failed to build request")
}

/// Create a request with a system prompt and sampling parameters
pub fn request_with_system(model: &str, system: &str, user: &str) -> UnifiedRequest {
    UnifiedRequest::builder()
        .model(model)
        .system(system)
        .message(Message::user(user))
        .temperature(0.5)
        .max_tokens(256)
        .build()
        .expect("Failed to build request")
}

/// Create a streaming request
pub fn streaming_request(model: &str) -> UnifiedRequest {
    UnifiedRequest::builder()
        .model(model)
        .message(Message::user("Tell me a story"))
        .stream(true)
        .build()
        .expect("Failed to build request")
}

/// OpenAI chat completions body
pub fn openai_chat_body(model: &str, messages: &[(&str, &str)], stream: bool) -> Vec<u8> {
    let messages: Vec<Value> = messages
        .iter()
        .map(|(role, content)| json!({"role": role, "content": content}))
        .collect();
    serde_json::to_vec(&json!({
        "model": model,
        "messages": messages,
        "stream": stream,
    }))
    .expect("Failed to encode body")
}

/// Claude messages body
pub fn claude_messages_body(model: &str, system: Option<&str>, user: &str, stream: bool) -> Vec<u8> {
    let mut body = json!({
        "model": model,
        "max_tokens": 256,
        "messages": [{"role": "user", "content": user}],
        "stream": stream,
    });
    if let Some(system) = system {
        body["system"] = json!(system);
    }
    serde_json::to_vec(&body).expect("Failed to encode body")
}

/// Azure Responses API success body
pub fn azure_response(id: &str, model: &str, text: &str) -> Value {
    json!({
        "id": id,
        "created_at": 1_700_000_000,
        "model": model,
        "status": "completed",
        "output": [{
            "type": "message",
            "role": "assistant",
            "content": [{"type": "output_text", "text": text}]
        }],
        "usage": {"input_tokens": 12, "output_tokens": 8, "total_tokens": 20}
    })
}

/// Azure error body
pub fn azure_error(code: &str, message: &str) -> Value {
    json!({"error": {"code": code, "message": message}})
}

fn sse(event: &str, data: &Value) -> String {
    format!("event: {event}\ndata: {data}\n\n")
}

/// Azure SSE stream emitting `deltas` and a terminal `response.completed`
pub fn azure_sse_stream(id: &str, model: &str, deltas: &[&str]) -> String {
    let mut body = sse(
        "response.created",
        &json!({"type": "response.created", "response": {"id": id, "model": model}}),
    );
    for delta in deltas {
        body.push_str(&sse(
            "response.output_text.delta",
            &json!({"type": "response.output_text.delta", "delta": delta}),
        ));
    }
    body.push_str(&sse(
        "response.completed",
        &json!({
            "type": "response.completed",
            "response": {
                "id": id,
                "status": "completed",
                "output": [],
                "usage": {"input_tokens": 5, "output_tokens": 3, "total_tokens": 8}
            }
        }),
    ));
    body
}

/// Bedrock Converse success body
pub fn bedrock_response(text: &str) -> Value {
    json!({
        "output": {"message": {"role": "assistant", "content": [{"text": text}]}},
        "stopReason": "end_turn",
        "usage": {"inputTokens": 9, "outputTokens": 4, "totalTokens": 13}
    })
}

/// One Bedrock event-stream frame
pub fn bedrock_event(event_type: &str, payload: &Value) -> Vec<u8> {
    encode_frame(
        &[(":message-type", "event"), (":event-type", event_type)],
        payload.to_string().as_bytes(),
    )
}

/// Bedrock ConverseStream body emitting `deltas`
pub fn bedrock_event_stream(deltas: &[&str]) -> Vec<u8> {
    let mut body = bedrock_event("messageStart", &json!({"role": "assistant"}));
    for delta in deltas {
        body.extend(bedrock_event(
            "contentBlockDelta",
            &json!({"contentBlockIndex": 0, "delta": {"text": delta}}),
        ));
    }
    body.extend(bedrock_event("messageStop", &json!({"stopReason": "end_turn"})));
    body.extend(bedrock_event(
        "metadata",
        &json!({"usage": {"inputTokens": 4, "outputTokens": 2, "totalTokens": 6}}),
    ));
    body
}
