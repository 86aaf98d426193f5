//! End-to-end flows: inbound wire format, routing, upstream call, rendering

use crate::fixtures::*;
use crate::helpers::*;
use crate::mock_providers::*;
use futures::StreamExt;
use gateway_core::inbound::SseEvent;
use gateway_core::{ConversationId, CorrelationId, InboundFormat};
use gateway_orchestrator::{ClientReply, Gateway, GatewayBuilder, HandleContext};
use serde_json::Value;
use std::time::Duration;

struct Harness {
    azure: MockAzure,
    bedrock: MockBedrock,
    gateway: Gateway,
}

impl Harness {
    async fn new() -> Self {
        Self::with_azure_url(None).await
    }

    /// Harness whose Azure provider points at `azure_url` instead of the mock
    async fn with_azure_url(azure_url: Option<String>) -> Self {
        init_tracing();
        let azure = MockAzure::new().await;
        let bedrock = MockBedrock::new().await;
        let mut config = gateway_config(&azure, &bedrock);
        if let (Some(url), Some(settings)) = (azure_url, config.providers.azure.as_mut()) {
            settings.base_url = url;
        }
        let gateway = GatewayBuilder::from_config(&config)
            .expect("config is valid")
            .build()
            .expect("gateway builds");
        Self {
            azure,
            bedrock,
            gateway,
        }
    }
}

fn context(format: InboundFormat) -> HandleContext {
    HandleContext::new(CorrelationId::new("corr-e2e"), format)
}

fn json_body(reply: ClientReply) -> Value {
    match reply {
        ClientReply::Json { body, .. } => body,
        other => panic!("expected JSON reply, got {other:?}"),
    }
}

async fn events(reply: ClientReply) -> Vec<SseEvent> {
    match reply {
        ClientReply::Events(stream) => stream.collect().await,
        other => panic!("expected event stream, got {other:?}"),
    }
}

#[tokio::test]
async fn test_openai_request_served_by_azure() {
    let harness = Harness::new().await;
    harness.azure.mock_response("resp_1", "Hello from Azure").await;

    let body = openai_chat_body("gpt-4o", &[("system", "Be kind"), ("user", "Hi")], false);
    let reply = harness
        .gateway
        .handle_inbound(&body, &context(InboundFormat::OpenAi))
        .await;
    assert_eq!(reply.status().as_u16(), 200);

    let body = json_body(reply);
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["choices"][0]["message"]["content"], "Hello from Azure");
    assert_eq!(body["usage"]["prompt_tokens"], 12);

    let sent = harness.azure.request_bodies().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["input"][0]["role"], "system");
    assert!(harness.bedrock.requests().await.is_empty());
}

#[tokio::test]
async fn test_claude_request_routed_to_bedrock() {
    let harness = Harness::new().await;
    harness.bedrock.mock_converse("Bonjour").await;

    let body = claude_messages_body(BEDROCK_MODEL, Some("Answer in French"), "Hello", false);
    let reply = harness
        .gateway
        .handle_inbound(&body, &context(InboundFormat::Claude))
        .await;

    let body = json_body(reply);
    assert_eq!(body["type"], "message");
    assert_eq!(body["role"], "assistant");
    assert_eq!(body["content"][0]["type"], "text");
    assert_eq!(body["content"][0]["text"], "Bonjour");
    assert_eq!(body["stop_reason"], "end_turn");

    assert_eq!(harness.bedrock.requests().await.len(), 1);
    assert!(harness.azure.requests().await.is_empty());
}

#[tokio::test]
async fn test_second_turn_chains_previous_response() {
    let harness = Harness::new().await;
    harness.azure.mock_response("resp_1", "Rust is a systems language").await;
    let conversation = ConversationId::new("conv-chain").unwrap();
    let ctx = context(InboundFormat::OpenAi).with_conversation(conversation.clone());

    let first = openai_chat_body("gpt-4o", &[("user", "What is Rust?")], false);
    assert_eq!(harness.gateway.handle_inbound(&first, &ctx).await.status().as_u16(), 200);

    let second = openai_chat_body(
        "gpt-4o",
        &[
            ("user", "What is Rust?"),
            ("assistant", "Rust is a systems language"),
            ("user", "Who created it?"),
        ],
        false,
    );
    assert_eq!(harness.gateway.handle_inbound(&second, &ctx).await.status().as_u16(), 200);

    let sent = harness.azure.request_bodies().await;
    assert_eq!(sent.len(), 2);
    assert!(sent[0].get("previous_response_id").is_none());
    assert_eq!(sent[1]["previous_response_id"], "resp_1");
    let input = sent[1]["input"].as_array().unwrap();
    assert_eq!(input.len(), 1);
    assert_eq!(input[0]["role"], "user");

    let state = harness
        .gateway
        .conversations()
        .get_conversation_state(&conversation)
        .unwrap();
    assert_eq!(state.metrics.total_turns, 2);
    assert_eq!(state.last_response_id.as_deref(), Some("resp_1"));
}

#[tokio::test]
async fn test_claude_stream_from_azure() {
    let harness = Harness::new().await;
    harness.azure.mock_stream("resp_s", &["Hel", "lo"]).await;
    let conversation = ConversationId::new("conv-stream").unwrap();
    let ctx = context(InboundFormat::Claude).with_conversation(conversation.clone());

    let body = claude_messages_body("gpt-4o", None, "Say hello", true);
    let events = events(harness.gateway.handle_inbound(&body, &ctx).await).await;

    assert_eq!(events.first().unwrap().event.as_deref(), Some("message_start"));
    assert_eq!(events.last().unwrap().event.as_deref(), Some("message_stop"));
    let text: String = events
        .iter()
        .filter(|e| e.event.as_deref() == Some("content_block_delta"))
        .filter_map(|e| serde_json::from_str::<Value>(&e.data).ok())
        .filter_map(|v| v["delta"]["text"].as_str().map(str::to_string))
        .collect();
    assert_eq!(text, "Hello");

    let history = harness
        .gateway
        .conversations()
        .get_conversation_history(&conversation);
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn test_openai_stream_ends_with_done() {
    let harness = Harness::new().await;
    harness.azure.mock_stream("resp_s", &["a", "b"]).await;

    let body = openai_chat_body("gpt-4o", &[("user", "Go")], true);
    let events = events(
        harness
            .gateway
            .handle_inbound(&body, &context(InboundFormat::OpenAi))
            .await,
    )
    .await;
    assert_eq!(events.last().unwrap().data, "[DONE]");
}

#[tokio::test]
async fn test_upstream_error_rendered_in_caller_format() {
    let harness = Harness::new().await;
    harness.azure.mock_error(401, "invalid_api_key", "bad key", None).await;

    let body = openai_chat_body("gpt-4o", &[("user", "Hi")], false);
    let reply = harness
        .gateway
        .handle_inbound(&body, &context(InboundFormat::OpenAi))
        .await;
    let ClientReply::Error(error) = reply else {
        panic!("expected error reply");
    };
    assert_eq!(error.status.as_u16(), 401);
    assert_eq!(error.body["correlation_id"], "corr-e2e");
    assert!(error.body["error"]["message"].is_string());
    assert!(error.body["error"].get("details").is_none());
}

#[tokio::test]
async fn test_malformed_body_rejected_before_upstream() {
    let harness = Harness::new().await;

    let reply = harness
        .gateway
        .handle_inbound(b"{\"model\": ", &context(InboundFormat::Claude))
        .await;
    let ClientReply::Error(error) = reply else {
        panic!("expected error reply");
    };
    assert_eq!(error.status.as_u16(), 400);
    assert_eq!(error.body["type"], "error");
    assert_eq!(error.body["correlation_id"], "corr-e2e");
    assert!(harness.azure.requests().await.is_empty());
    assert!(harness.bedrock.requests().await.is_empty());
}

#[tokio::test]
async fn test_breaker_metrics_cover_both_providers() {
    let harness = Harness::new().await;
    let names: Vec<String> = harness
        .gateway
        .breaker_metrics()
        .into_iter()
        .map(|m| m.name)
        .collect();
    assert_eq!(names, vec!["azure".to_string(), "bedrock".to_string()]);
}

#[tokio::test]
async fn test_bedrock_turns_resend_full_history() {
    let harness = Harness::new().await;
    harness.bedrock.mock_converse("Rust is a systems language").await;
    let conversation = ConversationId::new("conv-b").unwrap();
    let ctx = context(InboundFormat::OpenAi).with_conversation(conversation.clone());

    let first = openai_chat_body(BEDROCK_MODEL, &[("user", "What is Rust?")], false);
    assert_eq!(harness.gateway.handle_inbound(&first, &ctx).await.status().as_u16(), 200);

    let second = openai_chat_body(
        BEDROCK_MODEL,
        &[
            ("user", "What is Rust?"),
            ("assistant", "Rust is a systems language"),
            ("user", "Who created it?"),
        ],
        false,
    );
    assert_eq!(harness.gateway.handle_inbound(&second, &ctx).await.status().as_u16(), 200);

    let sent = harness.bedrock.request_bodies().await;
    assert_eq!(sent.len(), 2);
    let messages = sent[1]["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[2]["content"][0]["text"], "Who created it?");
    assert!(sent[1].get("previous_response_id").is_none());

    let state = harness
        .gateway
        .conversations()
        .get_conversation_state(&conversation)
        .unwrap();
    assert_eq!(state.metrics.total_turns, 2);
    assert!(state.last_response_id.is_none());
}

#[tokio::test]
async fn test_stream_cut_off_upstream_counts_as_error() {
    let complete = azure_sse_stream("resp_1", AZURE_DEPLOYMENT, &["Rust is", " a language"]);
    let partial = azure_sse_stream("resp_2", AZURE_DEPLOYMENT, &["Graydon"]);
    let partial = partial[..partial.find("event: response.completed").unwrap()].to_string();
    let upstream = ScriptedUpstream::start_sequence(vec![
        vec![BodyStep::Send(complete)],
        vec![
            BodyStep::Send(partial),
            BodyStep::Wait(Duration::from_millis(50)),
            BodyStep::Abort,
        ],
    ])
    .await;
    let harness = Harness::with_azure_url(Some(upstream.azure_base_url())).await;
    let conversation = ConversationId::new("conv-cut").unwrap();
    let ctx = context(InboundFormat::OpenAi).with_conversation(conversation.clone());

    let first = openai_chat_body("gpt-4o", &[("user", "What is Rust?")], true);
    events(harness.gateway.handle_inbound(&first, &ctx).await).await;

    let second = openai_chat_body(
        "gpt-4o",
        &[
            ("user", "What is Rust?"),
            ("assistant", "Rust is a language"),
            ("user", "Who created it?"),
        ],
        true,
    );
    let events = events(harness.gateway.handle_inbound(&second, &ctx).await).await;
    assert_eq!(events.last().unwrap().data, "[DONE]");

    let state = harness
        .gateway
        .conversations()
        .get_conversation_state(&conversation)
        .unwrap();
    assert_eq!(state.history.len(), 1);
    assert_eq!(state.metrics.error_count, 1);
    assert_eq!(state.last_response_id.as_deref(), Some("resp_1"));
}
