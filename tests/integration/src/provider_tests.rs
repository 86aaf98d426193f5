//! Provider client tests against mock upstreams

use crate::fixtures::*;
use crate::helpers::*;
use crate::mock_providers::*;
use futures::StreamExt;
use gateway_core::{ErrorKind, FinishReason, InboundFormat, ResponseAccumulator, StreamChunk};
use gateway_providers::ProviderClient;
use serde_json::json;
use std::time::Duration;

mod azure {
    use super::*;

    #[tokio::test]
    async fn test_request_wire_shape_and_headers() {
        init_tracing();
        let mock = MockAzure::new().await;
        mock.mock_response("resp_1", "Hi there").await;
        let client = azure_client(&mock, &ResilienceOptions::default());

        let request = request_with_system("gpt-4o", "Be brief", "Hello");
        let protected = client
            .create_response(&request, &request_context(InboundFormat::OpenAi))
            .await;
        assert_eq!(protected.metadata.attempts, 1);
        let response = protected.into_result().unwrap();
        assert_eq!(response.id, "resp_1");
        assert_eq!(response.text(), "Hi there");
        assert_eq!(response.usage.prompt_tokens, 12);
        assert_eq!(response.usage.completion_tokens, 8);

        let requests = mock.requests().await;
        assert_eq!(requests.len(), 1);
        let headers = &requests[0].headers;
        assert_eq!(headers.get("authorization").unwrap(), "Bearer test-key");
        assert_eq!(headers.get("api-version").unwrap(), "2025-04-01-preview");

        let body: serde_json::Value = requests[0].body_json().unwrap();
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["stream"], false);
        assert_eq!(body["temperature"], json!(0.5));
        assert_eq!(body["max_output_tokens"], 256);
        let input = body["input"].as_array().unwrap();
        assert_eq!(input.len(), 2);
        assert_eq!(input[0]["role"], "system");
        assert_eq!(input[1]["role"], "user");
        assert!(body.get("previous_response_id").is_none());
    }

    #[tokio::test]
    async fn test_multi_turn_keeps_message_count_and_temperature() {
        let mock = MockAzure::new().await;
        mock.mock_response("resp_2", "12").await;
        let client = azure_client(&mock, &ResilienceOptions::default());

        let request = gateway_core::UnifiedRequest::builder()
            .model("gpt-4o")
            .message(gateway_core::Message::user("What is 2 + 2?"))
            .message(gateway_core::Message::assistant("4"))
            .message(gateway_core::Message::user("Times 3?"))
            .temperature(0.7)
            .build()
            .unwrap();
        client
            .create_response(&request, &request_context(InboundFormat::OpenAi))
            .await
            .into_result()
            .unwrap();

        let body = &mock.request_bodies().await[0];
        let roles: Vec<&str> = body["input"]
            .as_array()
            .unwrap()
            .iter()
            .map(|item| item["role"].as_str().unwrap())
            .collect();
        assert_eq!(roles, vec!["user", "assistant", "user"]);
        assert_eq!(body["temperature"], json!(0.7));
        assert!(body.get("tools").is_none());
    }

    #[tokio::test]
    async fn test_stream_decodes_to_chunks() {
        let mock = MockAzure::new().await;
        mock.mock_stream("resp_s", &["Hel", "lo"]).await;
        let client = azure_client(&mock, &ResilienceOptions::default());

        let stream = client
            .create_response_stream(&streaming_request("gpt-4o"), &request_context(InboundFormat::Claude))
            .await
            .into_result()
            .unwrap();
        let chunks: Vec<StreamChunk> = stream.collect().await;

        let mut acc = ResponseAccumulator::new();
        for chunk in &chunks {
            acc.push(chunk);
        }
        assert!(acc.is_complete());
        let response = acc.finish();
        assert_eq!(response.text(), "Hello");
        assert_eq!(response.usage.completion_tokens, 3);
        assert!(chunks.last().unwrap().is_complete);

        let requests = mock.requests().await;
        assert_eq!(requests[0].headers.get("accept").unwrap(), "text/event-stream");
        let body: serde_json::Value = requests[0].body_json().unwrap();
        assert_eq!(body["stream"], true);
    }

    #[tokio::test]
    async fn test_malformed_stream_event_terminates() {
        let mock = MockAzure::new().await;
        mock.mock_raw_stream(
            "event: response.output_text.delta\ndata: {\"type\":\"response.output_text.delta\",\"delta\":\"ok\"}\n\n\
             event: response.output_text.delta\ndata: {broken\n\n"
                .to_string(),
        )
        .await;
        let client = azure_client(&mock, &ResilienceOptions::default());

        let chunks: Vec<StreamChunk> = client
            .create_response_stream(&streaming_request("gpt-4o"), &request_context(InboundFormat::OpenAi))
            .await
            .into_result()
            .unwrap()
            .collect()
            .await;

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text_delta(), Some("ok"));
        assert!(chunks[1].is_complete);
        assert!(chunks[1].interrupted);
    }

    #[tokio::test]
    async fn test_slow_stream_outlives_idle_timeout() {
        let body = azure_sse_stream("resp_slow", AZURE_DEPLOYMENT, &["Hello", " world"]);
        let (head, tail) = body.split_at(body.find("event: response.completed").unwrap());
        let mut steps = vec![BodyStep::Send(head.to_string())];
        for _ in 0..4 {
            steps.push(BodyStep::Wait(Duration::from_millis(400)));
            steps.push(BodyStep::Send(": keep-alive\n\n".to_string()));
        }
        steps.push(BodyStep::Send(tail.to_string()));
        let upstream = ScriptedUpstream::start(steps).await;
        let client = azure_client_at(
            &upstream.azure_base_url(),
            Duration::from_secs(1),
            &ResilienceOptions::default(),
        );

        let chunks: Vec<StreamChunk> = client
            .create_response_stream(&streaming_request("gpt-4o"), &request_context(InboundFormat::OpenAi))
            .await
            .into_result()
            .unwrap()
            .collect()
            .await;

        let last = chunks.last().unwrap();
        assert!(last.is_complete);
        assert!(!last.interrupted);
        let mut acc = ResponseAccumulator::new();
        for chunk in &chunks {
            acc.push(chunk);
        }
        assert_eq!(acc.finish().text(), "Hello world");
    }

    #[tokio::test]
    async fn test_connection_dropped_mid_body_is_interrupted() {
        let body = azure_sse_stream("resp_cut", AZURE_DEPLOYMENT, &["Hel"]);
        let head = &body[..body.find("event: response.completed").unwrap()];
        let upstream = ScriptedUpstream::start(vec![BodyStep::Send(head.to_string()), BodyStep::Abort]).await;
        let client = azure_client_at(
            &upstream.azure_base_url(),
            Duration::from_secs(5),
            &ResilienceOptions::default(),
        );

        let chunks: Vec<StreamChunk> = client
            .create_response_stream(&streaming_request("gpt-4o"), &request_context(InboundFormat::OpenAi))
            .await
            .into_result()
            .unwrap()
            .collect()
            .await;

        assert_eq!(chunks.iter().filter_map(StreamChunk::text_delta).collect::<String>(), "Hel");
        let last = chunks.last().unwrap();
        assert!(last.is_complete);
        assert!(last.interrupted);
        assert_eq!(chunks.iter().filter(|c| c.is_complete).count(), 1);
    }

    #[tokio::test]
    async fn test_bad_request_is_not_retried() {
        let mock = MockAzure::new().await;
        mock.mock_error(400, "invalid_request_error", "bad input", None).await;
        let client = azure_client(&mock, &ResilienceOptions::default());

        let protected = client
            .create_response(&simple_request("gpt-4o"), &request_context(InboundFormat::OpenAi))
            .await;
        assert_eq!(protected.metadata.attempts, 1);
        let error = protected.into_result().unwrap_err();
        assert_eq!(error.kind(), ErrorKind::ProviderError);
        assert_eq!(error.status_code().as_u16(), 400);
        assert_eq!(mock.requests().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unauthorized_maps_to_authentication() {
        let mock = MockAzure::new().await;
        mock.mock_error(401, "invalid_api_key", "no", None).await;
        let client = azure_client(&mock, &ResilienceOptions::default());

        let error = client
            .create_response(&simple_request("gpt-4o"), &request_context(InboundFormat::OpenAi))
            .await
            .into_result()
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Authentication);
        assert_eq!(mock.requests().await.len(), 1);
    }
}

mod bedrock {
    use super::*;

    #[tokio::test]
    async fn test_converse_wire_shape_and_headers() {
        let mock = MockBedrock::new().await;
        mock.mock_converse("Bonjour").await;
        let client = bedrock_client(&mock, &ResilienceOptions::default());

        let request = request_with_system(BEDROCK_MODEL, "Answer in French", "Hello");
        let response = client
            .create_response(&request, &request_context(InboundFormat::Claude))
            .await
            .into_result()
            .unwrap();
        assert!(response.id.starts_with("bedrock_"));
        assert_eq!(response.text(), "Bonjour");
        assert_eq!(response.finish_reason, Some(FinishReason::Stop));
        assert_eq!(response.usage.total_tokens, 13);

        let requests = mock.requests().await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].headers.get("x-amz-region").unwrap(), "us-east-1");
        assert_eq!(requests[0].headers.get("authorization").unwrap(), "Bearer test-key");

        let body: serde_json::Value = requests[0].body_json().unwrap();
        assert_eq!(body["system"], json!([{"text": "Answer in French"}]));
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"][0]["text"], "Hello");
        assert_eq!(body["inferenceConfig"]["maxTokens"], 256);
    }

    #[tokio::test]
    async fn test_converse_stream() {
        let mock = MockBedrock::new().await;
        mock.mock_stream(&["Bon", "jour"]).await;
        let client = bedrock_client(&mock, &ResilienceOptions::default());

        let chunks: Vec<StreamChunk> = client
            .create_response_stream(&streaming_request(BEDROCK_MODEL), &request_context(InboundFormat::Claude))
            .await
            .into_result()
            .unwrap()
            .collect()
            .await;

        let mut acc = ResponseAccumulator::new();
        for chunk in &chunks {
            acc.push(chunk);
        }
        assert!(acc.is_complete());
        let response = acc.finish();
        assert_eq!(response.text(), "Bonjour");
        assert_eq!(response.finish_reason, Some(FinishReason::Stop));
        assert_eq!(response.usage.completion_tokens, 2);

        let requests = mock.requests().await;
        assert_eq!(requests[0].url.path(), "/model/anthropic.claude-v2/converse-stream");
    }

    #[tokio::test]
    async fn test_validation_exception_is_not_retried() {
        let mock = MockBedrock::new().await;
        mock.mock_error(400, "ValidationException", "messages must alternate").await;
        let client = bedrock_client(&mock, &ResilienceOptions::default());

        let protected = client
            .create_response(&simple_request(BEDROCK_MODEL), &request_context(InboundFormat::Claude))
            .await;
        assert_eq!(protected.metadata.attempts, 1);
        assert_eq!(protected.into_result().unwrap_err().kind(), ErrorKind::ProviderError);
    }
}
