//! The per-request pipeline.
//!
//! `handle` validates the request, routes it, lets the continuity manager
//! decide on chaining, runs the protected provider call and records the turn.
//! Only providers that keep server-side history take part in chaining; turns
//! served by other providers are recorded but never chained onto.
//! Streamed turns are recorded once the stream completes; a caller that stops
//! reading early drops the upstream connection and nothing is recorded. A
//! stream that ends abnormally counts as a conversation error.

use futures::StreamExt;
use gateway_continuity::{ContextComplexity, ConversationEntry, ConversationManager, ProcessedRequest};
use gateway_core::{
    ChunkStream, ConversationId, CorrelationId, GatewayResult, InboundFormat, RequestLimits,
    ResponseAccumulator, UnifiedRequest, UnifiedResponse,
};
use gateway_providers::{ProviderClient, RequestContext, CREATE_RESPONSE, CREATE_RESPONSE_STREAM};
use gateway_resilience::{CallMetadata, CircuitBreakerMetrics, CircuitBreakerRegistry, Protected};
use gateway_telemetry::request_span;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn, Instrument};

use crate::router::ProviderRouter;

/// Identity of one inbound call
#[derive(Debug, Clone)]
pub struct HandleContext {
    /// Correlation id
    pub correlation_id: CorrelationId,
    /// Conversation the call belongs to, if the caller tracks one
    pub conversation_id: Option<ConversationId>,
    /// Caller's wire format
    pub format: InboundFormat,
}

impl HandleContext {
    /// Context without a conversation
    #[must_use]
    pub fn new(correlation_id: CorrelationId, format: InboundFormat) -> Self {
        Self {
            correlation_id,
            conversation_id: None,
            format,
        }
    }

    /// Attach a conversation
    #[must_use]
    pub fn with_conversation(mut self, conversation_id: ConversationId) -> Self {
        self.conversation_id = Some(conversation_id);
        self
    }
}

/// Response or stream produced for a call
pub enum ReplyBody {
    /// Buffered response
    Complete(UnifiedResponse),
    /// Streamed response, ending with exactly one completed chunk
    Stream(ChunkStream),
}

impl std::fmt::Debug for ReplyBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Complete(response) => f.debug_tuple("Complete").field(response).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Successful outcome of [`Gateway::handle`]
#[derive(Debug)]
pub struct GatewayReply {
    /// Provider that served the call
    pub provider: String,
    /// Response or stream
    pub body: ReplyBody,
    /// Retry, breaker and fallback metadata
    pub metadata: CallMetadata,
    /// Whether the request chained onto a previous response
    pub chained: bool,
    /// Complexity of the request context
    pub complexity: ContextComplexity,
}

/// Protocol gateway
#[derive(Debug)]
pub struct Gateway {
    router: ProviderRouter,
    conversations: Arc<ConversationManager>,
    breakers: Arc<CircuitBreakerRegistry>,
    limits: RequestLimits,
    development_mode: bool,
}

impl Gateway {
    pub(crate) fn new(
        router: ProviderRouter,
        conversations: Arc<ConversationManager>,
        breakers: Arc<CircuitBreakerRegistry>,
        limits: RequestLimits,
        development_mode: bool,
    ) -> Self {
        Self {
            router,
            conversations,
            breakers,
            limits,
            development_mode,
        }
    }

    /// Conversation manager
    #[must_use]
    pub fn conversations(&self) -> &Arc<ConversationManager> {
        &self.conversations
    }

    /// Provider router
    #[must_use]
    pub fn router(&self) -> &ProviderRouter {
        &self.router
    }

    /// Whether client errors carry debug details
    #[must_use]
    pub fn development_mode(&self) -> bool {
        self.development_mode
    }

    /// Breaker metrics of every provider, sorted by provider id
    #[must_use]
    pub fn breaker_metrics(&self) -> Vec<CircuitBreakerMetrics> {
        self.router
            .providers()
            .into_iter()
            .map(|p| p.breaker_metrics())
            .collect()
    }

    /// Close every breaker and drop all conversations
    pub fn reset(&self) {
        self.breakers.reset_all();
        self.conversations.reset();
        info!("Gateway state reset");
    }

    /// Handle one request.
    ///
    /// # Errors
    /// Returns the classified error of a rejected or failed call
    pub async fn handle(
        &self,
        request: UnifiedRequest,
        context: &HandleContext,
    ) -> GatewayResult<GatewayReply> {
        let operation = if request.stream {
            CREATE_RESPONSE_STREAM
        } else {
            CREATE_RESPONSE
        };
        let span = request_span(context.correlation_id.as_str(), operation);
        self.handle_inner(request, context).instrument(span).await
    }

    async fn handle_inner(
        &self,
        request: UnifiedRequest,
        context: &HandleContext,
    ) -> GatewayResult<GatewayReply> {
        request.validate(&self.limits)?;
        let provider = self.router.route(&request.model)?;
        let chainable = provider.supports_response_chaining();

        let processed = if chainable {
            self.conversations.process_request(
                &request,
                context.conversation_id.as_ref(),
                &context.correlation_id,
            )
        } else {
            debug!(provider = %provider.id(), "Provider keeps no server-side history, sending full context");
            ProcessedRequest::unchained(&request)
        };
        debug!(
            provider = %provider.id(),
            model = %request.model,
            format = %context.format,
            streaming = request.stream,
            chained = processed.should_use_previous_response,
            complexity = %processed.context_complexity,
            "Dispatching request"
        );

        let call = RequestContext::new(context.correlation_id.clone(), context.format);
        let started = Instant::now();
        let recorder = context.conversation_id.clone().map(|conversation_id| TurnRecorder {
            manager: Arc::clone(&self.conversations),
            conversation_id,
            correlation_id: context.correlation_id.clone(),
            request: request.clone(),
            chainable,
            started,
        });

        let (body, metadata) = if request.stream {
            let protected = provider
                .create_response_stream(&processed.enhanced_request, &call)
                .await;
            let (stream, metadata) = self.settle(protected, provider.as_ref(), context)?;
            (ReplyBody::Stream(track_stream(stream, recorder)), metadata)
        } else {
            let protected = provider
                .create_response(&processed.enhanced_request, &call)
                .await;
            let (response, metadata) = self.settle(protected, provider.as_ref(), context)?;

            match recorder {
                Some(recorder) if !metadata.fallback_used => recorder.record(&response),
                Some(recorder) => {
                    debug!(conversation_id = %recorder.conversation_id, "Degraded response not recorded");
                }
                None => {}
            }

            info!(
                provider = %provider.id(),
                model = %response.model,
                duration_ms = elapsed_ms(started),
                attempts = metadata.attempts,
                fallback_used = metadata.fallback_used,
                prompt_tokens = response.usage.prompt_tokens,
                completion_tokens = response.usage.completion_tokens,
                "Response completed"
            );
            (ReplyBody::Complete(response), metadata)
        };

        Ok(GatewayReply {
            provider: provider.id().to_string(),
            body,
            metadata,
            chained: processed.should_use_previous_response,
            complexity: processed.context_complexity,
        })
    }

    /// Split a protected result, logging and counting failures against the conversation
    fn settle<T>(
        &self,
        protected: Protected<T>,
        provider: &dyn ProviderClient,
        context: &HandleContext,
    ) -> GatewayResult<(T, CallMetadata)> {
        let metadata = protected.metadata;
        match protected.result {
            Ok(value) => Ok((value, metadata)),
            Err(e) => {
                error!(
                    provider = %provider.id(),
                    kind = %e.kind(),
                    attempts = metadata.attempts,
                    circuit_breaker_used = metadata.circuit_breaker_used,
                    error = %e,
                    "Provider call failed"
                );
                if let Some(conversation_id) = &context.conversation_id {
                    self.conversations.record_conversation_error(conversation_id);
                }
                Err(e)
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Records a turn against its conversation
struct TurnRecorder {
    manager: Arc<ConversationManager>,
    conversation_id: ConversationId,
    correlation_id: CorrelationId,
    request: UnifiedRequest,
    chainable: bool,
    started: Instant,
}

impl TurnRecorder {
    fn record(self, response: &UnifiedResponse) {
        if response.output.is_empty() {
            warn!(
                conversation_id = %self.conversation_id,
                "Response completed without output"
            );
            self.fail();
            return;
        }
        let entry = ConversationEntry::from_turn(
            self.conversation_id,
            self.correlation_id,
            &self.request,
            response,
            elapsed_ms(self.started),
        )
        .with_chainable(self.chainable);
        self.manager.add_to_conversation_history(entry);
    }

    fn fail(&self) {
        self.manager.record_conversation_error(&self.conversation_id);
    }
}

/// Pass chunks through until the completed chunk, then record the turn
fn track_stream(inner: ChunkStream, recorder: Option<TurnRecorder>) -> ChunkStream {
    Box::pin(async_stream::stream! {
        let mut inner = inner;
        let mut accumulator = ResponseAccumulator::new();
        while let Some(chunk) = inner.next().await {
            accumulator.push(&chunk);
            let done = chunk.is_complete;
            yield chunk;
            if done {
                break;
            }
        }

        if accumulator.is_interrupted() {
            warn!("Upstream stream ended abnormally, turn not recorded");
            if let Some(recorder) = &recorder {
                recorder.fail();
            }
        } else if accumulator.is_complete() {
            let response = accumulator.finish();
            debug!(
                model = %response.model,
                completion_tokens = response.usage.completion_tokens,
                "Stream completed"
            );
            if let Some(recorder) = recorder {
                recorder.record(&response);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::GatewayBuilder;
    use async_trait::async_trait;
    use futures::stream;
    use gateway_core::{
        ChunkDelta, ErrorKind, FinishReason, GatewayError, Message, OutputItem, StreamChunk, Usage,
    };
    use gateway_resilience::CircuitBreaker;
    use std::sync::Mutex;

    enum Behavior {
        Reply,
        Fail,
        Degrade,
        Interrupt,
    }

    struct Scripted {
        behavior: Behavior,
        chaining: bool,
        previous_ids: Mutex<Vec<Option<String>>>,
        message_counts: Mutex<Vec<usize>>,
    }

    impl Scripted {
        fn new(behavior: Behavior) -> Arc<Self> {
            Self::build(behavior, true)
        }

        fn without_chaining(behavior: Behavior) -> Arc<Self> {
            Self::build(behavior, false)
        }

        fn build(behavior: Behavior, chaining: bool) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                chaining,
                previous_ids: Mutex::new(Vec::new()),
                message_counts: Mutex::new(Vec::new()),
            })
        }

        fn seen(&self, request: &UnifiedRequest) -> usize {
            let mut ids = self.previous_ids.lock().unwrap();
            ids.push(request.previous_response_id.clone());
            self.message_counts.lock().unwrap().push(request.messages.len());
            ids.len()
        }

        fn previous_ids(&self) -> Vec<Option<String>> {
            self.previous_ids.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProviderClient for Scripted {
        fn id(&self) -> &str {
            "azure"
        }

        fn breaker_metrics(&self) -> CircuitBreakerMetrics {
            CircuitBreaker::with_defaults("azure").metrics()
        }

        fn supports_response_chaining(&self) -> bool {
            self.chaining
        }

        async fn create_response(&self, request: &UnifiedRequest, _: &RequestContext) -> Protected<UnifiedResponse> {
            let n = self.seen(request);
            match self.behavior {
                Behavior::Reply | Behavior::Interrupt => Protected {
                    result: Ok(UnifiedResponse::new(format!("resp_{n}"), "gpt-4o")
                        .with_output(OutputItem::Text { text: "hello".into() })
                        .with_finish_reason(FinishReason::Stop)
                        .with_usage(Usage::new(10, 2))),
                    metadata: CallMetadata { attempts: 1, ..CallMetadata::default() },
                },
                Behavior::Fail => Protected {
                    result: Err(GatewayError::service_unavailable("down", None)),
                    metadata: CallMetadata { attempts: 3, ..CallMetadata::default() },
                },
                Behavior::Degrade => Protected {
                    result: Ok(UnifiedResponse::new("fallback_x", "gpt-4o")),
                    metadata: CallMetadata { attempts: 3, fallback_used: true, ..CallMetadata::default() },
                },
            }
        }

        async fn create_response_stream(&self, request: &UnifiedRequest, _: &RequestContext) -> Protected<ChunkStream> {
            self.seen(request);
            let chunks = match self.behavior {
                Behavior::Interrupt => vec![
                    StreamChunk::text("resp_s", "gpt-4o", "hel"),
                    StreamChunk::interrupted("resp_s", "gpt-4o"),
                ],
                _ => vec![
                    StreamChunk::text("resp_s", "gpt-4o", "hel"),
                    StreamChunk::delta("resp_s", "gpt-4o", ChunkDelta::Text { text: "lo".into() }),
                    StreamChunk::completed("resp_s", "gpt-4o", Some(FinishReason::Stop), Some(Usage::new(4, 2))),
                    StreamChunk::text("resp_s", "gpt-4o", "ignored"),
                ],
            };
            Protected {
                result: Ok(Box::pin(stream::iter(chunks))),
                metadata: CallMetadata { attempts: 1, ..CallMetadata::default() },
            }
        }
    }

    fn gateway(provider: Arc<Scripted>) -> Gateway {
        GatewayBuilder::new().with_provider(provider).build().unwrap()
    }

    fn context(conversation: Option<&str>) -> HandleContext {
        let context = HandleContext::new(CorrelationId::new("corr"), InboundFormat::OpenAi);
        match conversation {
            Some(id) => context.with_conversation(ConversationId::new(id).unwrap()),
            None => context,
        }
    }

    fn request(messages: Vec<Message>, stream: bool) -> UnifiedRequest {
        UnifiedRequest::builder()
            .model("gpt-4o")
            .messages(messages)
            .stream(stream)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_second_turn_chains_previous_response() {
        let provider = Scripted::new(Behavior::Reply);
        let gateway = gateway(Arc::clone(&provider));
        let ctx = context(Some("conv-1"));

        let first = gateway
            .handle(request(vec![Message::user("hi")], false), &ctx)
            .await
            .unwrap();
        assert!(!first.chained);
        assert_eq!(first.provider, "azure");

        let second = gateway
            .handle(
                request(
                    vec![Message::user("hi"), Message::assistant("hello"), Message::user("more")],
                    false,
                ),
                &ctx,
            )
            .await
            .unwrap();
        assert!(second.chained);
        assert_eq!(provider.previous_ids(), vec![None, Some("resp_1".to_string())]);
        assert_eq!(*provider.message_counts.lock().unwrap(), vec![1, 1]);

        let history = gateway
            .conversations()
            .get_conversation_history(&ConversationId::new("conv-1").unwrap());
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].request_messages, 3);
    }

    #[tokio::test]
    async fn test_failure_counts_against_conversation() {
        let provider = Scripted::new(Behavior::Fail);
        let gateway = gateway(provider);
        let ctx = context(Some("conv-1"));
        let id = ConversationId::new("conv-1").unwrap();
        gateway
            .conversations()
            .add_to_conversation_history(ConversationEntry::from_turn(
                id.clone(),
                CorrelationId::new("c0"),
                &request(vec![Message::user("a")], false),
                &UnifiedResponse::new("resp_0", "gpt-4o"),
                1,
            ));

        let error = gateway
            .handle(request(vec![Message::user("hi")], false), &ctx)
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::ServiceUnavailable);
        let state = gateway.conversations().get_conversation_state(&id).unwrap();
        assert_eq!(state.metrics.error_count, 1);
    }

    #[tokio::test]
    async fn test_degraded_response_not_recorded() {
        let gateway = gateway(Scripted::new(Behavior::Degrade));
        let reply = gateway
            .handle(request(vec![Message::user("hi")], false), &context(Some("conv-1")))
            .await
            .unwrap();
        assert!(reply.metadata.fallback_used);
        assert!(gateway
            .conversations()
            .get_conversation_state(&ConversationId::new("conv-1").unwrap())
            .is_none());
    }

    #[tokio::test]
    async fn test_invalid_request_rejected_before_routing() {
        let provider = Scripted::new(Behavior::Reply);
        let gateway = gateway(Arc::clone(&provider));
        let mut bad = request(vec![Message::user("hi")], false);
        bad.messages.clear();

        let error = gateway.handle(bad, &context(None)).await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Validation);
        assert!(provider.previous_ids().is_empty());
    }

    #[tokio::test]
    async fn test_stream_stops_at_completion_and_records_turn() {
        let gateway = gateway(Scripted::new(Behavior::Reply));
        let reply = gateway
            .handle(request(vec![Message::user("hi")], true), &context(Some("conv-s")))
            .await
            .unwrap();
        let ReplyBody::Stream(stream) = reply.body else {
            panic!("expected a stream");
        };
        let chunks: Vec<StreamChunk> = stream.collect().await;

        assert_eq!(chunks.len(), 3);
        assert!(chunks.last().unwrap().is_complete);
        let history = gateway
            .conversations()
            .get_conversation_history(&ConversationId::new("conv-s").unwrap());
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].response_id.as_deref(), Some("resp_s"));
        assert_eq!(history[0].output_chars, 5);
    }

    #[tokio::test]
    async fn test_abandoned_stream_records_nothing() {
        let gateway = gateway(Scripted::new(Behavior::Reply));
        let reply = gateway
            .handle(request(vec![Message::user("hi")], true), &context(Some("conv-s")))
            .await
            .unwrap();
        let ReplyBody::Stream(mut stream) = reply.body else {
            panic!("expected a stream");
        };
        let first = stream.next().await.unwrap();
        assert!(!first.is_complete);
        drop(stream);

        assert!(gateway
            .conversations()
            .get_conversation_state(&ConversationId::new("conv-s").unwrap())
            .is_none());
    }

    #[tokio::test]
    async fn test_provider_without_chaining_gets_full_history() {
        let provider = Scripted::without_chaining(Behavior::Reply);
        let gateway = gateway(Arc::clone(&provider));
        let ctx = context(Some("conv-b"));
        let id = ConversationId::new("conv-b").unwrap();

        gateway
            .handle(request(vec![Message::user("hi")], false), &ctx)
            .await
            .unwrap();
        let second = gateway
            .handle(
                request(
                    vec![Message::user("hi"), Message::assistant("hello"), Message::user("more")],
                    false,
                ),
                &ctx,
            )
            .await
            .unwrap();

        assert!(!second.chained);
        assert_eq!(provider.previous_ids(), vec![None, None]);
        assert_eq!(*provider.message_counts.lock().unwrap(), vec![1, 3]);
        let state = gateway.conversations().get_conversation_state(&id).unwrap();
        assert_eq!(state.history.len(), 2);
        assert!(state.history.iter().all(|entry| !entry.chainable));
        assert!(state.last_response_id.is_none());
    }

    #[tokio::test]
    async fn test_interrupted_stream_counts_as_error() {
        let gateway = gateway(Scripted::new(Behavior::Interrupt));
        let ctx = context(Some("conv-i"));
        let id = ConversationId::new("conv-i").unwrap();
        gateway
            .handle(request(vec![Message::user("hi")], false), &ctx)
            .await
            .unwrap();

        let reply = gateway
            .handle(
                request(
                    vec![Message::user("hi"), Message::assistant("hello"), Message::user("more")],
                    true,
                ),
                &ctx,
            )
            .await
            .unwrap();
        let ReplyBody::Stream(stream) = reply.body else {
            panic!("expected a stream");
        };
        let chunks: Vec<StreamChunk> = stream.collect().await;
        let last = chunks.last().unwrap();
        assert!(last.is_complete);
        assert!(last.interrupted);

        let state = gateway.conversations().get_conversation_state(&id).unwrap();
        assert_eq!(state.metrics.error_count, 1);
        assert_eq!(state.history.len(), 1);
        assert_eq!(state.last_response_id.as_deref(), Some("resp_1"));
    }
}
