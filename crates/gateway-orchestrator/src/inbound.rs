//! Claude and OpenAI front doors.
//!
//! Parses the caller's wire format, runs [`Gateway::handle`] and renders the
//! reply, stream or error back in the same format.

use crate::gateway::{Gateway, HandleContext, ReplyBody};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use gateway_core::inbound::claude::{ClaudeRequest, ClaudeResponse, ClaudeStreamEncoder};
use gateway_core::inbound::openai::{OpenAiRequest, OpenAiResponse, OpenAiStreamEncoder};
use gateway_core::inbound::SseEvent;
use gateway_core::{GatewayError, GatewayResult, InboundFormat, UnifiedRequest, UnifiedResponse};
use gateway_resilience::{to_client_response, ClientErrorResponse};
use http::StatusCode;
use serde_json::Value;

/// Reply rendered in the caller's wire format
pub enum ClientReply {
    /// Buffered JSON body
    Json {
        /// HTTP status
        status: StatusCode,
        /// Response body
        body: Value,
    },
    /// Server-sent events
    Events(BoxStream<'static, SseEvent>),
    /// Error payload
    Error(ClientErrorResponse),
}

impl std::fmt::Debug for ClientReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json { status, body } => f
                .debug_struct("Json")
                .field("status", status)
                .field("body", body)
                .finish(),
            Self::Events(_) => f.write_str("Events(..)"),
            Self::Error(error) => f.debug_tuple("Error").field(error).finish(),
        }
    }
}

impl ClientReply {
    /// HTTP status of the reply
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Json { status, .. } => *status,
            Self::Events(_) => StatusCode::OK,
            Self::Error(error) => error.status,
        }
    }
}

/// Parse a raw body in `format` into a unified request
///
/// # Errors
/// Returns a validation error if the body is not valid for the format
pub fn parse_request(format: InboundFormat, body: &[u8]) -> GatewayResult<UnifiedRequest> {
    match format {
        InboundFormat::Claude => serde_json::from_slice::<ClaudeRequest>(body)
            .map_err(|e| GatewayError::validation(format!("Invalid request body: {e}")))?
            .into_unified(),
        InboundFormat::OpenAi => serde_json::from_slice::<OpenAiRequest>(body)
            .map_err(|e| GatewayError::validation(format!("Invalid request body: {e}")))?
            .into_unified(),
    }
}

fn render_response(format: InboundFormat, response: &UnifiedResponse) -> GatewayResult<Value> {
    let rendered = match format {
        InboundFormat::Claude => serde_json::to_value(ClaudeResponse::from(response)),
        InboundFormat::OpenAi => serde_json::to_value(OpenAiResponse::from(response)),
    };
    rendered.map_err(|e| GatewayError::internal(format!("Failed to render response: {e}")))
}

fn render_stream(format: InboundFormat, body: gateway_core::ChunkStream) -> BoxStream<'static, SseEvent> {
    match format {
        InboundFormat::Claude => {
            let mut encoder = ClaudeStreamEncoder::new();
            body.flat_map(move |chunk| stream::iter(encoder.encode(&chunk)))
                .boxed()
        }
        InboundFormat::OpenAi => {
            let mut encoder = OpenAiStreamEncoder::new();
            body.flat_map(move |chunk| stream::iter(encoder.encode(&chunk)))
                .boxed()
        }
    }
}

impl Gateway {
    /// Handle a raw body in the format named by `context`
    pub async fn handle_inbound(&self, body: &[u8], context: &HandleContext) -> ClientReply {
        match self.try_handle_inbound(body, context).await {
            Ok(reply) => reply,
            Err(error) => ClientReply::Error(to_client_response(
                &error,
                &context.correlation_id,
                context.format,
                self.development_mode(),
            )),
        }
    }

    async fn try_handle_inbound(
        &self,
        body: &[u8],
        context: &HandleContext,
    ) -> GatewayResult<ClientReply> {
        let request = parse_request(context.format, body)?;
        let reply = self.handle(request, context).await?;
        match reply.body {
            ReplyBody::Complete(response) => Ok(ClientReply::Json {
                status: StatusCode::OK,
                body: render_response(context.format, &response)?,
            }),
            ReplyBody::Stream(stream) => Ok(ClientReply::Events(render_stream(context.format, stream))),
        }
    }
}
