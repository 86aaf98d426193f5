//! # Gateway Core
//!
//! Core types and error handling for the protocol gateway.
//!
//! This crate provides the foundational types used throughout the gateway:
//! - The unified request, response and stream chunk model
//! - The canonical error taxonomy
//! - Inbound Claude Messages and OpenAI Chat Completions wire shapes
//! - Validated identifiers (newtypes)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod inbound;
pub mod request;
pub mod response;
pub mod streaming;
pub mod types;

// Re-export commonly used types
pub use error::{ErrorKind, GatewayError, GatewayResult, ProviderErrorType};
pub use request::{
    ContentBlock, ImageSource, Message, MessageContent, RequestLimits, Role, ToolChoice,
    ToolDefinition, UnifiedRequest,
};
pub use response::{FinishReason, OutputItem, UnifiedResponse, Usage};
pub use streaming::{ChunkDelta, ChunkStream, ResponseAccumulator, StreamChunk};
pub use types::{ConversationId, CorrelationId, InboundFormat, ValidationError};
