//! Protocol transformers between the unified model and provider wire formats.
//!
//! Each provider has an encoder (unified request to provider body), a
//! non-streaming decoder and an incremental stream decoder. Every decode path
//! runs through [`TransformLimits`] before producing output.

pub mod azure;
pub mod bedrock;
pub mod eventstream;
pub mod sanitize;

use gateway_core::{GatewayError, GatewayResult, StreamChunk};

/// Incremental decoder turning upstream frames into chunks.
///
/// Implementations emit exactly one `is_complete` chunk across all calls to
/// [`push`](Self::push), [`finish`](Self::finish) and
/// [`interrupt`](Self::interrupt).
pub trait StreamDecoder: Send + 'static {
    /// Unit of upstream framing (an SSE event, a run of raw bytes)
    type Frame: Send;

    /// Feed one frame, returning the chunks it completes
    fn push(&mut self, frame: Self::Frame) -> Vec<StreamChunk>;

    /// Flush trailing state once the upstream closes cleanly
    fn finish(&mut self) -> Vec<StreamChunk>;

    /// Terminate after a transport failure; the terminal chunk is marked
    /// `interrupted`
    fn interrupt(&mut self) -> Vec<StreamChunk>;

    /// Whether the terminal chunk has been emitted
    fn is_complete(&self) -> bool;
}

/// Size guards applied to every decoded upstream payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformLimits {
    /// Maximum raw response body (or single stream event) in bytes
    pub max_response_size: usize,
    /// Maximum number of output items
    pub max_choices_count: usize,
    /// Maximum total completion text length in characters
    pub max_completion_length: usize,
}

impl Default for TransformLimits {
    fn default() -> Self {
        Self {
            max_response_size: 10 * 1024 * 1024,
            max_choices_count: 128,
            max_completion_length: 2_000_000,
        }
    }
}

impl TransformLimits {
    /// Check a raw payload size
    ///
    /// # Errors
    /// Returns a validation error naming the size when over the limit
    pub fn check_response_size(&self, size: usize) -> GatewayResult<()> {
        if size > self.max_response_size {
            return Err(GatewayError::validation_field(
                format!(
                    "upstream response of {size} bytes exceeds limit of {} bytes",
                    self.max_response_size
                ),
                "max_response_size",
            ));
        }
        Ok(())
    }

    /// Check the number of output items
    ///
    /// # Errors
    /// Returns a validation error naming the count when over the limit
    pub fn check_choices_count(&self, count: usize) -> GatewayResult<()> {
        if count > self.max_choices_count {
            return Err(GatewayError::validation_field(
                format!(
                    "upstream response has {count} output items, limit is {}",
                    self.max_choices_count
                ),
                "max_choices_count",
            ));
        }
        Ok(())
    }

    /// Check the total completion length
    ///
    /// # Errors
    /// Returns a validation error naming the length when over the limit
    pub fn check_completion_length(&self, length: usize) -> GatewayResult<()> {
        if length > self.max_completion_length {
            return Err(GatewayError::validation_field(
                format!(
                    "upstream completion of {length} characters exceeds limit of {}",
                    self.max_completion_length
                ),
                "max_completion_length",
            ));
        }
        Ok(())
    }
}
