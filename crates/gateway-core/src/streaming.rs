//! Streaming types.
//!
//! A streamed response is a lazy, forward-only sequence of [`StreamChunk`]s
//! that ends with exactly one chunk whose `is_complete` flag is set.
//! [`ResponseAccumulator`] folds such a sequence back into a [`UnifiedResponse`].

use crate::response::{FinishReason, OutputItem, UnifiedResponse, Usage};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::Pin;

/// Boxed stream of chunks handed to callers
pub type ChunkStream = Pin<Box<dyn Stream<Item = StreamChunk> + Send>>;

/// One incremental unit of a streamed response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Response id (stable across the chunks of one response)
    pub id: String,
    /// Model
    pub model: String,
    /// Partial output carried by this chunk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<ChunkDelta>,
    /// Finish reason, set on the terminal chunk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    /// Usage, usually on the terminal chunk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// Marks the last chunk of the stream
    pub is_complete: bool,
    /// Set on a terminal chunk when the upstream stream ended abnormally
    /// (transport error, undecodable data, upstream error event)
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub interrupted: bool,
}

impl StreamChunk {
    /// Create a chunk carrying a delta
    #[must_use]
    pub fn delta(id: impl Into<String>, model: impl Into<String>, delta: ChunkDelta) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            delta: Some(delta),
            finish_reason: None,
            usage: None,
            is_complete: false,
            interrupted: false,
        }
    }

    /// Create a text delta chunk
    #[must_use]
    pub fn text(id: impl Into<String>, model: impl Into<String>, text: impl Into<String>) -> Self {
        Self::delta(id, model, ChunkDelta::Text { text: text.into() })
    }

    /// Create the terminal chunk
    #[must_use]
    pub fn completed(
        id: impl Into<String>,
        model: impl Into<String>,
        finish_reason: Option<FinishReason>,
        usage: Option<Usage>,
    ) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            delta: None,
            finish_reason,
            usage,
            is_complete: true,
            interrupted: false,
        }
    }

    /// Terminal chunk with no content, used whenever upstream data cannot be decoded
    #[must_use]
    pub fn completed_empty(id: impl Into<String>, model: impl Into<String>) -> Self {
        Self::completed(id, model, None, None)
    }

    /// Empty terminal chunk marking an abnormal end of the upstream stream
    #[must_use]
    pub fn interrupted(id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            interrupted: true,
            ..Self::completed_empty(id, model)
        }
    }

    /// Text carried by this chunk, if any
    #[must_use]
    pub fn text_delta(&self) -> Option<&str> {
        match &self.delta {
            Some(ChunkDelta::Text { text }) => Some(text),
            _ => None,
        }
    }
}

/// Partial output carried by a chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChunkDelta {
    /// Text fragment
    Text {
        /// Text fragment
        text: String,
    },
    /// Tool call fragment; `name` is set on the first fragment of a call
    ToolCall {
        /// Call id
        id: String,
        /// Tool name
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        /// Arguments fragment
        arguments: String,
    },
    /// Reasoning fragment
    Reasoning {
        /// Reasoning fragment
        text: String,
    },
}

/// Folds stream chunks into a complete response
#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    id: Option<String>,
    model: Option<String>,
    output: Vec<OutputItem>,
    tool_positions: HashMap<String, usize>,
    finish_reason: Option<FinishReason>,
    usage: Option<Usage>,
    complete: bool,
    interrupted: bool,
}

impl ResponseAccumulator {
    /// Create an empty accumulator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one chunk
    pub fn push(&mut self, chunk: &StreamChunk) {
        if self.id.as_deref().map_or(true, str::is_empty) && !chunk.id.is_empty() {
            self.id = Some(chunk.id.clone());
        }
        if self.model.as_deref().map_or(true, str::is_empty) && !chunk.model.is_empty() {
            self.model = Some(chunk.model.clone());
        }

        match &chunk.delta {
            Some(ChunkDelta::Text { text }) => {
                if let Some(OutputItem::Text { text: existing }) = self.output.last_mut() {
                    existing.push_str(text);
                } else if !text.is_empty() {
                    self.output.push(OutputItem::Text { text: text.clone() });
                }
            }
            Some(ChunkDelta::Reasoning { text }) => {
                if let Some(OutputItem::Reasoning { text: existing }) = self.output.last_mut() {
                    existing.push_str(text);
                } else if !text.is_empty() {
                    self.output.push(OutputItem::Reasoning { text: text.clone() });
                }
            }
            Some(ChunkDelta::ToolCall {
                id,
                name,
                arguments,
            }) => {
                if let Some(&position) = self.tool_positions.get(id) {
                    if let Some(OutputItem::ToolCall {
                        name: existing_name,
                        arguments: existing,
                        ..
                    }) = self.output.get_mut(position)
                    {
                        existing.push_str(arguments);
                        if let Some(name) = name {
                            existing_name.clone_from(name);
                        }
                    }
                } else {
                    self.tool_positions.insert(id.clone(), self.output.len());
                    self.output.push(OutputItem::ToolCall {
                        id: id.clone(),
                        name: name.clone().unwrap_or_default(),
                        arguments: arguments.clone(),
                    });
                }
            }
            None => {}
        }

        if chunk.finish_reason.is_some() {
            self.finish_reason = chunk.finish_reason;
        }
        if chunk.usage.is_some() {
            self.usage = chunk.usage;
        }
        if chunk.is_complete {
            self.complete = true;
            self.interrupted = chunk.interrupted;
        }
    }

    /// Whether the terminal chunk has been seen
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Whether the terminal chunk marked an abnormal end
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.interrupted
    }

    /// Build the folded response
    #[must_use]
    pub fn finish(self) -> UnifiedResponse {
        let mut response = UnifiedResponse::new(
            self.id.unwrap_or_default(),
            self.model.unwrap_or_default(),
        );
        response.output = self.output;
        response.finish_reason = self.finish_reason;
        response.usage = self.usage.unwrap_or_default();
        response
    }
}
