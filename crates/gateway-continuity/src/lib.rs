//! # Gateway Continuity
//!
//! Conversation tracking for the protocol gateway.
//!
//! This crate provides:
//! - Per-conversation history, metrics and the last provider response id
//! - The decision whether a request may chain onto the previous response
//! - Age, length and capacity based eviction
//! - A background maintenance task running the cleanup pass

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod manager;
pub mod state;
pub mod store;

// Re-export main types
pub use manager::{ContinuityConfig, ConversationManager, MaintenanceHandle, ProcessedRequest};
pub use state::{ContextComplexity, ConversationEntry, ConversationMetrics, ConversationState};
pub use store::{ConversationStore, InMemoryConversationStore};
