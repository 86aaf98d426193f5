//! # Gateway Orchestrator
//!
//! Per-request pipeline of the protocol gateway.
//!
//! This crate provides:
//! - Model-prefix routing to a configured provider
//! - The [`Gateway`] composing validation, continuity, the protected provider call
//!   and turn recording
//! - Claude and OpenAI inbound adapters rendering replies and client errors
//! - Construction of the whole stack from a [`gateway_config::GatewayConfig`]

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod builder;
pub mod gateway;
pub mod inbound;
pub mod router;

// Re-export main types
pub use builder::{BuildError, GatewayBuilder};
pub use gateway::{Gateway, GatewayReply, HandleContext, ReplyBody};
pub use inbound::ClientReply;
pub use router::ProviderRouter;
