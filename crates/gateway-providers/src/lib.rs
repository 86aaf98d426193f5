//! # Gateway Providers
//!
//! Upstream provider support for the protocol gateway.
//!
//! This crate provides:
//! - Protocol transformers between the unified model and the Azure OpenAI
//!   Responses API / AWS Bedrock Converse API
//! - SSE and AWS event-stream framing
//! - PII redaction of upstream text
//! - Azure and Bedrock clients running every call through the resilience stack

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod azure;
pub mod bedrock;
pub mod client;
mod http;
pub mod transform;

// Re-export main types
pub use azure::{AzureClient, AzureClientConfig};
pub use bedrock::{BedrockClient, BedrockClientConfig};
pub use client::{ProviderClient, RequestContext, CREATE_RESPONSE, CREATE_RESPONSE_STREAM};
pub use http::ProviderConfigError;
pub use transform::TransformLimits;
