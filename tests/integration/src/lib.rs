//! Integration tests for the LLM protocol gateway
//!
//! This crate exercises the gateway against wiremock servers standing in for
//! the Azure OpenAI Responses API and the AWS Bedrock Converse API:
//! - Provider clients (wire shapes, headers, streaming)
//! - Retry, circuit breaker and fallback behavior
//! - End-to-end flows through the orchestrator, including conversation chaining

pub mod fixtures;
pub mod helpers;
pub mod mock_providers;

// Re-export commonly used items
pub use fixtures::*;
pub use helpers::*;
pub use mock_providers::*;

#[cfg(test)]
mod e2e_tests;
#[cfg(test)]
mod provider_tests;
#[cfg(test)]
mod resilience_tests;
