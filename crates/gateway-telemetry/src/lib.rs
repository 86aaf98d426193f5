//! # Gateway Telemetry
//!
//! Logging for the protocol gateway.
//!
//! This crate provides:
//! - Structured logging initialisation (JSON, pretty or compact)
//! - Request and provider spans carrying the correlation id

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod logging;
pub mod span;

// Re-export main types
pub use logging::{init_logging, LogFormat, LoggingConfig, LoggingError};
pub use span::{provider_span, request_span};
