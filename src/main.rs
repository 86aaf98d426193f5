//! # LLM Protocol Gateway
//!
//! Accepts Claude and OpenAI shaped requests and serves them from the Azure
//! OpenAI Responses API or the AWS Bedrock Converse API.
//!
//! ## Features
//!
//! - Wire-format translation in both directions, streaming included
//! - Circuit breaker, retry and graceful degradation per upstream
//! - In-memory conversation continuity with `previous_response_id` chaining
//!
//! ## Usage
//!
//! ```bash
//! # Start with ./config.yaml or config/default.yaml
//! llm-protocol-gateway
//!
//! # Start with a custom config file
//! CONFIG_PATH=/path/to/config.yaml llm-protocol-gateway
//!
//! # Override single values from the environment
//! LLM_GATEWAY_LOG_LEVEL=debug llm-protocol-gateway
//! ```

use anyhow::Context;
use gateway_config::load_config;
use gateway_orchestrator::GatewayBuilder;
use gateway_telemetry::init_logging;
use tracing::{error, info};

/// Application entry point
#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!(error = %e, "Application failed");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

/// Main application logic
async fn run() -> anyhow::Result<()> {
    let config = load_config().await.context("failed to load configuration")?;

    init_logging(&config.logging).context("failed to initialize logging")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        providers = ?config.providers.configured_ids(),
        "Starting LLM Protocol Gateway"
    );

    let gateway = GatewayBuilder::from_config(&config)
        .context("invalid gateway configuration")?
        .build()
        .context("failed to build gateway")?;

    let maintenance = gateway
        .conversations()
        .spawn_maintenance(config.conversation.cleanup_interval);

    info!(
        providers = gateway.router().len(),
        cleanup_interval = ?config.conversation.cleanup_interval,
        "Gateway ready"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    info!("Shutdown signal received");
    maintenance.shutdown().await;
    info!(
        conversations = gateway.conversations().conversation_count(),
        "Gateway stopped"
    );

    Ok(())
}
