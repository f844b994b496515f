use anyhow::{Context, Result};
use sheet_translator::config::Config;
use sheet_translator::llm::ProviderRouter;
use sheet_translator::server::{self, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignored in production)
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sheet_translator=info".parse()?),
        )
        .init();

    info!("Starting Excel translation service");

    let config = Config::from_env()?;

    if config.gemini_api_key.is_none() && config.openai_api_key.is_none() {
        warn!("No GEMINI_API_KEY or OPENAI_API_KEY set; requests must supply api_key");
    }

    let client = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()
        .context("Failed to build HTTP client")?;

    let state = Arc::new(AppState {
        generator: Arc::new(ProviderRouter::from_config(client, &config)),
        config: config.clone(),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!(
        "✓ Listening on {} (default model {}, batch size {})",
        addr, config.default_model, config.batch.max_cells
    );

    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
    }
}
