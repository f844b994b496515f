//! Translate a workbook on disk without running the server
//!
//! Usage:
//!   cargo run --bin translate-file -- input.xlsx                 # writes input_translated.xlsx
//!   cargo run --bin translate-file -- input.xlsx out.xlsx
//!
//! Required environment variables (one of):
//! - GEMINI_API_KEY (for gemini-* models)
//! - OPENAI_API_KEY (for other models)
//!
//! Optional:
//! - DEFAULT_MODEL (defaults to gemini-2.0-flash)
//! - TRANSLATE_PROMPT (defaults to Japanese/Chinese → Vietnamese)
//! - TRANSLATE_SHEETS (comma-separated sheet names)
//! - BATCH_SIZE, BATCH_MAX_CHARS, BATCH_DELAY_MS

use anyhow::{Context, Result};
use sheet_translator::config::{Config, DEFAULT_PROMPT};
use sheet_translator::llm::{Provider, ProviderRouter, TextGenerator};
use sheet_translator::orchestrator::{translate_document, translated_filename, JobSettings};
use std::fs;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sheet_translator=info".parse()?)
                .add_directive("translate_file=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let input = args
        .get(1)
        .context("Usage: translate-file <input.xlsx> [output.xlsx]")?;
    let output = args
        .get(2)
        .cloned()
        .unwrap_or_else(|| translated_filename(input));

    let config = Config::from_env()?;
    let client = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()
        .context("Failed to build HTTP client")?;
    let generator = ProviderRouter::from_config(client, &config);

    if !generator.has_credential(&config.default_model, None) {
        anyhow::bail!(
            "{} not set",
            Provider::for_model(&config.default_model).key_variable()
        );
    }

    let settings = JobSettings {
        prompt: std::env::var("TRANSLATE_PROMPT").unwrap_or_else(|_| DEFAULT_PROMPT.to_string()),
        model: config.default_model.clone(),
        api_key: None,
        sheets: std::env::var("TRANSLATE_SHEETS").ok().map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        }),
        options: config.batch.clone(),
    };

    let bytes = fs::read(input).with_context(|| format!("Failed to read {}", input))?;
    info!("Translating {} with {}", input, settings.model);

    let (translated, summary) = translate_document(bytes, &generator, &settings).await?;

    fs::write(&output, translated).with_context(|| format!("Failed to write {}", output))?;

    info!(
        "✓ Wrote {} ({}/{} cells translated, {} partial batches)",
        output, summary.translated_cells, summary.total_cells, summary.partial_batches
    );

    Ok(())
}
