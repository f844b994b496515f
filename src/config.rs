use anyhow::Result;
use std::time::Duration;

pub const DEFAULT_PROMPT: &str =
    "Translate the following Japanese/Chinese text to Vietnamese. Maintain professional tone.";

/// Upper bound on cells per request; larger batches make models drop markers.
const MAX_BATCH_SIZE: usize = 50;

#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub port: u16,
    pub max_upload_bytes: usize,

    // Gemini
    pub gemini_api_key: Option<String>,
    pub gemini_api_url: String,

    // OpenAI-compatible
    pub openai_api_key: Option<String>,
    pub openai_api_url: String,

    // Translation
    pub default_model: String,
    pub http_timeout: Duration,

    // Batching
    pub batch: BatchOptions,
}

/// Knobs for how cells are grouped and reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOptions {
    /// Maximum number of cells sent in one request
    pub max_cells: usize,
    /// Close a batch early once its text would exceed this many characters (0 = no limit)
    pub max_chars: usize,
    /// Pause between consecutive batches
    pub delay: Duration,
    /// Length of the translated sample attached to progress events
    pub preview_chars: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_cells: 15,
            max_chars: 2500,
            delay: Duration::from_millis(500),
            preview_chars: 50,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = BatchOptions::default();

        Ok(Self {
            port: env_parse("PORT").unwrap_or(8000),
            max_upload_bytes: env_parse::<usize>("MAX_UPLOAD_MB").unwrap_or(50) * 1024 * 1024,

            gemini_api_key: env_non_empty("GEMINI_API_KEY"),
            gemini_api_url: std::env::var("GEMINI_API_URL").unwrap_or_else(|_| {
                "https://generativelanguage.googleapis.com/v1beta".to_string()
            }),

            openai_api_key: env_non_empty("OPENAI_API_KEY"),
            openai_api_url: std::env::var("OPENAI_API_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1/chat/completions".to_string()),

            default_model: std::env::var("DEFAULT_MODEL")
                .unwrap_or_else(|_| "gemini-2.0-flash".to_string()),
            http_timeout: Duration::from_secs(env_parse("HTTP_TIMEOUT_SECS").unwrap_or(120)),

            batch: BatchOptions {
                max_cells: env_parse::<usize>("BATCH_SIZE")
                    .unwrap_or(defaults.max_cells)
                    .clamp(1, MAX_BATCH_SIZE),
                max_chars: env_parse("BATCH_MAX_CHARS").unwrap_or(defaults.max_chars),
                delay: env_parse("BATCH_DELAY_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.delay),
                preview_chars: env_parse("PREVIEW_CHARS").unwrap_or(defaults.preview_chars),
            },
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
