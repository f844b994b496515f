//! Text-generation backends used for translation.
//!
//! Everything above this module only sees [`TextGenerator`]: a prompt goes in,
//! the model's raw text comes out. Credentials travel with each request and
//! fall back to the keys configured at startup.

use crate::config::Config;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A single prompt to run against a model
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub model: String,
    pub prompt: String,
    /// Per-request credential; overrides the configured key when set
    pub api_key: Option<String>,
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;

    /// Whether a call for `model` would have a credential to use
    fn has_credential(&self, _model: &str, _api_key: Option<&str>) -> bool {
        true
    }
}

/// Which HTTP API serves a model identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Gemini,
    OpenAi,
}

impl Provider {
    pub fn for_model(model: &str) -> Self {
        if model.trim().to_ascii_lowercase().starts_with("gemini") {
            Provider::Gemini
        } else {
            Provider::OpenAi
        }
    }

    pub fn key_variable(self) -> &'static str {
        match self {
            Provider::Gemini => "GEMINI_API_KEY",
            Provider::OpenAi => "OPENAI_API_KEY",
        }
    }
}

fn pick_key<'a>(request_key: Option<&'a str>, configured: Option<&'a str>) -> Option<&'a str> {
    request_key
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .or(configured)
}

// ==================== Gemini ====================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    generation_config: GenerationConfig,
    safety_settings: Vec<SafetySetting>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: String,
}

#[derive(Debug, Serialize)]
struct SafetySetting {
    category: String,
    threshold: String,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

const SAFETY_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

/// Google Gemini `generateContent` client
#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl GeminiClient {
    pub fn new(client: reqwest::Client, base_url: &str, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn build_request(prompt: &str) -> GeminiRequest {
        GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart {
                    text: Some(prompt.to_string()),
                }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "text/plain".to_string(),
            },
            // Cell text is arbitrary business content; blocked output would drop whole batches
            safety_settings: SAFETY_CATEGORIES
                .iter()
                .map(|category| SafetySetting {
                    category: category.to_string(),
                    threshold: "BLOCK_NONE".to_string(),
                })
                .collect(),
        }
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let api_key = pick_key(request.api_key.as_deref(), self.api_key.as_deref())
            .context("GEMINI_API_KEY not configured")?;

        let url = format!("{}/models/{}:generateContent", self.base_url, request.model);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .header("Content-Type", "application/json")
            .json(&Self::build_request(&request.prompt))
            .send()
            .await
            .context("Failed to send request to Gemini API")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("<failed to read body: {}>", e));
            anyhow::bail!("Gemini API error ({}): {}", status, body);
        }

        let body: GeminiResponse = response
            .json()
            .await
            .context("Failed to parse Gemini response")?;

        Ok(body
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|c| c.parts.into_iter().next())
            .and_then(|p| p.text)
            .unwrap_or_default())
    }

    fn has_credential(&self, _model: &str, api_key: Option<&str>) -> bool {
        pick_key(api_key, self.api_key.as_deref()).is_some()
    }
}

// ==================== OpenAI-compatible ====================

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

/// Check if a model is a reasoning model that doesn't support temperature
fn is_reasoning_model(model: &str) -> bool {
    model.starts_with("gpt-5")
        || model.starts_with("o1")
        || model.starts_with("o3")
        || model.starts_with("o4")
}

/// Chat Completions client for OpenAI and compatible gateways
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
}

impl OpenAiClient {
    pub fn new(client: reqwest::Client, api_url: &str, api_key: Option<String>) -> Self {
        Self {
            client,
            api_url: api_url.to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl TextGenerator for OpenAiClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let api_key = pick_key(request.api_key.as_deref(), self.api_key.as_deref())
            .context("OPENAI_API_KEY not configured")?;

        let chat_request = ChatRequest {
            model: request.model.clone(),
            messages: vec![Message {
                role: "user".to_string(),
                content: request.prompt.clone(),
            }],
            temperature: if is_reasoning_model(&request.model) {
                None
            } else {
                Some(0.3)
            },
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&chat_request)
            .send()
            .await
            .context("Failed to send request to OpenAI API")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("<failed to read body: {}>", e));
            anyhow::bail!("OpenAI API error ({}): {}", status, body);
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .context("Failed to parse OpenAI response")?;

        chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .context("OpenAI response contained no choices")
    }

    fn has_credential(&self, _model: &str, api_key: Option<&str>) -> bool {
        pick_key(api_key, self.api_key.as_deref()).is_some()
    }
}

// ==================== Routing ====================

/// Dispatches each request to the backend that serves its model
#[derive(Debug, Clone)]
pub struct ProviderRouter {
    gemini: GeminiClient,
    openai: OpenAiClient,
}

impl ProviderRouter {
    pub fn new(gemini: GeminiClient, openai: OpenAiClient) -> Self {
        Self { gemini, openai }
    }

    pub fn from_config(client: reqwest::Client, config: &Config) -> Self {
        Self::new(
            GeminiClient::new(
                client.clone(),
                &config.gemini_api_url,
                config.gemini_api_key.clone(),
            ),
            OpenAiClient::new(
                client,
                &config.openai_api_url,
                config.openai_api_key.clone(),
            ),
        )
    }

    fn backend(&self, model: &str) -> &dyn TextGenerator {
        match Provider::for_model(model) {
            Provider::Gemini => &self.gemini,
            Provider::OpenAi => &self.openai,
        }
    }
}

#[async_trait]
impl TextGenerator for ProviderRouter {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.backend(&request.model).generate(request).await
    }

    fn has_credential(&self, model: &str, api_key: Option<&str>) -> bool {
        self.backend(model).has_credential(model, api_key)
    }
}
