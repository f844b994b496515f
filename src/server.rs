//! HTTP surface: health check plus file and streaming translation endpoints.

use crate::config::{Config, DEFAULT_PROMPT};
use crate::error::AppError;
use crate::llm::{Provider, TextGenerator};
use crate::orchestrator::{
    stream_translation, translate_document, translated_filename, JobSettings, ProgressEvent,
};
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

const ACCEPTED_EXTENSIONS: [&str; 2] = [".xlsx", ".xlsm"];

/// Shared, read-only state for all requests
pub struct AppState {
    pub config: Config,
    pub generator: Arc<dyn TextGenerator>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/translate-excel", post(translate_excel))
        .route("/translate-excel/stream", post(translate_excel_stream))
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "excel-translation"
    }))
}

/// Parsed multipart upload
#[derive(Debug)]
struct TranslateForm {
    filename: String,
    bytes: Vec<u8>,
    prompt: Option<String>,
    model: Option<String>,
    api_key: Option<String>,
    sheets: Option<Vec<String>>,
}

impl TranslateForm {
    fn into_job(self, config: &Config) -> (String, Vec<u8>, JobSettings) {
        let settings = JobSettings {
            prompt: self.prompt.unwrap_or_else(|| DEFAULT_PROMPT.to_string()),
            model: self.model.unwrap_or_else(|| config.default_model.clone()),
            api_key: self.api_key,
            sheets: self.sheets,
            options: config.batch.clone(),
        };
        (self.filename, self.bytes, settings)
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_sheet_list(value: &str) -> Option<Vec<String>> {
    let sheets: Vec<String> = value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if sheets.is_empty() {
        None
    } else {
        Some(sheets)
    }
}

/// Reject anything that is not an OOXML workbook by name
fn validate_filename(filename: &str) -> Result<(), AppError> {
    let lower = filename.to_ascii_lowercase();
    if ACCEPTED_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
        Ok(())
    } else {
        Err(AppError::InvalidInput(
            "Please upload an Excel file (.xlsx or .xlsm)".to_string(),
        ))
    }
}

async fn read_form(mut multipart: Multipart) -> Result<TranslateForm, AppError> {
    let invalid = |e: axum::extract::multipart::MultipartError| {
        AppError::InvalidInput(format!("Invalid multipart body: {}", e))
    };

    let mut file = None;
    let mut prompt = None;
    let mut model = None;
    let mut api_key = None;
    let mut sheets = None;

    while let Some(field) = multipart.next_field().await.map_err(invalid)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let data = field.bytes().await.map_err(invalid)?;
                file = Some((filename, data.to_vec()));
            }
            "prompt" => prompt = non_empty(field.text().await.map_err(invalid)?),
            "model" => model = non_empty(field.text().await.map_err(invalid)?),
            "api_key" => api_key = non_empty(field.text().await.map_err(invalid)?),
            "sheets" => sheets = parse_sheet_list(&field.text().await.map_err(invalid)?),
            _ => {}
        }
    }

    let (filename, bytes) =
        file.ok_or_else(|| AppError::InvalidInput("Missing file field".to_string()))?;
    validate_filename(&filename)?;

    Ok(TranslateForm {
        filename,
        bytes,
        prompt,
        model,
        api_key,
        sheets,
    })
}

/// `attachment` header with an ASCII fallback name and the exact UTF-8 name
fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let encoded: String = filename
        .bytes()
        .map(|b| {
            if b.is_ascii_alphanumeric() || b"-._~".contains(&b) {
                (b as char).to_string()
            } else {
                format!("%{:02X}", b)
            }
        })
        .collect();

    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback, encoded
    )
}

async fn translate_excel(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Response, AppError> {
    let form = read_form(multipart).await?;
    let span = info_span!("translate", request_id = %Uuid::new_v4(), file = %form.filename);

    async move {
        let model = form
            .model
            .clone()
            .unwrap_or_else(|| state.config.default_model.clone());
        if !state
            .generator
            .has_credential(&model, form.api_key.as_deref())
        {
            return Err(AppError::MissingCredential(
                Provider::for_model(&model).key_variable(),
            ));
        }

        let (filename, bytes, settings) = form.into_job(&state.config);
        info!(
            "Translating {} ({} bytes) with {}",
            filename,
            bytes.len(),
            settings.model
        );

        let (output, summary) = translate_document(bytes, state.generator.as_ref(), &settings)
            .await
            .map_err(AppError::processing)?;

        info!(
            "Done: {}/{} cells translated, {} partial batches",
            summary.translated_cells, summary.total_cells, summary.partial_batches
        );

        Ok((
            [
                (CONTENT_TYPE, XLSX_CONTENT_TYPE.to_string()),
                (
                    CONTENT_DISPOSITION,
                    content_disposition(&translated_filename(&filename)),
                ),
            ],
            output,
        )
            .into_response())
    }
    .instrument(span)
    .await
}

async fn translate_excel_stream(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Response, AppError> {
    let form = read_form(multipart).await?;
    let span = info_span!("translate_stream", request_id = %Uuid::new_v4(), file = %form.filename);
    let (filename, bytes, settings) = form.into_job(&state.config);

    let (tx, rx) = mpsc::channel::<ProgressEvent>(16);
    tokio::spawn(
        stream_translation(bytes, filename, Arc::clone(&state.generator), settings, tx)
            .instrument(span),
    );

    let lines = futures::stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        let line = serde_json::to_vec(&event).map(|mut json| {
            json.push(b'\n');
            json
        });
        Some((line, rx))
    });

    Ok((
        [(CONTENT_TYPE, NDJSON_CONTENT_TYPE)],
        Body::from_stream(lines),
    )
        .into_response())
}
