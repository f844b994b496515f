//! Drives a document through extract → batch → translate → write-back.
//!
//! Batches run strictly one after another. Each job owns its [`Workbook`]; the
//! only shared piece is the [`TextGenerator`].

use crate::batch::translate_batch;
use crate::config::BatchOptions;
use crate::llm::TextGenerator;
use crate::workbook::{TranslatableCell, Workbook};
use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Status record sent to streaming clients, one JSON object per line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProgressEvent {
    Start {
        total: usize,
        sheets: Vec<String>,
    },
    Progress {
        current: usize,
        total: usize,
        percent: u32,
        batch: usize,
        total_batches: usize,
        translated: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        sample: Option<String>,
    },
    Info {
        message: String,
    },
    Complete {
        /// Base64 of the finished workbook
        file: String,
        filename: String,
        translated: usize,
        total: usize,
    },
    Error {
        message: String,
    },
}

/// Everything a job needs besides the document itself
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub prompt: String,
    pub model: String,
    pub api_key: Option<String>,
    /// Restrict extraction to these sheets
    pub sheets: Option<Vec<String>>,
    pub options: BatchOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranslationSummary {
    pub total_cells: usize,
    pub translated_cells: usize,
    pub batches: usize,
    /// Batches where the reply covered fewer cells than were sent
    pub partial_batches: usize,
}

/// Split cells into consecutive batches, preserving order.
///
/// A batch closes at `max_cells`, or earlier when the next cell would push its
/// text past `max_chars` (0 disables the character budget).
pub fn partition_batches(
    cells: &[TranslatableCell],
    max_cells: usize,
    max_chars: usize,
) -> Vec<&[TranslatableCell]> {
    let max_cells = max_cells.max(1);
    let mut batches = Vec::new();
    let mut start = 0;
    let mut chars = 0;

    for (i, cell) in cells.iter().enumerate() {
        let len = cell.text.chars().count();
        let count = i - start;
        let over_budget = max_chars > 0 && count > 0 && chars + len > max_chars;

        if count == max_cells || over_budget {
            batches.push(&cells[start..i]);
            start = i;
            chars = 0;
        }
        chars += len;
    }

    if start < cells.len() {
        batches.push(&cells[start..]);
    }

    batches
}

/// `floor(current / total * 100)`
pub fn percent(current: usize, total: usize) -> u32 {
    if total == 0 {
        return 100;
    }
    (current.min(total) * 100 / total) as u32
}

/// First `max_chars` characters of `text`, with `...` when cut
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// `report.xlsx` → `report_translated.xlsx`
pub fn translated_filename(filename: &str) -> String {
    match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{}_translated.{}", stem, ext),
        _ => format!("{}_translated", filename),
    }
}

/// Translate `cells` in batches and write results into `workbook`.
///
/// When `progress` is set, a `progress` event goes out after every batch; a
/// closed channel stops the job with an error.
pub async fn translate_cells(
    workbook: &mut Workbook,
    cells: &[TranslatableCell],
    generator: &dyn TextGenerator,
    settings: &JobSettings,
    progress: Option<&mpsc::Sender<ProgressEvent>>,
) -> Result<TranslationSummary> {
    let options = &settings.options;
    let batches = partition_batches(cells, options.max_cells, options.max_chars);
    let total = cells.len();
    let total_batches = batches.len();

    let mut summary = TranslationSummary {
        total_cells: total,
        batches: total_batches,
        ..Default::default()
    };
    let mut processed = 0;

    for (batch_index, batch) in batches.iter().enumerate() {
        let batch_number = batch_index + 1;
        info!(
            "Translating batch {}/{} ({} cells)",
            batch_number,
            total_batches,
            batch.len()
        );

        let texts: Vec<&str> = batch.iter().map(|c| c.text.as_str()).collect();
        let translations = translate_batch(
            generator,
            &texts,
            &settings.prompt,
            &settings.model,
            settings.api_key.as_deref(),
        )
        .await;

        let mut translated = 0;
        let mut sample = None;
        for (index, text) in &translations {
            let Some(cell) = batch.get(*index) else {
                continue;
            };
            if workbook.write_text(&cell.reference, text) {
                translated += 1;
                if sample.is_none() {
                    sample = Some(preview(text, options.preview_chars));
                }
            }
        }

        if translated < batch.len() {
            summary.partial_batches += 1;
            warn!(
                "Batch {}/{}: {} of {} cells left untranslated",
                batch_number,
                total_batches,
                batch.len() - translated,
                batch.len()
            );
        }
        summary.translated_cells += translated;
        processed += batch.len();

        if let Some(tx) = progress {
            tx.send(ProgressEvent::Progress {
                current: processed,
                total,
                percent: percent(processed, total),
                batch: batch_number,
                total_batches,
                translated,
                sample,
            })
            .await
            .context("Progress receiver dropped, client disconnected")?;
        }

        if batch_number < total_batches && !options.delay.is_zero() {
            tokio::time::sleep(options.delay).await;
        }
    }

    info!(
        "Translated {}/{} cells in {} batches",
        summary.translated_cells, summary.total_cells, summary.batches
    );

    Ok(summary)
}

/// Translate a whole document and return the new file bytes.
///
/// When nothing was written the input bytes come back untouched.
pub async fn translate_document(
    bytes: Vec<u8>,
    generator: &dyn TextGenerator,
    settings: &JobSettings,
) -> Result<(Vec<u8>, TranslationSummary)> {
    let mut workbook = Workbook::load(bytes).await?;
    let cells = workbook.translatable_cells(settings.sheets.as_deref());
    info!("Found {} translatable cells", cells.len());

    let summary = if cells.is_empty() {
        TranslationSummary::default()
    } else {
        translate_cells(&mut workbook, &cells, generator, settings, None).await?
    };

    let output = workbook.save().await?;
    Ok((output, summary))
}

/// Run a job, reporting every step on `tx`.
///
/// Emits `start`, then `progress` per batch (or one `info` when there is
/// nothing to translate), then `complete`. Any fatal failure becomes a final
/// `error` event.
pub async fn stream_translation(
    bytes: Vec<u8>,
    filename: String,
    generator: Arc<dyn TextGenerator>,
    settings: JobSettings,
    tx: mpsc::Sender<ProgressEvent>,
) {
    if let Err(e) = run_stream(bytes, &filename, generator.as_ref(), &settings, &tx).await {
        error!("Streaming translation failed: {:#}", e);
        let message = format!("Error processing file: {:#}", e);
        // Receiver may already be gone
        let _ = tx.send(ProgressEvent::Error { message }).await;
    }
}

async fn run_stream(
    bytes: Vec<u8>,
    filename: &str,
    generator: &dyn TextGenerator,
    settings: &JobSettings,
    tx: &mpsc::Sender<ProgressEvent>,
) -> Result<()> {
    let mut workbook = Workbook::load(bytes).await?;
    let cells = workbook.translatable_cells(settings.sheets.as_deref());
    let total = cells.len();

    send(
        tx,
        ProgressEvent::Start {
            total,
            sheets: workbook.sheet_names(),
        },
    )
    .await?;

    let summary = if cells.is_empty() {
        send(
            tx,
            ProgressEvent::Info {
                message: "No Japanese/Chinese text found to translate".to_string(),
            },
        )
        .await?;
        TranslationSummary::default()
    } else {
        translate_cells(&mut workbook, &cells, generator, settings, Some(tx)).await?
    };

    let output = workbook.save().await?;

    send(
        tx,
        ProgressEvent::Complete {
            file: STANDARD.encode(&output),
            filename: translated_filename(filename),
            translated: summary.translated_cells,
            total,
        },
    )
    .await
}

async fn send(tx: &mpsc::Sender<ProgressEvent>, event: ProgressEvent) -> Result<()> {
    tx.send(event)
        .await
        .context("Progress receiver dropped, client disconnected")
}
