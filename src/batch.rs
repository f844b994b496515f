//! Batch translation over the marker protocol.
//!
//! Each text in a batch is tagged `【i】` (0-based position) and sent in one
//! request; the reply is scanned for the same tags to map results back.
//! Tag handling lives in [`encode_batch`] and [`parse_translations`] only.

use crate::llm::{GenerationRequest, TextGenerator};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Batch-local index → translated text
pub type TranslationMap = BTreeMap<usize, String>;

static MARKER_REGEX: OnceLock<Regex> = OnceLock::new();

fn marker_regex() -> &'static Regex {
    MARKER_REGEX
        .get_or_init(|| Regex::new(r"【([0-9０-９]+)】([^【]*)").expect("Invalid marker regex"))
}

/// Marker number in ASCII or full-width digits; `None` on overflow
fn marker_index(digits: &str) -> Option<usize> {
    digits.chars().try_fold(0usize, |acc, ch| {
        let digit = match ch {
            '0'..='9' => ch as u32 - '0' as u32,
            '０'..='９' => ch as u32 - '０' as u32,
            _ => return None,
        };
        acc.checked_mul(10)?.checked_add(digit as usize)
    })
}

/// Tag each text with its batch position, one per line
pub fn encode_batch<S: AsRef<str>>(texts: &[S]) -> String {
    texts
        .iter()
        .enumerate()
        .map(|(i, text)| format!("【{}】{}", i, text.as_ref()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the full request from the user's instruction and the tagged batch
pub fn build_batch_prompt(instruction: &str, batch_text: &str) -> String {
    format!(
        r#"{}

EXCEL CELL TRANSLATION RULES:
- Each cell is marked with 【number】
- Translate each cell and KEEP the 【number】 markers
- Keep translations concise (spreadsheet cells)
- Preserve numbers, dates, file names
- Output format: 【0】translation【1】translation...

Text to translate:
{}"#,
        instruction.trim(),
        batch_text
    )
}

/// Recover `index → text` pairs from a model reply.
///
/// Text runs from a tag to the next `【` or the end, trimmed. Empty results are
/// dropped and a repeated index keeps its last occurrence.
pub fn parse_translations(response: &str) -> TranslationMap {
    let mut translations = TranslationMap::new();

    for captures in marker_regex().captures_iter(response) {
        let Some(index) = marker_index(&captures[1]) else {
            continue;
        };
        let text = captures[2].trim();
        if text.is_empty() {
            continue;
        }
        translations.insert(index, text.to_string());
    }

    translations
}

/// Translate one batch of texts.
///
/// Never fails: any error from the generator is logged and yields an empty
/// map, leaving the whole batch untranslated.
pub async fn translate_batch<S: AsRef<str>>(
    generator: &dyn TextGenerator,
    texts: &[S],
    prompt: &str,
    model: &str,
    api_key: Option<&str>,
) -> TranslationMap {
    if texts.is_empty() {
        return TranslationMap::new();
    }

    let request = GenerationRequest {
        model: model.to_string(),
        prompt: build_batch_prompt(prompt, &encode_batch(texts)),
        api_key: api_key.map(str::to_string),
    };

    match generator.generate(&request).await {
        Ok(response) => {
            let translations = parse_translations(&response);
            if translations.len() < texts.len() {
                debug!(
                    "Batch reply matched {} of {} markers",
                    translations.len(),
                    texts.len()
                );
            }
            translations
        }
        Err(e) => {
            warn!("Translation error ({} cells left untranslated): {:#}", texts.len(), e);
            TranslationMap::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Reply, ScriptedGenerator};
    use proptest::prelude::*;

    // ==================== Encoding ====================

    #[test]
    fn test_encode_batch() {
        let encoded = encode_batch(&["給与計算", "自動化ツール"]);
        assert_eq!(encoded, "【0】給与計算\n【1】自動化ツール");
    }

    #[test]
    fn test_encode_empty_batch() {
        let empty: [&str; 0] = [];
        assert_eq!(encode_batch(&empty), "");
    }

    #[test]
    fn test_build_batch_prompt() {
        let prompt = build_batch_prompt("Translate to Vietnamese.", "【0】給与計算");

        assert!(prompt.starts_with("Translate to Vietnamese."));
        assert!(prompt.contains("KEEP the 【number】 markers"));
        assert!(prompt.contains("Keep translations concise"));
        assert!(prompt.contains("Preserve numbers, dates, file names"));
        assert!(prompt.ends_with("Text to translate:\n【0】給与計算"));
    }

    // ==================== Parsing ====================

    #[test]
    fn test_parse_inline_reply() {
        let map = parse_translations("【0】Tính lương【1】Công cụ tự động hóa");
        assert_eq!(map.len(), 2);
        assert_eq!(map[&0], "Tính lương");
        assert_eq!(map[&1], "Công cụ tự động hóa");
    }

    #[test]
    fn test_parse_multiline_reply_trims() {
        let map = parse_translations("Here you go:\n【0】  Payroll \n【1】\tAutomation tool\n\n");
        assert_eq!(map[&0], "Payroll");
        assert_eq!(map[&1], "Automation tool");
    }

    #[test]
    fn test_parse_keeps_inner_newlines() {
        let map = parse_translations("【0】line one\nline two\n【1】x");
        assert_eq!(map[&0], "line one\nline two");
    }

    #[test]
    fn test_parse_missing_marker() {
        let map = parse_translations("【0】a【1】b【2】c【4】e");
        assert_eq!(map.keys().copied().collect::<Vec<_>>(), vec![0, 1, 2, 4]);
        assert!(!map.contains_key(&3));
    }

    #[test]
    fn test_parse_drops_empty_text() {
        let map = parse_translations("【0】   【1】b");
        assert!(!map.contains_key(&0));
        assert_eq!(map[&1], "b");
    }

    #[test]
    fn test_parse_repeated_index_last_wins() {
        let map = parse_translations("【0】first【0】second");
        assert_eq!(map[&0], "second");
    }

    #[test]
    fn test_parse_ignores_non_numeric_and_oversized_markers() {
        let map = parse_translations("【a】x【99999999999999999999999】y【2】z");
        assert_eq!(map.len(), 1);
        assert_eq!(map[&2], "z");
    }

    #[test]
    fn test_parse_full_width_marker_digits() {
        let map = parse_translations("【０】Payroll【1】Tool【１２】Twelve");
        assert_eq!(map[&0], "Payroll");
        assert_eq!(map[&1], "Tool");
        assert_eq!(map[&12], "Twelve");
    }

    #[test]
    fn test_parse_ignores_other_script_digits() {
        // Arabic-Indic zero
        let map = parse_translations("【٠】x【0】y");
        assert_eq!(map.len(), 1);
        assert_eq!(map[&0], "y");
    }

    #[test]
    fn test_parse_empty_reply() {
        assert!(parse_translations("").is_empty());
        assert!(parse_translations("I cannot translate this.").is_empty());
    }

    proptest! {
        #[test]
        fn prop_round_trip_recovers_every_index(
            texts in prop::collection::vec(
                "[a-zA-Z0-9 ,.]{0,12}[a-zA-Z0-9][a-zA-Z0-9 ,.]{0,12}",
                1..15,
            )
        ) {
            let reply = encode_batch(&texts);
            let map = parse_translations(&reply);

            prop_assert_eq!(map.len(), texts.len());
            for (i, text) in texts.iter().enumerate() {
                prop_assert_eq!(map.get(&i).map(String::as_str), Some(text.trim()));
            }
        }
    }

    // ==================== translate_batch ====================

    #[tokio::test]
    async fn test_translate_batch_success() {
        let generator = ScriptedGenerator::new(vec![Reply::Text(
            "【0】Payroll\n【1】Automation tool".to_string(),
        )]);

        let map = translate_batch(
            &generator,
            &["給与計算", "自動化ツール"],
            "Translate to English.",
            "gemini-2.0-flash",
            Some("key"),
        )
        .await;

        assert_eq!(map[&0], "Payroll");
        assert_eq!(map[&1], "Automation tool");

        let calls = generator.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].model, "gemini-2.0-flash");
        assert_eq!(calls[0].api_key.as_deref(), Some("key"));
        assert!(calls[0].prompt.contains("【0】給与計算\n【1】自動化ツール"));
    }

    #[tokio::test]
    async fn test_translate_batch_error_yields_empty_map() {
        let generator =
            ScriptedGenerator::new(vec![Reply::Fail("connection refused".to_string())]);

        let map = translate_batch(&generator, &["給与計算"], "p", "m", None).await;

        assert!(map.is_empty());
        assert_eq!(generator.calls().len(), 1, "failures are not retried");
    }

    #[tokio::test]
    async fn test_translate_batch_empty_input_skips_call() {
        let generator = ScriptedGenerator::new(vec![]);
        let empty: [&str; 0] = [];

        let map = translate_batch(&generator, &empty, "p", "m", None).await;

        assert!(map.is_empty());
        assert!(generator.calls().is_empty());
    }

    #[tokio::test]
    async fn test_translate_batch_partial_reply() {
        let generator = ScriptedGenerator::new(vec![Reply::EchoExcept(vec![3])]);
        let texts = ["一", "二", "三", "四", "五"];

        let map = translate_batch(&generator, &texts, "p", "m", None).await;

        assert_eq!(map.keys().copied().collect::<Vec<_>>(), vec![0, 1, 2, 4]);
        assert_eq!(map[&4], "EN(五)");
    }
}
