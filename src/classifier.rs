//! Decides which cell texts are worth sending for translation.
//!
//! A text qualifies when it contains at least one Hiragana, Katakana or CJK
//! ideograph (Unified block or Extension A).

use regex::Regex;
use std::sync::OnceLock;

static SOURCE_SCRIPT_REGEX: OnceLock<Regex> = OnceLock::new();

fn source_script_regex() -> &'static Regex {
    SOURCE_SCRIPT_REGEX.get_or_init(|| {
        Regex::new(r"[\x{3040}-\x{309F}\x{30A0}-\x{30FF}\x{4E00}-\x{9FAF}\x{3400}-\x{4DBF}]")
            .expect("Invalid source script regex")
    })
}

/// Check if text contains Japanese or Chinese characters
pub fn has_translatable_text(text: &str) -> bool {
    !text.is_empty() && source_script_regex().is_match(text)
}
