//! Sentence chunking of card bodies for embedding.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::defaults::CHUNK_MAX_CHARS;

/// Bibliography-style reference lines (`[A.1] Some source ...`).
static REFERENCE_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)\[[A-Z]\.\d+\].*$").expect("reference line pattern is valid"));

/// Split a card into the texts that get one embedding each.
///
/// Reference lines are dropped, the remainder is split into sentences on
/// `.` (the period is kept), and sentences longer than `max_chars` are cut at
/// char boundaries. A card with no body text falls back to its title.
pub fn chunk_card(title: &str, body: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = chunk_body(body, max_chars);
    if chunks.is_empty() && !title.trim().is_empty() {
        chunks.push(title.trim().to_string());
    }
    chunks
}

/// Sentence chunks of a body; empty for a blank body.
pub fn chunk_body(body: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let cleaned = REFERENCE_LINE.replace_all(body.trim(), "");

    let mut chunks = Vec::new();
    for sentence in cleaned.split('.') {
        let sentence = sentence.trim_start_matches(' ');
        if sentence.trim().is_empty() {
            continue;
        }
        let sentence = format!("{}.", sentence);
        if sentence.chars().count() <= max_chars {
            chunks.push(sentence);
            continue;
        }
        let chars: Vec<char> = sentence.chars().collect();
        for window in chars.chunks(max_chars) {
            chunks.push(window.iter().collect());
        }
    }
    chunks
}

/// Chunk with the default size limit.
pub fn chunk_card_default(title: &str, body: &str) -> Vec<String> {
    chunk_card(title, body, CHUNK_MAX_CHARS)
}
