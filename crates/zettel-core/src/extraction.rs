//! Inline markup extraction from card bodies.
//!
//! Two kinds of markup are recognised:
//! - card references: bracketed identifiers such as `[1/A.2]`
//! - hashtags: `#name` tokens at the start of the text or after whitespace

use once_cell::sync::Lazy;
use regex::Regex;

static REFERENCE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]]+)\]").expect("reference pattern is valid"));

/// ASCII word characters and `-`, opened by start of text or ASCII whitespace.
/// Names stop at the first non-ASCII character (`#café` is `caf`).
static HASHTAG_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[\t\n\f\r ])#([0-9A-Za-z_-]+)").expect("hashtag pattern is valid")
});

/// Extract referenced card identifiers from a body.
///
/// Every `[...]` substring is a candidate target, returned in order of
/// appearance with duplicates kept. Identifiers are not validated here; a
/// bracket immediately followed by `(` is a markdown link (`[text](url)`)
/// and is skipped.
///
/// # Examples
///
/// ```
/// use zettel_core::extract_references;
///
/// let refs = extract_references("see [1/A] and [docs](https://example.com)");
/// assert_eq!(refs, vec!["1/A".to_string()]);
/// ```
pub fn extract_references(body: &str) -> Vec<String> {
    REFERENCE_PATTERN
        .captures_iter(body)
        .filter_map(|cap| {
            let whole = cap.get(0)?;
            if body[whole.end()..].starts_with('(') {
                return None;
            }
            cap.get(1).map(|m| m.as_str().to_string())
        })
        .collect()
}

/// Extract hashtag names (without `#`) from a body.
///
/// A `#` only opens a tag at the start of the text or after whitespace, so
/// `foo#bar` yields nothing. Names keep their case and duplicates are kept.
///
/// # Examples
///
/// ```
/// use zettel_core::extract_hashtags;
///
/// assert_eq!(extract_hashtags("hello #world"), vec!["world".to_string()]);
/// assert!(extract_hashtags("foo#bar").is_empty());
/// ```
pub fn extract_hashtags(body: &str) -> Vec<String> {
    HASHTAG_PATTERN
        .captures_iter(body)
        .filter_map(|cap| cap.get(1).map(|m| m.as_str().to_string()))
        .collect()
}
