//! Structural parent resolution for hierarchical card identifiers.
//!
//! Identifiers are segments joined by alternating `/` and `.` delimiters,
//! e.g. `SP170/A.1/A.1`. Either delimiter is accepted at any position when
//! tokenizing, and the parent is rebuilt with the canonical alternation
//! (`/` after even-positioned segments, `.` after odd ones), so the result is
//! a normalized identifier rather than a prefix of the input.

/// Delimiters that separate identifier segments.
const DELIMITERS: [char; 2] = ['/', '.'];

/// Split an identifier into segments.
///
/// A trailing delimiter does not produce an empty final segment, but empty
/// segments between consecutive delimiters are kept.
pub fn segments(card_id: &str) -> Vec<&str> {
    let mut parts: Vec<&str> = card_id.split(DELIMITERS).collect();
    if parts.last().is_some_and(|last| last.is_empty()) {
        parts.pop();
    }
    parts
}

/// Textual identifier of the structural parent.
///
/// A single-segment identifier is its own parent; that is how roots are
/// recognised downstream. Never fails.
///
/// ```
/// use zettel_core::hierarchy::parent_identifier;
///
/// assert_eq!(parent_identifier("SP170/A.1/A.1/A.1/A.1"), "SP170/A.1/A.1/A.1/A");
/// assert_eq!(parent_identifier("12"), "12");
/// ```
pub fn parent_identifier(card_id: &str) -> String {
    let parts = segments(card_id);
    if parts.len() == 1 {
        return card_id.to_string();
    }

    let kept = parts.len().saturating_sub(1);
    let mut parent = String::with_capacity(card_id.len());
    for (i, part) in parts.iter().take(kept).enumerate() {
        parent.push_str(part);
        if i + 1 < kept {
            parent.push(if i % 2 == 0 { '/' } else { '.' });
        }
    }
    parent
}

/// Whether `card_id` has no structural parent.
pub fn is_root_identifier(card_id: &str) -> bool {
    parent_identifier(card_id) == card_id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_segment_is_own_parent() {
        for id in ["1", "SP170", "42", "abc"] {
            assert_eq!(parent_identifier(id), id);
            assert!(is_root_identifier(id));
        }
    }

    #[test]
    fn test_deep_identifier() {
        assert_eq!(
            parent_identifier("SP170/A.1/A.1/A.1/A.1"),
            "SP170/A.1/A.1/A.1/A"
        );
    }

    #[test]
    fn test_two_and_three_segments() {
        assert_eq!(parent_identifier("1/A"), "1");
        assert_eq!(parent_identifier("1/A.1"), "1/A");
        assert_eq!(parent_identifier("1/A.1/B"), "1/A.1");
    }

    #[test]
    fn test_delimiters_are_reconstructed_not_copied() {
        // Wrong punctuation in the input comes back in canonical form.
        assert_eq!(parent_identifier("1.A/1.B"), "1/A.1");
        assert_eq!(parent_identifier("1.A.1"), "1/A");
        assert_eq!(parent_identifier("1//A"), "1/");
    }

    #[test]
    fn test_trailing_delimiter() {
        // "1/" tokenizes to a single segment.
        assert_eq!(parent_identifier("1/"), "1/");
        assert_eq!(parent_identifier("1/A."), "1");
    }

    #[test]
    fn test_empty_identifier() {
        assert_eq!(parent_identifier(""), "");
        assert!(segments("").is_empty());
    }

    #[test]
    fn test_segments() {
        assert_eq!(segments("SP170/A.1"), vec!["SP170", "A", "1"]);
        assert_eq!(segments("a//b"), vec!["a", "", "b"]);
    }
}
