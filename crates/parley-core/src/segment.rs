//! Sentinel-delimited text segments.
//!
//! The same delimiter joins a run of same-author history messages into one
//! context turn and splits a completion into separate outbound messages, so
//! the model sees in its context the exact convention it is asked to produce.

/// Separator between logical chat messages inside one text blob.
pub const SEGMENT_DELIMITER: &str = "=<|>=";

/// Join message texts into a single delimited blob.
pub fn join_segments<S: AsRef<str>>(parts: &[S]) -> String {
    parts
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(SEGMENT_DELIMITER)
}

/// Split a blob on the delimiter, keeping every part verbatim.
pub fn split_exact(text: &str) -> Vec<&str> {
    text.split(SEGMENT_DELIMITER).collect()
}

/// Split a completion into deliverable segments.
///
/// Parts are trimmed and empty parts dropped; text without a delimiter yields
/// one segment, whitespace-only text yields none.
pub fn split_segments(text: &str) -> Vec<&str> {
    text.split(SEGMENT_DELIMITER)
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_two_segments() {
        assert_eq!(split_segments("Hello=<|>=World"), vec!["Hello", "World"]);
    }

    #[test]
    fn test_split_without_delimiter() {
        assert_eq!(
            split_segments("just one message"),
            vec!["just one message"]
        );
    }

    #[test]
    fn test_split_drops_empty_and_trims() {
        assert_eq!(
            split_segments("=<|>=  first \n=<|>==<|>=\tsecond=<|>=   "),
            vec!["first", "second"]
        );
    }

    #[test]
    fn test_split_blank_text() {
        assert!(split_segments("").is_empty());
        assert!(split_segments("  \n\t ").is_empty());
        assert!(split_segments("=<|>=").is_empty());
    }

    #[test]
    fn test_join_then_split_exact_recovers_members() {
        let members = vec!["hey", "", "  spaced  ", "last one"];
        let joined = join_segments(&members);
        assert_eq!(joined, "hey=<|>==<|>=  spaced  =<|>=last one");
        assert_eq!(split_exact(&joined), members);
    }

    #[test]
    fn test_join_single_member_has_no_delimiter() {
        assert_eq!(join_segments(&["solo"]), "solo");
    }

    #[test]
    fn test_split_keeps_multibyte_text() {
        assert_eq!(
            split_segments("привет=<|>=世界 🚀"),
            vec!["привет", "世界 🚀"]
        );
    }
}
