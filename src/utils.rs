//! Whitespace tokenization shared by the example builder and record stores.

use crate::types::Word;

/// Split text into tokens on runs of Unicode whitespace.
///
/// Leading and trailing whitespace produce no empty tokens.
pub fn split_text_with_whitespace(text: &str) -> Vec<Word> {
    text.split_whitespace().map(str::to_string).collect()
}

/// Split text into tokens and append `marker` as a final token.
pub fn split_with_marker(text: &str, marker: &str) -> Vec<Word> {
    let mut words = split_text_with_whitespace(text);
    words.push(marker.to_string());
    words
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_mixed_whitespace() {
        assert_eq!(
            split_text_with_whitespace("  the\tcat \n sat  "),
            vec!["the", "cat", "sat"]
        );
        assert!(split_text_with_whitespace(" \t ").is_empty());
    }

    #[test]
    fn marker_is_appended_even_to_empty_text() {
        assert_eq!(split_with_marker("a b", "[STOP]"), vec!["a", "b", "[STOP]"]);
        assert_eq!(split_with_marker("", "[STOP]"), vec!["[STOP]"]);
    }
}
