//! Word/id vocabulary interface and the built-in in-memory vocabulary.
//!
//! The pipeline only depends on [`Vocabulary`]. [`Vocab`] is a plain
//! `word count` file loader suitable for tests and small deployments.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::{debug, warn};

use crate::constants::vocab::{PAD_ID, SPECIAL_TOKENS, START_ID, STOP_ID, STOP_TOKEN, UNKNOWN_ID};
use crate::errors::BatcherError;
use crate::types::{TokenId, Word};

/// Ids of the reserved vocabulary entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpecialIds {
    pub pad: TokenId,
    pub start: TokenId,
    pub stop: TokenId,
    pub unknown: TokenId,
}

impl Default for SpecialIds {
    fn default() -> Self {
        Self {
            pad: PAD_ID,
            start: START_ID,
            stop: STOP_ID,
            unknown: UNKNOWN_ID,
        }
    }
}

/// Read-only word/id mapping shared by all pipeline workers.
pub trait Vocabulary: Send + Sync {
    /// Id for `word`, or the unknown id when the word is not in the vocabulary.
    fn id_of(&self, word: &str) -> TokenId;
    /// Word for `id`, or `None` when `id` is outside the base vocabulary.
    fn word_of(&self, id: TokenId) -> Option<&str>;
    /// Number of ids in the base vocabulary (special tokens included).
    fn size(&self) -> usize;
    /// Reserved ids.
    fn special_ids(&self) -> SpecialIds;
    /// Token appended to encoder inputs.
    fn stop_token(&self) -> &str {
        STOP_TOKEN
    }
    /// Returns `true` when `word` maps to a non-unknown id.
    fn contains(&self, word: &str) -> bool {
        self.id_of(word) != self.special_ids().unknown
    }
}

/// In-memory vocabulary with the four special tokens at ids `0..4`.
#[derive(Clone, Debug)]
pub struct Vocab {
    word_to_id: HashMap<Word, TokenId>,
    id_to_word: Vec<Word>,
}

impl Vocab {
    /// Vocabulary holding only the special tokens.
    pub fn with_specials() -> Self {
        let mut vocab = Self {
            word_to_id: HashMap::new(),
            id_to_word: Vec::new(),
        };
        for token in SPECIAL_TOKENS {
            vocab.insert(token.to_string());
        }
        vocab
    }

    /// Build a vocabulary from words in id order (after the special tokens).
    pub fn from_words<I, S>(words: I) -> Result<Self, BatcherError>
    where
        I: IntoIterator<Item = S>,
        S: Into<Word>,
    {
        let mut vocab = Self::with_specials();
        for word in words {
            vocab.push_word(word.into())?;
        }
        Ok(vocab)
    }

    /// Load a `word count` per line vocabulary file.
    ///
    /// Lines without exactly two fields are skipped. Reading stops once the
    /// vocabulary holds `max_size` entries, special tokens included; `0` means
    /// no limit. Duplicate words and special-token collisions are errors.
    pub fn from_reader<R: BufRead>(reader: R, max_size: usize) -> Result<Self, BatcherError> {
        let mut vocab = Self::with_specials();
        for (line_no, line) in reader.lines().enumerate() {
            if max_size != 0 && vocab.size() >= max_size {
                debug!(max_size, "vocabulary reached max size; stopping read");
                break;
            }
            let line = line?;
            let pieces: Vec<&str> = line.split_whitespace().collect();
            if pieces.len() != 2 {
                warn!(line = line_no + 1, "skipping malformed vocabulary line");
                continue;
            }
            vocab.push_word(pieces[0].to_string())?;
        }
        debug!(size = vocab.size(), "vocabulary loaded");
        Ok(vocab)
    }

    /// Load a vocabulary file from disk. See [`Vocab::from_reader`].
    pub fn from_path(path: impl AsRef<Path>, max_size: usize) -> Result<Self, BatcherError> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file), max_size)
    }

    fn push_word(&mut self, word: Word) -> Result<(), BatcherError> {
        if SPECIAL_TOKENS.contains(&word.as_str()) {
            return Err(BatcherError::Vocab(format!(
                "special token {word} must not appear in the word list"
            )));
        }
        if self.word_to_id.contains_key(&word) {
            return Err(BatcherError::Vocab(format!("duplicate word {word}")));
        }
        self.insert(word);
        Ok(())
    }

    fn insert(&mut self, word: Word) {
        let id = self.id_to_word.len() as TokenId;
        self.word_to_id.insert(word.clone(), id);
        self.id_to_word.push(word);
    }
}

impl Vocabulary for Vocab {
    fn id_of(&self, word: &str) -> TokenId {
        self.word_to_id.get(word).copied().unwrap_or(UNKNOWN_ID)
    }

    fn word_of(&self, id: TokenId) -> Option<&str> {
        self.id_to_word.get(id as usize).map(String::as_str)
    }

    fn size(&self) -> usize {
        self.id_to_word.len()
    }

    fn special_ids(&self) -> SpecialIds {
        SpecialIds::default()
    }
}

/// Map decoder output ids back to words, resolving extended ids through
/// the example's `oov_words`.
pub fn output_ids_to_words(
    ids: &[TokenId],
    vocab: &dyn Vocabulary,
    oov_words: &[Word],
) -> Result<Vec<Word>, BatcherError> {
    let base = vocab.size();
    ids.iter()
        .map(|&id| {
            if let Some(word) = vocab.word_of(id) {
                return Ok(word.to_string());
            }
            let oov_idx = (id as usize).checked_sub(base).ok_or_else(|| {
                BatcherError::Vocab(format!("id {id} has no word in the base vocabulary"))
            })?;
            oov_words.get(oov_idx).cloned().ok_or_else(|| {
                BatcherError::Vocab(format!(
                    "id {id} refers to in-example OOV {oov_idx} but the example only has {} OOVs",
                    oov_words.len()
                ))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::vocab::{PAD_TOKEN, START_TOKEN, UNKNOWN_TOKEN};
    use std::io::Cursor;

    #[test]
    fn specials_occupy_first_ids() {
        let vocab = Vocab::from_words(["the", "cat"]).unwrap();
        assert_eq!(vocab.size(), 6);
        assert_eq!(vocab.id_of(PAD_TOKEN), 0);
        assert_eq!(vocab.id_of(START_TOKEN), 1);
        assert_eq!(vocab.id_of(STOP_TOKEN), 2);
        assert_eq!(vocab.id_of(UNKNOWN_TOKEN), 3);
        assert_eq!(vocab.id_of("the"), 4);
        assert_eq!(vocab.id_of("dog"), UNKNOWN_ID);
        assert_eq!(vocab.word_of(5), Some("cat"));
        assert_eq!(vocab.word_of(6), None);
        assert!(vocab.contains("cat"));
        assert!(!vocab.contains("dog"));
    }

    #[test]
    fn reader_skips_malformed_lines_and_honors_max_size() {
        let raw = "the 10\nbroken\ncat 7\nsat 3\nmat 1\n";
        let vocab = Vocab::from_reader(Cursor::new(raw), 6).unwrap();
        assert_eq!(vocab.size(), 6);
        assert!(vocab.contains("the"));
        assert!(vocab.contains("cat"));
        assert!(!vocab.contains("sat"));

        let unlimited = Vocab::from_reader(Cursor::new(raw), 0).unwrap();
        assert_eq!(unlimited.size(), 8);
    }

    #[test]
    fn reader_rejects_duplicates_and_special_tokens() {
        let err = Vocab::from_reader(Cursor::new("the 1\nthe 2\n"), 0).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
        let err = Vocab::from_reader(Cursor::new("[UNK] 5\n"), 0).unwrap_err();
        assert!(err.to_string().contains("special token"));
    }

    #[test]
    fn vocab_file_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vocab.txt");
        std::fs::write(&path, "alpha 3\nbeta 2\n").unwrap();
        let vocab = Vocab::from_path(&path, 0).unwrap();
        assert_eq!(vocab.id_of("beta"), 5);
    }

    #[test]
    fn output_ids_resolve_extended_oovs() {
        let vocab = Vocab::from_words(["the"]).unwrap();
        let oovs = vec!["zebra".to_string(), "quokka".to_string()];
        let words = output_ids_to_words(&[4, 6, 5, STOP_ID], &vocab, &oovs).unwrap();
        assert_eq!(words, vec!["the", "quokka", "zebra", STOP_TOKEN]);

        let err = output_ids_to_words(&[7], &vocab, &oovs).unwrap_err();
        assert!(err.to_string().contains("only has 2 OOVs"));
    }
}
