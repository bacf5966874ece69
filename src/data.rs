use serde::{Deserialize, Serialize};

use crate::constants::record::RECORD_FIELD_COUNT;
use crate::errors::BatcherError;
use crate::types::{IdMatrix, MaskMatrix, TokenId, Word};

/// Raw record handed over by a record store.
///
/// Well-formed records carry exactly three fields: source text, query text,
/// and target text. Stores may hand over records with a different field count;
/// the example builder rejects those.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    fields: Vec<String>,
}

impl RawRecord {
    /// Well-formed record from its three fields.
    pub fn new(
        source: impl Into<String>,
        query: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            fields: vec![source.into(), query.into(), target.into()],
        }
    }

    /// Record with an arbitrary field list, as split by a store.
    pub fn from_fields(fields: Vec<String>) -> Self {
        Self { fields }
    }

    /// All fields in store order.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Returns `true` when the record has the three-field shape.
    pub fn has_expected_arity(&self) -> bool {
        self.fields.len() == RECORD_FIELD_COUNT
    }

    /// Structural check applied before tokenization.
    ///
    /// Fails with [`BatcherError::MalformedRecord`] when the record does not
    /// have three fields or its source or target text is blank. The query may
    /// be empty.
    pub fn validate(&self) -> Result<(), BatcherError> {
        if !self.has_expected_arity() {
            return Err(BatcherError::MalformedRecord {
                reason: format!(
                    "expected {RECORD_FIELD_COUNT} fields, found {}",
                    self.fields.len()
                ),
            });
        }
        if self.source().is_none_or(|text| text.trim().is_empty()) {
            return Err(BatcherError::MalformedRecord {
                reason: "empty source text".to_string(),
            });
        }
        if self.target().is_none_or(|text| text.trim().is_empty()) {
            return Err(BatcherError::MalformedRecord {
                reason: "empty target text".to_string(),
            });
        }
        Ok(())
    }

    /// Source text, if present.
    pub fn source(&self) -> Option<&str> {
        self.fields.first().map(String::as_str)
    }

    /// Query text, if present.
    pub fn query(&self) -> Option<&str> {
        self.fields.get(1).map(String::as_str)
    }

    /// Target text, if present.
    pub fn target(&self) -> Option<&str> {
        self.fields.get(2).map(String::as_str)
    }
}

/// One tokenized training/inference instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Example {
    pub original_source: String,
    pub original_query: String,
    pub original_target: String,
    /// Source tokens plus stop marker, unknown words mapped to the unknown id.
    pub encoder_ids: Vec<TokenId>,
    pub encoder_len: usize,
    /// Query tokens plus stop marker, unknown words mapped to the unknown id.
    pub query_ids: Vec<TokenId>,
    pub query_len: usize,
    /// Start id followed by target ids, truncated to `max_decoder_steps`.
    pub decoder_input_ids: Vec<TokenId>,
    /// Target ids followed by the stop id unless truncated.
    pub target_ids: Vec<TokenId>,
    pub decoder_len: usize,
    /// Whether the target was cut at `max_decoder_steps` (no stop id appended).
    pub truncated: bool,
    /// Distinct source+query words missing from the base vocabulary, first-seen order.
    pub oov_words: Vec<Word>,
    /// `encoder_ids` with OOV words mapped to `vocab_size + oov index`.
    pub encoder_ids_ext: Vec<TokenId>,
    /// `query_ids` with OOV words mapped to `vocab_size + oov index`.
    pub query_ids_ext: Vec<TokenId>,
    /// `target_ids` with words from `oov_words` mapped to their extended ids.
    pub target_ids_ext: Vec<TokenId>,
}

/// Rectangular batch of padded examples.
///
/// Encoder-side matrices are padded to the longest row of the batch; decoder-side
/// matrices always have `max_decoder_steps` columns.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub encoder_ids: IdMatrix,
    pub encoder_ids_ext: IdMatrix,
    pub encoder_lens: Vec<usize>,
    pub encoder_mask: MaskMatrix,
    pub query_ids: IdMatrix,
    pub query_ids_ext: IdMatrix,
    pub query_lens: Vec<usize>,
    pub query_mask: MaskMatrix,
    pub decoder_input_ids: IdMatrix,
    /// Extended targets when pointer generation is enabled, plain targets otherwise.
    pub target_ids: IdMatrix,
    pub decoder_lens: Vec<usize>,
    pub decoder_mask: MaskMatrix,
    pub max_decoder_steps: usize,
    /// Largest `oov_words` length across the batch.
    pub max_oov_count: usize,
    /// Each row's `oov_words`, needed to turn extended ids back into words.
    pub per_example_oov_words: Vec<Vec<Word>>,
    pub original_sources: Vec<String>,
    pub original_queries: Vec<String>,
    pub original_targets: Vec<String>,
}

impl Batch {
    /// Number of rows.
    pub fn len(&self) -> usize {
        self.encoder_lens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.encoder_lens.is_empty()
    }

    /// Column count of the encoder matrices.
    pub fn encoder_width(&self) -> usize {
        self.encoder_ids.first().map_or(0, Vec::len)
    }

    /// Column count of the query matrices.
    pub fn query_width(&self) -> usize {
        self.query_ids.first().map_or(0, Vec::len)
    }

    /// OOV words of row `row`.
    pub fn oov_words(&self, row: usize) -> Option<&[Word]> {
        self.per_example_oov_words.get(row).map(Vec::as_slice)
    }
}
