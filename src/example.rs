//! Raw record to [`Example`] conversion, including OOV extension.

use std::sync::Arc;

use indexmap::IndexSet;

use crate::config::BatcherConfig;
use crate::data::{Example, RawRecord};
use crate::errors::BatcherError;
use crate::types::{TokenId, Word};
use crate::utils::{split_text_with_whitespace, split_with_marker};
use crate::vocab::Vocabulary;

/// Length decision for one decoder sequence pair.
///
/// Computed once from the target token count and applied to both the plain and
/// the OOV-extended target, so the two paths cannot disagree on truncation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecoderPlan {
    /// Length of both the decoder input and the target.
    pub len: usize,
    /// `true` when the target was cut and no stop id is appended.
    pub truncated: bool,
}

impl DecoderPlan {
    /// Plan for a target of `target_len` tokens under `max_decoder_steps`.
    pub fn for_target_len(target_len: usize, max_decoder_steps: usize) -> Self {
        let input_len = target_len + 1;
        if input_len > max_decoder_steps {
            Self {
                len: max_decoder_steps,
                truncated: true,
            }
        } else {
            Self {
                len: input_len,
                truncated: false,
            }
        }
    }

    /// Build `(decoder_input, target)` from target token ids.
    pub fn apply(
        &self,
        target: &[TokenId],
        start_id: TokenId,
        stop_id: TokenId,
    ) -> (Vec<TokenId>, Vec<TokenId>) {
        let mut input = Vec::with_capacity(self.len + 1);
        input.push(start_id);
        input.extend_from_slice(target);
        let mut output = target.to_vec();
        if self.truncated {
            input.truncate(self.len);
            output.truncate(self.len);
        } else {
            output.push(stop_id);
        }
        (input, output)
    }
}

/// Turns raw records into tokenized examples against a shared vocabulary.
///
/// Holds no mutable state; one builder can be cloned into every worker.
#[derive(Clone)]
pub struct ExampleBuilder {
    vocab: Arc<dyn Vocabulary>,
    max_decoder_steps: usize,
}

impl ExampleBuilder {
    pub fn new(vocab: Arc<dyn Vocabulary>, max_decoder_steps: usize) -> Self {
        Self {
            vocab,
            max_decoder_steps,
        }
    }

    pub fn from_config(vocab: Arc<dyn Vocabulary>, config: &BatcherConfig) -> Self {
        Self::new(vocab, config.max_decoder_steps)
    }

    pub fn vocab(&self) -> &Arc<dyn Vocabulary> {
        &self.vocab
    }

    pub fn max_decoder_steps(&self) -> usize {
        self.max_decoder_steps
    }

    /// Build one example.
    ///
    /// Returns [`BatcherError::MalformedRecord`] when the record does not have
    /// three fields or its source or target text is blank. Callers skip such
    /// records.
    pub fn build(&self, record: &RawRecord) -> Result<Example, BatcherError> {
        record.validate()?;
        let source = record.source().unwrap_or_default();
        let query = record.query().unwrap_or_default();
        let target = record.target().unwrap_or_default();

        let specials = self.vocab.special_ids();
        let stop_token = self.vocab.stop_token();
        let source_words = split_with_marker(source, stop_token);
        let query_words = split_with_marker(query, stop_token);
        let target_words = split_text_with_whitespace(target);

        let encoder_ids = self.ids_of(&source_words);
        let query_ids = self.ids_of(&query_words);
        let target_plain = self.ids_of(&target_words);

        let oov_words = self.collect_oovs(source_words.iter().chain(query_words.iter()));
        let encoder_ids_ext = self.extended_ids(&source_words, &oov_words);
        let query_ids_ext = self.extended_ids(&query_words, &oov_words);
        let target_ext = self.extended_ids(&target_words, &oov_words);

        let plan = DecoderPlan::for_target_len(target_words.len(), self.max_decoder_steps);
        let (decoder_input_ids, target_ids) =
            plan.apply(&target_plain, specials.start, specials.stop);
        let (_, target_ids_ext) = plan.apply(&target_ext, specials.start, specials.stop);

        Ok(Example {
            original_source: source.to_string(),
            original_query: query.to_string(),
            original_target: target.to_string(),
            encoder_len: encoder_ids.len(),
            encoder_ids,
            query_len: query_ids.len(),
            query_ids,
            decoder_len: plan.len,
            decoder_input_ids,
            target_ids,
            truncated: plan.truncated,
            oov_words: oov_words.into_iter().collect(),
            encoder_ids_ext,
            query_ids_ext,
            target_ids_ext,
        })
    }

    fn ids_of(&self, words: &[Word]) -> Vec<TokenId> {
        words.iter().map(|word| self.vocab.id_of(word)).collect()
    }

    fn collect_oovs<'a>(&self, words: impl Iterator<Item = &'a Word>) -> IndexSet<Word> {
        let mut oovs = IndexSet::new();
        for word in words {
            if !self.vocab.contains(word) && !oovs.contains(word.as_str()) {
                oovs.insert(word.clone());
            }
        }
        oovs
    }

    /// Base ids, with words found in `oovs` mapped past the base vocabulary.
    fn extended_ids(&self, words: &[Word], oovs: &IndexSet<Word>) -> Vec<TokenId> {
        let base = self.vocab.size();
        words
            .iter()
            .map(|word| {
                let id = self.vocab.id_of(word);
                if id != self.vocab.special_ids().unknown {
                    return id;
                }
                match oovs.get_index_of(word.as_str()) {
                    Some(idx) => (base + idx) as TokenId,
                    None => id,
                }
            })
            .collect()
    }
}
