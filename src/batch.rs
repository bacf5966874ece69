//! Padding and batch assembly.

use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::trace;

use crate::bucketing::bucket_examples;
use crate::config::{BatcherConfig, BatcherMode};
use crate::data::{Batch, Example};
use crate::errors::BatcherError;
use crate::types::TokenId;

/// Column counts a group of examples is padded to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PadWidths {
    /// Encoder row width.
    pub encoder: usize,
    /// Query row width.
    pub query: usize,
    /// Decoder input and target row width.
    pub decoder: usize,
}

impl PadWidths {
    /// Batch-local maxima for encoder and query, fixed width for the decoder.
    pub fn for_examples(examples: &[Example], max_decoder_steps: usize) -> Self {
        Self {
            encoder: examples.iter().map(|e| e.encoder_len).max().unwrap_or(0),
            query: examples.iter().map(|e| e.query_len).max().unwrap_or(0),
            decoder: max_decoder_steps,
        }
    }
}

/// An example with every sequence padded to a [`PadWidths`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaddedExample {
    /// Encoder ids padded to the encoder width.
    pub encoder_ids: Vec<TokenId>,
    /// Encoder ids with OOV words mapped to extended ids.
    pub encoder_ids_ext: Vec<TokenId>,
    /// 1 for real encoder positions, 0 for padding.
    pub encoder_mask: Vec<u8>,
    /// Query ids padded to the query width.
    pub query_ids: Vec<TokenId>,
    /// Query ids with OOV words mapped to extended ids.
    pub query_ids_ext: Vec<TokenId>,
    /// 1 for real query positions, 0 for padding.
    pub query_mask: Vec<u8>,
    /// Decoder inputs padded to the decoder width.
    pub decoder_input_ids: Vec<TokenId>,
    /// Targets padded to the decoder width.
    pub target_ids: Vec<TokenId>,
    /// Targets with in-article OOV words mapped to extended ids.
    pub target_ids_ext: Vec<TokenId>,
    /// 1 for real decoder positions, 0 for padding.
    pub decoder_mask: Vec<u8>,
}

impl Example {
    /// Padded copy of this example's sequences. The example itself is untouched.
    pub fn padded(&self, widths: PadWidths, pad_id: TokenId) -> PaddedExample {
        PaddedExample {
            encoder_ids: pad_ids(&self.encoder_ids, widths.encoder, pad_id),
            encoder_ids_ext: pad_ids(&self.encoder_ids_ext, widths.encoder, pad_id),
            encoder_mask: padding_mask_row(self.encoder_len, widths.encoder),
            query_ids: pad_ids(&self.query_ids, widths.query, pad_id),
            query_ids_ext: pad_ids(&self.query_ids_ext, widths.query, pad_id),
            query_mask: padding_mask_row(self.query_len, widths.query),
            decoder_input_ids: pad_ids(&self.decoder_input_ids, widths.decoder, pad_id),
            target_ids: pad_ids(&self.target_ids, widths.decoder, pad_id),
            target_ids_ext: pad_ids(&self.target_ids_ext, widths.decoder, pad_id),
            decoder_mask: padding_mask_row(self.decoder_len, widths.decoder),
        }
    }
}

/// Right-pad `ids` with `pad_id` up to `width`. Longer inputs are cut to `width`.
pub fn pad_ids(ids: &[TokenId], width: usize, pad_id: TokenId) -> Vec<TokenId> {
    let mut row = Vec::with_capacity(width);
    row.extend(ids.iter().copied().take(width));
    row.resize(width, pad_id);
    row
}

/// `1` for the first `len` positions of a `width`-wide row, `0` after.
pub fn padding_mask_row(len: usize, width: usize) -> Vec<u8> {
    let real = len.min(width);
    let mut row = vec![1u8; real];
    row.resize(width, 0);
    row
}

impl Batch {
    /// Pad `examples` as one group and lay them out as rectangular matrices.
    ///
    /// Row order follows `examples`. With `pointer_gen`, `target_ids` carries the
    /// OOV-extended targets.
    pub fn from_examples(
        examples: Vec<Example>,
        max_decoder_steps: usize,
        pad_id: TokenId,
        pointer_gen: bool,
    ) -> Result<Self, BatcherError> {
        if examples.is_empty() {
            return Err(BatcherError::PipelineFailed {
                reason: "cannot assemble a batch from zero examples".to_string(),
            });
        }
        let widths = PadWidths::for_examples(&examples, max_decoder_steps);
        let rows = examples.len();
        let mut batch = Batch {
            encoder_ids: Vec::with_capacity(rows),
            encoder_ids_ext: Vec::with_capacity(rows),
            encoder_lens: Vec::with_capacity(rows),
            encoder_mask: Vec::with_capacity(rows),
            query_ids: Vec::with_capacity(rows),
            query_ids_ext: Vec::with_capacity(rows),
            query_lens: Vec::with_capacity(rows),
            query_mask: Vec::with_capacity(rows),
            decoder_input_ids: Vec::with_capacity(rows),
            target_ids: Vec::with_capacity(rows),
            decoder_lens: Vec::with_capacity(rows),
            decoder_mask: Vec::with_capacity(rows),
            max_decoder_steps,
            max_oov_count: examples.iter().map(|e| e.oov_words.len()).max().unwrap_or(0),
            per_example_oov_words: Vec::with_capacity(rows),
            original_sources: Vec::with_capacity(rows),
            original_queries: Vec::with_capacity(rows),
            original_targets: Vec::with_capacity(rows),
        };

        for example in examples {
            let padded = example.padded(widths, pad_id);
            batch.encoder_ids.push(padded.encoder_ids);
            batch.encoder_ids_ext.push(padded.encoder_ids_ext);
            batch.encoder_lens.push(example.encoder_len);
            batch.encoder_mask.push(padded.encoder_mask);
            batch.query_ids.push(padded.query_ids);
            batch.query_ids_ext.push(padded.query_ids_ext);
            batch.query_lens.push(example.query_len);
            batch.query_mask.push(padded.query_mask);
            batch.decoder_input_ids.push(padded.decoder_input_ids);
            batch.target_ids.push(if pointer_gen {
                padded.target_ids_ext
            } else {
                padded.target_ids
            });
            batch.decoder_lens.push(example.decoder_len);
            batch.decoder_mask.push(padded.decoder_mask);
            batch.per_example_oov_words.push(example.oov_words);
            batch.original_sources.push(example.original_source);
            batch.original_queries.push(example.original_query);
            batch.original_targets.push(example.original_target);
        }
        Ok(batch)
    }
}

/// Turns windows of examples into batches.
///
/// Owns the group-order RNG; each assembler worker holds its own instance.
pub struct BatchAssembler {
    batch_size: usize,
    cache_size: usize,
    max_decoder_steps: usize,
    mode: BatcherMode,
    pointer_gen: bool,
    pad_id: TokenId,
    rng: Option<StdRng>,
}

impl BatchAssembler {
    /// Assembler for `config`. Single-pass configurations never shuffle.
    pub fn new(config: &BatcherConfig, pad_id: TokenId, seed: u64) -> Self {
        Self {
            batch_size: config.batch_size,
            cache_size: config.effective_bucketing_cache_size(),
            max_decoder_steps: config.max_decoder_steps,
            mode: config.mode,
            pointer_gen: config.pointer_gen,
            pad_id,
            rng: (!config.single_pass).then(|| StdRng::seed_from_u64(seed)),
        }
    }

    /// Examples pulled per window.
    pub fn window_size(&self) -> usize {
        if self.mode.is_decode() {
            1
        } else {
            self.batch_size * self.cache_size
        }
    }

    pub fn mode(&self) -> BatcherMode {
        self.mode
    }

    /// Bucket one window and build its batches, in enqueue order.
    ///
    /// With a bucketing cache of one, the window is cut in arrival order.
    pub fn assemble_window(&mut self, window: Vec<Example>) -> Result<Vec<Batch>, BatcherError> {
        if window.is_empty() {
            return Ok(Vec::new());
        }
        let window_len = window.len();
        let groups = if self.cache_size <= 1 {
            chunk_in_order(window, self.batch_size)
        } else {
            bucket_examples(window, self.batch_size, self.rng.as_mut())
        };
        trace!(
            window = window_len,
            groups = groups.len(),
            "bucketed example window"
        );
        groups
            .into_iter()
            .map(|group| {
                Batch::from_examples(group, self.max_decoder_steps, self.pad_id, self.pointer_gen)
            })
            .collect()
    }

    /// One batch holding `batch_size` copies of `example`.
    pub fn assemble_decode(&self, example: Example) -> Result<Batch, BatcherError> {
        let replicas = vec![example; self.batch_size];
        Batch::from_examples(replicas, self.max_decoder_steps, self.pad_id, self.pointer_gen)
    }
}

fn chunk_in_order(window: Vec<Example>, batch_size: usize) -> Vec<Vec<Example>> {
    let mut groups = Vec::with_capacity(window.len().div_ceil(batch_size.max(1)));
    let mut iter = window.into_iter().peekable();
    while iter.peek().is_some() {
        groups.push(iter.by_ref().take(batch_size.max(1)).collect());
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::vocab::PAD_ID;
    use crate::data::RawRecord;
    use crate::example::ExampleBuilder;
    use crate::vocab::Vocab;
    use std::sync::Arc;

    fn builder() -> ExampleBuilder {
        let vocab = Vocab::from_words(["a", "b", "c", "d", "e", "f"]).unwrap();
        ExampleBuilder::new(Arc::new(vocab), 4)
    }

    fn example_with_source_tokens(builder: &ExampleBuilder, n: usize) -> Example {
        let source = vec!["a"; n].join(" ");
        builder
            .build(&RawRecord::new(source, "b", "c d"))
            .unwrap()
    }

    fn assert_masks_match_lengths(mask: &[Vec<u8>], lens: &[usize]) {
        for (row, &len) in mask.iter().zip(lens) {
            for (col, &bit) in row.iter().enumerate() {
                assert_eq!(bit, u8::from(col < len));
            }
        }
    }

    #[test]
    fn no_bucketing_keeps_arrival_order_and_pads_dynamically() {
        let builder = builder();
        let config = BatcherConfig::default()
            .with_batch_size(3)
            .with_bucketing_cache_size(1)
            .with_max_decoder_steps(4)
            .with_single_pass(true);
        let mut assembler = BatchAssembler::new(&config, PAD_ID, 0);
        let window = [2, 5, 3]
            .into_iter()
            .map(|n| example_with_source_tokens(&builder, n))
            .collect();
        let batches = assembler.assemble_window(window).unwrap();
        assert_eq!(batches.len(), 1);
        let batch = &batches[0];
        assert_eq!(batch.encoder_lens, vec![3, 6, 4]);
        assert_eq!(batch.encoder_width(), 6);
        assert_eq!(batch.encoder_mask[0], vec![1, 1, 1, 0, 0, 0]);
        assert_eq!(batch.encoder_ids[0][3..], [PAD_ID, PAD_ID, PAD_ID]);
        assert_masks_match_lengths(&batch.encoder_mask, &batch.encoder_lens);
        assert_masks_match_lengths(&batch.query_mask, &batch.query_lens);
        assert_masks_match_lengths(&batch.decoder_mask, &batch.decoder_lens);
        for row in batch.decoder_input_ids.iter().chain(&batch.target_ids) {
            assert_eq!(row.len(), 4);
        }
    }

    #[test]
    fn bucketing_groups_similar_lengths() {
        let builder = builder();
        let config = BatcherConfig::default()
            .with_batch_size(2)
            .with_bucketing_cache_size(3)
            .with_max_decoder_steps(4);
        let mut assembler = BatchAssembler::new(&config, PAD_ID, 11);
        assert_eq!(assembler.window_size(), 6);
        let window = [7, 1, 4, 2, 8, 3]
            .into_iter()
            .map(|n| example_with_source_tokens(&builder, n))
            .collect();
        let batches = assembler.assemble_window(window).unwrap();
        let mut lens: Vec<Vec<usize>> = batches.iter().map(|b| b.encoder_lens.clone()).collect();
        lens.sort();
        assert_eq!(lens, vec![vec![2, 3], vec![4, 5], vec![8, 9]]);
        for batch in &batches {
            assert_eq!(batch.encoder_width(), batch.encoder_lens[1]);
        }
    }

    #[test]
    fn decode_mode_replicates_one_example() {
        let builder = builder();
        let config = BatcherConfig::default()
            .with_batch_size(4)
            .with_mode(BatcherMode::Decode);
        let assembler = BatchAssembler::new(&config, PAD_ID, 0);
        assert_eq!(assembler.window_size(), 1);
        let example = builder.build(&RawRecord::new("a zzz", "yyy", "zzz")).unwrap();
        let batch = assembler.assemble_decode(example).unwrap();
        assert_eq!(batch.len(), 4);
        assert!(batch.encoder_ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(batch.max_oov_count, 2);
        assert_eq!(batch.oov_words(3), Some(&["zzz".to_string(), "yyy".to_string()][..]));
    }

    #[test]
    fn pointer_gen_switches_target_ids() {
        let builder = builder();
        let example = builder.build(&RawRecord::new("zzz", "", "zzz")).unwrap();
        let base = builder.vocab().size() as TokenId;

        let extended = Batch::from_examples(vec![example.clone()], 4, PAD_ID, true).unwrap();
        assert_eq!(extended.target_ids[0][0], base);
        let plain = Batch::from_examples(vec![example], 4, PAD_ID, false).unwrap();
        assert_eq!(plain.target_ids[0][0], builder.vocab().special_ids().unknown);
        assert_eq!(plain.encoder_ids_ext[0][0], base);
    }

    #[test]
    fn padding_does_not_mutate_the_example() {
        let builder = builder();
        let example = example_with_source_tokens(&builder, 2);
        let before = example.clone();
        let widths = PadWidths {
            encoder: 8,
            query: 5,
            decoder: 4,
        };
        let padded = example.padded(widths, PAD_ID);
        assert_eq!(example, before);
        assert_eq!(padded.encoder_ids.len(), 8);
        assert_eq!(padded.query_mask, vec![1, 1, 0, 0, 0]);
    }

    #[test]
    fn empty_group_is_an_error() {
        assert!(Batch::from_examples(Vec::new(), 4, PAD_ID, true).is_err());
        assert_eq!(padding_mask_row(5, 3), vec![1, 1, 1]);
        assert_eq!(pad_ids(&[9, 9], 4, 0), vec![9, 9, 0, 0]);
    }
}
