//! Record source interface and the in-memory source.
//!
//! A [`RecordSource`] is a lazy, possibly infinite sequence of [`RawRecord`]s.
//! Exhaustible sources end each pass with [`SourceItem::EndOfStream`]; infinite
//! sources must never produce it, and the pipeline treats one that does as a
//! fatal contract violation.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::constants::batcher::DEFAULT_SEED;
use crate::data::RawRecord;
use crate::errors::BatcherError;
use crate::hash::stable_hash_str;
use crate::types::SourceId;

/// Source implementation modules.
pub mod sources;

pub use sources::line_file::{LineFileSource, LineFileSourceConfig};

/// How a source behaves once every record has been read.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    /// One deterministic pass, then [`SourceItem::EndOfStream`].
    #[default]
    Exhaustible,
    /// Reshuffle and start over forever.
    Infinite,
}

/// One step of a record source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceItem {
    /// A record, possibly malformed; the builder decides.
    Record(RawRecord),
    /// The pass is over. Only valid for exhaustible sources.
    EndOfStream,
}

/// Producer of raw records for the example builder stage.
///
/// Builder workers share one source behind a lock, so implementations only
/// need `Send`.
pub trait RecordSource: Send {
    /// Stable source identifier used in logs and errors.
    fn id(&self) -> &str;
    /// Exhaustible or infinite; must not change over the source's lifetime.
    fn mode(&self) -> SourceMode;
    /// Next record, or the end-of-stream marker.
    ///
    /// Exhaustible sources return `EndOfStream` once per pass; callers must not
    /// pull again afterwards. Infinite sources that cannot yield a single
    /// well-formed record in a pass return [`BatcherError::EmptySource`].
    fn next_record(&mut self) -> Result<SourceItem, BatcherError>;
}

/// Record source over an owned list of records.
///
/// Exhaustible mode yields the records in the given order. Infinite mode
/// yields a fresh seeded permutation on every pass and fails with
/// [`BatcherError::EmptySource`] after a pass without a well-formed record.
pub struct InMemorySource {
    source_id: SourceId,
    records: Vec<RawRecord>,
    mode: SourceMode,
    order: Vec<usize>,
    cursor: usize,
    usable_this_pass: usize,
    rng: StdRng,
}

impl InMemorySource {
    /// Source named `source_id` over `records`.
    pub fn new(source_id: impl Into<SourceId>, records: Vec<RawRecord>, mode: SourceMode) -> Self {
        let source_id = source_id.into();
        let rng = StdRng::seed_from_u64(stable_hash_str(DEFAULT_SEED, &source_id));
        let mut source = Self {
            source_id,
            order: (0..records.len()).collect(),
            records,
            mode,
            cursor: 0,
            usable_this_pass: 0,
            rng,
        };
        source.start_pass();
        source
    }

    /// Reseed the pass shuffle.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(stable_hash_str(seed, &self.source_id));
        self.start_pass();
        self
    }

    /// Number of records in one pass.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn start_pass(&mut self) {
        self.cursor = 0;
        self.usable_this_pass = 0;
        if self.mode == SourceMode::Infinite {
            self.order.shuffle(&mut self.rng);
        }
    }
}

impl RecordSource for InMemorySource {
    fn id(&self) -> &str {
        &self.source_id
    }

    fn mode(&self) -> SourceMode {
        self.mode
    }

    fn next_record(&mut self) -> Result<SourceItem, BatcherError> {
        if self.cursor >= self.order.len() {
            match self.mode {
                SourceMode::Exhaustible => return Ok(SourceItem::EndOfStream),
                SourceMode::Infinite => {
                    if self.usable_this_pass == 0 {
                        return Err(BatcherError::EmptySource {
                            source_id: self.source_id.clone(),
                        });
                    }
                    self.start_pass();
                }
            }
        }
        let record = self.records[self.order[self.cursor]].clone();
        self.cursor += 1;
        if record.validate().is_ok() {
            self.usable_this_pass += 1;
        }
        Ok(SourceItem::Record(record))
    }
}
