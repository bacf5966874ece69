#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Padding and batch assembly.
pub mod batch;
/// Pipeline handle and worker loops.
pub mod batcher;
/// Sort-and-group length bucketing.
pub mod bucketing;
/// Pipeline configuration types.
pub mod config;
/// Centralized constants used across the vocabulary, record stores, and pipeline.
pub mod constants;
/// Raw record, example, and batch types.
pub mod data;
/// Record to example conversion.
pub mod example;
/// Reusable example runners shared by downstream crates.
pub mod example_apps;
mod hash;
/// Aggregate metrics helpers.
pub mod metrics;
/// Bounded blocking queues connecting pipeline stages.
pub mod queue;
/// Record source traits and built-in sources.
pub mod source;
/// Worker liveness supervision.
pub mod supervisor;
/// Shared type aliases.
pub mod types;
/// Whitespace tokenization helpers.
pub mod utils;
/// Vocabulary trait, file-backed vocabulary, and id decoding.
pub mod vocab;

mod errors;

pub use batch::{BatchAssembler, PadWidths, PaddedExample};
pub use batcher::Batcher;
pub use bucketing::{bucket_by_key, bucket_examples};
pub use config::{BatcherConfig, BatcherMode};
pub use data::{Batch, Example, RawRecord};
pub use errors::BatcherError;
pub use example::{DecoderPlan, ExampleBuilder};
pub use metrics::{PipelineMetrics, padding_efficiency};
pub use queue::BoundedQueue;
pub use source::{
    InMemorySource, LineFileSource, LineFileSourceConfig, RecordSource, SourceItem, SourceMode,
};
pub use supervisor::{WorkerRole, WorkerStatus};
pub use types::{IdMatrix, MaskMatrix, SourceId, TokenId, Word};
pub use vocab::{SpecialIds, Vocab, Vocabulary, output_ids_to_words};
