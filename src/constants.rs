/// Constants for the special vocabulary entries.
pub mod vocab {
    use crate::types::TokenId;

    /// Token used to pad encoder and decoder sequences.
    pub const PAD_TOKEN: &str = "[PAD]";
    /// Token fed to the decoder as its first input.
    pub const START_TOKEN: &str = "[START]";
    /// Token appended to encoder inputs and to untruncated decoder targets.
    pub const STOP_TOKEN: &str = "[STOP]";
    /// Token substituted for words outside the base vocabulary.
    pub const UNKNOWN_TOKEN: &str = "[UNK]";

    /// Id of [`PAD_TOKEN`].
    pub const PAD_ID: TokenId = 0;
    /// Id of [`START_TOKEN`].
    pub const START_ID: TokenId = 1;
    /// Id of [`STOP_TOKEN`].
    pub const STOP_ID: TokenId = 2;
    /// Id of [`UNKNOWN_TOKEN`].
    pub const UNKNOWN_ID: TokenId = 3;

    /// Special tokens in id order.
    pub const SPECIAL_TOKENS: [&str; 4] = [PAD_TOKEN, START_TOKEN, STOP_TOKEN, UNKNOWN_TOKEN];
}

/// Constants for raw record handling.
pub mod record {
    /// Number of fields in a well-formed raw record (source, query, target).
    pub const RECORD_FIELD_COUNT: usize = 3;
    /// Field delimiter used by line-file stores.
    pub const LINE_FIELD_DELIMITER: &str = "\t\t";
    /// Number of delimited fields on a well-formed store line.
    pub const LINE_FIELD_COUNT: usize = 4;
    /// Separator joining the two leading store fields into the source text.
    pub const SOURCE_FIELD_JOINER: &str = "/";
}

/// Constants for pipeline sizing and supervision defaults.
pub mod batcher {
    /// Default batch queue capacity (batches); the example queue holds this many batches worth.
    pub const DEFAULT_BATCH_QUEUE_CAPACITY: usize = 100;
    /// Default number of batches worth of examples sorted together in continuous mode.
    pub const DEFAULT_BUCKETING_CACHE_SIZE: usize = 100;
    /// Default number of examples per batch.
    pub const DEFAULT_BATCH_SIZE: usize = 16;
    /// Default fixed decoder length.
    pub const DEFAULT_MAX_DECODER_STEPS: usize = 100;
    /// Default RNG seed for batch-order shuffling.
    pub const DEFAULT_SEED: u64 = 42;
    /// Default interval between supervisor liveness checks.
    pub const DEFAULT_SUPERVISOR_INTERVAL_MS: u64 = 60_000;
    /// Offset mixed into per-worker seed derivation.
    pub const WORKER_SEED_OFFSET: u64 = 0xB47C_5EED;
    /// Failure reason reported after `shutdown`.
    pub const PIPELINE_STOPPED_REASON: &str = "pipeline stopped";
}
