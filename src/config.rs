use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::batcher::{
    DEFAULT_BATCH_QUEUE_CAPACITY, DEFAULT_BATCH_SIZE, DEFAULT_BUCKETING_CACHE_SIZE,
    DEFAULT_MAX_DECODER_STEPS, DEFAULT_SEED, DEFAULT_SUPERVISOR_INTERVAL_MS,
};
use crate::errors::BatcherError;

/// What the consumer of the batch queue is doing with the batches.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatcherMode {
    /// Length-bucketed batches for training.
    #[default]
    Train,
    /// Length-bucketed batches for evaluation.
    Eval,
    /// Each batch is one example repeated `batch_size` times (beam search).
    Decode,
}

impl BatcherMode {
    /// Returns `true` for [`BatcherMode::Decode`].
    pub fn is_decode(self) -> bool {
        matches!(self, BatcherMode::Decode)
    }
}

/// Top-level batch pipeline configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatcherConfig {
    /// Number of examples per batch.
    pub batch_size: usize,
    /// Fixed length decoder inputs and targets are truncated or padded to.
    pub max_decoder_steps: usize,
    /// Batches worth of examples sorted together before slicing into batches.
    ///
    /// `1` disables bucketing: each batch keeps arrival order.
    pub bucketing_cache_size: usize,
    /// Capacity of the batch queue, in batches.
    ///
    /// The example queue holds `batch_queue_capacity * batch_size` examples.
    pub batch_queue_capacity: usize,
    /// Number of threads turning raw records into examples.
    pub example_workers: usize,
    /// Number of threads assembling examples into batches.
    pub batch_workers: usize,
    /// Bucketed training/eval batches or replicated decode batches.
    pub mode: BatcherMode,
    /// Read the source exactly once and then report end of stream.
    ///
    /// Forces one worker per stage and `bucketing_cache_size = 1`, keeps batch
    /// order deterministic, and disables the supervisor.
    pub single_pass: bool,
    /// Use OOV-extended target ids in batches (pointer-generator decoders).
    pub pointer_gen: bool,
    /// Seed for batch-order shuffling.
    pub seed: u64,
    /// Interval between supervisor liveness checks, in milliseconds.
    pub supervisor_interval_ms: u64,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_decoder_steps: DEFAULT_MAX_DECODER_STEPS,
            bucketing_cache_size: DEFAULT_BUCKETING_CACHE_SIZE,
            batch_queue_capacity: DEFAULT_BATCH_QUEUE_CAPACITY,
            example_workers: 1,
            batch_workers: 1,
            mode: BatcherMode::Train,
            single_pass: false,
            pointer_gen: true,
            seed: DEFAULT_SEED,
            supervisor_interval_ms: DEFAULT_SUPERVISOR_INTERVAL_MS,
        }
    }
}

impl BatcherConfig {
    /// Parse a JSON document; missing fields take their default values.
    pub fn from_json_str(raw: &str) -> Result<Self, BatcherError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON config file.
    pub fn from_json_path(path: impl AsRef<Path>) -> Result<Self, BatcherError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Override the batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Override the fixed decoder length.
    pub fn with_max_decoder_steps(mut self, max_decoder_steps: usize) -> Self {
        self.max_decoder_steps = max_decoder_steps;
        self
    }

    /// Override the bucketing cache size.
    pub fn with_bucketing_cache_size(mut self, cache_size: usize) -> Self {
        self.bucketing_cache_size = cache_size;
        self
    }

    /// Override the batch queue capacity.
    pub fn with_batch_queue_capacity(mut self, capacity: usize) -> Self {
        self.batch_queue_capacity = capacity;
        self
    }

    /// Override the worker counts for both stages.
    pub fn with_workers(mut self, example_workers: usize, batch_workers: usize) -> Self {
        self.example_workers = example_workers;
        self.batch_workers = batch_workers;
        self
    }

    /// Override the batch mode.
    pub fn with_mode(mut self, mode: BatcherMode) -> Self {
        self.mode = mode;
        self
    }

    /// Enable or disable single-pass reading.
    pub fn with_single_pass(mut self, single_pass: bool) -> Self {
        self.single_pass = single_pass;
        self
    }

    /// Enable or disable OOV-extended targets.
    pub fn with_pointer_gen(mut self, pointer_gen: bool) -> Self {
        self.pointer_gen = pointer_gen;
        self
    }

    /// Override the shuffle seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Override the supervisor check interval.
    pub fn with_supervisor_interval(mut self, interval: Duration) -> Self {
        self.supervisor_interval_ms = interval.as_millis().try_into().unwrap_or(u64::MAX);
        self
    }

    /// Capacity of the example queue, in examples.
    pub fn example_queue_capacity(&self) -> usize {
        self.batch_queue_capacity.saturating_mul(self.batch_size)
    }

    /// Number of examples pulled per bucketing window.
    pub fn window_size(&self) -> usize {
        self.batch_size.saturating_mul(self.effective_bucketing_cache_size())
    }

    /// Example worker count after single-pass overrides.
    pub fn effective_example_workers(&self) -> usize {
        if self.single_pass {
            1
        } else {
            self.example_workers
        }
    }

    /// Batch worker count after single-pass overrides.
    pub fn effective_batch_workers(&self) -> usize {
        if self.single_pass {
            1
        } else {
            self.batch_workers
        }
    }

    /// Bucketing cache size after single-pass overrides.
    pub fn effective_bucketing_cache_size(&self) -> usize {
        if self.single_pass {
            1
        } else {
            self.bucketing_cache_size
        }
    }

    /// Supervisor check interval.
    pub fn supervisor_interval(&self) -> Duration {
        Duration::from_millis(self.supervisor_interval_ms)
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), BatcherError> {
        let positive = [
            ("batch_size", self.batch_size),
            ("max_decoder_steps", self.max_decoder_steps),
            ("bucketing_cache_size", self.bucketing_cache_size),
            ("batch_queue_capacity", self.batch_queue_capacity),
            ("example_workers", self.example_workers),
            ("batch_workers", self.batch_workers),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(BatcherError::Configuration(format!(
                    "{name} must be greater than zero"
                )));
            }
        }
        if self.supervisor_interval_ms == 0 {
            return Err(BatcherError::Configuration(
                "supervisor_interval_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
