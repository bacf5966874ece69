use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

use crate::data::Batch;

/// Pipeline runtime counters, shared by every worker.
#[derive(Default)]
pub(crate) struct PipelineStats {
    pub(crate) records_read: AtomicUsize,
    pub(crate) records_skipped: AtomicUsize,
    pub(crate) examples_built: AtomicUsize,
    pub(crate) batches_produced: AtomicUsize,
    pub(crate) queue_stalls: AtomicUsize,
    pub(crate) worker_restarts: AtomicUsize,
}

impl PipelineStats {
    pub(crate) fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(
        &self,
        example_queue_len: usize,
        batch_queue_len: usize,
    ) -> PipelineMetrics {
        PipelineMetrics {
            records_read: self.records_read.load(Ordering::Relaxed),
            records_skipped: self.records_skipped.load(Ordering::Relaxed),
            examples_built: self.examples_built.load(Ordering::Relaxed),
            batches_produced: self.batches_produced.load(Ordering::Relaxed),
            queue_stalls: self.queue_stalls.load(Ordering::Relaxed),
            worker_restarts: self.worker_restarts.load(Ordering::Relaxed),
            example_queue_len,
            batch_queue_len,
        }
    }
}

/// Point-in-time view of pipeline counters and queue depths.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PipelineMetrics {
    /// Records pulled from the source, malformed ones included.
    pub records_read: usize,
    /// Records rejected by the example builder.
    pub records_skipped: usize,
    pub examples_built: usize,
    pub batches_produced: usize,
    /// `next_batch` calls that found the batch queue empty.
    pub queue_stalls: usize,
    /// Worker restarts attempted by the supervisor.
    pub worker_restarts: usize,
    pub example_queue_len: usize,
    pub batch_queue_len: usize,
}

/// Share of encoder cells in `batch` holding real tokens rather than padding.
///
/// Returns `1.0` for an empty batch.
pub fn padding_efficiency(batch: &Batch) -> f64 {
    let cells = batch.len() * batch.encoder_width();
    if cells == 0 {
        return 1.0;
    }
    let real: usize = batch.encoder_lens.iter().sum();
    real as f64 / cells as f64
}
