//! The two-stage batching pipeline and its consumer-facing pull API.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, warn};

use crate::batch::BatchAssembler;
use crate::config::BatcherConfig;
use crate::constants::batcher::{PIPELINE_STOPPED_REASON, WORKER_SEED_OFFSET};
use crate::data::{Batch, Example};
use crate::errors::BatcherError;
use crate::example::ExampleBuilder;
use crate::hash::worker_seed;
use crate::metrics::{PipelineMetrics, PipelineStats};
use crate::queue::BoundedQueue;
use crate::source::{RecordSource, SourceItem, SourceMode};
use crate::supervisor::{PipelineSupervisor, StopSignal, WorkerRole, WorkerStatus};
use crate::types::{SourceId, TokenId};
use crate::vocab::Vocabulary;

/// First fatal failure recorded by the pipeline.
#[derive(Clone, Debug)]
enum Failure {
    Contract(SourceId),
    Empty(SourceId),
    Other(String),
}

impl Failure {
    fn from_error(err: &BatcherError) -> Self {
        match err {
            BatcherError::SourceContract { source_id } => Failure::Contract(source_id.clone()),
            BatcherError::EmptySource { source_id } => Failure::Empty(source_id.clone()),
            other => Failure::Other(other.to_string()),
        }
    }

    fn to_error(&self) -> BatcherError {
        match self {
            Failure::Contract(source_id) => BatcherError::SourceContract {
                source_id: source_id.clone(),
            },
            Failure::Empty(source_id) => BatcherError::EmptySource {
                source_id: source_id.clone(),
            },
            Failure::Other(reason) => BatcherError::PipelineFailed {
                reason: reason.clone(),
            },
        }
    }
}

/// State shared by the consumer, every worker, and the supervisor.
pub(crate) struct PipelineShared {
    pub(crate) config: BatcherConfig,
    pub(crate) stats: PipelineStats,
    builder: ExampleBuilder,
    source: Mutex<Box<dyn RecordSource>>,
    source_id: SourceId,
    example_queue: BoundedQueue<Example>,
    batch_queue: BoundedQueue<Batch>,
    pad_id: TokenId,
    finished_reading: AtomicBool,
    shutdown: AtomicBool,
    failure: Mutex<Option<Failure>>,
}

impl PipelineShared {
    fn lock_source(&self) -> MutexGuard<'_, Box<dyn RecordSource>> {
        self.source.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn failure(&self) -> Option<Failure> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Record `err` as the pipeline failure and close both queues.
    ///
    /// Only the first failure is kept.
    pub(crate) fn fail(&self, err: &BatcherError) {
        {
            let mut failure = self.failure.lock().unwrap_or_else(PoisonError::into_inner);
            if failure.is_none() {
                error!(source_id = %self.source_id, error = %err, "batch pipeline failed");
                *failure = Some(Failure::from_error(err));
            }
        }
        self.batch_queue.close();
        self.example_queue.close();
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.shutdown.load(Ordering::Acquire) || self.failure().is_some()
    }
}

/// Consumer handle over a running batch pipeline.
///
/// Dropping the batcher shuts the pipeline down and joins every worker.
pub struct Batcher {
    shared: Arc<PipelineShared>,
    supervisor: Arc<Mutex<PipelineSupervisor>>,
    stop: Arc<StopSignal>,
    watcher: Option<JoinHandle<()>>,
}

impl Batcher {
    /// Validate `config`, spawn the worker pools and, in continuous mode, the
    /// supervisor thread.
    ///
    /// The source mode must agree with `config.single_pass`: exhaustible
    /// sources for single-pass runs, infinite sources otherwise.
    pub fn new(
        source: Box<dyn RecordSource>,
        vocab: Arc<dyn Vocabulary>,
        config: BatcherConfig,
    ) -> Result<Self, BatcherError> {
        config.validate()?;
        let expected_mode = if config.single_pass {
            SourceMode::Exhaustible
        } else {
            SourceMode::Infinite
        };
        if source.mode() != expected_mode {
            return Err(BatcherError::Configuration(format!(
                "source '{}' is {:?} but single_pass={} needs a {:?} source",
                source.id(),
                source.mode(),
                config.single_pass,
                expected_mode
            )));
        }
        let example_workers = config.effective_example_workers();
        let batch_workers = config.effective_batch_workers();
        if config.single_pass
            && (config.example_workers > 1
                || config.batch_workers > 1
                || config.bucketing_cache_size > 1)
        {
            info!(
                example_workers = config.example_workers,
                batch_workers = config.batch_workers,
                bucketing_cache_size = config.bucketing_cache_size,
                "single-pass run uses one worker per stage and no bucketing"
            );
        }

        let source_id = source.id().to_string();
        let pad_id = vocab.special_ids().pad;
        let shared = Arc::new(PipelineShared {
            builder: ExampleBuilder::from_config(vocab, &config),
            example_queue: BoundedQueue::new(config.example_queue_capacity()),
            batch_queue: BoundedQueue::new(config.batch_queue_capacity),
            stats: PipelineStats::default(),
            source: Mutex::new(source),
            source_id,
            pad_id,
            finished_reading: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            failure: Mutex::new(None),
            config,
        });
        info!(
            source_id = %shared.source_id,
            mode = ?shared.config.mode,
            single_pass = shared.config.single_pass,
            batch_size = shared.config.batch_size,
            example_workers,
            batch_workers,
            "starting batch pipeline"
        );

        let supervisor = Arc::new(Mutex::new(PipelineSupervisor::start(
            Arc::clone(&shared),
            example_workers,
            batch_workers,
        )?));
        let stop = Arc::new(StopSignal::default());
        let mut batcher = Self {
            shared,
            supervisor,
            stop,
            watcher: None,
        };
        if !batcher.shared.config.single_pass {
            batcher.watcher = Some(batcher.spawn_watcher()?);
        }
        Ok(batcher)
    }

    fn spawn_watcher(&self) -> Result<JoinHandle<()>, BatcherError> {
        let supervisor = Arc::clone(&self.supervisor);
        let stop = Arc::clone(&self.stop);
        let interval = self.shared.config.supervisor_interval();
        let handle = thread::Builder::new()
            .name("pipeline-supervisor".to_string())
            .spawn(move || {
                while !stop.wait(interval) {
                    supervisor
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .check_workers();
                }
                debug!("pipeline supervisor stopped");
            })?;
        Ok(handle)
    }

    /// Next batch, blocking while the batch queue is empty.
    ///
    /// Returns `Ok(None)` once a single-pass run has read the whole source and
    /// every batch has been handed out. Returns the pipeline error after a
    /// fatal failure, and [`BatcherError::PipelineFailed`] after shutdown.
    pub fn next_batch(&self) -> Result<Option<Batch>, BatcherError> {
        let shared = &self.shared;
        if let Some(failure) = shared.failure() {
            return Err(failure.to_error());
        }
        if shared.shutdown.load(Ordering::Acquire) {
            return Err(stopped_error());
        }
        if let Some(batch) = shared.batch_queue.try_pop() {
            return Ok(Some(batch));
        }
        if !shared.batch_queue.is_closed() {
            PipelineStats::bump(&shared.stats.queue_stalls);
            warn!(
                finished_reading = shared.finished_reading.load(Ordering::Acquire),
                example_queue_len = shared.example_queue.len(),
                "batch queue empty; waiting for the pipeline"
            );
        }
        match shared.batch_queue.pop() {
            Some(batch) => Ok(Some(batch)),
            None => {
                if let Some(failure) = shared.failure() {
                    Err(failure.to_error())
                } else if shared.shutdown.load(Ordering::Acquire) {
                    Err(stopped_error())
                } else {
                    Ok(None)
                }
            }
        }
    }

    pub fn config(&self) -> &BatcherConfig {
        &self.shared.config
    }

    /// Vocabulary the examples are built against.
    pub fn vocab(&self) -> &Arc<dyn Vocabulary> {
        self.shared.builder.vocab()
    }

    pub fn metrics(&self) -> PipelineMetrics {
        self.shared
            .stats
            .snapshot(self.shared.example_queue.len(), self.shared.batch_queue.len())
    }

    /// `true` once a single-pass run has read the source to its end.
    pub fn is_finished_reading(&self) -> bool {
        self.shared.finished_reading.load(Ordering::Acquire)
    }

    /// Run one supervisor pass now instead of waiting for the interval.
    ///
    /// Returns the number of restarted workers; always `0` in single-pass mode.
    pub fn check_workers(&self) -> usize {
        self.supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .check_workers()
    }

    pub fn worker_status(&self) -> Vec<WorkerStatus> {
        self.supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .statuses()
    }

    /// Stop feeding the pipeline, wake every blocked worker and join them.
    pub fn shutdown(&mut self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(source_id = %self.shared.source_id, "shutting down batch pipeline");
        self.shared.example_queue.close();
        self.shared.batch_queue.close();
        self.stop.stop();
        if let Some(watcher) = self.watcher.take() {
            let _ = watcher.join();
        }
        self.supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .join_all();
    }
}

impl Drop for Batcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn stopped_error() -> BatcherError {
    BatcherError::PipelineFailed {
        reason: PIPELINE_STOPPED_REASON.to_string(),
    }
}

/// Spawn one worker thread for `role`.
pub(crate) fn spawn_worker(
    shared: &Arc<PipelineShared>,
    role: WorkerRole,
    index: usize,
    generation: u64,
) -> Result<JoinHandle<()>, BatcherError> {
    let shared = Arc::clone(shared);
    let handle = thread::Builder::new()
        .name(format!("{role}-{index}"))
        .spawn(move || {
            let _guard = PanicGuard {
                shared: &shared,
                role,
                index,
            };
            debug!(%role, index, generation, "pipeline worker started");
            let result = match role {
                WorkerRole::ExampleBuilder => run_example_worker(&shared),
                WorkerRole::BatchAssembler => {
                    let seed = worker_seed(
                        shared.config.seed.wrapping_add(WORKER_SEED_OFFSET),
                        &role.to_string(),
                        index,
                        generation,
                    );
                    run_batch_worker(&shared, seed)
                }
            };
            match result {
                Ok(()) => debug!(%role, index, generation, "pipeline worker stopped"),
                Err(err) if err.is_fatal() || shared.config.single_pass => shared.fail(&err),
                Err(err) => error!(
                    %role,
                    index,
                    error = %err,
                    "pipeline worker failed; awaiting supervisor restart"
                ),
            }
        })?;
    Ok(handle)
}

/// Reports worker panics on unwind.
struct PanicGuard<'a> {
    shared: &'a PipelineShared,
    role: WorkerRole,
    index: usize,
}

impl Drop for PanicGuard<'_> {
    fn drop(&mut self) {
        if !thread::panicking() {
            return;
        }
        if self.shared.config.single_pass {
            self.shared.fail(&BatcherError::PipelineFailed {
                reason: format!("{} worker {} panicked", self.role, self.index),
            });
        } else {
            error!(role = %self.role, index = self.index, "pipeline worker panicked");
        }
    }
}

fn run_example_worker(shared: &PipelineShared) -> Result<(), BatcherError> {
    loop {
        if shared.is_stopping() {
            return Ok(());
        }
        let item = shared.lock_source().next_record()?;
        let record = match item {
            SourceItem::Record(record) => record,
            SourceItem::EndOfStream => {
                if !shared.config.single_pass {
                    return Err(BatcherError::SourceContract {
                        source_id: shared.source_id.clone(),
                    });
                }
                shared.finished_reading.store(true, Ordering::Release);
                shared.example_queue.close();
                info!(
                    source_id = %shared.source_id,
                    records = shared.stats.records_read.load(Ordering::Relaxed),
                    "finished reading source"
                );
                return Ok(());
            }
        };
        PipelineStats::bump(&shared.stats.records_read);
        match shared.builder.build(&record) {
            Ok(example) => {
                if shared.example_queue.push(example).is_err() {
                    return Ok(());
                }
                PipelineStats::bump(&shared.stats.examples_built);
            }
            Err(err) => {
                PipelineStats::bump(&shared.stats.records_skipped);
                debug!(source_id = %shared.source_id, error = %err, "skipping record");
            }
        }
    }
}

fn run_batch_worker(shared: &PipelineShared, seed: u64) -> Result<(), BatcherError> {
    let mut assembler = BatchAssembler::new(&shared.config, shared.pad_id, seed);
    let window_size = assembler.window_size();
    loop {
        let mut window = Vec::with_capacity(window_size);
        while window.len() < window_size {
            match shared.example_queue.pop() {
                Some(example) => window.push(example),
                None => break,
            }
        }
        let drained = window.len() < window_size;
        let batches = if assembler.mode().is_decode() {
            window
                .into_iter()
                .map(|example| assembler.assemble_decode(example))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            assembler.assemble_window(window)?
        };
        for batch in batches {
            if shared.batch_queue.push(batch).is_err() {
                return Ok(());
            }
            PipelineStats::bump(&shared.stats.batches_produced);
        }
        if drained {
            break;
        }
    }
    if shared.config.single_pass {
        info!(
            batches = shared.stats.batches_produced.load(Ordering::Relaxed),
            "example queue drained; closing batch queue"
        );
        shared.batch_queue.close();
    }
    Ok(())
}
