//! Worker liveness checks and restarts for continuous pipelines.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{error, warn};

use crate::batcher::{PipelineShared, spawn_worker};
use crate::errors::BatcherError;
use crate::metrics::PipelineStats;

/// Stage a pipeline worker belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WorkerRole {
    /// Pulls raw records and pushes examples.
    ExampleBuilder,
    /// Pulls example windows and pushes batches.
    BatchAssembler,
}

impl fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerRole::ExampleBuilder => f.write_str("example_builder"),
            WorkerRole::BatchAssembler => f.write_str("batch_assembler"),
        }
    }
}

/// Liveness of one worker slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerStatus {
    pub role: WorkerRole,
    pub index: usize,
    /// Number of times this slot has been restarted.
    pub generation: u64,
    pub alive: bool,
}

struct WorkerSlot {
    role: WorkerRole,
    index: usize,
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

impl WorkerSlot {
    fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

/// Owns the join handle of every worker and replaces the ones that died.
pub(crate) struct PipelineSupervisor {
    shared: Arc<PipelineShared>,
    slots: Vec<WorkerSlot>,
}

impl PipelineSupervisor {
    /// Start `example_workers` builders and `batch_workers` assemblers.
    pub(crate) fn start(
        shared: Arc<PipelineShared>,
        example_workers: usize,
        batch_workers: usize,
    ) -> Result<Self, BatcherError> {
        let mut supervisor = Self {
            shared,
            slots: Vec::with_capacity(example_workers + batch_workers),
        };
        let roles = std::iter::repeat_n(WorkerRole::ExampleBuilder, example_workers)
            .enumerate()
            .chain(std::iter::repeat_n(WorkerRole::BatchAssembler, batch_workers).enumerate());
        for (index, role) in roles {
            let handle = match spawn_worker(&supervisor.shared, role, index, 0) {
                Ok(handle) => handle,
                Err(err) => {
                    supervisor.shared.fail(&err);
                    supervisor.join_all();
                    return Err(err);
                }
            };
            supervisor.slots.push(WorkerSlot {
                role,
                index,
                generation: 0,
                handle: Some(handle),
            });
        }
        Ok(supervisor)
    }

    /// Restart every finished worker. Returns the number restarted.
    ///
    /// Does nothing in single-pass mode, where workers finishing is the normal
    /// end of the run, or once the pipeline is stopping.
    pub(crate) fn check_workers(&mut self) -> usize {
        if self.shared.config.single_pass || self.shared.is_stopping() {
            return 0;
        }
        let mut restarted = 0;
        for slot in &mut self.slots {
            if !slot.is_finished() {
                continue;
            }
            if let Some(handle) = slot.handle.take()
                && handle.join().is_err()
            {
                warn!(role = %slot.role, index = slot.index, "worker terminated by panic");
            }
            slot.generation += 1;
            PipelineStats::bump(&self.shared.stats.worker_restarts);
            match spawn_worker(&self.shared, slot.role, slot.index, slot.generation) {
                Ok(handle) => {
                    slot.handle = Some(handle);
                    restarted += 1;
                    warn!(
                        role = %slot.role,
                        index = slot.index,
                        generation = slot.generation,
                        "restarted dead pipeline worker"
                    );
                }
                Err(err) => {
                    error!(
                        role = %slot.role,
                        index = slot.index,
                        error = %err,
                        "worker restart failed"
                    );
                }
            }
        }
        restarted
    }

    pub(crate) fn statuses(&self) -> Vec<WorkerStatus> {
        self.slots
            .iter()
            .map(|slot| WorkerStatus {
                role: slot.role,
                index: slot.index,
                generation: slot.generation,
                alive: !slot.is_finished(),
            })
            .collect()
    }

    /// Wait for every worker to exit. Queues must already be closed.
    pub(crate) fn join_all(&mut self) {
        for slot in &mut self.slots {
            if let Some(handle) = slot.handle.take()
                && handle.join().is_err()
            {
                warn!(role = %slot.role, index = slot.index, "worker panicked before shutdown");
            }
        }
    }
}

/// Interruptible sleep for the supervisor thread.
#[derive(Default)]
pub(crate) struct StopSignal {
    stopped: Mutex<bool>,
    cvar: Condvar,
}

impl StopSignal {
    pub(crate) fn stop(&self) {
        *self.stopped.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.cvar.notify_all();
    }

    /// Sleep up to `timeout`. Returns `true` once [`stop`](Self::stop) was called.
    pub(crate) fn wait(&self, timeout: Duration) -> bool {
        let stopped = self.stopped.lock().unwrap_or_else(PoisonError::into_inner);
        let (stopped, _) = self
            .cvar
            .wait_timeout_while(stopped, timeout, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
        *stopped
    }
}
