//! Folding queued count jobs into the persisted statistics.
//!
//! A job says "this attribute (or has-edge) was created / deleted". Each job
//! is applied in its own batch guarded by preconditions on the job and on the
//! entity's counted marker: the counter moves only when the marker flips, so a
//! job replayed after a crash, or queued twice by racing writers, moves the
//! counter at most once.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::encoding::keys::{self, CountedEntity};
use crate::encoding::CountJobOperation;
use crate::error::{GraphError, Result};
use crate::storage::{GraphMetrics, GraphOptions, KvStore, WriteBatch};

/// Outcome of a reconciliation pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CountJobReport {
    /// Jobs that moved a counter.
    pub applied: u64,
    /// Jobs already reflected by the marker, removed without effect.
    pub skipped: u64,
    /// Jobs left for a later pass because a concurrent commit touched them.
    pub conflicts: u64,
    /// Whether jobs remain in the log.
    pub remaining: bool,
}

impl CountJobReport {
    fn absorb(&mut self, other: CountJobReport) {
        self.applied += other.applied;
        self.skipped += other.skipped;
        self.conflicts += other.conflicts;
        self.remaining = other.remaining;
    }
}

/// Processes up to `batch_size` queued count jobs.
pub fn process_count_jobs(
    store: &dyn KvStore,
    batch_size: usize,
    metrics: &dyn GraphMetrics,
) -> Result<CountJobReport> {
    let snapshot = store.snapshot()?;
    let jobs: Vec<_> = snapshot
        .iterate(&keys::count_job_prefix())?
        .take(batch_size)
        .collect();
    let mut report = CountJobReport::default();
    for (key, value) in &jobs {
        let entity = CountedEntity::from_job_key(key)?;
        let op = CountJobOperation::from_key(
            *value
                .first()
                .ok_or(GraphError::Corruption("empty count job"))?,
        )?;
        let marker = entity.counted_key();
        let counted = snapshot.get(&marker)?.is_some();
        let mut batch = WriteBatch::new();
        batch.require_value(key.clone(), value.clone());
        if counted {
            batch.require_value(marker.clone(), Vec::new());
        } else {
            batch.require_absent(marker.clone());
        }
        let applies = match op {
            CountJobOperation::Created => !counted,
            CountJobOperation::Deleted => counted,
        };
        if applies {
            batch.merge(entity.counter_key(), op.delta());
            match op {
                CountJobOperation::Created => batch.put(marker, Vec::new()),
                CountJobOperation::Deleted => batch.delete(marker),
            }
            batch.merge(keys::statistics_version(), 1);
        }
        batch.delete(key.clone());
        match store.commit(batch) {
            Ok(()) if applies => report.applied += 1,
            Ok(()) => report.skipped += 1,
            Err(GraphError::Conflict { .. }) => report.conflicts += 1,
            Err(err) => return Err(err),
        }
    }
    report.remaining = jobs.len() == batch_size || report.conflicts > 0;
    metrics.count_jobs_processed(report.applied, report.skipped);
    debug!(
        applied = report.applied,
        skipped = report.skipped,
        conflicts = report.conflicts,
        "stats.reconcile.batch"
    );
    Ok(report)
}

struct WorkerState {
    requested: bool,
    shutdown: bool,
}

struct Shared {
    store: Arc<dyn KvStore>,
    metrics: Arc<dyn GraphMetrics>,
    batch_size: usize,
    interval: Duration,
    pass: Mutex<()>,
    state: Mutex<WorkerState>,
    wakeup: Condvar,
}

impl Shared {
    /// Runs batches until the log is empty or a batch makes no progress.
    fn drain(&self) -> Result<CountJobReport> {
        let _pass = self.pass.lock();
        let mut total = CountJobReport::default();
        loop {
            let report = process_count_jobs(self.store.as_ref(), self.batch_size, self.metrics.as_ref())?;
            let progressed = report.applied + report.skipped > 0;
            total.absorb(report);
            if !report.remaining || !progressed {
                return Ok(total);
            }
        }
    }
}

/// Drives reconciliation, on demand and optionally from a worker thread.
pub(crate) struct Reconciler {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Reconciler {
    pub(crate) fn new(
        store: Arc<dyn KvStore>,
        options: &GraphOptions,
        metrics: Arc<dyn GraphMetrics>,
    ) -> Result<Self> {
        let shared = Arc::new(Shared {
            store,
            metrics,
            batch_size: options.count_job_batch_size,
            interval: options.reconcile_interval,
            pass: Mutex::new(()),
            state: Mutex::new(WorkerState {
                requested: false,
                shutdown: false,
            }),
            wakeup: Condvar::new(),
        });
        let worker = if options.background_reconcile {
            let worker_shared = Arc::clone(&shared);
            Some(
                thread::Builder::new()
                    .name("typegraph-reconcile".into())
                    .spawn(move || worker_loop(worker_shared))?,
            )
        } else {
            None
        };
        Ok(Self {
            shared,
            worker: Mutex::new(worker),
        })
    }

    /// Asks the worker for a pass; a no-op without a worker.
    pub(crate) fn notify(&self) {
        self.shared.state.lock().requested = true;
        self.shared.wakeup.notify_one();
    }

    /// Drains the job log on the calling thread.
    pub(crate) fn run(&self) -> Result<CountJobReport> {
        self.shared.drain()
    }
}

impl Drop for Reconciler {
    fn drop(&mut self) {
        self.shared.state.lock().shutdown = true;
        self.shared.wakeup.notify_all();
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                warn!("stats.reconcile.worker_panicked");
            }
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    debug!("stats.reconcile.worker_start");
    loop {
        {
            let mut state = shared.state.lock();
            if !state.requested && !state.shutdown {
                shared.wakeup.wait_for(&mut state, shared.interval);
            }
            if state.shutdown {
                break;
            }
            state.requested = false;
        }
        if let Err(err) = shared.drain() {
            warn!(error = %err, "stats.reconcile.failed");
        }
    }
    debug!("stats.reconcile.worker_exit");
}
