use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Trait for tracking graph operations and statistics bookkeeping.
///
/// Implementations collect counts of vertex and edge writes, commits and
/// count-job processing. The graph calls these hooks on its hot paths so
/// implementations must be cheap and thread-safe.
pub trait GraphMetrics: Send + Sync {
    /// Records the creation of a thing vertex.
    fn vertex_created(&self);

    /// Records the deletion of a thing vertex.
    fn vertex_deleted(&self);

    /// Records the creation of a thing edge.
    fn edge_created(&self);

    /// Records the deletion of a thing edge.
    fn edge_deleted(&self);

    /// Records a successful graph commit.
    fn commit(&self);

    /// Records count jobs written to the job log by a commit.
    fn count_jobs_queued(&self, jobs: u64);

    /// Records the outcome of a reconciliation batch.
    ///
    /// # Parameters
    /// * `applied` - Jobs that changed a persisted counter.
    /// * `skipped` - Jobs that were already reflected and only got removed.
    fn count_jobs_processed(&self, applied: u64, skipped: u64);
}

/// A no-op implementation of [`GraphMetrics`] that discards all recorded metrics.
#[derive(Default)]
pub struct NoopMetrics;

impl GraphMetrics for NoopMetrics {
    fn vertex_created(&self) {}
    fn vertex_deleted(&self) {}
    fn edge_created(&self) {}
    fn edge_deleted(&self) {}
    fn commit(&self) {}
    fn count_jobs_queued(&self, _jobs: u64) {}
    fn count_jobs_processed(&self, _applied: u64, _skipped: u64) {}
}

/// A thread-safe counter-based implementation of [`GraphMetrics`].
#[derive(Default)]
pub struct CounterMetrics {
    /// Number of thing vertices created.
    pub vertices_created: AtomicU64,

    /// Number of thing vertices deleted.
    pub vertices_deleted: AtomicU64,

    /// Number of thing edges created.
    pub edges_created: AtomicU64,

    /// Number of thing edges deleted.
    pub edges_deleted: AtomicU64,

    /// Number of successful commits.
    pub commits: AtomicU64,

    /// Number of count jobs written to the job log.
    pub count_jobs_queued: AtomicU64,

    /// Number of count jobs that changed a counter.
    pub count_jobs_applied: AtomicU64,

    /// Number of count jobs dropped as already counted.
    pub count_jobs_skipped: AtomicU64,
}

impl GraphMetrics for CounterMetrics {
    fn vertex_created(&self) {
        self.vertices_created.fetch_add(1, Ordering::Relaxed);
    }

    fn vertex_deleted(&self) {
        self.vertices_deleted.fetch_add(1, Ordering::Relaxed);
    }

    fn edge_created(&self) {
        self.edges_created.fetch_add(1, Ordering::Relaxed);
    }

    fn edge_deleted(&self) {
        self.edges_deleted.fetch_add(1, Ordering::Relaxed);
    }

    fn commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    fn count_jobs_queued(&self, jobs: u64) {
        self.count_jobs_queued.fetch_add(jobs, Ordering::Relaxed);
    }

    fn count_jobs_processed(&self, applied: u64, skipped: u64) {
        self.count_jobs_applied.fetch_add(applied, Ordering::Relaxed);
        self.count_jobs_skipped.fetch_add(skipped, Ordering::Relaxed);
    }
}

/// Returns the default metrics implementation, [`NoopMetrics`].
pub fn default_metrics() -> Arc<dyn GraphMetrics> {
    Arc::new(NoopMetrics)
}
