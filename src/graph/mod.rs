//! The schema and data graphs, their statistics and the manager committing
//! them together.

mod data;
mod reconcile;
mod rule;
mod schema;
mod schema_stats;
mod stats;
mod vertex;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

pub use data::{DataGraph, ThingAdjacent};
pub use reconcile::{process_count_jobs, CountJobReport};
pub(crate) use reconcile::Reconciler;
pub use rule::{Conclusion, RuleBody};
pub use schema::{SchemaGraph, Transitivity, TypeAdjacent};
pub use schema_stats::SchemaStatistics;
pub use stats::Statistics;
pub use vertex::{Label, RuleRef, ThingRef, TypeEdgeProps, TypeRef};

use crate::error::{GraphError, Result};
use crate::storage::{GraphMetrics, Storage};

/// What a successful commit wrote.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CommitReport {
    /// Count jobs queued for reconciliation.
    pub count_jobs: u64,
}

/// One transaction's pair of graphs over a shared storage view.
///
/// Commit runs the schema first so that every type has its final IID before
/// any thing or edge key embedding it is written. A manager commits at most
/// once; afterwards, and after any failed commit, its state is gone.
pub struct GraphManager {
    storage: Arc<Storage>,
    schema: Arc<SchemaGraph>,
    data: DataGraph,
    metrics: Arc<dyn GraphMetrics>,
    closed: AtomicBool,
}

impl GraphManager {
    pub(crate) fn new(
        storage: Arc<Storage>,
        label_lock_timeout: std::time::Duration,
        metrics: Arc<dyn GraphMetrics>,
    ) -> Self {
        let schema = Arc::new(SchemaGraph::new(Arc::clone(&storage), label_lock_timeout));
        let data = DataGraph::new(Arc::clone(&storage), Arc::clone(&schema), Arc::clone(&metrics));
        Self {
            storage,
            schema,
            data,
            metrics,
            closed: AtomicBool::new(false),
        }
    }

    /// The schema graph.
    pub fn schema(&self) -> &SchemaGraph {
        &self.schema
    }

    /// The data graph.
    pub fn data(&self) -> &DataGraph {
        &self.data
    }

    /// Whether both graphs reject writes.
    pub fn is_read_only(&self) -> bool {
        self.storage.is_read_only()
    }

    /// Writes both graphs into the store atomically.
    ///
    /// A label index race lost to a concurrent commit surfaces as
    /// `DuplicateLabel`.
    pub fn commit(&self) -> Result<CommitReport> {
        if self.is_read_only() {
            return Err(GraphError::invalid("cannot commit a read-only graph"));
        }
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(GraphError::invalid("graph has already been committed"));
        }
        let outcome = self.write_and_commit();
        if let Err(err) = &outcome {
            warn!(error = %err, "graph.commit.failed");
        }
        self.clear();
        outcome
    }

    fn write_and_commit(&self) -> Result<CommitReport> {
        self.schema.commit()?;
        let count_jobs = self.data.commit()?;
        let ops = self.storage.pending();
        match self.storage.commit() {
            Ok(()) => {}
            Err(GraphError::Conflict { key }) => {
                return Err(match self.schema.label_for_index_key(&key) {
                    Some(label) => GraphError::DuplicateLabel { label },
                    None => GraphError::Conflict { key },
                });
            }
            Err(err) => return Err(err),
        }
        self.metrics.commit();
        if count_jobs > 0 {
            self.metrics.count_jobs_queued(count_jobs);
        }
        debug!(ops, count_jobs, "graph.commit");
        Ok(CommitReport { count_jobs })
    }

    /// Drops every buffered vertex, edge and delta in both graphs.
    pub fn clear(&self) {
        self.data.clear();
        self.schema.clear();
        self.storage.clear();
    }
}
