//! Database handle: owns the store, the persisted key generator and the
//! statistics reconciler, and opens transactions over them.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::encoding::key_generator::PersistedKeyGenerator;
use crate::error::Result;
use crate::graph::{CommitReport, CountJobReport, GraphManager, Reconciler};
use crate::storage::{default_metrics, GraphMetrics, GraphOptions, KvStore, LogStore, MemStore, Storage};

/// An open graph database.
pub struct Database {
    store: Arc<dyn KvStore>,
    key_generator: Arc<PersistedKeyGenerator>,
    options: GraphOptions,
    metrics: Arc<dyn GraphMetrics>,
    reconciler: Reconciler,
}

impl Database {
    /// Opens a database that lives only in memory.
    pub fn open_in_memory(options: GraphOptions) -> Result<Self> {
        Self::with_store(Arc::new(MemStore::new()), options)
    }

    /// Opens (or creates) a durable database backed by the log at `path`.
    pub fn open(path: impl AsRef<Path>, options: GraphOptions) -> Result<Self> {
        let store = LogStore::open(path.as_ref(), options.sync_on_commit)?;
        info!(path = %path.as_ref().display(), "database.open");
        Self::with_store(Arc::new(store), options)
    }

    /// Opens a database over any store, creating the root types when the
    /// store is empty.
    pub fn with_store(store: Arc<dyn KvStore>, options: GraphOptions) -> Result<Self> {
        options.validate()?;
        let metrics = options.metrics.clone().unwrap_or_else(default_metrics);
        let reconciler = Reconciler::new(Arc::clone(&store), &options, Arc::clone(&metrics))?;
        let db = Self {
            key_generator: Arc::new(PersistedKeyGenerator::new(Arc::clone(&store))),
            store,
            options,
            metrics,
            reconciler,
        };
        let graph = db.write()?;
        if !graph.schema().is_initialised()? {
            graph.schema().initialise()?;
            graph.commit()?;
            debug!("database.bootstrap");
        }
        Ok(db)
    }

    /// Opens a read-only transaction.
    pub fn read(&self) -> Result<GraphManager> {
        self.open_graph(true)
    }

    /// Opens a read-write transaction.
    pub fn write(&self) -> Result<GraphManager> {
        self.open_graph(false)
    }

    fn open_graph(&self, read_only: bool) -> Result<GraphManager> {
        let storage = Storage::open(Arc::clone(&self.store), Arc::clone(&self.key_generator), read_only)?;
        Ok(GraphManager::new(
            Arc::new(storage),
            self.options.label_lock_timeout,
            Arc::clone(&self.metrics),
        ))
    }

    /// Commits `graph` and wakes the reconciler when it queued count jobs.
    pub fn commit(&self, graph: GraphManager) -> Result<CommitReport> {
        let report = graph.commit()?;
        if report.count_jobs > 0 {
            self.reconciler.notify();
        }
        Ok(report)
    }

    /// Drains the count-job log on the calling thread.
    pub fn reconcile_statistics(&self) -> Result<CountJobReport> {
        self.reconciler.run()
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    /// The metrics sink in use.
    pub fn metrics(&self) -> &Arc<dyn GraphMetrics> {
        &self.metrics
    }
}
