//! Key-value storage beneath the graph.
//!
//! Defines the ordered store interface the graph commits into, an in-memory
//! and a log-backed implementation, and the per-transaction [`Storage`] view
//! combining a snapshot with a pending write batch.

mod kv;
mod log;
mod mem;
mod metrics;
mod options;
mod txn;

/// Store interface and write batches.
pub use kv::{KvIter, KvPair, KvSnapshot, KvStore, Precondition, WriteBatch, WriteOp};

/// Durable log-backed store.
pub use log::{LogStats, LogStore};

/// In-memory store.
pub use mem::MemStore;

/// Metrics hooks.
pub use metrics::{default_metrics, CounterMetrics, GraphMetrics, NoopMetrics};

/// Graph configuration options.
pub use options::GraphOptions;

/// Per-transaction storage view.
pub use txn::Storage;
