//! Per-transaction view of the store.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::kv::{KvIter, KvSnapshot, KvStore, WriteBatch};
use crate::encoding::key_generator::PersistedKeyGenerator;
use crate::error::{GraphError, Result};

/// One snapshot to read from and one batch to write into.
///
/// Reads never observe the pending batch; the graphs keep their own
/// in-memory state for anything written in the transaction. Nothing reaches
/// the store until [`Storage::commit`].
pub struct Storage {
    store: Arc<dyn KvStore>,
    snapshot: Box<dyn KvSnapshot>,
    batch: Mutex<WriteBatch>,
    key_generator: Arc<PersistedKeyGenerator>,
    read_only: bool,
}

impl Storage {
    /// Opens a view on the current state of `store`.
    pub fn open(
        store: Arc<dyn KvStore>,
        key_generator: Arc<PersistedKeyGenerator>,
        read_only: bool,
    ) -> Result<Self> {
        let snapshot = store.snapshot()?;
        Ok(Self {
            store,
            snapshot,
            batch: Mutex::new(WriteBatch::new()),
            key_generator,
            read_only,
        })
    }

    /// Whether the view rejects writes.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Generator for identifiers assigned at commit.
    pub fn key_generator(&self) -> &PersistedKeyGenerator {
        &self.key_generator
    }

    /// Reads a key from the snapshot.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.snapshot.get(key)
    }

    /// Scans the snapshot by prefix.
    pub fn iterate(&self, prefix: &[u8]) -> Result<KvIter<'_>> {
        self.snapshot.iterate(prefix)
    }

    /// Queues a put.
    pub fn put(&self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Result<()> {
        self.batch_mut()?.put(key, value);
        Ok(())
    }

    /// Queues a delete.
    pub fn delete(&self, key: impl Into<Vec<u8>>) -> Result<()> {
        self.batch_mut()?.delete(key);
        Ok(())
    }

    /// Queues a commutative counter add.
    pub fn merge(&self, key: impl Into<Vec<u8>>, delta: i64) -> Result<()> {
        self.batch_mut()?.merge(key, delta);
        Ok(())
    }

    /// Requires `key` to still be absent when the batch commits.
    pub fn require_absent(&self, key: impl Into<Vec<u8>>) -> Result<()> {
        self.batch_mut()?.require_absent(key);
        Ok(())
    }

    /// Requires `key` to still hold `value` when the batch commits.
    pub fn require_value(&self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Result<()> {
        self.batch_mut()?.require_value(key, value);
        Ok(())
    }

    /// Number of queued mutations.
    pub fn pending(&self) -> usize {
        self.batch.lock().len()
    }

    /// Hands the pending batch to the store.
    pub fn commit(&self) -> Result<()> {
        let batch = std::mem::take(&mut *self.batch.lock());
        if batch.is_empty() {
            return Ok(());
        }
        let ops = batch.len();
        self.store.commit(batch)?;
        debug!(ops, "storage.commit");
        Ok(())
    }

    /// Drops every queued mutation.
    pub fn clear(&self) {
        *self.batch.lock() = WriteBatch::new();
    }

    fn batch_mut(&self) -> Result<parking_lot::MutexGuard<'_, WriteBatch>> {
        if self.read_only {
            return Err(GraphError::invalid("write through a read-only storage view"));
        }
        Ok(self.batch.lock())
    }
}
