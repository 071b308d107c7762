//! In-memory ordered store with copy-on-write snapshots.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use super::kv::{KvIter, KvSnapshot, KvStore, WriteBatch, WriteOp};
use crate::error::{GraphError, Result};
use crate::primitives::bytes::counter;

type KvMap = BTreeMap<Vec<u8>, Vec<u8>>;

/// Store keeping every committed entry in a shared ordered map.
///
/// A snapshot holds an `Arc` of the map as it was when taken; commits clone
/// the map only while a snapshot still references the old version.
#[derive(Default)]
pub struct MemStore {
    state: RwLock<Arc<KvMap>>,
}

impl MemStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed entries.
    pub fn len(&self) -> usize {
        self.state.read().len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.state.read().is_empty()
    }

    /// Checks preconditions, runs `log` and applies the batch, all while the
    /// commit lock is held. `log` is where durable stores append the batch.
    pub(crate) fn apply_with(
        &self,
        batch: &WriteBatch,
        log: impl FnOnce() -> Result<()>,
    ) -> Result<()> {
        let mut guard = self.state.write();
        for pre in batch.preconditions() {
            let current = guard.get(pre.key()).map(Vec::as_slice);
            if !pre.holds(current) {
                trace!(key = %hex::encode(pre.key()), "kv.commit.conflict");
                return Err(GraphError::Conflict {
                    key: pre.key().to_vec(),
                });
            }
        }
        // validate merges before anything is logged
        for op in batch.ops() {
            if let WriteOp::Merge(key, _) = op {
                if let Some(existing) = guard.get(key) {
                    counter::decode(existing)?;
                }
            }
        }
        log()?;
        apply_ops(Arc::make_mut(&mut guard), batch.ops())
    }

    /// Adds `delta` to the counter at `key` once `log` has accepted the new
    /// value.
    pub(crate) fn fetch_add_with(
        &self,
        key: &[u8],
        delta: i64,
        log: impl FnOnce(i64) -> Result<()>,
    ) -> Result<i64> {
        let mut guard = self.state.write();
        let previous = match guard.get(key) {
            Some(bytes) => counter::decode(bytes)?,
            None => 0,
        };
        let next = previous
            .checked_add(delta)
            .ok_or_else(|| GraphError::KeySpaceExhausted {
                scope: hex::encode(key),
            })?;
        log(next)?;
        Arc::make_mut(&mut guard).insert(key.to_vec(), counter::encode(next).to_vec());
        Ok(previous)
    }

    /// Applies mutations without checking preconditions; used by log replay.
    pub(crate) fn apply_unchecked(&self, ops: &[WriteOp]) -> Result<()> {
        let mut guard = self.state.write();
        apply_ops(Arc::make_mut(&mut guard), ops)
    }

    /// Sets a counter to an absolute value; used by log replay.
    pub(crate) fn set_counter(&self, key: &[u8], value: i64) {
        let mut guard = self.state.write();
        Arc::make_mut(&mut guard).insert(key.to_vec(), counter::encode(value).to_vec());
    }
}

fn apply_ops(map: &mut KvMap, ops: &[WriteOp]) -> Result<()> {
    for op in ops {
        match op {
            WriteOp::Put(key, value) => {
                map.insert(key.clone(), value.clone());
            }
            WriteOp::Delete(key) => {
                map.remove(key);
            }
            WriteOp::Merge(key, delta) => {
                let current = match map.get(key) {
                    Some(bytes) => counter::decode(bytes)?,
                    None => 0,
                };
                map.insert(
                    key.clone(),
                    counter::encode(current.wrapping_add(*delta)).to_vec(),
                );
            }
        }
    }
    Ok(())
}

impl KvStore for MemStore {
    fn snapshot(&self) -> Result<Box<dyn KvSnapshot>> {
        Ok(Box::new(MemSnapshot {
            map: Arc::clone(&self.state.read()),
        }))
    }

    fn commit(&self, batch: WriteBatch) -> Result<()> {
        self.apply_with(&batch, || Ok(()))
    }

    fn fetch_add(&self, key: &[u8], delta: i64) -> Result<i64> {
        self.fetch_add_with(key, delta, |_| Ok(()))
    }
}

struct MemSnapshot {
    map: Arc<KvMap>,
}

impl KvSnapshot for MemSnapshot {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.map.get(key).cloned())
    }

    fn iterate(&self, prefix: &[u8]) -> Result<KvIter<'_>> {
        let owned = prefix.to_vec();
        let iter = self
            .map
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(move |(key, _)| key.starts_with(&owned))
            .map(|(key, value)| (key.clone(), value.clone()));
        Ok(Box::new(iter))
    }
}
