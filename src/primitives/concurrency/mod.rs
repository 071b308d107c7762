//! Two-level reader/writer locks keyed by label.
//!
//! Every label operation first takes the coarse lock in shared mode, then the
//! lock of its own label. Operations that touch more than one label at once
//! (renames) take the coarse lock exclusively instead, which drains every
//! per-label holder without needing a global order between label locks.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawRwLock, RwLock};
use rustc_hash::FxHashMap;

use crate::error::{GraphError, Result};

type SharedGuard = ArcRwLockReadGuard<RawRwLock, ()>;
type ExclusiveGuard = ArcRwLockWriteGuard<RawRwLock, ()>;

/// Label used in timeout errors raised by [`LabelLocks::exclusive`].
const ALL_LABELS: &str = "*";

/// Lock registry handing out guards for individual labels.
pub struct LabelLocks {
    coarse: Arc<RwLock<()>>,
    labels: Mutex<FxHashMap<String, Arc<RwLock<()>>>>,
    timeout: Duration,
}

/// Guard for reading one label.
pub struct LabelReadGuard {
    _label: SharedGuard,
    _coarse: SharedGuard,
}

/// Guard for creating, mutating or deleting the holder of one label.
pub struct LabelWriteGuard {
    _label: ExclusiveGuard,
    _coarse: SharedGuard,
}

/// Guard excluding every other label operation.
pub struct AllLabelsGuard {
    _coarse: ExclusiveGuard,
}

/// Registry state seen by tests.
#[cfg(test)]
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
struct LabelLockSnapshot {
    /// Number of labels that have had a lock allocated.
    labels: usize,
    /// Whether the coarse lock is currently held exclusively.
    exclusive: bool,
}

impl LabelLocks {
    /// Creates a registry whose acquisitions give up after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            coarse: Arc::new(RwLock::new(())),
            labels: Mutex::new(FxHashMap::default()),
            timeout,
        }
    }

    /// Acquires shared access to `label`.
    pub fn read(&self, label: &str) -> Result<LabelReadGuard> {
        let coarse = self.shared_coarse(label)?;
        let lock = self.label_lock(label);
        let guard = lock
            .try_read_arc_for(self.timeout)
            .ok_or_else(|| timeout(label))?;
        Ok(LabelReadGuard {
            _label: guard,
            _coarse: coarse,
        })
    }

    /// Acquires exclusive access to `label`.
    pub fn write(&self, label: &str) -> Result<LabelWriteGuard> {
        let coarse = self.shared_coarse(label)?;
        let lock = self.label_lock(label);
        let guard = lock
            .try_write_arc_for(self.timeout)
            .ok_or_else(|| timeout(label))?;
        Ok(LabelWriteGuard {
            _label: guard,
            _coarse: coarse,
        })
    }

    /// Acquires the coarse lock exclusively, waiting out all label holders.
    pub fn exclusive(&self) -> Result<AllLabelsGuard> {
        let guard = self
            .coarse
            .try_write_arc_for(self.timeout)
            .ok_or_else(|| timeout(ALL_LABELS))?;
        Ok(AllLabelsGuard { _coarse: guard })
    }

    #[cfg(test)]
    fn snapshot(&self) -> LabelLockSnapshot {
        LabelLockSnapshot {
            labels: self.labels.lock().len(),
            exclusive: self.coarse.is_locked_exclusive(),
        }
    }

    fn shared_coarse(&self, label: &str) -> Result<SharedGuard> {
        self.coarse
            .try_read_arc_for(self.timeout)
            .ok_or_else(|| timeout(label))
    }

    fn label_lock(&self, label: &str) -> Arc<RwLock<()>> {
        let mut labels = self.labels.lock();
        if let Some(lock) = labels.get(label) {
            return Arc::clone(lock);
        }
        let lock = Arc::new(RwLock::new(()));
        labels.insert(label.to_owned(), Arc::clone(&lock));
        lock
    }
}

fn timeout(label: &str) -> GraphError {
    GraphError::LockTimeout {
        label: label.to_owned(),
    }
}
