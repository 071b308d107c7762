//! Ordered key-value store interface consumed by the graph layer.
//!
//! The graph only needs point reads, prefix scans over a consistent
//! snapshot, atomic batched writes with a commutative add, and a durable
//! fetch-and-add for identifier counters.

use crate::error::Result;

/// A key paired with its value, as yielded by prefix scans.
pub type KvPair = (Vec<u8>, Vec<u8>);

/// Iterator over the entries sharing a prefix, in ascending key order.
pub type KvIter<'a> = Box<dyn Iterator<Item = KvPair> + Send + 'a>;

/// A consistent point-in-time view of the store.
pub trait KvSnapshot: Send + Sync {
    /// Reads a single key.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Iterates every entry whose key starts with `prefix`.
    fn iterate(&self, prefix: &[u8]) -> Result<KvIter<'_>>;
}

/// A store the graph can commit into.
pub trait KvStore: Send + Sync {
    /// Opens a snapshot of the last committed state.
    fn snapshot(&self) -> Result<Box<dyn KvSnapshot>>;

    /// Atomically applies `batch`.
    ///
    /// Preconditions are checked against the committed state first; if any of
    /// them fails nothing is applied and `GraphError::Conflict` is returned.
    fn commit(&self, batch: WriteBatch) -> Result<()>;

    /// Durably adds `delta` to the counter at `key` and returns the value it
    /// held before. A missing key counts as zero.
    fn fetch_add(&self, key: &[u8], delta: i64) -> Result<i64>;
}

/// One mutation inside a [`WriteBatch`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteOp {
    /// Set `key` to `value`.
    Put(Vec<u8>, Vec<u8>),
    /// Remove `key`.
    Delete(Vec<u8>),
    /// Add to the counter stored at `key`.
    Merge(Vec<u8>, i64),
}

/// A condition on the committed state that must hold for a batch to apply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Precondition {
    /// The key must not exist.
    Absent(Vec<u8>),
    /// The key must exist with exactly this value.
    Equals(Vec<u8>, Vec<u8>),
}

impl Precondition {
    /// Key the condition is about.
    pub fn key(&self) -> &[u8] {
        match self {
            Precondition::Absent(key) | Precondition::Equals(key, _) => key,
        }
    }

    /// Whether the condition holds for the committed value of its key.
    pub fn holds(&self, current: Option<&[u8]>) -> bool {
        match self {
            Precondition::Absent(_) => current.is_none(),
            Precondition::Equals(_, expected) => current == Some(expected.as_slice()),
        }
    }
}

/// Ordered list of mutations applied atomically at commit.
///
/// Operations apply in insertion order, so a later write to the same key wins.
#[derive(Clone, Debug, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
    preconditions: Vec<Precondition>,
}

impl WriteBatch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a put.
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(WriteOp::Put(key.into(), value.into()));
    }

    /// Queues a delete.
    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(WriteOp::Delete(key.into()));
    }

    /// Queues a commutative add to the counter at `key`.
    pub fn merge(&mut self, key: impl Into<Vec<u8>>, delta: i64) {
        self.ops.push(WriteOp::Merge(key.into(), delta));
    }

    /// Requires `key` to be absent in the committed state.
    pub fn require_absent(&mut self, key: impl Into<Vec<u8>>) {
        self.preconditions.push(Precondition::Absent(key.into()));
    }

    /// Requires `key` to hold `value` in the committed state.
    pub fn require_value(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.preconditions
            .push(Precondition::Equals(key.into(), value.into()));
    }

    /// Queued mutations.
    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    /// Queued preconditions.
    pub fn preconditions(&self) -> &[Precondition] {
        &self.preconditions
    }

    /// Number of queued mutations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether the batch carries neither mutations nor preconditions.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty() && self.preconditions.is_empty()
    }
}
