//! Identifier generators.
//!
//! Buffered generators hand out negative bodies (-1, -2, ...) to vertices
//! created inside a transaction. Persisted generators hand out bodies from 0
//! upwards at commit time, backed by durable counters in the store, so a
//! buffered IID can never collide with a persisted one.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::trace;

use super::iid::TypeIid;
use super::keys;
use super::TypeEncoding;
use crate::error::{GraphError, Result};
use crate::storage::KvStore;

/// Transaction-local generator of negative identifier bodies.
#[derive(Default)]
pub struct BufferedKeyGenerator {
    types: Mutex<FxHashMap<TypeEncoding, i16>>,
    rules: Mutex<i16>,
    things: Mutex<FxHashMap<TypeIid, i64>>,
}

impl BufferedKeyGenerator {
    /// Creates a generator with every scope at its starting point.
    pub fn new() -> Self {
        Self::default()
    }

    /// Next body for a type in `encoding`.
    pub fn next_type(&self, encoding: TypeEncoding) -> Result<i16> {
        let mut types = self.types.lock();
        let last = types.entry(encoding).or_insert(0);
        *last = last.checked_sub(1).ok_or_else(|| exhausted(encoding.name()))?;
        Ok(*last)
    }

    /// Next body for a rule.
    pub fn next_rule(&self) -> Result<i16> {
        let mut last = self.rules.lock();
        *last = last.checked_sub(1).ok_or_else(|| exhausted("rule"))?;
        Ok(*last)
    }

    /// Next body for an instance of `type_iid`.
    pub fn next_thing(&self, type_iid: TypeIid) -> Result<i64> {
        let mut things = self.things.lock();
        let last = things.entry(type_iid).or_insert(0);
        *last = last
            .checked_sub(1)
            .ok_or_else(|| exhausted(&format!("{type_iid:?}")))?;
        Ok(*last)
    }

    /// Resets every scope.
    pub fn clear(&self) {
        self.types.lock().clear();
        *self.rules.lock() = 0;
        self.things.lock().clear();
    }
}

/// Store-backed generator of non-negative identifier bodies.
///
/// Each scope is a counter in the store advanced with a durable
/// fetch-and-add, so bodies stay unique across transactions and restarts
/// even when a commit that drew them later fails.
pub struct PersistedKeyGenerator {
    store: Arc<dyn KvStore>,
    issued: Mutex<FxHashMap<Vec<u8>, i64>>,
}

impl PersistedKeyGenerator {
    /// Creates a generator over `store`.
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            issued: Mutex::new(FxHashMap::default()),
        }
    }

    /// Next body for a type in `encoding`.
    pub fn next_type(&self, encoding: TypeEncoding) -> Result<i16> {
        let body = self.next(keys::type_generator(encoding.prefix()), i16::MAX as i64, encoding.name())?;
        Ok(body as i16)
    }

    /// Next body for a rule.
    pub fn next_rule(&self) -> Result<i16> {
        let body = self.next(keys::rule_generator(), i16::MAX as i64, "rule")?;
        Ok(body as i16)
    }

    /// Next body for an instance of `type_iid`.
    pub fn next_thing(&self, type_iid: TypeIid) -> Result<i64> {
        self.next(keys::thing_generator(type_iid), i64::MAX, &format!("{type_iid:?}"))
    }

    /// Last body issued for `scope` by this process, if any.
    pub fn last_issued(&self, scope: &[u8]) -> Option<i64> {
        self.issued.lock().get(scope).copied()
    }

    fn next(&self, scope: Vec<u8>, max: i64, name: &str) -> Result<i64> {
        let body = self.store.fetch_add(&scope, 1)?;
        if !(0..=max).contains(&body) {
            return Err(exhausted(name));
        }
        trace!(scope = name, body, "keygen.persisted.next");
        self.issued.lock().insert(scope, body);
        Ok(body)
    }
}

fn exhausted(scope: &str) -> GraphError {
    GraphError::KeySpaceExhausted {
        scope: scope.to_owned(),
    }
}
