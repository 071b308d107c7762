//! Instance statistics: vertex counts per type and has-edge counts per type
//! pair.
//!
//! A count is the persisted baseline plus whatever this transaction changed.
//! Generated vertices change the baseline through commutative merges at
//! commit. Attributes and has-edges are deduplicated across transactions, so
//! their changes are queued as count jobs and folded into the baseline later
//! by the reconciler (see [`crate::graph::process_count_jobs`]). Inferred
//! facts are counted apart and never persisted.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::debug;

use super::schema::{SchemaGraph, Transitivity};
use super::vertex::{ThingRef, TypeRef};
use crate::encoding::iid::{ThingIid, TypeIid};
use crate::encoding::keys::{self, CountedEntity};
use crate::encoding::{CountJobOperation, Status};
use crate::error::Result;
use crate::primitives::bytes::counter;
use crate::storage::Storage;

#[derive(Default)]
struct Deltas {
    vertex: FxHashMap<TypeRef, i64>,
    inferred_vertex: FxHashMap<TypeRef, i64>,
    inferred_has: FxHashMap<(TypeRef, TypeRef), i64>,
    attribute_jobs: FxHashMap<ThingRef, (TypeRef, CountJobOperation)>,
    has_jobs: FxHashMap<(ThingRef, ThingRef), ((TypeRef, TypeRef), CountJobOperation)>,
}

impl Deltas {
    fn is_empty(&self) -> bool {
        self.vertex.values().all(|d| *d == 0)
            && self.attribute_jobs.is_empty()
            && self.has_jobs.is_empty()
    }
}

/// A has-edge between two things of the given types.
#[derive(Clone, Copy, Debug)]
pub(crate) struct HasEdge {
    pub(crate) owner: ThingRef,
    pub(crate) owner_type: TypeRef,
    pub(crate) attribute: ThingRef,
    pub(crate) attribute_type: TypeRef,
}

/// Counts over one transaction's view.
pub struct Statistics {
    storage: Arc<Storage>,
    schema: Arc<SchemaGraph>,
    persisted: Mutex<FxHashMap<Vec<u8>, i64>>,
    deltas: Mutex<Deltas>,
    transitive: Mutex<FxHashMap<TypeRef, i64>>,
}

impl Statistics {
    pub(crate) fn new(storage: Arc<Storage>, schema: Arc<SchemaGraph>) -> Self {
        Self {
            storage,
            schema,
            persisted: Mutex::new(FxHashMap::default()),
            deltas: Mutex::new(Deltas::default()),
            transitive: Mutex::new(FxHashMap::default()),
        }
    }

    /// Instances of exactly `vertex`, excluding inferred ones.
    pub fn thing_vertex_count(&self, vertex: TypeRef) -> Result<i64> {
        let baseline = self.persisted_vertex_count(vertex)?;
        let deltas = self.deltas.lock();
        let generated = deltas.vertex.get(&vertex).copied().unwrap_or(0);
        let queued: i64 = deltas
            .attribute_jobs
            .values()
            .filter(|(owner, _)| *owner == vertex)
            .map(|(_, op)| op.delta())
            .sum();
        Ok(baseline + generated + queued)
    }

    /// Instances of `vertex` and of all its subtypes.
    pub fn thing_vertex_transitive_count(&self, vertex: TypeRef) -> Result<i64> {
        let cacheable = self.storage.is_read_only();
        if cacheable {
            if let Some(hit) = self.transitive.lock().get(&vertex) {
                return Ok(*hit);
            }
        }
        let mut total = self.thing_vertex_count(vertex)?;
        for child in self.schema.subtypes(vertex, Transitivity::Explicit)? {
            total += self.thing_vertex_transitive_count(child)?;
        }
        if cacheable {
            self.transitive.lock().insert(vertex, total);
        }
        Ok(total)
    }

    /// Sum of [`Statistics::thing_vertex_count`] over `types`.
    pub fn thing_vertex_sum(&self, types: &[TypeRef]) -> Result<i64> {
        types.iter().try_fold(0, |sum, t| Ok(sum + self.thing_vertex_count(*t)?))
    }

    /// Largest [`Statistics::thing_vertex_count`] among `types`; zero when
    /// empty.
    pub fn thing_vertex_max(&self, types: &[TypeRef]) -> Result<i64> {
        types
            .iter()
            .try_fold(0, |max, t| Ok(i64::max(max, self.thing_vertex_count(*t)?)))
    }

    /// Has-edges from instances of exactly `owner` to attributes of exactly
    /// `attribute`, excluding inferred ones.
    pub fn has_edge_count(&self, owner: TypeRef, attribute: TypeRef) -> Result<i64> {
        let baseline = match (self.persisted_iid(owner)?, self.persisted_iid(attribute)?) {
            (Some(owner), Some(attribute)) => self.baseline(keys::has_edge_count(owner, attribute))?,
            _ => 0,
        };
        let deltas = self.deltas.lock();
        let queued: i64 = deltas
            .has_jobs
            .values()
            .filter(|(pair, _)| *pair == (owner, attribute))
            .map(|(_, op)| op.delta())
            .sum();
        Ok(baseline + queued)
    }

    /// Sum of [`Statistics::has_edge_count`] over every owner and attribute
    /// type pair.
    pub fn has_edge_sum(&self, owners: &[TypeRef], attributes: &[TypeRef]) -> Result<i64> {
        let mut total = 0;
        for owner in owners {
            for attribute in attributes {
                total += self.has_edge_count(*owner, *attribute)?;
            }
        }
        Ok(total)
    }

    /// Inferred instances of exactly `vertex` in this transaction.
    pub fn inferred_vertex_count(&self, vertex: TypeRef) -> i64 {
        self.deltas.lock().inferred_vertex.get(&vertex).copied().unwrap_or(0)
    }

    /// Inferred has-edges between the two types in this transaction.
    pub fn inferred_has_edge_count(&self, owner: TypeRef, attribute: TypeRef) -> i64 {
        self.deltas
            .lock()
            .inferred_has
            .get(&(owner, attribute))
            .copied()
            .unwrap_or(0)
    }

    /// Number of commits that changed statistics, as of this view's snapshot.
    pub fn snapshot_version(&self) -> Result<i64> {
        self.baseline(keys::statistics_version())
    }

    pub(crate) fn vertex_created(&self, vertex: TypeRef, thing: ThingRef, is_attribute: bool, inferred: bool) {
        let mut deltas = self.deltas.lock();
        if inferred {
            *deltas.inferred_vertex.entry(vertex).or_default() += 1;
        } else if is_attribute {
            queue(&mut deltas.attribute_jobs, thing, vertex, CountJobOperation::Created);
        } else {
            *deltas.vertex.entry(vertex).or_default() += 1;
        }
        drop(deltas);
        self.transitive.lock().clear();
    }

    pub(crate) fn vertex_deleted(&self, vertex: TypeRef, thing: ThingRef, is_attribute: bool, inferred: bool) {
        let mut deltas = self.deltas.lock();
        if inferred {
            *deltas.inferred_vertex.entry(vertex).or_default() -= 1;
        } else if is_attribute {
            queue(&mut deltas.attribute_jobs, thing, vertex, CountJobOperation::Deleted);
        } else {
            *deltas.vertex.entry(vertex).or_default() -= 1;
        }
        drop(deltas);
        self.transitive.lock().clear();
    }

    /// An inferred attribute became explicit.
    pub(crate) fn attribute_promoted(&self, vertex: TypeRef, thing: ThingRef, persisted: bool) {
        let mut deltas = self.deltas.lock();
        *deltas.inferred_vertex.entry(vertex).or_default() -= 1;
        if !persisted {
            queue(&mut deltas.attribute_jobs, thing, vertex, CountJobOperation::Created);
        }
        drop(deltas);
        self.transitive.lock().clear();
    }

    pub(crate) fn has_edge_created(&self, edge: HasEdge, inferred: bool) {
        self.has_edge_changed(edge, inferred, CountJobOperation::Created);
    }

    pub(crate) fn has_edge_deleted(&self, edge: HasEdge, inferred: bool) {
        self.has_edge_changed(edge, inferred, CountJobOperation::Deleted);
    }

    fn has_edge_changed(&self, edge: HasEdge, inferred: bool, op: CountJobOperation) {
        let pair = (edge.owner_type, edge.attribute_type);
        let mut deltas = self.deltas.lock();
        if inferred {
            *deltas.inferred_has.entry(pair).or_default() += op.delta();
            return;
        }
        let key = (edge.owner, edge.attribute);
        match deltas.has_jobs.get(&key) {
            Some((_, queued)) if *queued == op.inverse() => {
                deltas.has_jobs.remove(&key);
            }
            _ => {
                deltas.has_jobs.insert(key, (pair, op));
            }
        }
    }

    /// Queues counter merges and count jobs. `iid_of` maps a thing to its
    /// final IID; returns the number of jobs written.
    pub(crate) fn commit(&self, iid_of: impl Fn(ThingRef) -> Result<ThingIid>) -> Result<u64> {
        let deltas = std::mem::take(&mut *self.deltas.lock());
        if deltas.is_empty() {
            return Ok(0);
        }
        for (vertex, delta) in &deltas.vertex {
            if *delta != 0 {
                let type_iid = self.schema.iid(*vertex)?;
                self.storage.merge(keys::vertex_count(type_iid), *delta)?;
            }
        }
        let mut jobs = 0u64;
        for (thing, (_, op)) in &deltas.attribute_jobs {
            let entity = CountedEntity::Attribute(iid_of(*thing)?);
            self.storage.put(entity.job_key(), vec![op.key()])?;
            jobs += 1;
        }
        for ((owner, attribute), (_, op)) in &deltas.has_jobs {
            let entity = CountedEntity::HasEdge {
                owner: iid_of(*owner)?,
                attribute: iid_of(*attribute)?,
            };
            self.storage.put(entity.job_key(), vec![op.key()])?;
            jobs += 1;
        }
        self.storage.merge(keys::statistics_version(), 1)?;
        debug!(jobs, "stats.commit");
        Ok(jobs)
    }

    pub(crate) fn clear(&self) {
        *self.deltas.lock() = Deltas::default();
        self.persisted.lock().clear();
        self.transitive.lock().clear();
    }

    fn persisted_vertex_count(&self, vertex: TypeRef) -> Result<i64> {
        match self.persisted_iid(vertex)? {
            Some(type_iid) => self.baseline(keys::vertex_count(type_iid)),
            None => Ok(0),
        }
    }

    fn persisted_iid(&self, vertex: TypeRef) -> Result<Option<TypeIid>> {
        if self.schema.status(vertex)? != Status::Persisted {
            return Ok(None);
        }
        Ok(Some(self.schema.iid(vertex)?))
    }

    fn baseline(&self, key: Vec<u8>) -> Result<i64> {
        if let Some(hit) = self.persisted.lock().get(&key) {
            return Ok(*hit);
        }
        let value = match self.storage.get(&key)? {
            Some(bytes) => counter::decode(&bytes)?,
            None => 0,
        };
        self.persisted.lock().insert(key, value);
        Ok(value)
    }
}

fn queue(
    jobs: &mut FxHashMap<ThingRef, (TypeRef, CountJobOperation)>,
    thing: ThingRef,
    vertex: TypeRef,
    op: CountJobOperation,
) {
    match jobs.get(&thing) {
        Some((_, queued)) if *queued == op.inverse() => {
            jobs.remove(&thing);
        }
        _ => {
            jobs.insert(thing, (vertex, op));
        }
    }
}
