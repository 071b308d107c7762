//! Data graph: thing vertices and the edges between them.
//!
//! Generated things get a buffered IID on creation and a persisted one at
//! commit. Attributes are content-addressed: the IID is derived from the
//! type and the value, so putting the same value twice yields the same
//! vertex, in one transaction or across many.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace};

use super::schema::SchemaGraph;
use super::stats::{HasEdge, Statistics};
use super::vertex::{ThingRef, TypeRef};
use crate::encoding::iid::{self, ThingIid};
use crate::encoding::key_generator::BufferedKeyGenerator;
use crate::encoding::value::Value;
use crate::encoding::{Direction, Status, ThingEdge, TypeEncoding};
use crate::error::{GraphError, Result};
use crate::storage::{GraphMetrics, Storage};

struct ThingRecord {
    iid: ThingIid,
    type_ref: TypeRef,
    status: Status,
    inferred: bool,
    deleted: bool,
}

#[derive(Clone, Copy)]
struct ThingEdgeRecord {
    status: Status,
    inferred: bool,
}

/// Far end of a thing edge plus the role type tail of ROLEPLAYER edges.
type EdgeEnd = (ThingRef, Option<TypeRef>);

#[derive(Default)]
struct DataState {
    records: Vec<ThingRecord>,
    by_iid: FxHashMap<ThingIid, ThingRef>,
    /// Live things created in this transaction, per type.
    by_type: FxHashMap<TypeRef, BTreeSet<ThingRef>>,
    outs: FxHashMap<(ThingRef, ThingEdge), BTreeMap<EdgeEnd, ThingEdgeRecord>>,
    ins: FxHashMap<(ThingRef, ThingEdge), BTreeSet<EdgeEnd>>,
    loaded: FxHashSet<(ThingRef, ThingEdge, Direction)>,
    deleted_edges: FxHashSet<(ThingRef, ThingEdge, ThingRef, Option<TypeRef>)>,
}

impl DataState {
    fn record(&self, thing: ThingRef) -> Result<&ThingRecord> {
        self.records
            .get(thing.index())
            .ok_or_else(|| GraphError::invalid(format!("{thing:?} does not belong to this data graph")))
    }

    fn record_mut(&mut self, thing: ThingRef) -> Result<&mut ThingRecord> {
        self.records
            .get_mut(thing.index())
            .ok_or_else(|| GraphError::invalid(format!("{thing:?} does not belong to this data graph")))
    }

    fn push(&mut self, record: ThingRecord) -> ThingRef {
        let thing = ThingRef(self.records.len() as u32);
        self.by_iid.insert(record.iid.clone(), thing);
        if record.status == Status::Buffered {
            self.by_type.entry(record.type_ref).or_default().insert(thing);
        }
        self.records.push(record);
        thing
    }

    /// Removes an edge, returning its record.
    fn remove_edge(
        &mut self,
        from: ThingRef,
        kind: ThingEdge,
        to: ThingRef,
        role: Option<TypeRef>,
    ) -> Option<ThingEdgeRecord> {
        let record = self.outs.get_mut(&(from, kind))?.remove(&(to, role))?;
        if let Some(ins) = self.ins.get_mut(&(to, kind)) {
            ins.remove(&(from, role));
        }
        if record.status == Status::Persisted {
            self.deleted_edges.insert((from, kind, to, role));
        }
        Some(record)
    }
}

/// A thing edge seen from one of its ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThingAdjacent {
    /// Vertex at the other end.
    pub other: ThingRef,
    /// Role type of a ROLEPLAYER edge.
    pub role_type: Option<TypeRef>,
    /// Whether the edge was loaded from storage or written in this transaction.
    pub status: Status,
    /// Whether the edge was inferred.
    pub inferred: bool,
}

/// Transaction-scoped view of the instances.
pub struct DataGraph {
    storage: Arc<Storage>,
    schema: Arc<SchemaGraph>,
    key_generator: BufferedKeyGenerator,
    state: RwLock<DataState>,
    statistics: Statistics,
    metrics: Arc<dyn GraphMetrics>,
    modified: AtomicBool,
}

impl DataGraph {
    /// Creates a data view over `storage`, typed by `schema`.
    pub fn new(storage: Arc<Storage>, schema: Arc<SchemaGraph>, metrics: Arc<dyn GraphMetrics>) -> Self {
        Self {
            statistics: Statistics::new(Arc::clone(&storage), Arc::clone(&schema)),
            storage,
            schema,
            key_generator: BufferedKeyGenerator::new(),
            state: RwLock::new(DataState::default()),
            metrics,
            modified: AtomicBool::new(false),
        }
    }

    /// Whether this view rejects writes.
    pub fn is_read_only(&self) -> bool {
        self.storage.is_read_only()
    }

    /// Whether anything was written through this view.
    pub fn is_modified(&self) -> bool {
        self.modified.load(Ordering::Acquire)
    }

    /// Instance statistics of this view.
    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    /// Resolves `iid` against this transaction, then storage.
    pub fn get_readable(&self, iid: &ThingIid) -> Result<Option<ThingRef>> {
        {
            let state = self.state.read();
            if let Some(thing) = state.by_iid.get(iid) {
                return Ok((!state.record(*thing)?.deleted).then_some(*thing));
            }
        }
        if self.storage.get(iid.as_bytes())?.is_none() {
            return Ok(None);
        }
        self.intern_persisted(iid.clone()).map(Some)
    }

    /// Creates an instance of a concrete entity, relation or role type.
    pub fn create(&self, vertex: TypeRef, inferred: bool) -> Result<ThingRef> {
        self.ensure_writable()?;
        let type_iid = self.schema.iid(vertex)?;
        if matches!(type_iid.encoding(), TypeEncoding::Attribute | TypeEncoding::Thing) {
            return Err(GraphError::invalid(format!(
                "'{}' instances are not created this way",
                self.schema.label(vertex)?
            )));
        }
        self.ensure_concrete(vertex)?;
        let iid = ThingIid::generated(type_iid, self.key_generator.next_thing(type_iid)?)?;
        let thing = self.state.write().push(ThingRecord {
            iid,
            type_ref: vertex,
            status: Status::Buffered,
            inferred,
            deleted: false,
        });
        self.statistics.vertex_created(vertex, thing, false, inferred);
        self.vertex_written();
        trace!(thing = ?thing, "data.thing.create");
        Ok(thing)
    }

    /// Returns the attribute of `vertex` holding `value`, creating it when
    /// neither this transaction nor storage has one.
    ///
    /// An explicit put on an inferred attribute makes it explicit.
    pub fn put(&self, vertex: TypeRef, value: Value, inferred: bool) -> Result<ThingRef> {
        self.ensure_writable()?;
        let type_iid = self.schema.iid(vertex)?;
        if type_iid.encoding() != TypeEncoding::Attribute {
            return Err(GraphError::invalid(format!(
                "'{}' is not an attribute type",
                self.schema.label(vertex)?
            )));
        }
        self.ensure_concrete(vertex)?;
        let value_type = self.schema.value_type(vertex)?;
        if value_type != Some(value.value_type()) {
            return Err(GraphError::invalid(format!(
                "'{}' does not hold {} values",
                self.schema.label(vertex)?,
                value.value_type().name()
            )));
        }
        let iid = ThingIid::attribute(type_iid, &value)?;
        let existing = self.state.read().by_iid.get(&iid).copied();
        let existing = match existing {
            Some(thing) => Some(thing),
            None if self.storage.get(iid.as_bytes())?.is_some() => Some(self.intern_persisted(iid.clone())?),
            None => None,
        };
        let Some(thing) = existing else {
            let thing = self.state.write().push(ThingRecord {
                iid,
                type_ref: vertex,
                status: Status::Buffered,
                inferred,
                deleted: false,
            });
            self.statistics.vertex_created(vertex, thing, true, inferred);
            self.vertex_written();
            trace!(thing = ?thing, "data.attribute.create");
            return Ok(thing);
        };
        let (was_deleted, was_inferred, status) = {
            let mut state = self.state.write();
            let record = state.record_mut(thing)?;
            let before = (record.deleted, record.inferred, record.status);
            if record.deleted {
                record.deleted = false;
                record.inferred = inferred;
            } else if record.inferred && !inferred {
                record.inferred = false;
            }
            if before.0 && before.2 == Status::Buffered {
                state.by_type.entry(vertex).or_default().insert(thing);
            }
            before
        };
        if was_deleted {
            self.statistics.vertex_created(vertex, thing, true, inferred);
            self.vertex_written();
        } else if was_inferred && !inferred {
            self.statistics
                .attribute_promoted(vertex, thing, status == Status::Persisted);
            self.modified.store(true, Ordering::Release);
            debug!(thing = ?thing, "data.attribute.promote");
        }
        Ok(thing)
    }

    /// Deletes `thing` together with every edge touching it.
    pub fn delete(&self, thing: ThingRef) -> Result<()> {
        self.ensure_writable()?;
        let (type_ref, inferred, is_attribute) = {
            let state = self.state.read();
            let record = state.record(thing)?;
            if record.deleted {
                return Ok(());
            }
            (record.type_ref, record.inferred, record.iid.is_attribute())
        };
        for kind in ThingEdge::ALL {
            for direction in [Direction::Out, Direction::In] {
                self.ensure_loaded(thing, kind, direction)?;
            }
        }
        let mut removed = Vec::new();
        {
            let mut state = self.state.write();
            for kind in ThingEdge::ALL {
                let outs: Vec<EdgeEnd> = state
                    .outs
                    .get(&(thing, kind))
                    .map(|m| m.keys().copied().collect())
                    .unwrap_or_default();
                for (to, role) in outs {
                    if let Some(edge) = state.remove_edge(thing, kind, to, role) {
                        removed.push((thing, kind, to, edge));
                    }
                }
                let ins: Vec<EdgeEnd> = state
                    .ins
                    .get(&(thing, kind))
                    .map(|s| s.iter().copied().collect())
                    .unwrap_or_default();
                for (from, role) in ins {
                    if let Some(edge) = state.remove_edge(from, kind, thing, role) {
                        removed.push((from, kind, thing, edge));
                    }
                }
            }
            state.record_mut(thing)?.deleted = true;
            if let Some(index) = state.by_type.get_mut(&type_ref) {
                index.remove(&thing);
            }
        }
        for (from, kind, to, edge) in removed {
            self.edge_removed(from, kind, to, edge)?;
        }
        self.statistics.vertex_deleted(type_ref, thing, is_attribute, inferred);
        self.metrics.vertex_deleted();
        self.modified.store(true, Ordering::Release);
        trace!(thing = ?thing, "data.thing.delete");
        Ok(())
    }

    /// Current IID; buffered until the data graph commits.
    pub fn iid(&self, thing: ThingRef) -> Result<ThingIid> {
        Ok(self.state.read().record(thing)?.iid.clone())
    }

    /// Type of the thing; ISA is implicit in the IID.
    pub fn type_of(&self, thing: ThingRef) -> Result<TypeRef> {
        Ok(self.state.read().record(thing)?.type_ref)
    }

    /// Whether the thing was created in this transaction or loaded.
    pub fn status(&self, thing: ThingRef) -> Result<Status> {
        Ok(self.state.read().record(thing)?.status)
    }

    /// Whether the thing is inferred.
    pub fn is_inferred(&self, thing: ThingRef) -> Result<bool> {
        Ok(self.state.read().record(thing)?.inferred)
    }

    /// Whether the thing was deleted in this transaction.
    pub fn is_deleted(&self, thing: ThingRef) -> Result<bool> {
        Ok(self.state.read().record(thing)?.deleted)
    }

    /// Value of an attribute; `None` for generated things.
    pub fn value(&self, thing: ThingRef) -> Result<Option<Value>> {
        self.state.read().record(thing)?.iid.value()
    }

    /// Adds a HAS, PLAYING or RELATING edge.
    ///
    /// Only inferred edges may touch an inferred thing, since inferred things
    /// are never written to storage.
    pub fn put_edge(&self, from: ThingRef, kind: ThingEdge, to: ThingRef, inferred: bool) -> Result<()> {
        if kind == ThingEdge::RolePlayer {
            return Err(GraphError::invalid("role players are added with put_role_player"));
        }
        self.insert_edge(from, kind, to, None, inferred)
    }

    /// Adds a ROLEPLAYER edge from `relation` to `player` through `role_type`.
    pub fn put_role_player(
        &self,
        relation: ThingRef,
        player: ThingRef,
        role_type: TypeRef,
        inferred: bool,
    ) -> Result<()> {
        if self.schema.encoding(role_type)? != TypeEncoding::Role {
            return Err(GraphError::invalid(format!(
                "'{}' is not a role type",
                self.schema.label(role_type)?
            )));
        }
        self.insert_edge(relation, ThingEdge::RolePlayer, player, Some(role_type), inferred)
    }

    /// Removes a HAS, PLAYING or RELATING edge; returns whether it existed.
    pub fn delete_edge(&self, from: ThingRef, kind: ThingEdge, to: ThingRef) -> Result<bool> {
        if kind == ThingEdge::RolePlayer {
            return Err(GraphError::invalid("role players are removed with delete_role_player"));
        }
        self.remove_edge(from, kind, to, None)
    }

    /// Removes a ROLEPLAYER edge; returns whether it existed.
    pub fn delete_role_player(&self, relation: ThingRef, player: ThingRef, role_type: TypeRef) -> Result<bool> {
        self.remove_edge(relation, ThingEdge::RolePlayer, player, Some(role_type))
    }

    /// Outgoing edges of one kind.
    pub fn outs(&self, thing: ThingRef, kind: ThingEdge) -> Result<Vec<ThingAdjacent>> {
        self.ensure_loaded(thing, kind, Direction::Out)?;
        let state = self.state.read();
        Ok(state
            .outs
            .get(&(thing, kind))
            .map(|edges| {
                edges
                    .iter()
                    .map(|((other, role_type), edge)| ThingAdjacent {
                        other: *other,
                        role_type: *role_type,
                        status: edge.status,
                        inferred: edge.inferred,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Incoming edges of one kind.
    pub fn ins(&self, thing: ThingRef, kind: ThingEdge) -> Result<Vec<ThingAdjacent>> {
        self.ensure_loaded(thing, kind, Direction::In)?;
        let state = self.state.read();
        let Some(froms) = state.ins.get(&(thing, kind)) else {
            return Ok(Vec::new());
        };
        Ok(froms
            .iter()
            .filter_map(|(from, role_type)| {
                let edge = state.outs.get(&(*from, kind))?.get(&(thing, *role_type))?;
                Some(ThingAdjacent {
                    other: *from,
                    role_type: *role_type,
                    status: edge.status,
                    inferred: edge.inferred,
                })
            })
            .collect())
    }

    /// Live instances of exactly `vertex`, ordered by IID: the stored range
    /// merged with things created in this transaction.
    pub fn instances(&self, vertex: TypeRef) -> Result<Vec<ThingRef>> {
        let type_iid = self.schema.iid(vertex)?;
        let Some(encoding) = type_iid.encoding().instance_encoding() else {
            return Ok(Vec::new());
        };
        let mut found = BTreeMap::new();
        if self.schema.status(vertex)? == Status::Persisted {
            let mut prefix = vec![encoding.prefix().key()];
            prefix.extend_from_slice(type_iid.as_bytes());
            let mut stored = Vec::new();
            for (key, _) in self.storage.iterate(&prefix)? {
                let (iid, len) = ThingIid::extract(&key, 0)?;
                if len == key.len() {
                    stored.push(iid);
                }
            }
            for iid in stored {
                let thing = self.intern_persisted(iid.clone())?;
                found.insert(iid, thing);
            }
        }
        let state = self.state.read();
        if let Some(buffered) = state.by_type.get(&vertex) {
            for thing in buffered {
                found.insert(state.record(*thing)?.iid.clone(), *thing);
            }
        }
        Ok(found
            .into_values()
            .filter(|thing| !state.records[thing.index()].deleted)
            .collect())
    }

    fn insert_edge(
        &self,
        from: ThingRef,
        kind: ThingEdge,
        to: ThingRef,
        role: Option<TypeRef>,
        inferred: bool,
    ) -> Result<()> {
        self.ensure_writable()?;
        {
            let state = self.state.read();
            let (from_record, to_record) = (state.record(from)?, state.record(to)?);
            if from_record.deleted || to_record.deleted {
                return Err(GraphError::invalid("edge touches a deleted thing"));
            }
            if kind == ThingEdge::Has && !to_record.iid.is_attribute() {
                return Err(GraphError::invalid("HAS edges must end at an attribute"));
            }
            if !inferred && (from_record.inferred || to_record.inferred) {
                return Err(GraphError::invalid("explicit edge touches an inferred thing"));
            }
        }
        self.ensure_loaded(from, kind, Direction::Out)?;
        let change = {
            let mut state = self.state.write();
            let edges = state.outs.entry((from, kind)).or_default();
            match edges.get_mut(&(to, role)) {
                Some(existing) if existing.inferred && !inferred => {
                    existing.inferred = false;
                    Some(true)
                }
                Some(_) => None,
                None => {
                    edges.insert(
                        (to, role),
                        ThingEdgeRecord {
                            status: Status::Buffered,
                            inferred,
                        },
                    );
                    state.ins.entry((to, kind)).or_default().insert((from, role));
                    state.deleted_edges.remove(&(from, kind, to, role));
                    Some(false)
                }
            }
        };
        let Some(promoted) = change else {
            return Ok(());
        };
        if kind == ThingEdge::Has {
            let edge = self.has_edge(from, to)?;
            if promoted {
                self.statistics.has_edge_deleted(edge, true);
            }
            self.statistics.has_edge_created(edge, inferred);
        }
        if !promoted {
            self.metrics.edge_created();
        }
        self.modified.store(true, Ordering::Release);
        Ok(())
    }

    fn remove_edge(
        &self,
        from: ThingRef,
        kind: ThingEdge,
        to: ThingRef,
        role: Option<TypeRef>,
    ) -> Result<bool> {
        self.ensure_writable()?;
        self.ensure_loaded(from, kind, Direction::Out)?;
        let removed = self.state.write().remove_edge(from, kind, to, role);
        match removed {
            Some(edge) => {
                self.edge_removed(from, kind, to, edge)?;
                self.modified.store(true, Ordering::Release);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn edge_removed(&self, from: ThingRef, kind: ThingEdge, to: ThingRef, edge: ThingEdgeRecord) -> Result<()> {
        if kind == ThingEdge::Has {
            self.statistics.has_edge_deleted(self.has_edge(from, to)?, edge.inferred);
        }
        self.metrics.edge_deleted();
        Ok(())
    }

    fn has_edge(&self, owner: ThingRef, attribute: ThingRef) -> Result<HasEdge> {
        Ok(HasEdge {
            owner,
            owner_type: self.type_of(owner)?,
            attribute,
            attribute_type: self.type_of(attribute)?,
        })
    }

    fn ensure_loaded(&self, thing: ThingRef, kind: ThingEdge, direction: Direction) -> Result<()> {
        let (iid, status) = {
            let state = self.state.read();
            if state.loaded.contains(&(thing, kind, direction)) {
                return Ok(());
            }
            let record = state.record(thing)?;
            (record.iid.clone(), record.status)
        };
        let mut found = Vec::new();
        if status == Status::Persisted {
            let prefix = iid::edge_prefix(iid.as_bytes(), kind.infix(direction));
            let mut raw = Vec::new();
            for (key, _) in self.storage.iterate(&prefix)? {
                raw.push(iid::parse_thing_edge(&key, prefix.len(), kind)?);
            }
            for (other, role) in raw {
                let role = role.map(|r| self.schema.type_by_iid(r)).transpose()?;
                found.push((self.intern_persisted(other)?, role));
            }
        }
        let mut state = self.state.write();
        if !state.loaded.insert((thing, kind, direction)) {
            return Ok(());
        }
        for (other, role) in found {
            let (from, to) = match direction {
                Direction::Out => (thing, other),
                Direction::In => (other, thing),
            };
            if state.deleted_edges.contains(&(from, kind, to, role)) {
                continue;
            }
            state
                .outs
                .entry((from, kind))
                .or_default()
                .entry((to, role))
                .or_insert(ThingEdgeRecord {
                    status: Status::Persisted,
                    inferred: false,
                });
            state.ins.entry((to, kind)).or_default().insert((from, role));
        }
        Ok(())
    }

    fn intern_persisted(&self, iid: ThingIid) -> Result<ThingRef> {
        if let Some(thing) = self.state.read().by_iid.get(&iid) {
            return Ok(*thing);
        }
        let type_ref = self.schema.type_by_iid(iid.type_iid())?;
        let mut state = self.state.write();
        if let Some(thing) = state.by_iid.get(&iid) {
            return Ok(*thing);
        }
        Ok(state.push(ThingRecord {
            iid,
            type_ref,
            status: Status::Persisted,
            inferred: false,
            deleted: false,
        }))
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.is_read_only() {
            return Err(GraphError::invalid("write through a read-only data graph"));
        }
        Ok(())
    }

    fn ensure_concrete(&self, vertex: TypeRef) -> Result<()> {
        if self.schema.is_abstract(vertex)? {
            return Err(GraphError::invalid(format!(
                "'{}' is abstract",
                self.schema.label(vertex)?
            )));
        }
        Ok(())
    }

    fn vertex_written(&self) {
        self.metrics.vertex_created();
        self.modified.store(true, Ordering::Release);
    }

    /// Assigns persisted IIDs, queues every vertex and edge write and the
    /// statistics. Runs after the schema has committed its IIDs. Returns the
    /// number of count jobs written.
    pub(crate) fn commit(&self) -> Result<u64> {
        let mut state = self.state.write();
        let mut written = 0usize;
        for index in 0..state.records.len() {
            let record = &state.records[index];
            if record.status != Status::Buffered || record.deleted || record.inferred {
                continue;
            }
            let type_iid = self.schema.iid(record.type_ref)?;
            let old = record.iid.clone();
            let iid = if old.is_attribute() {
                old.with_type(type_iid)
            } else {
                ThingIid::generated(type_iid, self.storage.key_generator().next_thing(type_iid)?)?
            };
            state.by_iid.remove(&old);
            state.by_iid.insert(iid.clone(), ThingRef(index as u32));
            state.records[index].iid = iid;
        }
        for record in &state.records {
            match (record.status, record.deleted, record.inferred) {
                (Status::Buffered, false, false) => {
                    self.storage.put(record.iid.as_bytes().to_vec(), Vec::new())?;
                    written += 1;
                }
                (Status::Persisted, true, _) => {
                    self.storage.delete(record.iid.as_bytes().to_vec())?;
                }
                _ => {}
            }
        }
        for (&(from, kind), edges) in &state.outs {
            let from_record = state.record(from)?;
            if from_record.deleted || from_record.inferred {
                continue;
            }
            for (&(to, role), edge) in edges {
                let to_record = state.record(to)?;
                if edge.status != Status::Buffered || edge.inferred || to_record.deleted || to_record.inferred {
                    continue;
                }
                let role_iid = role.map(|r| self.schema.iid(r)).transpose()?;
                let (out, back) = iid::thing_edge_keys(&from_record.iid, kind, &to_record.iid, role_iid);
                self.storage.put(out, Vec::new())?;
                self.storage.put(back, Vec::new())?;
            }
        }
        for &(from, kind, to, role) in &state.deleted_edges {
            let role_iid = role.map(|r| self.schema.iid(r)).transpose()?;
            let (out, back) =
                iid::thing_edge_keys(&state.record(from)?.iid, kind, &state.record(to)?.iid, role_iid);
            self.storage.delete(out)?;
            self.storage.delete(back)?;
        }
        let jobs = self.statistics.commit(|thing| Ok(state.record(thing)?.iid.clone()))?;
        debug!(vertices = written, jobs, "data.commit");
        Ok(jobs)
    }

    /// Drops all transaction state.
    pub(crate) fn clear(&self) {
        *self.state.write() = DataState::default();
        self.key_generator.clear();
        self.statistics.clear();
        self.modified.store(false, Ordering::Release);
    }
}
