//! Schema graph: type vertices, the edges between them and the label index.
//!
//! Types are addressed by [`TypeRef`] handles into an arena owned by the
//! graph. Persisted types are loaded on first use, and their edges are
//! loaded lazily per (vertex, edge kind, direction). Everything written in
//! the transaction stays in memory until [`SchemaGraph::commit`].
//!
//! Label operations are serialised through a [`LabelLocks`] registry: reads
//! and writes of one label take that label's lock under the shared coarse
//! lock, renames take the coarse lock exclusively.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace};

use super::rule::RuleState;
use super::schema_stats::SchemaStatsCache;
use super::vertex::{Label, RuleRef, TypeEdgeProps, TypeRef};
use crate::encoding::iid::{self, TypeIid};
use crate::encoding::key_generator::BufferedKeyGenerator;
use crate::encoding::{keys, Direction, Property, RuleIndex, Status, TypeEdge, TypeEncoding, ValueType};
use crate::error::{GraphError, Result};
use crate::primitives::concurrency::LabelLocks;
use crate::storage::Storage;

const PROPS_FLAG_OVERRIDDEN: u8 = 0b01;
const PROPS_FLAG_UNIQUE: u8 = 0b10;

pub(super) struct TypeRecord {
    pub(super) iid: TypeIid,
    pub(super) label: Label,
    /// Label held by the label index in storage, for persisted types.
    pub(super) persisted_label: Option<Label>,
    pub(super) status: Status,
    is_abstract: bool,
    value_type: Option<ValueType>,
    regex: Option<String>,
    dirty: bool,
    pub(super) deleted: bool,
}

impl TypeRecord {
    fn buffered(iid: TypeIid, label: Label) -> Self {
        Self {
            iid,
            label,
            persisted_label: None,
            status: Status::Buffered,
            is_abstract: false,
            value_type: None,
            regex: None,
            dirty: true,
            deleted: false,
        }
    }
}

struct TypeEdgeRecord {
    props: TypeEdgeProps,
    status: Status,
    dirty: bool,
}

#[derive(Default)]
pub(super) struct SchemaState {
    pub(super) records: Vec<TypeRecord>,
    by_label: FxHashMap<String, TypeRef>,
    by_iid: FxHashMap<TypeIid, TypeRef>,
    /// Labels that may still be in storage but no longer resolve here.
    hidden_labels: FxHashSet<String>,
    outs: FxHashMap<(TypeRef, TypeEdge), BTreeMap<TypeRef, TypeEdgeRecord>>,
    ins: FxHashMap<(TypeRef, TypeEdge), BTreeSet<TypeRef>>,
    loaded: FxHashSet<(TypeRef, TypeEdge, Direction)>,
    deleted_edges: FxHashSet<(TypeRef, TypeEdge, TypeRef)>,
}

impl SchemaState {
    pub(super) fn record(&self, vertex: TypeRef) -> Result<&TypeRecord> {
        self.records
            .get(vertex.index())
            .ok_or_else(|| GraphError::invalid(format!("{vertex:?} does not belong to this schema graph")))
    }

    fn record_mut(&mut self, vertex: TypeRef) -> Result<&mut TypeRecord> {
        self.records
            .get_mut(vertex.index())
            .ok_or_else(|| GraphError::invalid(format!("{vertex:?} does not belong to this schema graph")))
    }

    fn remove_edge(&mut self, from: TypeRef, kind: TypeEdge, to: TypeRef) -> bool {
        let Some(record) = self.outs.get_mut(&(from, kind)).and_then(|m| m.remove(&to)) else {
            return false;
        };
        if let Some(ins) = self.ins.get_mut(&(to, kind)) {
            ins.remove(&from);
        }
        if record.status == Status::Persisted {
            self.deleted_edges.insert((from, kind, to));
        }
        true
    }
}

/// How far a hierarchy traversal reaches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Transitivity {
    /// Direct neighbours only.
    Explicit,
    /// The full closure, starting with the vertex itself.
    Transitive,
}

/// A type edge seen from one of its ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TypeAdjacent {
    /// Vertex at the other end.
    pub other: TypeRef,
    /// Edge properties.
    pub props: TypeEdgeProps,
    /// Whether the edge was loaded from storage or written in this transaction.
    pub status: Status,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum TraversalKey {
    Subtypes(TypeRef),
    OwnedAttributes(TypeRef),
    Owners(TypeRef),
}

/// Transaction-scoped view of the schema.
pub struct SchemaGraph {
    pub(super) storage: Arc<Storage>,
    pub(super) key_generator: BufferedKeyGenerator,
    pub(super) label_locks: LabelLocks,
    pub(super) state: RwLock<SchemaState>,
    pub(super) rules: RwLock<RuleState>,
    pub(super) conclusion_cache: Mutex<FxHashMap<(TypeRef, RuleIndex), Vec<RuleRef>>>,
    pub(super) stats_cache: Mutex<SchemaStatsCache>,
    traversal_cache: Mutex<FxHashMap<TraversalKey, Vec<TypeRef>>>,
    /// Label index keys written by the pending commit, for error reporting.
    label_index_writes: Mutex<FxHashMap<Vec<u8>, String>>,
    modified: AtomicBool,
}

impl SchemaGraph {
    /// Creates a schema view over `storage`.
    pub fn new(storage: Arc<Storage>, label_lock_timeout: Duration) -> Self {
        Self {
            storage,
            key_generator: BufferedKeyGenerator::new(),
            label_locks: LabelLocks::new(label_lock_timeout),
            state: RwLock::new(SchemaState::default()),
            rules: RwLock::new(RuleState::default()),
            conclusion_cache: Mutex::new(FxHashMap::default()),
            stats_cache: Mutex::new(SchemaStatsCache::default()),
            traversal_cache: Mutex::new(FxHashMap::default()),
            label_index_writes: Mutex::new(FxHashMap::default()),
            modified: AtomicBool::new(false),
        }
    }

    /// Whether this view rejects schema writes.
    pub fn is_read_only(&self) -> bool {
        self.storage.is_read_only()
    }

    /// Whether anything was written through this view.
    pub fn is_modified(&self) -> bool {
        self.modified.load(Ordering::Acquire)
    }

    /// Whether the root types exist.
    pub fn is_initialised(&self) -> Result<bool> {
        Ok(self.root(TypeEncoding::Thing)?.is_some())
    }

    /// Creates the abstract root types: `thing`, `entity`, `attribute`,
    /// `relation` and `relation:role`.
    pub fn initialise(&self) -> Result<()> {
        let thing = self.create_vertex(TypeEncoding::Thing, root_label(TypeEncoding::Thing))?;
        let entity = self.create_vertex(TypeEncoding::Entity, root_label(TypeEncoding::Entity))?;
        let attribute = self.create_vertex(TypeEncoding::Attribute, root_label(TypeEncoding::Attribute))?;
        let relation = self.create_vertex(TypeEncoding::Relation, root_label(TypeEncoding::Relation))?;
        let role = self.create_vertex(TypeEncoding::Role, root_label(TypeEncoding::Role))?;
        {
            let mut state = self.state.write();
            for root in [thing, entity, attribute, relation, role] {
                state.record_mut(root)?.is_abstract = true;
            }
            state.record_mut(attribute)?.value_type = Some(ValueType::Object);
        }
        for root in [entity, attribute, relation] {
            self.insert_edge(root, TypeEdge::Sub, thing, TypeEdgeProps::default())?;
        }
        self.insert_edge(relation, TypeEdge::Relates, role, TypeEdgeProps::default())?;
        debug!("schema.initialise");
        Ok(())
    }

    /// Looks up a type by label.
    pub fn get_type(&self, label: &Label) -> Result<Option<TypeRef>> {
        let scoped = label.scoped_name();
        let _guard = self.label_locks.read(&scoped)?;
        self.lookup(&scoped)
    }

    /// Looks up a type by label, failing with `NotFound` when absent.
    pub fn require_type(&self, label: &Label) -> Result<TypeRef> {
        self.get_type(label)?.ok_or_else(|| GraphError::NotFound {
            what: label.scoped_name(),
        })
    }

    /// Creates a type and places it under the root of its category.
    ///
    /// The `thing` category is reserved for the root type.
    pub fn create(&self, encoding: TypeEncoding, label: Label) -> Result<TypeRef> {
        if encoding == TypeEncoding::Thing {
            return Err(GraphError::invalid("only the root type may use the thing category"));
        }
        let root = self
            .root(encoding)?
            .ok_or_else(|| GraphError::invalid("schema has not been initialised"))?;
        let vertex = self.create_vertex(encoding, label)?;
        self.insert_edge(vertex, TypeEdge::Sub, root, TypeEdgeProps::default())?;
        Ok(vertex)
    }

    fn create_vertex(&self, encoding: TypeEncoding, label: Label) -> Result<TypeRef> {
        self.ensure_writable(&label)?;
        let scoped = label.scoped_name();
        let _guard = self.label_locks.write(&scoped)?;
        if self.lookup(&scoped)?.is_some() {
            return Err(GraphError::DuplicateLabel { label: scoped });
        }
        let iid = TypeIid::new(encoding, self.key_generator.next_type(encoding)?);
        let vertex = {
            let mut state = self.state.write();
            let vertex = TypeRef(state.records.len() as u32);
            state.records.push(TypeRecord::buffered(iid, label));
            state.by_label.insert(scoped.clone(), vertex);
            state.by_iid.insert(iid, vertex);
            vertex
        };
        self.schema_changed();
        debug!(label = %scoped, iid = ?iid, "schema.type.create");
        Ok(vertex)
    }

    /// Makes `parent` the only supertype of `child`.
    ///
    /// Fails with `CyclicHierarchy` when `child` is `parent` or one of its
    /// ancestors.
    pub fn set_supertype(&self, child: TypeRef, parent: TypeRef) -> Result<()> {
        let label = self.label(child)?;
        self.ensure_writable(&label)?;
        let (child_encoding, parent_encoding) = (self.encoding(child)?, self.encoding(parent)?);
        if child_encoding != parent_encoding {
            return Err(GraphError::invalid(format!(
                "a {} cannot be a subtype of a {}",
                child_encoding.name(),
                parent_encoding.name()
            )));
        }
        let scoped = label.scoped_name();
        let _guard = self.label_locks.write(&scoped)?;
        let mut seen = FxHashSet::default();
        seen.insert(scoped.clone());
        let mut cursor = Some(parent);
        while let Some(ancestor) = cursor {
            if !seen.insert(self.label(ancestor)?.scoped_name()) {
                return Err(GraphError::CyclicHierarchy {
                    label: scoped,
                    supertype: self.label(parent)?.scoped_name(),
                });
            }
            cursor = self.supertype(ancestor)?;
        }
        self.ensure_loaded(child, TypeEdge::Sub, Direction::Out)?;
        {
            let mut state = self.state.write();
            let current: Vec<TypeRef> = state
                .outs
                .get(&(child, TypeEdge::Sub))
                .map(|m| m.keys().copied().collect())
                .unwrap_or_default();
            for old in current {
                state.remove_edge(child, TypeEdge::Sub, old);
            }
        }
        self.insert_edge(child, TypeEdge::Sub, parent, TypeEdgeProps::default())?;
        trace!(label = %scoped, "schema.type.set_supertype");
        Ok(())
    }

    /// Direct supertype, if any.
    pub fn supertype(&self, vertex: TypeRef) -> Result<Option<TypeRef>> {
        Ok(self.outs(vertex, TypeEdge::Sub)?.first().map(|edge| edge.other))
    }

    /// The vertex followed by each of its ancestors up to the root.
    pub fn supertypes(&self, vertex: TypeRef) -> Result<Vec<TypeRef>> {
        let mut chain = vec![vertex];
        let mut seen = FxHashSet::default();
        seen.insert(vertex);
        let mut cursor = self.supertype(vertex)?;
        while let Some(ancestor) = cursor {
            if !seen.insert(ancestor) {
                return Err(GraphError::Corruption("cycle in stored type hierarchy"));
            }
            chain.push(ancestor);
            cursor = self.supertype(ancestor)?;
        }
        Ok(chain)
    }

    /// Direct subtypes, or the breadth-first closure starting with `vertex`.
    pub fn subtypes(&self, vertex: TypeRef, transitivity: Transitivity) -> Result<Vec<TypeRef>> {
        match transitivity {
            Transitivity::Explicit => Ok(self
                .ins(vertex, TypeEdge::Sub)?
                .into_iter()
                .map(|edge| edge.other)
                .collect()),
            Transitivity::Transitive => self.cached(TraversalKey::Subtypes(vertex), || {
                let mut out = Vec::new();
                let mut seen = FxHashSet::default();
                let mut queue = VecDeque::from([vertex]);
                while let Some(next) = queue.pop_front() {
                    if !seen.insert(next) {
                        continue;
                    }
                    out.push(next);
                    for edge in self.ins(next, TypeEdge::Sub)? {
                        queue.push_back(edge.other);
                    }
                }
                Ok(out)
            }),
        }
    }

    /// Renames `vertex` from `old` to `new`.
    pub fn update_label(&self, vertex: TypeRef, old: &Label, new: Label) -> Result<()> {
        self.ensure_writable(&new)?;
        let _all = self.label_locks.exclusive()?;
        let current = self.label(vertex)?;
        if current != *old {
            return Err(GraphError::invalid(format!(
                "type is labelled '{current}', not '{old}'"
            )));
        }
        if current == new {
            return Ok(());
        }
        let (old_scoped, new_scoped) = (old.scoped_name(), new.scoped_name());
        if self.lookup(&new_scoped)?.is_some() {
            return Err(GraphError::DuplicateLabel { label: new_scoped });
        }
        {
            let mut state = self.state.write();
            state.by_label.remove(&old_scoped);
            state.hidden_labels.insert(old_scoped.clone());
            state.by_label.insert(new_scoped.clone(), vertex);
            let record = state.record_mut(vertex)?;
            record.label = new.clone();
            record.dirty = true;
        }
        self.relabel_rules(vertex, old, &new)?;
        self.schema_changed();
        debug!(from = %old_scoped, to = %new_scoped, "schema.type.rename");
        Ok(())
    }

    /// Deletes `vertex` and every edge touching it.
    ///
    /// Fails with `TypeReferencedInRules` while any rule mentions the type.
    pub fn delete(&self, vertex: TypeRef) -> Result<()> {
        let label = self.label(vertex)?;
        self.ensure_writable(&label)?;
        let scoped = label.scoped_name();
        let _guard = self.label_locks.write(&scoped)?;
        let referencing = self.rules_referencing(vertex)?;
        if !referencing.is_empty() {
            let rules = referencing
                .into_iter()
                .map(|rule| self.rule_label(rule))
                .collect::<Result<Vec<_>>>()?;
            return Err(GraphError::TypeReferencedInRules { label: scoped, rules });
        }
        for kind in TypeEdge::ALL {
            for direction in [Direction::Out, Direction::In] {
                self.ensure_loaded(vertex, kind, direction)?;
            }
        }
        {
            let mut state = self.state.write();
            for kind in TypeEdge::ALL {
                let outs: Vec<TypeRef> = state
                    .outs
                    .get(&(vertex, kind))
                    .map(|m| m.keys().copied().collect())
                    .unwrap_or_default();
                for to in outs {
                    state.remove_edge(vertex, kind, to);
                }
                let ins: Vec<TypeRef> = state
                    .ins
                    .get(&(vertex, kind))
                    .map(|s| s.iter().copied().collect())
                    .unwrap_or_default();
                for from in ins {
                    state.remove_edge(from, kind, vertex);
                }
            }
            state.by_label.remove(&scoped);
            state.hidden_labels.insert(scoped.clone());
            state.record_mut(vertex)?.deleted = true;
        }
        self.schema_changed();
        debug!(label = %scoped, "schema.type.delete");
        Ok(())
    }

    /// Current label.
    pub fn label(&self, vertex: TypeRef) -> Result<Label> {
        Ok(self.state.read().record(vertex)?.label.clone())
    }

    /// Current IID; buffered until the schema commits.
    pub fn iid(&self, vertex: TypeRef) -> Result<TypeIid> {
        Ok(self.state.read().record(vertex)?.iid)
    }

    /// Category of the type.
    pub fn encoding(&self, vertex: TypeRef) -> Result<TypeEncoding> {
        Ok(self.iid(vertex)?.encoding())
    }

    /// Whether the type was created in this transaction or loaded.
    pub fn status(&self, vertex: TypeRef) -> Result<Status> {
        Ok(self.state.read().record(vertex)?.status)
    }

    /// Whether the type was deleted in this transaction.
    pub fn is_deleted(&self, vertex: TypeRef) -> Result<bool> {
        Ok(self.state.read().record(vertex)?.deleted)
    }

    /// Whether the type is abstract.
    pub fn is_abstract(&self, vertex: TypeRef) -> Result<bool> {
        Ok(self.state.read().record(vertex)?.is_abstract)
    }

    /// Marks the type abstract or concrete.
    pub fn set_abstract(&self, vertex: TypeRef, is_abstract: bool) -> Result<()> {
        self.update_record(vertex, |record| {
            record.is_abstract = is_abstract;
            Ok(())
        })
    }

    /// Value type of an attribute type.
    pub fn value_type(&self, vertex: TypeRef) -> Result<Option<ValueType>> {
        Ok(self.state.read().record(vertex)?.value_type)
    }

    /// Sets the value type of an attribute type; it cannot change once set.
    pub fn set_value_type(&self, vertex: TypeRef, value_type: ValueType) -> Result<()> {
        self.update_record(vertex, |record| {
            if record.iid.encoding() != TypeEncoding::Attribute {
                return Err(GraphError::invalid(format!(
                    "'{}' is not an attribute type",
                    record.label
                )));
            }
            match record.value_type {
                Some(existing) if existing != value_type => Err(GraphError::invalid(format!(
                    "'{}' already has value type {}",
                    record.label,
                    existing.name()
                ))),
                _ => {
                    record.value_type = Some(value_type);
                    Ok(())
                }
            }
        })
    }

    /// Regex constraint of a string attribute type.
    pub fn regex(&self, vertex: TypeRef) -> Result<Option<String>> {
        Ok(self.state.read().record(vertex)?.regex.clone())
    }

    /// Sets or clears the regex constraint of a string attribute type.
    pub fn set_regex(&self, vertex: TypeRef, regex: Option<String>) -> Result<()> {
        self.update_record(vertex, |record| {
            if regex.is_some() && record.value_type != Some(ValueType::String) {
                return Err(GraphError::invalid(format!(
                    "'{}' does not hold strings",
                    record.label
                )));
            }
            record.regex = regex;
            Ok(())
        })
    }

    fn update_record(
        &self,
        vertex: TypeRef,
        update: impl FnOnce(&mut TypeRecord) -> Result<()>,
    ) -> Result<()> {
        let label = self.label(vertex)?;
        self.ensure_writable(&label)?;
        let _guard = self.label_locks.write(&label.scoped_name())?;
        {
            let mut state = self.state.write();
            let record = state.record_mut(vertex)?;
            update(record)?;
            record.dirty = true;
        }
        self.schema_changed();
        Ok(())
    }

    /// Adds an edge with default properties. SUB edges go through
    /// [`SchemaGraph::set_supertype`].
    pub fn put_edge(&self, from: TypeRef, kind: TypeEdge, to: TypeRef) -> Result<()> {
        self.put_edge_with(from, kind, to, TypeEdgeProps::default())
    }

    /// Adds an edge, or updates the properties of an existing one.
    pub fn put_edge_with(
        &self,
        from: TypeRef,
        kind: TypeEdge,
        to: TypeRef,
        props: TypeEdgeProps,
    ) -> Result<()> {
        if kind == TypeEdge::Sub {
            return self.set_supertype(from, to);
        }
        let label = self.label(from)?;
        self.ensure_writable(&label)?;
        let (from_encoding, to_encoding) = (self.encoding(from)?, self.encoding(to)?);
        let valid = match kind {
            TypeEdge::Owns | TypeEdge::OwnsKey => to_encoding == TypeEncoding::Attribute,
            TypeEdge::Plays => to_encoding == TypeEncoding::Role,
            TypeEdge::Relates => {
                from_encoding == TypeEncoding::Relation && to_encoding == TypeEncoding::Role
            }
            TypeEdge::Sub => true,
        };
        if !valid {
            return Err(GraphError::invalid(format!(
                "{} edge cannot connect a {} to a {}",
                kind.name(),
                from_encoding.name(),
                to_encoding.name()
            )));
        }
        let _guard = self.label_locks.write(&label.scoped_name())?;
        self.insert_edge(from, kind, to, props)
    }

    /// Removes an edge; returns whether it existed.
    pub fn delete_edge(&self, from: TypeRef, kind: TypeEdge, to: TypeRef) -> Result<bool> {
        if kind == TypeEdge::Sub {
            return Err(GraphError::invalid("supertypes are replaced, not removed"));
        }
        let label = self.label(from)?;
        self.ensure_writable(&label)?;
        let _guard = self.label_locks.write(&label.scoped_name())?;
        self.ensure_loaded(from, kind, Direction::Out)?;
        let removed = self.state.write().remove_edge(from, kind, to);
        if removed {
            self.schema_changed();
        }
        Ok(removed)
    }

    /// Outgoing edges of one kind.
    pub fn outs(&self, vertex: TypeRef, kind: TypeEdge) -> Result<Vec<TypeAdjacent>> {
        self.ensure_loaded(vertex, kind, Direction::Out)?;
        let state = self.state.read();
        Ok(state
            .outs
            .get(&(vertex, kind))
            .map(|edges| {
                edges
                    .iter()
                    .map(|(to, record)| TypeAdjacent {
                        other: *to,
                        props: record.props,
                        status: record.status,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Incoming edges of one kind.
    pub fn ins(&self, vertex: TypeRef, kind: TypeEdge) -> Result<Vec<TypeAdjacent>> {
        self.ensure_loaded(vertex, kind, Direction::In)?;
        let state = self.state.read();
        let Some(froms) = state.ins.get(&(vertex, kind)) else {
            return Ok(Vec::new());
        };
        Ok(froms
            .iter()
            .filter_map(|from| {
                let record = state.outs.get(&(*from, kind))?.get(&vertex)?;
                Some(TypeAdjacent {
                    other: *from,
                    props: record.props,
                    status: record.status,
                })
            })
            .collect())
    }

    /// Properties of the edge `from -kind-> to`, if it exists.
    pub fn edge(&self, from: TypeRef, kind: TypeEdge, to: TypeRef) -> Result<Option<TypeEdgeProps>> {
        self.ensure_loaded(from, kind, Direction::Out)?;
        let state = self.state.read();
        Ok(state
            .outs
            .get(&(from, kind))
            .and_then(|edges| edges.get(&to))
            .map(|record| record.props))
    }

    /// Every thing type, starting with the root.
    pub fn thing_types(&self) -> Result<Vec<TypeRef>> {
        self.category(TypeEncoding::Thing)
    }

    /// Every entity type, starting with the root.
    pub fn entity_types(&self) -> Result<Vec<TypeRef>> {
        self.category(TypeEncoding::Entity)
    }

    /// Every attribute type, starting with the root.
    pub fn attribute_types(&self) -> Result<Vec<TypeRef>> {
        self.category(TypeEncoding::Attribute)
    }

    /// Attribute types holding `value_type`.
    pub fn attribute_types_of(&self, value_type: ValueType) -> Result<Vec<TypeRef>> {
        let mut out = Vec::new();
        for vertex in self.attribute_types()? {
            if self.value_type(vertex)? == Some(value_type) {
                out.push(vertex);
            }
        }
        Ok(out)
    }

    /// Every relation type, starting with the root.
    pub fn relation_types(&self) -> Result<Vec<TypeRef>> {
        self.category(TypeEncoding::Relation)
    }

    /// Every role type, starting with the root.
    pub fn role_types(&self) -> Result<Vec<TypeRef>> {
        self.category(TypeEncoding::Role)
    }

    fn category(&self, encoding: TypeEncoding) -> Result<Vec<TypeRef>> {
        match self.root(encoding)? {
            Some(root) => self.subtypes(root, Transitivity::Transitive),
            None => Ok(Vec::new()),
        }
    }

    /// Attribute types `owner` owns, directly or through its supertypes,
    /// minus those overridden lower in the hierarchy.
    pub fn owned_attribute_types(&self, owner: TypeRef) -> Result<Vec<TypeRef>> {
        self.cached(TraversalKey::OwnedAttributes(owner), || {
            let mut out = Vec::new();
            let mut seen = FxHashSet::default();
            let mut overridden = FxHashSet::default();
            for vertex in self.supertypes(owner)? {
                for kind in [TypeEdge::Owns, TypeEdge::OwnsKey] {
                    for edge in self.outs(vertex, kind)? {
                        if let Some(hidden) = edge.props.overridden {
                            overridden.insert(hidden);
                        }
                        if !overridden.contains(&edge.other) && seen.insert(edge.other) {
                            out.push(edge.other);
                        }
                    }
                }
            }
            Ok(out)
        })
    }

    /// Types owning `attribute`, directly or by inheriting the ownership.
    pub fn owners_of_attribute_type(&self, attribute: TypeRef) -> Result<Vec<TypeRef>> {
        self.cached(TraversalKey::Owners(attribute), || {
            let mut out = Vec::new();
            let mut seen = FxHashSet::default();
            for kind in [TypeEdge::Owns, TypeEdge::OwnsKey] {
                for edge in self.ins(attribute, kind)? {
                    for owner in self.subtypes(edge.other, Transitivity::Transitive)? {
                        if seen.insert(owner) {
                            out.push(owner);
                        }
                    }
                }
            }
            Ok(out)
        })
    }

    /// Resolves a type IID read from storage to a handle.
    pub(crate) fn type_by_iid(&self, iid: TypeIid) -> Result<TypeRef> {
        if let Some(vertex) = self.state.read().by_iid.get(&iid) {
            return Ok(*vertex);
        }
        let record = self.load_record(iid)?;
        let mut state = self.state.write();
        if let Some(vertex) = state.by_iid.get(&iid) {
            return Ok(*vertex);
        }
        let vertex = TypeRef(state.records.len() as u32);
        let scoped = record.label.scoped_name();
        if !state.by_label.contains_key(&scoped) && !state.hidden_labels.contains(&scoped) {
            state.by_label.insert(scoped, vertex);
        }
        state.by_iid.insert(iid, vertex);
        state.records.push(record);
        Ok(vertex)
    }

    pub(super) fn lookup(&self, scoped: &str) -> Result<Option<TypeRef>> {
        {
            let state = self.state.read();
            if let Some(vertex) = state.by_label.get(scoped) {
                return Ok(Some(*vertex));
            }
            if state.hidden_labels.contains(scoped) {
                return Ok(None);
            }
        }
        match self.storage.get(&keys::type_label_index(scoped))? {
            Some(bytes) => Ok(Some(self.type_by_iid(TypeIid::from_bytes(&bytes)?)?)),
            None => Ok(None),
        }
    }

    fn root(&self, encoding: TypeEncoding) -> Result<Option<TypeRef>> {
        self.lookup(&root_label(encoding).scoped_name())
    }

    fn load_record(&self, iid: TypeIid) -> Result<TypeRecord> {
        let owner = iid.as_bytes();
        let name = self
            .storage
            .get(&keys::property(owner, Property::Label))?
            .ok_or(GraphError::Corruption("type vertex has no label"))?;
        let scope = self.storage.get(&keys::property(owner, Property::Scope))?;
        let value_type = match self.storage.get(&keys::property(owner, Property::ValueType))? {
            Some(bytes) => Some(ValueType::from_key(
                *bytes
                    .first()
                    .ok_or(GraphError::Corruption("empty value type property"))?,
            )?),
            None => None,
        };
        let regex = self.storage.get(&keys::property(owner, Property::Regex))?;
        let label = Label {
            name: utf8(name)?,
            scope: scope.map(utf8).transpose()?,
        };
        trace!(label = %label, iid = ?iid, "schema.type.load");
        Ok(TypeRecord {
            iid,
            persisted_label: Some(label.clone()),
            label,
            status: Status::Persisted,
            is_abstract: self
                .storage
                .get(&keys::property(owner, Property::Abstract))?
                .is_some(),
            value_type,
            regex: regex.map(utf8).transpose()?,
            dirty: false,
            deleted: false,
        })
    }

    fn ensure_loaded(&self, vertex: TypeRef, kind: TypeEdge, direction: Direction) -> Result<()> {
        let (iid, status) = {
            let state = self.state.read();
            if state.loaded.contains(&(vertex, kind, direction)) {
                return Ok(());
            }
            let record = state.record(vertex)?;
            (record.iid, record.status)
        };
        let mut found = Vec::new();
        if status == Status::Persisted {
            let prefix = iid::edge_prefix(iid.as_bytes(), kind.infix(direction));
            let mut raw = Vec::new();
            for (key, value) in self.storage.iterate(&prefix)? {
                raw.push((iid::parse_type_edge(&key, prefix.len())?, value));
            }
            for (other, value) in raw {
                let props = self.decode_props(&value)?;
                found.push((self.type_by_iid(other)?, props));
            }
        }
        let mut state = self.state.write();
        if !state.loaded.insert((vertex, kind, direction)) {
            return Ok(());
        }
        for (other, props) in found {
            let (from, to) = match direction {
                Direction::Out => (vertex, other),
                Direction::In => (other, vertex),
            };
            if state.deleted_edges.contains(&(from, kind, to)) {
                continue;
            }
            state
                .outs
                .entry((from, kind))
                .or_default()
                .entry(to)
                .or_insert(TypeEdgeRecord {
                    props,
                    status: Status::Persisted,
                    dirty: false,
                });
            state.ins.entry((to, kind)).or_default().insert(from);
        }
        Ok(())
    }

    fn insert_edge(&self, from: TypeRef, kind: TypeEdge, to: TypeRef, props: TypeEdgeProps) -> Result<()> {
        self.ensure_loaded(from, kind, Direction::Out)?;
        {
            let mut state = self.state.write();
            state.record(to)?;
            state.deleted_edges.remove(&(from, kind, to));
            let edges = state.outs.entry((from, kind)).or_default();
            match edges.get_mut(&to) {
                Some(existing) if existing.props == props => return Ok(()),
                Some(existing) => {
                    existing.props = props;
                    existing.dirty = true;
                }
                None => {
                    edges.insert(
                        to,
                        TypeEdgeRecord {
                            props,
                            status: Status::Buffered,
                            dirty: true,
                        },
                    );
                }
            }
            state.ins.entry((to, kind)).or_default().insert(from);
        }
        self.schema_changed();
        Ok(())
    }

    fn decode_props(&self, value: &[u8]) -> Result<TypeEdgeProps> {
        let Some(flags) = value.first() else {
            return Ok(TypeEdgeProps::default());
        };
        let overridden = if flags & PROPS_FLAG_OVERRIDDEN != 0 {
            let iid = TypeIid::from_bytes(&value[1..])?;
            Some(self.type_by_iid(iid)?)
        } else {
            None
        };
        Ok(TypeEdgeProps {
            overridden,
            unique: flags & PROPS_FLAG_UNIQUE != 0,
        })
    }

    fn cached(
        &self,
        key: TraversalKey,
        compute: impl FnOnce() -> Result<Vec<TypeRef>>,
    ) -> Result<Vec<TypeRef>> {
        if !self.is_read_only() {
            return compute();
        }
        if let Some(hit) = self.traversal_cache.lock().get(&key) {
            return Ok(hit.clone());
        }
        let value = compute()?;
        self.traversal_cache.lock().insert(key, value.clone());
        Ok(value)
    }

    pub(super) fn ensure_writable(&self, label: &impl std::fmt::Display) -> Result<()> {
        if self.is_read_only() {
            return Err(GraphError::SchemaReadViolation {
                label: label.to_string(),
            });
        }
        Ok(())
    }

    pub(super) fn schema_changed(&self) {
        self.modified.store(true, Ordering::Release);
        self.conclusion_cache.lock().clear();
        self.traversal_cache.lock().clear();
        *self.stats_cache.lock() = SchemaStatsCache::default();
    }

    pub(super) fn note_label_index_write(&self, key: Vec<u8>, label: String) {
        self.label_index_writes.lock().insert(key, label);
    }

    /// Label a pending label index key was written for.
    pub(crate) fn label_for_index_key(&self, key: &[u8]) -> Option<String> {
        self.label_index_writes.lock().get(key).cloned()
    }

    /// Assigns persisted IIDs and queues every schema write.
    pub(crate) fn commit(&self) -> Result<()> {
        let mut state = self.state.write();
        let mut rules = self.rules.write();
        let mut assigned = 0usize;
        for index in 0..state.records.len() {
            let record = &state.records[index];
            if record.status != Status::Buffered || record.deleted {
                continue;
            }
            let encoding = record.iid.encoding();
            let old = record.iid;
            let iid = TypeIid::new(encoding, self.storage.key_generator().next_type(encoding)?);
            state.records[index].iid = iid;
            state.by_iid.remove(&old);
            state.by_iid.insert(iid, TypeRef(index as u32));
            assigned += 1;
        }
        self.assign_rule_iids(&mut rules)?;
        self.write_types(&state)?;
        self.write_type_edges(&state)?;
        self.write_rules(&state, &rules)?;
        debug!(types = assigned, "schema.commit");
        Ok(())
    }

    fn write_types(&self, state: &SchemaState) -> Result<()> {
        let mut released = FxHashSet::default();
        for record in &state.records {
            let Some(stored) = &record.persisted_label else {
                continue;
            };
            if record.deleted || *stored != record.label {
                let key = keys::type_label_index(&stored.scoped_name());
                self.storage.require_value(key.clone(), record.iid.as_bytes().to_vec())?;
                self.storage.delete(key)?;
                released.insert(stored.scoped_name());
            }
        }
        for record in &state.records {
            let owner = record.iid.as_bytes();
            match (record.status, record.deleted) {
                (Status::Persisted, true) => {
                    self.storage.delete(owner.to_vec())?;
                    for property in [
                        Property::Label,
                        Property::Scope,
                        Property::Abstract,
                        Property::ValueType,
                        Property::Regex,
                    ] {
                        self.storage.delete(keys::property(owner, property))?;
                    }
                }
                (Status::Buffered, true) => {}
                (Status::Buffered, false) => {
                    self.storage.put(owner.to_vec(), Vec::new())?;
                    self.write_properties(record, true)?;
                }
                (Status::Persisted, false) if record.dirty => {
                    self.write_properties(record, false)?;
                }
                (Status::Persisted, false) => {}
            }
            if record.deleted || record.persisted_label.as_ref() == Some(&record.label) {
                continue;
            }
            let scoped = record.label.scoped_name();
            let key = keys::type_label_index(&scoped);
            if !released.contains(&scoped) {
                self.storage.require_absent(key.clone())?;
            }
            self.note_label_index_write(key.clone(), scoped);
            self.storage.put(key, owner.to_vec())?;
        }
        Ok(())
    }

    fn write_properties(&self, record: &TypeRecord, fresh: bool) -> Result<()> {
        let owner = record.iid.as_bytes();
        let put_or_clear = |property: Property, value: Option<Vec<u8>>| -> Result<()> {
            match value {
                Some(bytes) => self.storage.put(keys::property(owner, property), bytes),
                None if !fresh => self.storage.delete(keys::property(owner, property)),
                None => Ok(()),
            }
        };
        put_or_clear(Property::Label, Some(record.label.name.as_bytes().to_vec()))?;
        put_or_clear(Property::Scope, record.label.scope.as_ref().map(|s| s.as_bytes().to_vec()))?;
        put_or_clear(Property::Abstract, record.is_abstract.then(Vec::new))?;
        put_or_clear(Property::ValueType, record.value_type.map(|vt| vec![vt.key()]))?;
        put_or_clear(Property::Regex, record.regex.as_ref().map(|r| r.as_bytes().to_vec()))
    }

    fn write_type_edges(&self, state: &SchemaState) -> Result<()> {
        for (&(from, kind), edges) in &state.outs {
            let from_record = state.record(from)?;
            if from_record.deleted {
                continue;
            }
            for (&to, edge) in edges {
                let to_record = state.record(to)?;
                if !edge.dirty || to_record.deleted {
                    continue;
                }
                let mut value = Vec::with_capacity(1 + TypeIid::LENGTH);
                let mut flags = 0u8;
                if edge.props.overridden.is_some() {
                    flags |= PROPS_FLAG_OVERRIDDEN;
                }
                if edge.props.unique {
                    flags |= PROPS_FLAG_UNIQUE;
                }
                value.push(flags);
                if let Some(overridden) = edge.props.overridden {
                    value.extend_from_slice(state.record(overridden)?.iid.as_bytes());
                }
                let (out, back) = iid::type_edge_keys(from_record.iid, kind, to_record.iid);
                self.storage.put(out, value.clone())?;
                self.storage.put(back, value)?;
            }
        }
        for &(from, kind, to) in &state.deleted_edges {
            let (out, back) =
                iid::type_edge_keys(state.record(from)?.iid, kind, state.record(to)?.iid);
            self.storage.delete(out)?;
            self.storage.delete(back)?;
        }
        Ok(())
    }

    /// Drops all transaction state.
    pub(crate) fn clear(&self) {
        *self.state.write() = SchemaState::default();
        *self.rules.write() = RuleState::default();
        self.key_generator.clear();
        self.label_index_writes.lock().clear();
        self.conclusion_cache.lock().clear();
        self.traversal_cache.lock().clear();
        *self.stats_cache.lock() = SchemaStatsCache::default();
        self.modified.store(false, Ordering::Release);
    }
}

fn root_label(encoding: TypeEncoding) -> Label {
    match encoding.root_label() {
        (name, Some(scope)) => Label::scoped(name, scope),
        (name, None) => Label::new(name),
    }
}

pub(super) fn utf8(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|_| GraphError::Corruption("stored label is not utf-8"))
}
