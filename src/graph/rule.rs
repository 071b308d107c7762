//! Rules stored alongside the schema, and the indexes that tie them to types.
//!
//! A rule's body is kept as JSON under its `When` and `Then` properties. Three
//! type-keyed indexes make the reverse lookups cheap: every type a rule
//! mentions, the vertex type a rule concludes, and the attribute type a rule
//! concludes a has-edge to. A stored rule also keeps the type IIDs of its
//! index entries, so it can be unindexed without resolving any label.

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::schema::{utf8, SchemaGraph, SchemaState, Transitivity};
use super::vertex::{Label, RuleRef, TypeRef};
use crate::encoding::iid::{RuleIid, TypeIid};
use crate::encoding::{keys, Property, RuleIndex, Status};
use crate::error::{GraphError, Result};

/// Logical content of a rule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleBody {
    /// Types the condition mentions.
    pub when: Vec<Label>,
    /// What the rule concludes.
    pub then: Conclusion,
}

/// The conclusion of a rule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Conclusion {
    /// Concludes an instance of a type.
    Isa {
        /// Concluded type.
        type_label: Label,
    },
    /// Concludes a has-edge to an attribute.
    Has {
        /// Attribute type of the concluded attribute.
        attribute_type: Label,
    },
    /// Concludes a relation with role players.
    Relation {
        /// Concluded relation type.
        relation_type: Label,
        /// Roles the players fill.
        role_types: Vec<Label>,
    },
}

impl RuleBody {
    /// Every label the rule mentions, without repeats.
    pub fn referenced(&self) -> Vec<&Label> {
        let mut seen = FxHashSet::default();
        let conclusion: Vec<&Label> = match &self.then {
            Conclusion::Isa { type_label } => vec![type_label],
            Conclusion::Has { attribute_type } => vec![attribute_type],
            Conclusion::Relation {
                relation_type,
                role_types,
            } => std::iter::once(relation_type).chain(role_types).collect(),
        };
        self.when
            .iter()
            .chain(conclusion)
            .filter(|label| seen.insert(*label))
            .collect()
    }

    fn concluded_vertex(&self) -> Option<&Label> {
        match &self.then {
            Conclusion::Isa { type_label } => Some(type_label),
            Conclusion::Relation { relation_type, .. } => Some(relation_type),
            Conclusion::Has { .. } => None,
        }
    }

    fn concluded_edge_to(&self) -> Option<&Label> {
        match &self.then {
            Conclusion::Has { attribute_type } => Some(attribute_type),
            _ => None,
        }
    }

    /// Replaces every label `renamed` maps to a new one; returns whether
    /// any changed.
    fn relabel(&mut self, renamed: &FxHashMap<Label, Label>) -> bool {
        let mut changed = false;
        let mut swap = |label: &mut Label| {
            if let Some(new) = renamed.get(label) {
                *label = new.clone();
                changed = true;
            }
        };
        self.when.iter_mut().for_each(&mut swap);
        match &mut self.then {
            Conclusion::Isa { type_label } => swap(type_label),
            Conclusion::Has { attribute_type } => swap(attribute_type),
            Conclusion::Relation {
                relation_type,
                role_types,
            } => {
                swap(relation_type);
                role_types.iter_mut().for_each(&mut swap);
            }
        }
        changed
    }
}

/// Types a rule mentions, concludes an instance of, and concludes a
/// has-edge to.
type ResolvedIndex = (Vec<TypeRef>, Option<TypeRef>, Option<TypeRef>);

const INDEX_ENTRY_LENGTH: usize = 1 + TypeIid::LENGTH;

struct RuleRecord {
    iid: RuleIid,
    label: String,
    persisted_label: Option<String>,
    body: RuleBody,
    /// Body rewritten after a referenced type was renamed.
    body_dirty: bool,
    status: Status,
    deleted: bool,
    references: Vec<TypeRef>,
    concludes_vertex: Option<TypeRef>,
    concludes_edge_to: Option<TypeRef>,
}

#[derive(Default)]
pub(super) struct RuleState {
    records: Vec<RuleRecord>,
    by_label: FxHashMap<String, RuleRef>,
    by_iid: FxHashMap<RuleIid, RuleRef>,
    hidden_labels: FxHashSet<String>,
}

impl RuleState {
    fn record(&self, rule: RuleRef) -> Result<&RuleRecord> {
        self.records
            .get(rule.index())
            .ok_or_else(|| GraphError::invalid(format!("{rule:?} does not belong to this schema graph")))
    }

    fn record_mut(&mut self, rule: RuleRef) -> Result<&mut RuleRecord> {
        self.records
            .get_mut(rule.index())
            .ok_or_else(|| GraphError::invalid(format!("{rule:?} does not belong to this schema graph")))
    }
}

/// Rule label locks live in their own namespace so they never contend with
/// a type of the same name.
fn lock_key(label: &str) -> String {
    format!("rule:{label}")
}

impl SchemaGraph {
    /// Creates a rule. Every label in `body` must name an existing type.
    pub fn create_rule(&self, label: &str, body: RuleBody) -> Result<RuleRef> {
        self.ensure_writable(&label)?;
        let _guard = self.label_locks.write(&lock_key(label))?;
        if self.lookup_rule(label)?.is_some() {
            return Err(GraphError::DuplicateLabel {
                label: label.to_owned(),
            });
        }
        let (references, concludes_vertex, concludes_edge_to) = self.resolve_body(&body)?;
        let iid = RuleIid::new(self.key_generator.next_rule()?);
        let rule = {
            let mut rules = self.rules.write();
            let rule = RuleRef(rules.records.len() as u32);
            rules.records.push(RuleRecord {
                iid,
                label: label.to_owned(),
                persisted_label: None,
                body,
                body_dirty: false,
                status: Status::Buffered,
                deleted: false,
                references,
                concludes_vertex,
                concludes_edge_to,
            });
            rules.by_label.insert(label.to_owned(), rule);
            rules.by_iid.insert(iid, rule);
            rule
        };
        self.schema_changed();
        debug!(label, "schema.rule.create");
        Ok(rule)
    }

    /// Looks up a rule by label.
    pub fn get_rule(&self, label: &str) -> Result<Option<RuleRef>> {
        let _guard = self.label_locks.read(&lock_key(label))?;
        self.lookup_rule(label)
    }

    /// Every live rule, ordered by label.
    pub fn rules(&self) -> Result<Vec<RuleRef>> {
        let mut persisted = Vec::new();
        for (key, _) in self.storage.iterate(&keys::rule_label_index_prefix())? {
            persisted.push(utf8(key[1..].to_vec())?);
        }
        for label in persisted {
            self.lookup_rule(&label)?;
        }
        let rules = self.rules.read();
        let mut live: Vec<(String, RuleRef)> = rules
            .by_label
            .iter()
            .filter(|(_, rule)| !rules.records[rule.index()].deleted)
            .map(|(label, rule)| (label.clone(), *rule))
            .collect();
        live.sort();
        Ok(live.into_iter().map(|(_, rule)| rule).collect())
    }

    /// Current label of a rule.
    pub fn rule_label(&self, rule: RuleRef) -> Result<String> {
        Ok(self.rules.read().record(rule)?.label.clone())
    }

    /// Body of a rule.
    pub fn rule_body(&self, rule: RuleRef) -> Result<RuleBody> {
        Ok(self.rules.read().record(rule)?.body.clone())
    }

    /// Current IID of a rule; buffered until the schema commits.
    pub fn rule_iid(&self, rule: RuleRef) -> Result<RuleIid> {
        Ok(self.rules.read().record(rule)?.iid)
    }

    /// Deletes a rule and its index entries.
    pub fn delete_rule(&self, rule: RuleRef) -> Result<()> {
        let label = self.rule_label(rule)?;
        self.ensure_writable(&label)?;
        let _guard = self.label_locks.write(&lock_key(&label))?;
        {
            let mut rules = self.rules.write();
            rules.record_mut(rule)?.deleted = true;
            rules.by_label.remove(&label);
            rules.hidden_labels.insert(label.clone());
        }
        self.schema_changed();
        debug!(label = %label, "schema.rule.delete");
        Ok(())
    }

    /// Renames a rule from `old` to `new`.
    pub fn update_rule_label(&self, rule: RuleRef, old: &str, new: &str) -> Result<()> {
        self.ensure_writable(&new)?;
        let _all = self.label_locks.exclusive()?;
        let current = self.rule_label(rule)?;
        if current != old {
            return Err(GraphError::invalid(format!(
                "rule is labelled '{current}', not '{old}'"
            )));
        }
        if old == new {
            return Ok(());
        }
        if self.lookup_rule(new)?.is_some() {
            return Err(GraphError::DuplicateLabel {
                label: new.to_owned(),
            });
        }
        {
            let mut rules = self.rules.write();
            rules.by_label.remove(old);
            rules.hidden_labels.insert(old.to_owned());
            rules.by_label.insert(new.to_owned(), rule);
            rules.record_mut(rule)?.label = new.to_owned();
        }
        self.schema_changed();
        debug!(from = old, to = new, "schema.rule.rename");
        Ok(())
    }

    /// Rules concluding an instance of `vertex` or of any of its subtypes.
    pub fn rules_concluding_vertex(&self, vertex: TypeRef) -> Result<Vec<RuleRef>> {
        self.indexed_rules(vertex, RuleIndex::ConcludedVertex, Transitivity::Transitive)
    }

    /// Rules concluding a has-edge to `attribute` or to any of its subtypes.
    pub fn rules_concluding_has_edge(&self, attribute: TypeRef) -> Result<Vec<RuleRef>> {
        self.indexed_rules(attribute, RuleIndex::ConcludedEdgeTo, Transitivity::Transitive)
    }

    /// Rules mentioning `vertex` anywhere in their body.
    pub fn rules_referencing(&self, vertex: TypeRef) -> Result<Vec<RuleRef>> {
        self.indexed_rules(vertex, RuleIndex::ContainedType, Transitivity::Explicit)
    }

    fn indexed_rules(
        &self,
        vertex: TypeRef,
        index: RuleIndex,
        reach: Transitivity,
    ) -> Result<Vec<RuleRef>> {
        if let Some(hit) = self.conclusion_cache.lock().get(&(vertex, index)) {
            return Ok(hit.clone());
        }
        let targets = match reach {
            Transitivity::Explicit => vec![vertex],
            Transitivity::Transitive => self.subtypes(vertex, Transitivity::Transitive)?,
        };
        let mut found = Vec::new();
        let mut seen = FxHashSet::default();
        for target in &targets {
            if self.status(*target)? != Status::Persisted {
                continue;
            }
            let prefix = keys::type_rule_prefix(self.iid(*target)?, index);
            let mut iids = Vec::new();
            for (key, _) in self.storage.iterate(&prefix)? {
                iids.push(RuleIid::extract(&key, prefix.len())?);
            }
            for iid in iids {
                let rule = self.rule_by_iid(iid)?;
                if seen.insert(rule) {
                    found.push(rule);
                }
            }
        }
        let result: Vec<RuleRef> = {
            let rules = self.rules.read();
            let mut result: Vec<RuleRef> = found
                .into_iter()
                .filter(|rule| !rules.records[rule.index()].deleted)
                .collect();
            for (position, record) in rules.records.iter().enumerate() {
                let rule = RuleRef(position as u32);
                if record.status != Status::Buffered || record.deleted || seen.contains(&rule) {
                    continue;
                }
                let matches = match index {
                    RuleIndex::ContainedType => record.references.contains(&vertex),
                    RuleIndex::ConcludedVertex => record
                        .concludes_vertex
                        .map_or(false, |t| targets.contains(&t)),
                    RuleIndex::ConcludedEdgeTo => record
                        .concludes_edge_to
                        .map_or(false, |t| targets.contains(&t)),
                };
                if matches {
                    result.push(rule);
                }
            }
            result
        };
        self.conclusion_cache
            .lock()
            .insert((vertex, index), result.clone());
        Ok(result)
    }

    fn lookup_rule(&self, label: &str) -> Result<Option<RuleRef>> {
        {
            let rules = self.rules.read();
            if let Some(rule) = rules.by_label.get(label) {
                return Ok(Some(*rule));
            }
            if rules.hidden_labels.contains(label) {
                return Ok(None);
            }
        }
        match self.storage.get(&keys::rule_label_index(label))? {
            Some(bytes) => Ok(Some(self.rule_by_iid(RuleIid::extract(&bytes, 0)?)?)),
            None => Ok(None),
        }
    }

    fn rule_by_iid(&self, iid: RuleIid) -> Result<RuleRef> {
        if let Some(rule) = self.rules.read().by_iid.get(&iid) {
            return Ok(*rule);
        }
        let owner = iid.as_bytes();
        let label = utf8(
            self.storage
                .get(&keys::property(owner, Property::Label))?
                .ok_or(GraphError::Corruption("rule has no label"))?,
        )?;
        let when = self
            .storage
            .get(&keys::property(owner, Property::When))?
            .ok_or(GraphError::Corruption("rule has no condition"))?;
        let then = self
            .storage
            .get(&keys::property(owner, Property::Then))?
            .ok_or(GraphError::Corruption("rule has no conclusion"))?;
        let mut body = RuleBody {
            when: serde_json::from_slice(&when)
                .map_err(|_| GraphError::Corruption("rule condition is not valid json"))?,
            then: serde_json::from_slice(&then)
                .map_err(|_| GraphError::Corruption("rule conclusion is not valid json"))?,
        };
        let entries = self
            .storage
            .get(&keys::property(owner, Property::RuleTypes))?
            .ok_or(GraphError::Corruption("rule has no type index"))?;
        let (references, concludes_vertex, concludes_edge_to) = self.resolve_index_entries(&entries)?;
        // A type renamed by a transaction that could not see this rule leaves
        // the old label in the body; the stored IIDs still name the type.
        let mut renamed = FxHashMap::default();
        for (stored, vertex) in body.referenced().into_iter().zip(&references) {
            let current = self.label(*vertex)?;
            if *stored != current {
                renamed.insert(stored.clone(), current);
            }
        }
        let body_dirty = !renamed.is_empty() && body.relabel(&renamed);
        trace!(label = %label, body_dirty, "schema.rule.load");
        let mut rules = self.rules.write();
        if let Some(rule) = rules.by_iid.get(&iid) {
            return Ok(*rule);
        }
        let rule = RuleRef(rules.records.len() as u32);
        if !rules.by_label.contains_key(&label) && !rules.hidden_labels.contains(&label) {
            rules.by_label.insert(label.clone(), rule);
        }
        rules.by_iid.insert(iid, rule);
        rules.records.push(RuleRecord {
            iid,
            persisted_label: Some(label.clone()),
            label,
            body,
            body_dirty,
            status: Status::Persisted,
            deleted: false,
            references,
            concludes_vertex,
            concludes_edge_to,
        });
        Ok(rule)
    }

    /// Resolves the labels of a new body; unknown labels fail with `NotFound`.
    fn resolve_body(&self, body: &RuleBody) -> Result<ResolvedIndex> {
        let resolve = |label: &Label| -> Result<TypeRef> {
            let scoped = label.scoped_name();
            self.lookup(&scoped)?
                .ok_or(GraphError::NotFound { what: scoped })
        };
        let references = body
            .referenced()
            .into_iter()
            .map(resolve)
            .collect::<Result<Vec<_>>>()?;
        Ok((
            references,
            body.concluded_vertex().map(resolve).transpose()?,
            body.concluded_edge_to().map(resolve).transpose()?,
        ))
    }

    /// Resolves the stored `[index infix][type IID]` entries of a rule.
    fn resolve_index_entries(&self, raw: &[u8]) -> Result<ResolvedIndex> {
        if raw.len() % INDEX_ENTRY_LENGTH != 0 {
            return Err(GraphError::Corruption("rule type index is truncated"));
        }
        let mut resolved: ResolvedIndex = (Vec::new(), None, None);
        for entry in raw.chunks_exact(INDEX_ENTRY_LENGTH) {
            let index = RuleIndex::from_infix(entry[0])?;
            let vertex = self.type_by_iid(TypeIid::from_bytes(&entry[1..])?)?;
            match index {
                RuleIndex::ContainedType => resolved.0.push(vertex),
                RuleIndex::ConcludedVertex => resolved.1 = Some(vertex),
                RuleIndex::ConcludedEdgeTo => resolved.2 = Some(vertex),
            }
        }
        Ok(resolved)
    }

    /// Rewrites `old` to `new` in the body of every rule mentioning `vertex`.
    pub(super) fn relabel_rules(&self, vertex: TypeRef, old: &Label, new: &Label) -> Result<()> {
        let referencing = self.rules_referencing(vertex)?;
        let renamed = FxHashMap::from_iter([(old.clone(), new.clone())]);
        let mut rules = self.rules.write();
        for rule in referencing {
            let record = rules.record_mut(rule)?;
            if record.body.relabel(&renamed) {
                record.body_dirty = true;
                trace!(rule = %record.label, "schema.rule.relabel");
            }
        }
        Ok(())
    }

    pub(super) fn assign_rule_iids(&self, rules: &mut RuleState) -> Result<()> {
        for position in 0..rules.records.len() {
            let record = &rules.records[position];
            if record.status != Status::Buffered || record.deleted {
                continue;
            }
            let old = record.iid;
            let iid = RuleIid::new(self.storage.key_generator().next_rule()?);
            rules.records[position].iid = iid;
            rules.by_iid.remove(&old);
            rules.by_iid.insert(iid, RuleRef(position as u32));
        }
        Ok(())
    }

    pub(super) fn write_rules(&self, state: &SchemaState, rules: &RuleState) -> Result<()> {
        let mut released = FxHashSet::default();
        for record in &rules.records {
            let Some(stored) = &record.persisted_label else {
                continue;
            };
            if record.deleted || *stored != record.label {
                let key = keys::rule_label_index(stored);
                self.storage.require_value(key.clone(), record.iid.as_bytes().to_vec())?;
                self.storage.delete(key)?;
                released.insert(stored.clone());
            }
        }
        for record in &rules.records {
            let owner = record.iid.as_bytes();
            match (record.status, record.deleted) {
                (Status::Buffered, true) => continue,
                (Status::Persisted, true) => {
                    self.storage.delete(owner.to_vec())?;
                    for property in [
                        Property::Label,
                        Property::When,
                        Property::Then,
                        Property::RuleTypes,
                    ] {
                        self.storage.delete(keys::property(owner, property))?;
                    }
                    for (vertex, index) in index_entries(record) {
                        let type_iid = state.record(vertex)?.iid;
                        self.storage.delete(keys::type_rule(type_iid, index, record.iid))?;
                    }
                    continue;
                }
                (Status::Buffered, false) => {
                    self.storage.put(owner.to_vec(), Vec::new())?;
                    self.storage.put(keys::property(owner, Property::Label), record.label.as_bytes().to_vec())?;
                    self.write_body(state, record)?;
                    let mut entries = Vec::new();
                    for (vertex, index) in index_entries(record) {
                        let type_iid = state.record(vertex)?.iid;
                        entries.push(index.infix());
                        entries.extend_from_slice(type_iid.as_bytes());
                        self.storage.put(keys::type_rule(type_iid, index, record.iid), Vec::new())?;
                    }
                    self.storage.put(keys::property(owner, Property::RuleTypes), entries)?;
                }
                (Status::Persisted, false) => {
                    if record.body_dirty {
                        self.write_body(state, record)?;
                    }
                    if record.persisted_label.as_deref() == Some(record.label.as_str()) {
                        continue;
                    }
                    self.storage.put(keys::property(owner, Property::Label), record.label.as_bytes().to_vec())?;
                }
            }
            let key = keys::rule_label_index(&record.label);
            if !released.contains(&record.label) {
                self.storage.require_absent(key.clone())?;
            }
            self.note_label_index_write(key.clone(), record.label.clone());
            self.storage.put(key, owner.to_vec())?;
        }
        Ok(())
    }

    /// Writes the JSON body of a rule. Every persisted type the body names
    /// by its stored label must still carry that label when the batch
    /// commits, so a concurrent rename fails this commit with `Conflict`.
    fn write_body(&self, state: &SchemaState, record: &RuleRecord) -> Result<()> {
        let owner = record.iid.as_bytes();
        let when = serde_json::to_vec(&record.body.when)
            .map_err(|e| GraphError::invalid(e.to_string()))?;
        let then = serde_json::to_vec(&record.body.then)
            .map_err(|e| GraphError::invalid(e.to_string()))?;
        self.storage.put(keys::property(owner, Property::When), when)?;
        self.storage.put(keys::property(owner, Property::Then), then)?;
        for vertex in &record.references {
            let referenced = state.record(*vertex)?;
            if referenced.status == Status::Persisted
                && referenced.persisted_label.as_ref() == Some(&referenced.label)
            {
                self.storage.require_value(
                    keys::type_label_index(&referenced.label.scoped_name()),
                    referenced.iid.as_bytes().to_vec(),
                )?;
            }
        }
        Ok(())
    }
}

fn index_entries(record: &RuleRecord) -> Vec<(TypeRef, RuleIndex)> {
    let mut entries: Vec<(TypeRef, RuleIndex)> = record
        .references
        .iter()
        .map(|vertex| (*vertex, RuleIndex::ContainedType))
        .collect();
    entries.extend(record.concludes_vertex.map(|v| (v, RuleIndex::ConcludedVertex)));
    entries.extend(record.concludes_edge_to.map(|v| (v, RuleIndex::ConcludedEdgeTo)));
    entries
}
