//! Shape statistics over the schema, used by query planning.

use rustc_hash::FxHashMap;

use super::schema::{SchemaGraph, Transitivity};
use super::vertex::TypeRef;
use crate::error::Result;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum StatKey {
    ThingTypes,
    AbstractThingTypes,
    AttributeTypes,
    RelationTypes,
    RoleTypes,
    Subtypes(TypeRef),
    TransitiveSubtypes(TypeRef),
    Depth(TypeRef),
}

/// Memoised statistics of a read-only schema view.
#[derive(Default)]
pub(crate) struct SchemaStatsCache {
    values: FxHashMap<StatKey, usize>,
}

/// Statistics over one schema view.
///
/// Values are memoised for read-only views and recomputed on every call
/// otherwise.
pub struct SchemaStatistics<'a> {
    graph: &'a SchemaGraph,
}

impl SchemaGraph {
    /// Statistics over this view.
    pub fn statistics(&self) -> SchemaStatistics<'_> {
        SchemaStatistics { graph: self }
    }
}

impl SchemaStatistics<'_> {
    /// Number of thing types, roots included.
    pub fn thing_type_count(&self) -> Result<usize> {
        self.memo(StatKey::ThingTypes, || Ok(self.graph.thing_types()?.len()))
    }

    /// Number of abstract thing types.
    pub fn abstract_thing_type_count(&self) -> Result<usize> {
        self.memo(StatKey::AbstractThingTypes, || {
            let mut count = 0;
            for vertex in self.graph.thing_types()? {
                if self.graph.is_abstract(vertex)? {
                    count += 1;
                }
            }
            Ok(count)
        })
    }

    /// Number of attribute types.
    pub fn attribute_type_count(&self) -> Result<usize> {
        self.memo(StatKey::AttributeTypes, || Ok(self.graph.attribute_types()?.len()))
    }

    /// Number of relation types.
    pub fn relation_type_count(&self) -> Result<usize> {
        self.memo(StatKey::RelationTypes, || Ok(self.graph.relation_types()?.len()))
    }

    /// Number of role types.
    pub fn role_type_count(&self) -> Result<usize> {
        self.memo(StatKey::RoleTypes, || Ok(self.graph.role_types()?.len()))
    }

    /// Number of direct subtypes of `vertex`.
    pub fn subtype_count(&self, vertex: TypeRef) -> Result<usize> {
        self.memo(StatKey::Subtypes(vertex), || {
            Ok(self.graph.subtypes(vertex, Transitivity::Explicit)?.len())
        })
    }

    /// Number of types below `vertex` at any depth.
    pub fn transitive_subtype_count(&self, vertex: TypeRef) -> Result<usize> {
        self.memo(StatKey::TransitiveSubtypes(vertex), || {
            Ok(self.graph.subtypes(vertex, Transitivity::Transitive)?.len() - 1)
        })
    }

    /// Length of the longest subtype chain below `vertex`; zero for leaves.
    pub fn subtype_depth(&self, vertex: TypeRef) -> Result<usize> {
        self.memo(StatKey::Depth(vertex), || {
            let mut depth = 0;
            for child in self.graph.subtypes(vertex, Transitivity::Explicit)? {
                depth = depth.max(self.subtype_depth(child)? + 1);
            }
            Ok(depth)
        })
    }

    fn memo(&self, key: StatKey, compute: impl FnOnce() -> Result<usize>) -> Result<usize> {
        if !self.graph.is_read_only() {
            return compute();
        }
        if let Some(hit) = self.graph.stats_cache.lock().values.get(&key) {
            return Ok(*hit);
        }
        let value = compute()?;
        self.graph.stats_cache.lock().values.insert(key, value);
        Ok(value)
    }
}
