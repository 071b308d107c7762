//! Keys of indexes, properties, statistics and generator counters.

use super::iid::{RuleIid, ThingIid, TypeIid};
use super::{CountJobType, Prefix, Property, RuleIndex, StatisticsInfix};
use crate::error::{GraphError, Result};

/// Separates the label index from the type-to-rule indexes under prefix 0;
/// type IIDs never start with this byte.
const LABEL_INDEX_INFIX: u8 = 0;

/// `[0][0][scoped label]` mapping a type label to its IID.
pub fn type_label_index(scoped_label: &str) -> Vec<u8> {
    let mut key = vec![Prefix::IndexType.key(), LABEL_INDEX_INFIX];
    key.extend_from_slice(scoped_label.as_bytes());
    key
}

/// `[10][label]` mapping a rule label to its IID.
pub fn rule_label_index(label: &str) -> Vec<u8> {
    let mut key = vec![Prefix::IndexRule.key()];
    key.extend_from_slice(label.as_bytes());
    key
}

/// Prefix of every rule label entry.
pub fn rule_label_index_prefix() -> Vec<u8> {
    vec![Prefix::IndexRule.key()]
}

/// `[0][type IID][index]`, prefix of rule entries for one type.
pub fn type_rule_prefix(type_iid: TypeIid, index: RuleIndex) -> Vec<u8> {
    let mut key = vec![Prefix::IndexType.key()];
    key.extend_from_slice(type_iid.as_bytes());
    key.push(index.infix());
    key
}

/// `[0][type IID][index][rule IID]`.
pub fn type_rule(type_iid: TypeIid, index: RuleIndex, rule: RuleIid) -> Vec<u8> {
    let mut key = type_rule_prefix(type_iid, index);
    key.extend_from_slice(rule.as_bytes());
    key
}

/// `[owner IID][property infix]`.
pub fn property(owner: &[u8], property: Property) -> Vec<u8> {
    let mut key = Vec::with_capacity(owner.len() + 1);
    key.extend_from_slice(owner);
    key.push(property.infix());
    key
}

/// `[50][type IID][0]`, the explicit instance counter of a type.
pub fn vertex_count(type_iid: TypeIid) -> Vec<u8> {
    let mut key = vec![Prefix::StatisticsThings.key()];
    key.extend_from_slice(type_iid.as_bytes());
    key.push(StatisticsInfix::VertexCount.infix());
    key
}

/// `[50][owner type IID][2][attribute type IID]`.
pub fn has_edge_count(owner_type: TypeIid, attribute_type: TypeIid) -> Vec<u8> {
    let mut key = vec![Prefix::StatisticsThings.key()];
    key.extend_from_slice(owner_type.as_bytes());
    key.push(StatisticsInfix::HasEdgeCount.infix());
    key.extend_from_slice(attribute_type.as_bytes());
    key
}

/// `[53]`, the statistics version counter.
pub fn statistics_version() -> Vec<u8> {
    vec![Prefix::StatisticsSnapshot.key()]
}

/// Prefix of every pending count job.
pub fn count_job_prefix() -> Vec<u8> {
    vec![Prefix::StatisticsCountJob.key()]
}

/// The entity a count job or counted marker is about.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum CountedEntity {
    /// An attribute vertex.
    Attribute(ThingIid),
    /// A has-edge.
    HasEdge {
        /// Owner vertex.
        owner: ThingIid,
        /// Attribute vertex.
        attribute: ThingIid,
    },
}

impl CountedEntity {
    /// Job type of this entity.
    pub fn job_type(&self) -> CountJobType {
        match self {
            CountedEntity::Attribute(_) => CountJobType::Attribute,
            CountedEntity::HasEdge { .. } => CountJobType::HasEdge,
        }
    }

    /// Counter this entity contributes to.
    pub fn counter_key(&self) -> Vec<u8> {
        match self {
            CountedEntity::Attribute(att) => vertex_count(att.type_iid()),
            CountedEntity::HasEdge { owner, attribute } => {
                has_edge_count(owner.type_iid(), attribute.type_iid())
            }
        }
    }

    /// `[51][job type][entity]`.
    pub fn job_key(&self) -> Vec<u8> {
        self.key(Prefix::StatisticsCountJob)
    }

    /// `[52][job type][entity]`.
    pub fn counted_key(&self) -> Vec<u8> {
        self.key(Prefix::StatisticsCounted)
    }

    fn key(&self, prefix: Prefix) -> Vec<u8> {
        let mut key = vec![prefix.key(), self.job_type().key()];
        match self {
            CountedEntity::Attribute(att) => key.extend_from_slice(att.as_bytes()),
            CountedEntity::HasEdge { owner, attribute } => {
                key.extend_from_slice(owner.as_bytes());
                key.extend_from_slice(attribute.as_bytes());
            }
        }
        key
    }

    /// Parses a count job key.
    pub fn from_job_key(key: &[u8]) -> Result<Self> {
        if key.first() != Some(&Prefix::StatisticsCountJob.key()) {
            return Err(GraphError::Corruption("not a count job key"));
        }
        let job_type = CountJobType::from_key(
            *key.get(1)
                .ok_or(GraphError::Corruption("count job key truncated"))?,
        )?;
        match job_type {
            CountJobType::Attribute => Ok(CountedEntity::Attribute(ThingIid::from_bytes(&key[2..])?)),
            CountJobType::HasEdge => {
                let (owner, len) = ThingIid::extract(key, 2)?;
                let attribute = ThingIid::from_bytes(&key[2 + len..])?;
                Ok(CountedEntity::HasEdge { owner, attribute })
            }
        }
    }
}

/// `[200][0][type prefix]`, generator counter of one type category.
pub fn type_generator(prefix: Prefix) -> Vec<u8> {
    vec![Prefix::System.key(), 0, prefix.key()]
}

/// `[200][1]`, generator counter of rules.
pub fn rule_generator() -> Vec<u8> {
    vec![Prefix::System.key(), 1]
}

/// `[200][2][type IID]`, generator counter of instances of one type.
pub fn thing_generator(type_iid: TypeIid) -> Vec<u8> {
    let mut key = vec![Prefix::System.key(), 2];
    key.extend_from_slice(type_iid.as_bytes());
    key
}
