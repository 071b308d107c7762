//! Byte-level identity of everything the graph stores.
//!
//! Every key starts with a one-byte [`Prefix`]; vertex keys are the vertex
//! IID itself, properties and edges extend the owner's IID with a one-byte
//! infix. The numeric codes below are persisted and must never change.

pub mod iid;
pub mod key_generator;
pub mod keys;
pub mod value;

use crate::error::{GraphError, Result};

/// Leading byte of every stored key.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Prefix {
    /// Type label index and type-to-rule indexes.
    IndexType = 0,
    /// Rule label index.
    IndexRule = 10,
    /// Persisted vertex and has-edge counters.
    StatisticsThings = 50,
    /// Pending count jobs.
    StatisticsCountJob = 51,
    /// Markers for entities already reflected in counters.
    StatisticsCounted = 52,
    /// Statistics version counter.
    StatisticsSnapshot = 53,
    /// Root `thing` type vertex.
    VertexThingType = 100,
    /// Entity type vertices.
    VertexEntityType = 110,
    /// Attribute type vertices.
    VertexAttributeType = 120,
    /// Relation type vertices.
    VertexRelationType = 130,
    /// Role type vertices.
    VertexRoleType = 140,
    /// Entity instances.
    VertexEntity = 150,
    /// Attribute instances.
    VertexAttribute = 160,
    /// Relation instances.
    VertexRelation = 170,
    /// Role instances.
    VertexRole = 180,
    /// Rule structures.
    StructureRule = 190,
    /// Identifier generator counters.
    System = 200,
}

impl Prefix {
    /// The persisted byte.
    pub const fn key(self) -> u8 {
        self as u8
    }

    /// Parses a persisted byte.
    pub fn from_key(key: u8) -> Result<Self> {
        Ok(match key {
            0 => Prefix::IndexType,
            10 => Prefix::IndexRule,
            50 => Prefix::StatisticsThings,
            51 => Prefix::StatisticsCountJob,
            52 => Prefix::StatisticsCounted,
            53 => Prefix::StatisticsSnapshot,
            100 => Prefix::VertexThingType,
            110 => Prefix::VertexEntityType,
            120 => Prefix::VertexAttributeType,
            130 => Prefix::VertexRelationType,
            140 => Prefix::VertexRoleType,
            150 => Prefix::VertexEntity,
            160 => Prefix::VertexAttribute,
            170 => Prefix::VertexRelation,
            180 => Prefix::VertexRole,
            190 => Prefix::StructureRule,
            200 => Prefix::System,
            _ => return Err(GraphError::Corruption("unknown key prefix")),
        })
    }
}

/// Category of a type vertex.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TypeEncoding {
    /// The root `thing` type.
    Thing,
    /// Entity types.
    Entity,
    /// Attribute types.
    Attribute,
    /// Relation types.
    Relation,
    /// Role types.
    Role,
}

impl TypeEncoding {
    /// All categories, root first.
    pub const ALL: [TypeEncoding; 5] = [
        TypeEncoding::Thing,
        TypeEncoding::Entity,
        TypeEncoding::Attribute,
        TypeEncoding::Relation,
        TypeEncoding::Role,
    ];

    /// Key prefix of vertices in this category.
    pub const fn prefix(self) -> Prefix {
        match self {
            TypeEncoding::Thing => Prefix::VertexThingType,
            TypeEncoding::Entity => Prefix::VertexEntityType,
            TypeEncoding::Attribute => Prefix::VertexAttributeType,
            TypeEncoding::Relation => Prefix::VertexRelationType,
            TypeEncoding::Role => Prefix::VertexRoleType,
        }
    }

    /// Parses a type-vertex prefix byte.
    pub fn from_prefix(key: u8) -> Result<Self> {
        match Prefix::from_key(key)? {
            Prefix::VertexThingType => Ok(TypeEncoding::Thing),
            Prefix::VertexEntityType => Ok(TypeEncoding::Entity),
            Prefix::VertexAttributeType => Ok(TypeEncoding::Attribute),
            Prefix::VertexRelationType => Ok(TypeEncoding::Relation),
            Prefix::VertexRoleType => Ok(TypeEncoding::Role),
            _ => Err(GraphError::Corruption("prefix is not a type vertex")),
        }
    }

    /// Label of the root type of this category, as `(name, scope)`.
    pub const fn root_label(self) -> (&'static str, Option<&'static str>) {
        match self {
            TypeEncoding::Thing => ("thing", None),
            TypeEncoding::Entity => ("entity", None),
            TypeEncoding::Attribute => ("attribute", None),
            TypeEncoding::Relation => ("relation", None),
            TypeEncoding::Role => ("role", Some("relation")),
        }
    }

    /// Category of the instances of types in this category, if any.
    pub const fn instance_encoding(self) -> Option<ThingEncoding> {
        match self {
            TypeEncoding::Thing => None,
            TypeEncoding::Entity => Some(ThingEncoding::Entity),
            TypeEncoding::Attribute => Some(ThingEncoding::Attribute),
            TypeEncoding::Relation => Some(ThingEncoding::Relation),
            TypeEncoding::Role => Some(ThingEncoding::Role),
        }
    }

    /// Scope name used by identifier generators.
    pub const fn name(self) -> &'static str {
        match self {
            TypeEncoding::Thing => "thing_type",
            TypeEncoding::Entity => "entity_type",
            TypeEncoding::Attribute => "attribute_type",
            TypeEncoding::Relation => "relation_type",
            TypeEncoding::Role => "role_type",
        }
    }
}

/// Category of a thing vertex.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ThingEncoding {
    /// Entity instance.
    Entity,
    /// Attribute instance.
    Attribute,
    /// Relation instance.
    Relation,
    /// Role instance.
    Role,
}

impl ThingEncoding {
    /// Key prefix of vertices in this category.
    pub const fn prefix(self) -> Prefix {
        match self {
            ThingEncoding::Entity => Prefix::VertexEntity,
            ThingEncoding::Attribute => Prefix::VertexAttribute,
            ThingEncoding::Relation => Prefix::VertexRelation,
            ThingEncoding::Role => Prefix::VertexRole,
        }
    }

    /// Parses a thing-vertex prefix byte.
    pub fn from_prefix(key: u8) -> Result<Self> {
        match Prefix::from_key(key)? {
            Prefix::VertexEntity => Ok(ThingEncoding::Entity),
            Prefix::VertexAttribute => Ok(ThingEncoding::Attribute),
            Prefix::VertexRelation => Ok(ThingEncoding::Relation),
            Prefix::VertexRole => Ok(ThingEncoding::Role),
            _ => Err(GraphError::Corruption("prefix is not a thing vertex")),
        }
    }

    /// Category of the types these instances belong to.
    pub const fn type_encoding(self) -> TypeEncoding {
        match self {
            ThingEncoding::Entity => TypeEncoding::Entity,
            ThingEncoding::Attribute => TypeEncoding::Attribute,
            ThingEncoding::Relation => TypeEncoding::Relation,
            ThingEncoding::Role => TypeEncoding::Role,
        }
    }
}

/// Property stored under `[type IID][infix]`.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Property {
    /// Label name.
    Label = 0,
    /// Label scope (role types only).
    Scope = 1,
    /// Abstract flag.
    Abstract = 2,
    /// Attribute value type.
    ValueType = 3,
    /// Attribute regex constraint.
    Regex = 4,
    /// Rule condition body.
    When = 5,
    /// Rule conclusion body.
    Then = 6,
    /// Type-to-rule index entries of a rule, as `[index infix][type IID]` pairs.
    RuleTypes = 7,
}

impl Property {
    /// The persisted infix byte.
    pub const fn infix(self) -> u8 {
        self as u8
    }
}

/// Whether a vertex or edge exists only in the transaction or in storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Status {
    /// Created in this transaction, not yet committed.
    Buffered,
    /// Loaded from storage.
    Persisted,
}

/// Orientation of an edge relative to the vertex it is read from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    /// Stored under the source vertex.
    Out,
    /// Stored under the target vertex.
    In,
}

/// Edges between type vertices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TypeEdge {
    /// Subtype to supertype.
    Sub,
    /// Owner type to attribute type.
    Owns,
    /// Owner type to key attribute type.
    OwnsKey,
    /// Player type to role type.
    Plays,
    /// Relation type to role type.
    Relates,
}

impl TypeEdge {
    /// All kinds, in infix order.
    pub const ALL: [TypeEdge; 5] = [
        TypeEdge::Sub,
        TypeEdge::Owns,
        TypeEdge::OwnsKey,
        TypeEdge::Plays,
        TypeEdge::Relates,
    ];

    const fn code(self) -> i8 {
        match self {
            TypeEdge::Sub => 50,
            TypeEdge::Owns => 51,
            TypeEdge::OwnsKey => 52,
            TypeEdge::Plays => 53,
            TypeEdge::Relates => 54,
        }
    }

    /// Infix byte of this edge read in `direction`.
    pub const fn infix(self, direction: Direction) -> u8 {
        infix_byte(self.code(), direction)
    }

    /// Lower-case name used in log events.
    pub const fn name(self) -> &'static str {
        match self {
            TypeEdge::Sub => "sub",
            TypeEdge::Owns => "owns",
            TypeEdge::OwnsKey => "owns_key",
            TypeEdge::Plays => "plays",
            TypeEdge::Relates => "relates",
        }
    }
}

/// Edges between thing vertices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ThingEdge {
    /// Owner to attribute.
    Has,
    /// Player to role instance.
    Playing,
    /// Relation to role instance.
    Relating,
    /// Relation to player, keyed additionally by role type.
    RolePlayer,
}

impl ThingEdge {
    /// All kinds, in infix order.
    pub const ALL: [ThingEdge; 4] = [
        ThingEdge::Has,
        ThingEdge::Playing,
        ThingEdge::Relating,
        ThingEdge::RolePlayer,
    ];

    const fn code(self) -> i8 {
        match self {
            ThingEdge::Has => 70,
            ThingEdge::Playing => 71,
            ThingEdge::Relating => 72,
            ThingEdge::RolePlayer => 73,
        }
    }

    /// Infix byte of this edge read in `direction`.
    pub const fn infix(self, direction: Direction) -> u8 {
        infix_byte(self.code(), direction)
    }

    /// Whether the edge key carries a role-type tail.
    pub const fn is_optimisation(self) -> bool {
        matches!(self, ThingEdge::RolePlayer)
    }

    /// Lower-case name used in log events.
    pub const fn name(self) -> &'static str {
        match self {
            ThingEdge::Has => "has",
            ThingEdge::Playing => "playing",
            ThingEdge::Relating => "relating",
            ThingEdge::RolePlayer => "role_player",
        }
    }
}

/// Signed infix codes: the forward edge uses the positive code, the backward
/// copy its negation, stored as the two's-complement byte.
const fn infix_byte(code: i8, direction: Direction) -> u8 {
    match direction {
        Direction::Out => code as u8,
        Direction::In => (-code) as u8,
    }
}

/// Value category of an attribute type.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueType {
    /// Abstract root value type; has no instances.
    Object = 0,
    /// `true`/`false`.
    Boolean = 10,
    /// 64-bit signed integer.
    Long = 20,
    /// 64-bit float, NaN excluded.
    Double = 30,
    /// UTF-8 text up to 65 535 bytes.
    String = 40,
    /// Date and time at millisecond precision.
    DateTime = 50,
}

impl ValueType {
    /// The persisted byte.
    pub const fn key(self) -> u8 {
        self as u8
    }

    /// Parses a persisted byte.
    pub fn from_key(key: u8) -> Result<Self> {
        Ok(match key {
            0 => ValueType::Object,
            10 => ValueType::Boolean,
            20 => ValueType::Long,
            30 => ValueType::Double,
            40 => ValueType::String,
            50 => ValueType::DateTime,
            _ => return Err(GraphError::Corruption("unknown value type")),
        })
    }

    /// Whether instances of this value type can be stored.
    pub const fn is_writable(self) -> bool {
        !matches!(self, ValueType::Object)
    }

    /// Lower-case name.
    pub const fn name(self) -> &'static str {
        match self {
            ValueType::Object => "object",
            ValueType::Boolean => "boolean",
            ValueType::Long => "long",
            ValueType::Double => "double",
            ValueType::String => "string",
            ValueType::DateTime => "datetime",
        }
    }
}

/// Infix of the type-to-rule indexes under `[0][type IID]`.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RuleIndex {
    /// The rule mentions the type anywhere in its body.
    ContainedType = 0,
    /// The rule concludes instances of the type.
    ConcludedVertex = 10,
    /// The rule concludes has-edges to attributes of the type.
    ConcludedEdgeTo = 11,
}

impl RuleIndex {
    /// The persisted infix byte.
    pub const fn infix(self) -> u8 {
        self as u8
    }

    /// Parses a persisted infix byte.
    pub fn from_infix(infix: u8) -> Result<Self> {
        match infix {
            0 => Ok(RuleIndex::ContainedType),
            10 => Ok(RuleIndex::ConcludedVertex),
            11 => Ok(RuleIndex::ConcludedEdgeTo),
            _ => Err(GraphError::Corruption("unknown rule index infix")),
        }
    }
}

/// Kind of entity a count job tracks.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CountJobType {
    /// An attribute vertex.
    Attribute = 0,
    /// A has-edge between an owner and an attribute.
    HasEdge = 1,
}

impl CountJobType {
    /// The persisted byte.
    pub const fn key(self) -> u8 {
        self as u8
    }

    /// Parses a persisted byte.
    pub fn from_key(key: u8) -> Result<Self> {
        match key {
            0 => Ok(CountJobType::Attribute),
            1 => Ok(CountJobType::HasEdge),
            _ => Err(GraphError::Corruption("unknown count job type")),
        }
    }
}

/// What happened to the entity a count job tracks.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CountJobOperation {
    /// The entity was written.
    Created = 0,
    /// The entity was removed.
    Deleted = 1,
}

impl CountJobOperation {
    /// The persisted byte.
    pub const fn key(self) -> u8 {
        self as u8
    }

    /// Parses a persisted byte.
    pub fn from_key(key: u8) -> Result<Self> {
        match key {
            0 => Ok(CountJobOperation::Created),
            1 => Ok(CountJobOperation::Deleted),
            _ => Err(GraphError::Corruption("unknown count job operation")),
        }
    }

    /// The operation that cancels this one.
    pub const fn inverse(self) -> Self {
        match self {
            CountJobOperation::Created => CountJobOperation::Deleted,
            CountJobOperation::Deleted => CountJobOperation::Created,
        }
    }

    /// Counter delta this operation contributes.
    pub const fn delta(self) -> i64 {
        match self {
            CountJobOperation::Created => 1,
            CountJobOperation::Deleted => -1,
        }
    }
}

/// Infix of statistics counters under `[50][type IID]`.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatisticsInfix {
    /// Explicit instance count of a type.
    VertexCount = 0,
    /// Explicit has-edge count between an owner type and an attribute type.
    HasEdgeCount = 2,
}

impl StatisticsInfix {
    /// The persisted infix byte.
    pub const fn infix(self) -> u8 {
        self as u8
    }
}
