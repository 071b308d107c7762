//! Vertex identifiers and the edge keys built from them.

use std::fmt;

use smallvec::SmallVec;

use super::value::{self, Value};
use super::{Direction, Prefix, ThingEdge, ThingEncoding, TypeEdge, TypeEncoding, ValueType};
use crate::error::{GraphError, Result};
use crate::primitives::bytes::ord;

/// Inline storage for thing IIDs; generated IIDs fit without allocating.
pub type IidBytes = SmallVec<[u8; 16]>;

/// Identifier of a type vertex: `[prefix][i16 body]`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeIid([u8; TypeIid::LENGTH]);

impl TypeIid {
    /// Encoded length in bytes.
    pub const LENGTH: usize = 3;

    /// Builds the IID of a type in `encoding` with the given body.
    pub fn new(encoding: TypeEncoding, body: i16) -> Self {
        let b = ord::encode_i16(body);
        TypeIid([encoding.prefix().key(), b[0], b[1]])
    }

    /// Parses an IID, requiring exactly [`TypeIid::LENGTH`] bytes.
    pub fn from_bytes(src: &[u8]) -> Result<Self> {
        if src.len() != Self::LENGTH {
            return Err(GraphError::Corruption("type iid has the wrong length"));
        }
        Self::extract(src, 0)
    }

    /// Parses the IID starting at `offset` of a longer key.
    pub fn extract(src: &[u8], offset: usize) -> Result<Self> {
        let bytes: [u8; Self::LENGTH] = src
            .get(offset..offset + Self::LENGTH)
            .and_then(|s| s.try_into().ok())
            .ok_or(GraphError::Corruption("type iid truncated"))?;
        TypeEncoding::from_prefix(bytes[0])?;
        Ok(TypeIid(bytes))
    }

    /// Category of the type.
    pub fn encoding(&self) -> TypeEncoding {
        match TypeEncoding::from_prefix(self.0[0]) {
            Ok(encoding) => encoding,
            Err(_) => unreachable!("type iid prefix validated on construction"),
        }
    }

    /// Numeric body.
    pub fn body(&self) -> i16 {
        (u16::from_be_bytes([self.0[1], self.0[2]]) ^ (1 << 15)) as i16
    }

    /// Whether the body comes from the transaction-local generator.
    pub fn is_buffered(&self) -> bool {
        self.body() < 0
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for TypeIid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}:{}]", self.encoding().name(), self.body())
    }
}

impl fmt::Display for TypeIid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Identifier of a rule structure: `[190][i16 body]`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleIid([u8; RuleIid::LENGTH]);

impl RuleIid {
    /// Encoded length in bytes.
    pub const LENGTH: usize = 3;

    /// Builds a rule IID with the given body.
    pub fn new(body: i16) -> Self {
        let b = ord::encode_i16(body);
        RuleIid([Prefix::StructureRule.key(), b[0], b[1]])
    }

    /// Parses an IID starting at `offset`.
    pub fn extract(src: &[u8], offset: usize) -> Result<Self> {
        let bytes: [u8; Self::LENGTH] = src
            .get(offset..offset + Self::LENGTH)
            .and_then(|s| s.try_into().ok())
            .ok_or(GraphError::Corruption("rule iid truncated"))?;
        if bytes[0] != Prefix::StructureRule.key() {
            return Err(GraphError::Corruption("prefix is not a rule"));
        }
        Ok(RuleIid(bytes))
    }

    /// Numeric body.
    pub fn body(&self) -> i16 {
        (u16::from_be_bytes([self.0[1], self.0[2]]) ^ (1 << 15)) as i16
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for RuleIid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[rule:{}]", self.body())
    }
}

/// Identifier of a thing vertex.
///
/// Generated things are `[prefix][type IID][i64 body]`; attributes are
/// `[160][type IID][value type][encoded value]` so equal values collide.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThingIid(IidBytes);

const THING_TYPE_OFFSET: usize = 1;
const THING_BODY_OFFSET: usize = THING_TYPE_OFFSET + TypeIid::LENGTH;

impl ThingIid {
    /// Length of a generated (non-attribute) IID.
    pub const GENERATED_LENGTH: usize = THING_BODY_OFFSET + 8;

    /// Builds the IID of a generated instance of `type_iid`.
    pub fn generated(type_iid: TypeIid, body: i64) -> Result<Self> {
        let encoding = type_iid
            .encoding()
            .instance_encoding()
            .filter(|e| *e != ThingEncoding::Attribute)
            .ok_or_else(|| {
                GraphError::invalid(format!(
                    "{} instances do not have generated identifiers",
                    type_iid.encoding().name()
                ))
            })?;
        let mut bytes = IidBytes::new();
        bytes.push(encoding.prefix().key());
        bytes.extend_from_slice(type_iid.as_bytes());
        bytes.extend_from_slice(&ord::encode_i64(body));
        Ok(ThingIid(bytes))
    }

    /// Builds the content-addressed IID of an attribute of `type_iid`.
    pub fn attribute(type_iid: TypeIid, value: &Value) -> Result<Self> {
        if type_iid.encoding() != TypeEncoding::Attribute {
            return Err(GraphError::invalid(format!(
                "{type_iid:?} is not an attribute type"
            )));
        }
        let mut encoded = Vec::new();
        value.encode(&mut encoded)?;
        let mut bytes = IidBytes::new();
        bytes.push(Prefix::VertexAttribute.key());
        bytes.extend_from_slice(type_iid.as_bytes());
        bytes.push(value.value_type().key());
        bytes.extend_from_slice(&encoded);
        Ok(ThingIid(bytes))
    }

    /// Parses an IID that spans all of `src`.
    pub fn from_bytes(src: &[u8]) -> Result<Self> {
        let (iid, len) = Self::extract(src, 0)?;
        if len != src.len() {
            return Err(GraphError::Corruption("trailing bytes after thing iid"));
        }
        Ok(iid)
    }

    /// Parses the IID starting at `offset`, returning it with its length.
    pub fn extract(src: &[u8], offset: usize) -> Result<(Self, usize)> {
        let rest = src
            .get(offset..)
            .ok_or(GraphError::Corruption("thing iid truncated"))?;
        let encoding = ThingEncoding::from_prefix(
            *rest
                .first()
                .ok_or(GraphError::Corruption("thing iid truncated"))?,
        )?;
        let type_iid = TypeIid::extract(rest, THING_TYPE_OFFSET)?;
        if type_iid.encoding().instance_encoding() != Some(encoding) {
            return Err(GraphError::Corruption("thing prefix disagrees with its type"));
        }
        let len = match encoding {
            ThingEncoding::Attribute => {
                let value_type = ValueType::from_key(
                    *rest
                        .get(THING_BODY_OFFSET)
                        .ok_or(GraphError::Corruption("attribute iid truncated"))?,
                )?;
                THING_BODY_OFFSET + 1 + value::encoded_len(value_type, &rest[THING_BODY_OFFSET + 1..])?
            }
            _ => {
                if rest.len() < Self::GENERATED_LENGTH {
                    return Err(GraphError::Corruption("thing iid truncated"));
                }
                Self::GENERATED_LENGTH
            }
        };
        Ok((ThingIid(IidBytes::from_slice(&rest[..len])), len))
    }

    /// Category of the thing.
    pub fn encoding(&self) -> ThingEncoding {
        match ThingEncoding::from_prefix(self.0[0]) {
            Ok(encoding) => encoding,
            Err(_) => unreachable!("thing iid prefix validated on construction"),
        }
    }

    /// IID of the thing's type.
    pub fn type_iid(&self) -> TypeIid {
        TypeIid([
            self.0[THING_TYPE_OFFSET],
            self.0[THING_TYPE_OFFSET + 1],
            self.0[THING_TYPE_OFFSET + 2],
        ])
    }

    /// Whether this is an attribute IID.
    pub fn is_attribute(&self) -> bool {
        self.encoding() == ThingEncoding::Attribute
    }

    /// Numeric body of a generated IID; `None` for attributes.
    pub fn body(&self) -> Option<i64> {
        if self.is_attribute() {
            return None;
        }
        ord::decode_i64(&self.0[THING_BODY_OFFSET..]).ok()
    }

    /// Value of an attribute IID; `None` for generated things.
    pub fn value(&self) -> Result<Option<Value>> {
        if !self.is_attribute() {
            return Ok(None);
        }
        let value_type = ValueType::from_key(self.0[THING_BODY_OFFSET])?;
        let (value, _) = Value::decode(value_type, &self.0[THING_BODY_OFFSET + 1..])?;
        Ok(Some(value))
    }

    /// Copy of this IID re-homed under `type_iid`, keeping body or value.
    pub fn with_type(&self, type_iid: TypeIid) -> Self {
        let mut bytes = self.0.clone();
        bytes[THING_TYPE_OFFSET..THING_BODY_OFFSET].copy_from_slice(type_iid.as_bytes());
        ThingIid(bytes)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for ThingIid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:?}{:?}:{}]",
            self.encoding(),
            self.type_iid(),
            hex::encode(&self.0[THING_BODY_OFFSET..])
        )
    }
}

impl fmt::Display for ThingIid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

/// `[owner][infix]`: prefix shared by all edges of one kind and direction.
pub fn edge_prefix(owner: &[u8], infix: u8) -> Vec<u8> {
    let mut key = Vec::with_capacity(owner.len() + 1);
    key.extend_from_slice(owner);
    key.push(infix);
    key
}

/// Keys of a type edge, forward then backward.
pub fn type_edge_keys(from: TypeIid, kind: TypeEdge, to: TypeIid) -> (Vec<u8>, Vec<u8>) {
    let mut out = edge_prefix(from.as_bytes(), kind.infix(Direction::Out));
    out.extend_from_slice(to.as_bytes());
    let mut back = edge_prefix(to.as_bytes(), kind.infix(Direction::In));
    back.extend_from_slice(from.as_bytes());
    (out, back)
}

/// Keys of a thing edge, forward then backward. ROLEPLAYER edges carry the
/// role type as a tail on both copies.
pub fn thing_edge_keys(
    from: &ThingIid,
    kind: ThingEdge,
    to: &ThingIid,
    role_type: Option<TypeIid>,
) -> (Vec<u8>, Vec<u8>) {
    let mut out = edge_prefix(from.as_bytes(), kind.infix(Direction::Out));
    out.extend_from_slice(to.as_bytes());
    let mut back = edge_prefix(to.as_bytes(), kind.infix(Direction::In));
    back.extend_from_slice(from.as_bytes());
    if let Some(role) = role_type {
        out.extend_from_slice(role.as_bytes());
        back.extend_from_slice(role.as_bytes());
    }
    (out, back)
}

/// Parses the far end of a type edge key found under `prefix_len` bytes.
pub fn parse_type_edge(key: &[u8], prefix_len: usize) -> Result<TypeIid> {
    if key.len() != prefix_len + TypeIid::LENGTH {
        return Err(GraphError::Corruption("type edge key has the wrong length"));
    }
    TypeIid::extract(key, prefix_len)
}

/// Parses the far end (and role tail) of a thing edge key found under
/// `prefix_len` bytes.
pub fn parse_thing_edge(
    key: &[u8],
    prefix_len: usize,
    kind: ThingEdge,
) -> Result<(ThingIid, Option<TypeIid>)> {
    let (other, len) = ThingIid::extract(key, prefix_len)?;
    let end = prefix_len + len;
    let tail = if kind.is_optimisation() {
        let role = TypeIid::extract(key, end)?;
        if key.len() != end + TypeIid::LENGTH {
            return Err(GraphError::Corruption("role player key has the wrong length"));
        }
        Some(role)
    } else {
        if key.len() != end {
            return Err(GraphError::Corruption("thing edge key has the wrong length"));
        }
        None
    };
    Ok((other, tail))
}
