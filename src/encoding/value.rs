//! Attribute values and their order-preserving byte form.
//!
//! The encoded value is embedded in the attribute IID, so two attributes of
//! the same type with equal values always share one vertex.

use std::fmt;

use time::{OffsetDateTime, PrimitiveDateTime};

use super::ValueType;
use crate::error::{GraphError, Result};
use crate::primitives::bytes::ord;

/// Largest encodable string, in UTF-8 bytes.
pub const STRING_MAX_SIZE: usize = u16::MAX as usize;

const STRING_LEN_BYTES: usize = 2;

/// A concrete attribute value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// Boolean value.
    Boolean(bool),
    /// Signed 64-bit integer.
    Long(i64),
    /// Double; NaN is rejected at encode time.
    Double(f64),
    /// UTF-8 string of at most [`STRING_MAX_SIZE`] bytes.
    String(String),
    /// Date and time, interpreted as UTC and stored at millisecond precision.
    DateTime(PrimitiveDateTime),
}

impl Value {
    /// Value type this value belongs to.
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Boolean(_) => ValueType::Boolean,
            Value::Long(_) => ValueType::Long,
            Value::Double(_) => ValueType::Double,
            Value::String(_) => ValueType::String,
            Value::DateTime(_) => ValueType::DateTime,
        }
    }

    /// Appends the encoded value to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        match self {
            Value::Boolean(v) => out.push(u8::from(*v)),
            Value::Long(v) => out.extend_from_slice(&ord::encode_i64(*v)),
            // -0.0 == 0.0, so both must map to one attribute IID
            Value::Double(v) if *v == 0.0 => out.extend_from_slice(&ord::encode_f64(0.0)?),
            Value::Double(v) => out.extend_from_slice(&ord::encode_f64(*v)?),
            Value::String(s) => {
                if s.len() > STRING_MAX_SIZE {
                    return Err(GraphError::IllegalValueSize {
                        size: s.len(),
                        max: STRING_MAX_SIZE,
                    });
                }
                out.extend_from_slice(&(s.len() as u16).to_be_bytes());
                out.extend_from_slice(s.as_bytes());
            }
            Value::DateTime(dt) => out.extend_from_slice(&ord::encode_i64(datetime_millis(*dt)?)),
        }
        Ok(())
    }

    /// Decodes a value of `value_type` from the front of `src`, returning it
    /// with the number of bytes consumed.
    pub fn decode(value_type: ValueType, src: &[u8]) -> Result<(Value, usize)> {
        match value_type {
            ValueType::Object => Err(GraphError::Corruption("object values have no encoding")),
            ValueType::Boolean => match src.first() {
                Some(0) => Ok((Value::Boolean(false), 1)),
                Some(1) => Ok((Value::Boolean(true), 1)),
                _ => Err(GraphError::Corruption("invalid boolean value")),
            },
            ValueType::Long => Ok((Value::Long(ord::decode_i64(src)?), 8)),
            ValueType::Double => Ok((Value::Double(ord::decode_f64(src)?), 8)),
            ValueType::String => {
                let len = encoded_len(ValueType::String, src)?;
                let body = &src[STRING_LEN_BYTES..len];
                let s = std::str::from_utf8(body)
                    .map_err(|_| GraphError::Corruption("string value is not utf-8"))?;
                Ok((Value::String(s.to_owned()), len))
            }
            ValueType::DateTime => {
                let millis = ord::decode_i64(src)?;
                Ok((Value::DateTime(datetime_from_millis(millis)?), 8))
            }
        }
    }

    /// Returns the contained string, if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Length of the encoded value of `value_type` at the front of `src`.
pub(crate) fn encoded_len(value_type: ValueType, src: &[u8]) -> Result<usize> {
    let len = match value_type {
        ValueType::Object => return Err(GraphError::Corruption("object values have no encoding")),
        ValueType::Boolean => 1,
        ValueType::Long | ValueType::Double | ValueType::DateTime => 8,
        ValueType::String => {
            let head = src
                .get(..STRING_LEN_BYTES)
                .ok_or(GraphError::Corruption("string length prefix truncated"))?;
            STRING_LEN_BYTES + u16::from_be_bytes([head[0], head[1]]) as usize
        }
    };
    if src.len() < len {
        return Err(GraphError::Corruption("attribute value truncated"));
    }
    Ok(len)
}

fn datetime_millis(dt: PrimitiveDateTime) -> Result<i64> {
    let millis = dt.assume_utc().unix_timestamp_nanos() / 1_000_000;
    i64::try_from(millis).map_err(|_| GraphError::invalid("datetime outside the encodable range"))
}

fn datetime_from_millis(millis: i64) -> Result<PrimitiveDateTime> {
    let utc = OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .map_err(|_| GraphError::Corruption("datetime value out of range"))?;
    Ok(PrimitiveDateTime::new(utc.date(), utc.time()))
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(v) => write!(f, "{v}"),
            Value::Long(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::DateTime(dt) => write!(f, "{dt}"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<PrimitiveDateTime> for Value {
    fn from(v: PrimitiveDateTime) -> Self {
        Value::DateTime(v)
    }
}
