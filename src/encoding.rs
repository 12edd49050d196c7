//! Byte-level vocabulary of the key layout: vertex kind prefixes, property
//! and edge infixes, value types.
//!
//! Every persisted key is a concatenation of self-describing fixed-width
//! segments; the constants here are the single source of truth for those
//! segment bytes. Storage ordering is plain lexicographic, so the numeric
//! choice of each byte decides iteration order between key families.

use smallvec::SmallVec;

use crate::error::{Result, UmbraError};

pub const TYPE_IID_LENGTH: usize = 3;
pub const THING_KEY_LENGTH: usize = 8;

/// Direction of an edge view relative to the vertex that owns the adjacency.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Direction {
    Out,
    In,
}

impl Direction {
    pub fn is_out(self) -> bool {
        matches!(self, Direction::Out)
    }
}

const PREFIX_ENTITY_TYPE: u8 = 0x21;
const PREFIX_RELATION_TYPE: u8 = 0x22;
const PREFIX_ROLE_TYPE: u8 = 0x23;
const PREFIX_ATTRIBUTE_TYPE: u8 = 0x24;
const PREFIX_ENTITY: u8 = 0x41;
const PREFIX_RELATION: u8 = 0x42;
const PREFIX_ROLE: u8 = 0x43;
const PREFIX_ATTRIBUTE: u8 = 0x44;
const PREFIX_TYPE_INDEX: u8 = 0x61;

/// Leading byte of a vertex or index key.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Prefix {
    EntityType,
    RelationType,
    RoleType,
    AttributeType,
    Entity,
    Relation,
    Role,
    Attribute,
    TypeIndex,
}

impl Prefix {
    pub fn into_u8(self) -> u8 {
        match self {
            Prefix::EntityType => PREFIX_ENTITY_TYPE,
            Prefix::RelationType => PREFIX_RELATION_TYPE,
            Prefix::RoleType => PREFIX_ROLE_TYPE,
            Prefix::AttributeType => PREFIX_ATTRIBUTE_TYPE,
            Prefix::Entity => PREFIX_ENTITY,
            Prefix::Relation => PREFIX_RELATION,
            Prefix::Role => PREFIX_ROLE,
            Prefix::Attribute => PREFIX_ATTRIBUTE,
            Prefix::TypeIndex => PREFIX_TYPE_INDEX,
        }
    }

    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            PREFIX_ENTITY_TYPE => Some(Prefix::EntityType),
            PREFIX_RELATION_TYPE => Some(Prefix::RelationType),
            PREFIX_ROLE_TYPE => Some(Prefix::RoleType),
            PREFIX_ATTRIBUTE_TYPE => Some(Prefix::AttributeType),
            PREFIX_ENTITY => Some(Prefix::Entity),
            PREFIX_RELATION => Some(Prefix::Relation),
            PREFIX_ROLE => Some(Prefix::Role),
            PREFIX_ATTRIBUTE => Some(Prefix::Attribute),
            PREFIX_TYPE_INDEX => Some(Prefix::TypeIndex),
            _ => None,
        }
    }

    pub fn is_type(self) -> bool {
        matches!(
            self,
            Prefix::EntityType | Prefix::RelationType | Prefix::RoleType | Prefix::AttributeType
        )
    }

    pub fn is_thing(self) -> bool {
        matches!(
            self,
            Prefix::Entity | Prefix::Relation | Prefix::Role | Prefix::Attribute
        )
    }

    /// The thing prefix for instances of a type with this prefix.
    pub fn instance(self) -> Prefix {
        match self {
            Prefix::EntityType => Prefix::Entity,
            Prefix::RelationType => Prefix::Relation,
            Prefix::RoleType => Prefix::Role,
            Prefix::AttributeType => Prefix::Attribute,
            other => other,
        }
    }
}

const INFIX_PROPERTY_LABEL: u8 = 0xA0;
const INFIX_PROPERTY_SCOPE: u8 = 0xA1;
const INFIX_PROPERTY_ABSTRACT: u8 = 0xA2;
const INFIX_PROPERTY_VALUE_TYPE: u8 = 0xA3;
const INFIX_PROPERTY_REGEX: u8 = 0xA4;

/// Infix byte selecting one property key under a type vertex IID.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PropertyInfix {
    Label,
    Scope,
    Abstract,
    ValueType,
    Regex,
}

impl PropertyInfix {
    pub fn into_u8(self) -> u8 {
        match self {
            PropertyInfix::Label => INFIX_PROPERTY_LABEL,
            PropertyInfix::Scope => INFIX_PROPERTY_SCOPE,
            PropertyInfix::Abstract => INFIX_PROPERTY_ABSTRACT,
            PropertyInfix::ValueType => INFIX_PROPERTY_VALUE_TYPE,
            PropertyInfix::Regex => INFIX_PROPERTY_REGEX,
        }
    }
}

const INFIX_SUB_FORWARD: u8 = 0x30;
const INFIX_SUB_BACKWARD: u8 = 0x31;
const INFIX_OWNS_FORWARD: u8 = 0x32;
const INFIX_OWNS_BACKWARD: u8 = 0x33;
const INFIX_PLAYS_FORWARD: u8 = 0x34;
const INFIX_PLAYS_BACKWARD: u8 = 0x35;
const INFIX_RELATES_FORWARD: u8 = 0x36;
const INFIX_RELATES_BACKWARD: u8 = 0x37;

/// Edge kinds between type vertices.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum TypeEncoding {
    Sub,
    Owns,
    Plays,
    Relates,
}

impl TypeEncoding {
    pub const ALL: [TypeEncoding; 4] = [
        TypeEncoding::Sub,
        TypeEncoding::Owns,
        TypeEncoding::Plays,
        TypeEncoding::Relates,
    ];

    pub fn infix(self, direction: Direction) -> u8 {
        match (self, direction) {
            (TypeEncoding::Sub, Direction::Out) => INFIX_SUB_FORWARD,
            (TypeEncoding::Sub, Direction::In) => INFIX_SUB_BACKWARD,
            (TypeEncoding::Owns, Direction::Out) => INFIX_OWNS_FORWARD,
            (TypeEncoding::Owns, Direction::In) => INFIX_OWNS_BACKWARD,
            (TypeEncoding::Plays, Direction::Out) => INFIX_PLAYS_FORWARD,
            (TypeEncoding::Plays, Direction::In) => INFIX_PLAYS_BACKWARD,
            (TypeEncoding::Relates, Direction::Out) => INFIX_RELATES_FORWARD,
            (TypeEncoding::Relates, Direction::In) => INFIX_RELATES_BACKWARD,
        }
    }

    pub fn from_infix(byte: u8) -> Option<(Self, Direction)> {
        match byte {
            INFIX_SUB_FORWARD => Some((TypeEncoding::Sub, Direction::Out)),
            INFIX_SUB_BACKWARD => Some((TypeEncoding::Sub, Direction::In)),
            INFIX_OWNS_FORWARD => Some((TypeEncoding::Owns, Direction::Out)),
            INFIX_OWNS_BACKWARD => Some((TypeEncoding::Owns, Direction::In)),
            INFIX_PLAYS_FORWARD => Some((TypeEncoding::Plays, Direction::Out)),
            INFIX_PLAYS_BACKWARD => Some((TypeEncoding::Plays, Direction::In)),
            INFIX_RELATES_FORWARD => Some((TypeEncoding::Relates, Direction::Out)),
            INFIX_RELATES_BACKWARD => Some((TypeEncoding::Relates, Direction::In)),
            _ => None,
        }
    }
}

const INFIX_HAS_FORWARD: u8 = 0x50;
const INFIX_HAS_BACKWARD: u8 = 0x51;
const INFIX_RELATING_FORWARD: u8 = 0x52;
const INFIX_RELATING_BACKWARD: u8 = 0x53;
const INFIX_PLAYING_FORWARD: u8 = 0x54;
const INFIX_PLAYING_BACKWARD: u8 = 0x55;
const INFIX_ROLEPLAYER_FORWARD: u8 = 0x56;
const INFIX_ROLEPLAYER_BACKWARD: u8 = 0x57;

/// Edge kinds between thing vertices.
///
/// `RolePlayer` is the optimised encoding: its views carry the role-instance
/// key as a suffix and its lookahead chain is one segment longer.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum ThingEncoding {
    Has,
    Relating,
    Playing,
    RolePlayer,
}

impl ThingEncoding {
    pub const ALL: [ThingEncoding; 4] = [
        ThingEncoding::Has,
        ThingEncoding::Relating,
        ThingEncoding::Playing,
        ThingEncoding::RolePlayer,
    ];

    pub fn infix(self, direction: Direction) -> u8 {
        match (self, direction) {
            (ThingEncoding::Has, Direction::Out) => INFIX_HAS_FORWARD,
            (ThingEncoding::Has, Direction::In) => INFIX_HAS_BACKWARD,
            (ThingEncoding::Relating, Direction::Out) => INFIX_RELATING_FORWARD,
            (ThingEncoding::Relating, Direction::In) => INFIX_RELATING_BACKWARD,
            (ThingEncoding::Playing, Direction::Out) => INFIX_PLAYING_FORWARD,
            (ThingEncoding::Playing, Direction::In) => INFIX_PLAYING_BACKWARD,
            (ThingEncoding::RolePlayer, Direction::Out) => INFIX_ROLEPLAYER_FORWARD,
            (ThingEncoding::RolePlayer, Direction::In) => INFIX_ROLEPLAYER_BACKWARD,
        }
    }

    pub fn from_infix(byte: u8) -> Option<(Self, Direction)> {
        match byte {
            INFIX_HAS_FORWARD => Some((ThingEncoding::Has, Direction::Out)),
            INFIX_HAS_BACKWARD => Some((ThingEncoding::Has, Direction::In)),
            INFIX_RELATING_FORWARD => Some((ThingEncoding::Relating, Direction::Out)),
            INFIX_RELATING_BACKWARD => Some((ThingEncoding::Relating, Direction::In)),
            INFIX_PLAYING_FORWARD => Some((ThingEncoding::Playing, Direction::Out)),
            INFIX_PLAYING_BACKWARD => Some((ThingEncoding::Playing, Direction::In)),
            INFIX_ROLEPLAYER_FORWARD => Some((ThingEncoding::RolePlayer, Direction::Out)),
            INFIX_ROLEPLAYER_BACKWARD => Some((ThingEncoding::RolePlayer, Direction::In)),
            _ => None,
        }
    }

    pub fn is_optimised(self) -> bool {
        matches!(self, ThingEncoding::RolePlayer)
    }

    /// Number of lookahead segments writers record for this encoding. Readers
    /// asking with fewer walk the infix extension index; asking with more is
    /// a programmer error.
    pub fn lookahead(self) -> usize {
        match self {
            ThingEncoding::RolePlayer => 3,
            _ => 2,
        }
    }
}

const VALUE_TYPE_BOOLEAN: u8 = 0x01;
const VALUE_TYPE_LONG: u8 = 0x02;
const VALUE_TYPE_DOUBLE: u8 = 0x03;
const VALUE_TYPE_STRING: u8 = 0x04;

/// Declared value type of an attribute type vertex.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ValueType {
    Boolean,
    Long,
    Double,
    String,
}

impl ValueType {
    pub fn into_u8(self) -> u8 {
        match self {
            ValueType::Boolean => VALUE_TYPE_BOOLEAN,
            ValueType::Long => VALUE_TYPE_LONG,
            ValueType::Double => VALUE_TYPE_DOUBLE,
            ValueType::String => VALUE_TYPE_STRING,
        }
    }

    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            VALUE_TYPE_BOOLEAN => Some(ValueType::Boolean),
            VALUE_TYPE_LONG => Some(ValueType::Long),
            VALUE_TYPE_DOUBLE => Some(ValueType::Double),
            VALUE_TYPE_STRING => Some(ValueType::String),
            _ => None,
        }
    }
}

/// An attribute value. Attribute vertices are content-addressed: the value's
/// byte encoding is embedded in the vertex IID, so equal values of the same
/// type collapse to one vertex.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Boolean(bool),
    Long(i64),
    Double(f64),
    String(String),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Boolean(_) => ValueType::Boolean,
            Value::Long(_) => ValueType::Long,
            Value::Double(_) => ValueType::Double,
            Value::String(_) => ValueType::String,
        }
    }

    /// Encodes the value so that lexicographic byte order matches value order
    /// within one value type.
    pub fn encode(&self) -> SmallVec<[u8; 16]> {
        let mut buf = SmallVec::new();
        match self {
            Value::Boolean(v) => buf.push(u8::from(*v)),
            Value::Long(v) => {
                // flip the sign bit so negatives sort before positives
                buf.extend_from_slice(&((*v as u64) ^ (1 << 63)).to_be_bytes());
            }
            Value::Double(v) => {
                let bits = v.to_bits();
                let ordered = if bits >> 63 == 1 { !bits } else { bits ^ (1 << 63) };
                buf.extend_from_slice(&ordered.to_be_bytes());
            }
            Value::String(v) => buf.extend_from_slice(v.as_bytes()),
        }
        buf
    }

    pub fn decode(value_type: ValueType, bytes: &[u8]) -> Result<Value> {
        match value_type {
            ValueType::Boolean => match bytes {
                [0] => Ok(Value::Boolean(false)),
                [1] => Ok(Value::Boolean(true)),
                _ => Err(UmbraError::Corruption("boolean value bytes")),
            },
            ValueType::Long => {
                let arr: [u8; 8] = bytes
                    .try_into()
                    .map_err(|_| UmbraError::Corruption("long value bytes"))?;
                Ok(Value::Long((u64::from_be_bytes(arr) ^ (1 << 63)) as i64))
            }
            ValueType::Double => {
                let arr: [u8; 8] = bytes
                    .try_into()
                    .map_err(|_| UmbraError::Corruption("double value bytes"))?;
                let ordered = u64::from_be_bytes(arr);
                let bits = if ordered >> 63 == 0 { !ordered } else { ordered ^ (1 << 63) };
                Ok(Value::Double(f64::from_bits(bits)))
            }
            ValueType::String => {
                let s = std::str::from_utf8(bytes)
                    .map_err(|_| UmbraError::Corruption("string value bytes"))?;
                Ok(Value::String(s.to_owned()))
            }
        }
    }

    /// Total order within one value type; values of different types are
    /// incomparable and return `None`.
    pub fn partial_cmp_typed(&self, other: &Value) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::Long(a), Value::Long(b)) => Some(a.cmp(b)),
            (Value::Double(a), Value::Double(b)) => Some(a.total_cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_encoding_preserves_order() {
        let values = [i64::MIN, -7, -1, 0, 1, 42, i64::MAX];
        let encoded: Vec<_> = values.iter().map(|v| Value::Long(*v).encode()).collect();
        for pair in encoded.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn double_encoding_preserves_order() {
        let values = [f64::NEG_INFINITY, -2.5, -0.0, 0.0, 1.5, f64::INFINITY];
        let encoded: Vec<_> = values.iter().map(|v| Value::Double(*v).encode()).collect();
        for pair in encoded.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
    }

    #[test]
    fn value_roundtrip() {
        for value in [
            Value::Boolean(true),
            Value::Long(-99),
            Value::Double(3.25),
            Value::String("umbra".to_owned()),
        ] {
            let decoded = Value::decode(value.value_type(), &value.encode()).unwrap();
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn infix_roundtrip() {
        for encoding in ThingEncoding::ALL {
            for direction in [Direction::Out, Direction::In] {
                let infix = encoding.infix(direction);
                assert_eq!(ThingEncoding::from_infix(infix), Some((encoding, direction)));
            }
        }
        for encoding in TypeEncoding::ALL {
            for direction in [Direction::Out, Direction::In] {
                let infix = encoding.infix(direction);
                assert_eq!(TypeEncoding::from_infix(infix), Some((encoding, direction)));
            }
        }
    }
}
