//! Composite byte identifiers.
//!
//! A vertex IID is `prefix | type segment [| instance segment]`; an edge view
//! IID is `owner | infix | adjacent [| suffix]`. IIDs are immutable byte
//! strings compared lexicographically; that comparison is the only iteration
//! order in the system.

use std::fmt;

use smallvec::SmallVec;

use crate::encoding::{
    Direction, Prefix, PropertyInfix, ThingEncoding, TypeEncoding, Value, ValueType,
    THING_KEY_LENGTH, TYPE_IID_LENGTH,
};
use crate::error::{Result, UmbraError};

/// Short immutable byte string. Vertex and edge-view IIDs fit inline in the
/// common case.
pub type Bytes = SmallVec<[u8; 24]>;

pub fn bytes_of(slice: &[u8]) -> Bytes {
    SmallVec::from_slice(slice)
}

/// IID of a type vertex: `prefix (1) | short id (2, big-endian)`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeIid([u8; TYPE_IID_LENGTH]);

impl TypeIid {
    pub fn new(prefix: Prefix, short_id: u16) -> Self {
        debug_assert!(prefix.is_type());
        let id = short_id.to_be_bytes();
        Self([prefix.into_u8(), id[0], id[1]])
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; TYPE_IID_LENGTH] = bytes
            .try_into()
            .map_err(|_| UmbraError::Corruption("type IID length"))?;
        match Prefix::from_u8(arr[0]) {
            Some(p) if p.is_type() => Ok(Self(arr)),
            _ => Err(UmbraError::Corruption("type IID prefix")),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn prefix(&self) -> Prefix {
        Prefix::from_u8(self.0[0]).expect("validated at construction")
    }

    pub fn short_id(&self) -> u16 {
        u16::from_be_bytes([self.0[1], self.0[2]])
    }
}

impl fmt::Debug for TypeIid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeIid({:02x?})", self.0)
    }
}

/// IID of a thing vertex.
///
/// Entities, relations and roles are `prefix (1) | type IID (3) | key (8)`.
/// Attributes are content-addressed: `prefix (1) | type IID (3) | value-type
/// byte (1) | value bytes`, where string values carry a leading length byte so
/// the family stays prefix-free.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThingIid(Bytes);

impl ThingIid {
    pub fn new(type_iid: TypeIid, key: u64) -> Self {
        let mut buf = Bytes::new();
        buf.push(type_iid.prefix().instance().into_u8());
        buf.extend_from_slice(type_iid.bytes());
        buf.extend_from_slice(&key.to_be_bytes());
        Self(buf)
    }

    pub fn attribute(type_iid: TypeIid, value: &Value) -> Result<Self> {
        debug_assert_eq!(type_iid.prefix(), Prefix::AttributeType);
        let mut buf = Bytes::new();
        buf.push(Prefix::Attribute.into_u8());
        buf.extend_from_slice(type_iid.bytes());
        buf.push(value.value_type().into_u8());
        let encoded = value.encode();
        if let Value::String(_) = value {
            if encoded.len() > u8::MAX as usize {
                return Err(UmbraError::InvalidArgument(format!(
                    "string attribute value exceeds {} bytes",
                    u8::MAX
                )));
            }
            buf.push(encoded.len() as u8);
        }
        buf.extend_from_slice(&encoded);
        Ok(Self(buf))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 1 + TYPE_IID_LENGTH + 1 {
            return Err(UmbraError::Corruption("thing IID truncated"));
        }
        match Prefix::from_u8(bytes[0]) {
            Some(p) if p.is_thing() => {}
            _ => return Err(UmbraError::Corruption("thing IID prefix")),
        }
        TypeIid::from_bytes(&bytes[1..1 + TYPE_IID_LENGTH])?;
        Ok(Self(bytes_of(bytes)))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn prefix(&self) -> Prefix {
        Prefix::from_u8(self.0[0]).expect("validated at construction")
    }

    pub fn type_iid(&self) -> TypeIid {
        TypeIid::from_bytes(&self.0[1..1 + TYPE_IID_LENGTH]).expect("validated at construction")
    }

    /// The instance segment: everything after the prefix and type segments.
    pub fn key(&self) -> &[u8] {
        &self.0[1 + TYPE_IID_LENGTH..]
    }

    pub fn is_attribute(&self) -> bool {
        self.prefix() == Prefix::Attribute
    }

    /// Total length of the thing IID at the start of `bytes`, computed from
    /// its own segments. Distinguishes a vertex existence key from the edge
    /// and property keys that share its prefix.
    pub fn leading_length(bytes: &[u8]) -> Result<usize> {
        if bytes.len() < 1 + TYPE_IID_LENGTH + 1 {
            return Err(UmbraError::Corruption("thing IID truncated"));
        }
        match Prefix::from_u8(bytes[0]) {
            Some(Prefix::Attribute) => {
                let value_type = ValueType::from_u8(bytes[1 + TYPE_IID_LENGTH])
                    .ok_or(UmbraError::Corruption("attribute value-type byte"))?;
                Ok(match value_type {
                    ValueType::Boolean => 1 + TYPE_IID_LENGTH + 1 + 1,
                    ValueType::Long | ValueType::Double => 1 + TYPE_IID_LENGTH + 1 + 8,
                    ValueType::String => {
                        let len_at = 1 + TYPE_IID_LENGTH + 1;
                        if bytes.len() <= len_at {
                            return Err(UmbraError::Corruption("attribute string length"));
                        }
                        len_at + 1 + bytes[len_at] as usize
                    }
                })
            }
            Some(p) if p.is_thing() => Ok(1 + TYPE_IID_LENGTH + THING_KEY_LENGTH),
            _ => Err(UmbraError::Corruption("thing IID prefix")),
        }
    }

    /// Decodes the value embedded in an attribute IID; `None` for other kinds.
    pub fn value(&self) -> Result<Option<Value>> {
        if !self.is_attribute() {
            return Ok(None);
        }
        let key = self.key();
        let value_type = ValueType::from_u8(key[0])
            .ok_or(UmbraError::Corruption("attribute value-type byte"))?;
        let payload = match value_type {
            ValueType::String => {
                if key.len() < 2 || key.len() != 2 + key[1] as usize {
                    return Err(UmbraError::Corruption("attribute string length"));
                }
                &key[2..]
            }
            _ => &key[1..],
        };
        Value::decode(value_type, payload).map(Some)
    }
}

impl fmt::Debug for ThingIid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ThingIid({:02x?})", &self.0[..])
    }
}

/// One lookahead segment: a component of an adjacent identifier used to
/// bucket buffered edges and to extend persisted scan prefixes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Lookahead {
    Prefix(Prefix),
    Type(TypeIid),
}

impl Lookahead {
    fn push_onto(&self, buf: &mut Bytes) {
        match self {
            Lookahead::Prefix(p) => buf.push(p.into_u8()),
            Lookahead::Type(t) => buf.extend_from_slice(t.bytes()),
        }
    }
}

pub type LookaheadChain = SmallVec<[Lookahead; 3]>;

/// Lookahead chain for the tail of a base edge: the components of the
/// adjacent IID that precede its instance segment.
pub fn base_tail(adjacent: &ThingIid) -> LookaheadChain {
    let mut chain = LookaheadChain::new();
    chain.push(Lookahead::Prefix(adjacent.prefix()));
    chain.push(Lookahead::Type(adjacent.type_iid()));
    chain
}

/// Lookahead chain for the tail of a role-player edge: the role type, then
/// the adjacent IID components.
pub fn optimised_tail(role_type: TypeIid, adjacent: &ThingIid) -> LookaheadChain {
    let mut chain = LookaheadChain::new();
    chain.push(Lookahead::Type(role_type));
    chain.push(Lookahead::Prefix(adjacent.prefix()));
    chain.push(Lookahead::Type(adjacent.type_iid()));
    chain
}

/// Infix IID: the directed infix byte followed by a (possibly partial)
/// lookahead chain. Keys the buffered-edge buckets.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InfixIid(Bytes);

impl InfixIid {
    pub fn new(infix: u8, chain: &[Lookahead]) -> Self {
        let mut buf = Bytes::new();
        buf.push(infix);
        for segment in chain {
            segment.push_onto(&mut buf);
        }
        Self(buf)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn infix_byte(&self) -> u8 {
        self.0[0]
    }
}

impl fmt::Debug for InfixIid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InfixIid({:02x?})", &self.0[..])
    }
}

/// One directional key of an edge. Forward and backward views of the same
/// logical edge have distinct bytes because the infix encodes direction.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeViewIid(Bytes);

impl EdgeViewIid {
    pub fn base_thing(owner: &ThingIid, infix: u8, adjacent: &ThingIid) -> Self {
        let mut buf = Bytes::new();
        buf.extend_from_slice(owner.bytes());
        buf.push(infix);
        buf.extend_from_slice(adjacent.bytes());
        Self(buf)
    }

    pub fn optimised_thing(
        owner: &ThingIid,
        infix: u8,
        role_type: TypeIid,
        adjacent: &ThingIid,
        role_key: &[u8],
    ) -> Self {
        debug_assert_eq!(role_key.len(), THING_KEY_LENGTH);
        let mut buf = Bytes::new();
        buf.extend_from_slice(owner.bytes());
        buf.push(infix);
        buf.extend_from_slice(role_type.bytes());
        buf.extend_from_slice(adjacent.bytes());
        buf.extend_from_slice(role_key);
        Self(buf)
    }

    pub fn type_edge(owner: TypeIid, infix: u8, adjacent: TypeIid) -> Self {
        let mut buf = Bytes::new();
        buf.extend_from_slice(owner.bytes());
        buf.push(infix);
        buf.extend_from_slice(adjacent.bytes());
        Self(buf)
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(bytes_of(bytes))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    /// Decomposes a thing-edge view key scanned under `owner`'s prefix.
    pub fn decode_thing(&self, owner: &ThingIid) -> Result<DecodedThingView> {
        let rest = self
            .0
            .strip_prefix(owner.bytes())
            .ok_or(UmbraError::Corruption("edge view owner segment"))?;
        let (&infix, rest) = rest
            .split_first()
            .ok_or(UmbraError::Corruption("edge view infix"))?;
        let (encoding, direction) =
            ThingEncoding::from_infix(infix).ok_or(UmbraError::Corruption("edge view infix"))?;
        if encoding.is_optimised() {
            if rest.len() < TYPE_IID_LENGTH + THING_KEY_LENGTH {
                return Err(UmbraError::Corruption("optimised edge view truncated"));
            }
            let role_type = TypeIid::from_bytes(&rest[..TYPE_IID_LENGTH])?;
            let rest = &rest[TYPE_IID_LENGTH..];
            let (adjacent, suffix) = rest.split_at(rest.len() - THING_KEY_LENGTH);
            Ok(DecodedThingView {
                encoding,
                direction,
                adjacent: ThingIid::from_bytes(adjacent)?,
                role_type: Some(role_type),
                role_key: Some(bytes_of(suffix)),
            })
        } else {
            Ok(DecodedThingView {
                encoding,
                direction,
                adjacent: ThingIid::from_bytes(rest)?,
                role_type: None,
                role_key: None,
            })
        }
    }

    /// Decomposes a type-edge view key scanned under `owner`'s prefix.
    pub fn decode_type(&self, owner: TypeIid) -> Result<(TypeEncoding, Direction, TypeIid)> {
        let rest = self
            .0
            .strip_prefix(owner.bytes())
            .ok_or(UmbraError::Corruption("edge view owner segment"))?;
        let (&infix, rest) = rest
            .split_first()
            .ok_or(UmbraError::Corruption("edge view infix"))?;
        let (encoding, direction) =
            TypeEncoding::from_infix(infix).ok_or(UmbraError::Corruption("edge view infix"))?;
        Ok((encoding, direction, TypeIid::from_bytes(rest)?))
    }
}

impl fmt::Debug for EdgeViewIid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EdgeViewIid({:02x?})", &self.0[..])
    }
}

/// Fields of a thing-edge view key, as read back from storage.
#[derive(Clone, Debug)]
pub struct DecodedThingView {
    pub encoding: ThingEncoding,
    pub direction: Direction,
    pub adjacent: ThingIid,
    pub role_type: Option<TypeIid>,
    pub role_key: Option<Bytes>,
}

/// Scan prefix for edge views: `owner | infix [| lookahead bytes]`. Lookahead
/// segments are prefixes of the adjacent IID (after the role type, for
/// optimised encodings), so extending the scan key narrows the range.
pub fn edge_scan_prefix(owner: &[u8], infix: &InfixIid) -> Bytes {
    let mut buf = bytes_of(owner);
    buf.extend_from_slice(infix.bytes());
    buf
}

/// Key of one property of a type vertex.
pub fn property_key(type_iid: TypeIid, property: PropertyInfix) -> Bytes {
    let mut buf = bytes_of(type_iid.bytes());
    buf.push(property.into_u8());
    buf
}

/// Secondary-index key mapping a scoped label to a type IID.
pub fn type_index_key(scoped_label: &str) -> Bytes {
    let mut buf = Bytes::new();
    buf.push(Prefix::TypeIndex.into_u8());
    buf.extend_from_slice(scoped_label.as_bytes());
    buf
}

/// Scan prefix over all instances of one type.
pub fn thing_scan_prefix(type_iid: TypeIid) -> Bytes {
    let mut buf = Bytes::new();
    buf.push(type_iid.prefix().instance().into_u8());
    buf.extend_from_slice(type_iid.bytes());
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity_type(id: u16) -> TypeIid {
        TypeIid::new(Prefix::EntityType, id)
    }

    #[test]
    fn thing_iid_segments() {
        let person = entity_type(7);
        let iid = ThingIid::new(person, 42);
        assert_eq!(iid.prefix(), Prefix::Entity);
        assert_eq!(iid.type_iid(), person);
        assert_eq!(iid.key(), &42u64.to_be_bytes()[..]);
    }

    #[test]
    fn attribute_iid_content_addressed() {
        let name = TypeIid::new(Prefix::AttributeType, 3);
        let a = ThingIid::attribute(name, &Value::String("Smith".into())).unwrap();
        let b = ThingIid::attribute(name, &Value::String("Smith".into())).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.value().unwrap(), Some(Value::String("Smith".into())));
    }

    #[test]
    fn string_attribute_family_is_prefix_free() {
        let name = TypeIid::new(Prefix::AttributeType, 3);
        let short = ThingIid::attribute(name, &Value::String("ab".into())).unwrap();
        let long = ThingIid::attribute(name, &Value::String("abc".into())).unwrap();
        assert!(!long.bytes().starts_with(short.bytes()));
    }

    #[test]
    fn view_iid_roundtrip_base() {
        let person = entity_type(1);
        let name = TypeIid::new(Prefix::AttributeType, 2);
        let owner = ThingIid::new(person, 9);
        let attr = ThingIid::attribute(name, &Value::Long(5)).unwrap();
        let infix = ThingEncoding::Has.infix(Direction::Out);
        let view = EdgeViewIid::base_thing(&owner, infix, &attr);
        let decoded = view.decode_thing(&owner).unwrap();
        assert_eq!(decoded.encoding, ThingEncoding::Has);
        assert_eq!(decoded.direction, Direction::Out);
        assert_eq!(decoded.adjacent, attr);
        assert!(decoded.role_type.is_none());
    }

    #[test]
    fn view_iid_roundtrip_optimised() {
        let relation_type = TypeIid::new(Prefix::RelationType, 1);
        let role_type = TypeIid::new(Prefix::RoleType, 2);
        let person = entity_type(3);
        let relation = ThingIid::new(relation_type, 1);
        let player = ThingIid::new(person, 2);
        let role = ThingIid::new(role_type, 77);
        let infix = ThingEncoding::RolePlayer.infix(Direction::Out);
        let view = EdgeViewIid::optimised_thing(&relation, infix, role_type, &player, role.key());
        let decoded = view.decode_thing(&relation).unwrap();
        assert_eq!(decoded.encoding, ThingEncoding::RolePlayer);
        assert_eq!(decoded.role_type, Some(role_type));
        assert_eq!(decoded.adjacent, player);
        assert_eq!(decoded.role_key.as_deref(), Some(role.key()));
    }

    #[test]
    fn lookahead_extends_scan_prefix() {
        let relation_type = TypeIid::new(Prefix::RelationType, 1);
        let role_type = TypeIid::new(Prefix::RoleType, 2);
        let person = entity_type(3);
        let relation = ThingIid::new(relation_type, 1);
        let player = ThingIid::new(person, 2);
        let role = ThingIid::new(role_type, 8);
        let infix_byte = ThingEncoding::RolePlayer.infix(Direction::Out);

        let shallow = InfixIid::new(infix_byte, &[Lookahead::Type(role_type)]);
        let deep = InfixIid::new(infix_byte, &optimised_tail(role_type, &player));
        let view = EdgeViewIid::optimised_thing(&relation, infix_byte, role_type, &player, role.key());

        let shallow_prefix = edge_scan_prefix(relation.bytes(), &shallow);
        let deep_prefix = edge_scan_prefix(relation.bytes(), &deep);
        assert!(view.bytes().starts_with(&shallow_prefix));
        assert!(view.bytes().starts_with(&deep_prefix));
        assert!(deep_prefix.starts_with(&shallow_prefix));
    }
}
