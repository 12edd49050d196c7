//! Typed directed edges.
//!
//! Every edge has two directional views: the forward view keyed under the
//! from-vertex and the backward view keyed under the to-vertex. Both views
//! are written on commit and both are removed on delete, so the mirrored
//! adjacency registration stays consistent with storage.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::encoding::{Direction, Prefix, ThingEncoding, TypeEncoding};
use crate::error::Result;
use crate::iid::{Bytes, EdgeViewIid, ThingIid, TypeIid};
use crate::storage::Storage;

/// Lifecycle of a vertex or edge within a transaction.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Status {
    Buffered,
    Persisted,
}

/// An edge between two type vertices, optionally carrying the overridden
/// type of an inherited declaration as its value.
#[derive(Clone)]
pub struct TypeEdge {
    inner: Arc<TypeEdgeInner>,
}

struct TypeEdgeInner {
    encoding: TypeEncoding,
    from: TypeIid,
    to: TypeIid,
    overridden: RwLock<Option<TypeIid>>,
    status: Status,
    deleted: AtomicBool,
}

impl TypeEdge {
    pub fn buffered(encoding: TypeEncoding, from: TypeIid, to: TypeIid) -> Self {
        Self {
            inner: Arc::new(TypeEdgeInner {
                encoding,
                from,
                to,
                overridden: RwLock::new(None),
                status: Status::Buffered,
                deleted: AtomicBool::new(false),
            }),
        }
    }

    pub fn persisted(
        encoding: TypeEncoding,
        from: TypeIid,
        to: TypeIid,
        overridden: Option<TypeIid>,
    ) -> Self {
        Self {
            inner: Arc::new(TypeEdgeInner {
                encoding,
                from,
                to,
                overridden: RwLock::new(overridden),
                status: Status::Persisted,
                deleted: AtomicBool::new(false),
            }),
        }
    }

    pub fn encoding(&self) -> TypeEncoding {
        self.inner.encoding
    }

    pub fn from(&self) -> TypeIid {
        self.inner.from
    }

    pub fn to(&self) -> TypeIid {
        self.inner.to
    }

    pub fn status(&self) -> Status {
        self.inner.status
    }

    pub fn overridden(&self) -> Option<TypeIid> {
        *self.inner.overridden.read()
    }

    pub fn set_overridden(&self, overridden: TypeIid) {
        *self.inner.overridden.write() = Some(overridden);
    }

    /// The adjacent vertex as seen from an adjacency with the given
    /// direction.
    pub fn adjacent(&self, direction: Direction) -> TypeIid {
        match direction {
            Direction::Out => self.inner.to,
            Direction::In => self.inner.from,
        }
    }

    pub fn forward_view(&self) -> EdgeViewIid {
        EdgeViewIid::type_edge(
            self.inner.from,
            self.inner.encoding.infix(Direction::Out),
            self.inner.to,
        )
    }

    pub fn backward_view(&self) -> EdgeViewIid {
        EdgeViewIid::type_edge(
            self.inner.to,
            self.inner.encoding.infix(Direction::In),
            self.inner.from,
        )
    }

    pub fn view(&self, direction: Direction) -> EdgeViewIid {
        match direction {
            Direction::Out => self.forward_view(),
            Direction::In => self.backward_view(),
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.inner.deleted.load(Ordering::Acquire)
    }

    pub(crate) fn mark_deleted(&self) -> bool {
        !self.inner.deleted.swap(true, Ordering::AcqRel)
    }

    /// Writes both view keys; the forward view carries the overridden IID.
    pub fn commit(&self, storage: &dyn Storage) -> Result<()> {
        let overridden = self
            .overridden()
            .map(|iid| Bytes::from_slice(iid.bytes()))
            .unwrap_or_default();
        storage.put(self.forward_view().bytes(), &overridden)?;
        storage.put(self.backward_view().bytes(), &[])?;
        Ok(())
    }
}

impl PartialEq for TypeEdge {
    fn eq(&self, other: &Self) -> bool {
        self.inner.encoding == other.inner.encoding
            && self.inner.from == other.inner.from
            && self.inner.to == other.inner.to
    }
}

impl Eq for TypeEdge {}

impl fmt::Debug for TypeEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeEdge")
            .field("encoding", &self.inner.encoding)
            .field("from", &self.inner.from)
            .field("to", &self.inner.to)
            .field("status", &self.inner.status)
            .finish()
    }
}

/// An edge between two thing vertices. `RolePlayer` edges additionally carry
/// the role type and the role-instance key that becomes the view suffix.
#[derive(Clone)]
pub struct ThingEdge {
    inner: Arc<ThingEdgeInner>,
}

struct ThingEdgeInner {
    encoding: ThingEncoding,
    from: ThingIid,
    to: ThingIid,
    role_type: Option<TypeIid>,
    role_key: Option<Bytes>,
    inferred: bool,
    status: Status,
    deleted: AtomicBool,
}

impl ThingEdge {
    pub fn buffered(
        encoding: ThingEncoding,
        from: ThingIid,
        to: ThingIid,
        inferred: bool,
    ) -> Self {
        debug_assert!(!encoding.is_optimised());
        Self::new(encoding, from, to, None, None, inferred, Status::Buffered)
    }

    pub fn buffered_optimised(
        encoding: ThingEncoding,
        from: ThingIid,
        to: ThingIid,
        role: &ThingIid,
        inferred: bool,
    ) -> Self {
        debug_assert!(encoding.is_optimised());
        Self::new(
            encoding,
            from,
            to,
            Some(role.type_iid()),
            Some(Bytes::from_slice(role.key())),
            inferred,
            Status::Buffered,
        )
    }

    pub fn persisted(
        encoding: ThingEncoding,
        from: ThingIid,
        to: ThingIid,
        role_type: Option<TypeIid>,
        role_key: Option<Bytes>,
    ) -> Self {
        Self::new(encoding, from, to, role_type, role_key, false, Status::Persisted)
    }

    #[allow(clippy::too_many_arguments)]
    fn new(
        encoding: ThingEncoding,
        from: ThingIid,
        to: ThingIid,
        role_type: Option<TypeIid>,
        role_key: Option<Bytes>,
        inferred: bool,
        status: Status,
    ) -> Self {
        Self {
            inner: Arc::new(ThingEdgeInner {
                encoding,
                from,
                to,
                role_type,
                role_key,
                inferred,
                status,
                deleted: AtomicBool::new(false),
            }),
        }
    }

    pub fn encoding(&self) -> ThingEncoding {
        self.inner.encoding
    }

    pub fn from(&self) -> &ThingIid {
        &self.inner.from
    }

    pub fn to(&self) -> &ThingIid {
        &self.inner.to
    }

    pub fn adjacent(&self, direction: Direction) -> &ThingIid {
        match direction {
            Direction::Out => &self.inner.to,
            Direction::In => &self.inner.from,
        }
    }

    pub fn role_type(&self) -> Option<TypeIid> {
        self.inner.role_type
    }

    /// Reconstructs the role-instance IID of an optimised edge from the role
    /// type in the infix and the key in the suffix.
    pub fn role_iid(&self) -> Option<ThingIid> {
        let role_type = self.inner.role_type?;
        let key = self.inner.role_key.as_ref()?;
        debug_assert_eq!(role_type.prefix(), Prefix::RoleType);
        let key = u64::from_be_bytes(key.as_slice().try_into().ok()?);
        Some(ThingIid::new(role_type, key))
    }

    pub fn is_inferred(&self) -> bool {
        self.inner.inferred
    }

    pub fn status(&self) -> Status {
        self.inner.status
    }

    pub fn is_deleted(&self) -> bool {
        self.inner.deleted.load(Ordering::Acquire)
    }

    pub(crate) fn mark_deleted(&self) -> bool {
        !self.inner.deleted.swap(true, Ordering::AcqRel)
    }

    fn view_iid(&self, owner: &ThingIid, adjacent: &ThingIid, direction: Direction) -> EdgeViewIid {
        let infix = self.inner.encoding.infix(direction);
        match (&self.inner.role_type, &self.inner.role_key) {
            (Some(role_type), Some(role_key)) => {
                EdgeViewIid::optimised_thing(owner, infix, *role_type, adjacent, role_key)
            }
            _ => EdgeViewIid::base_thing(owner, infix, adjacent),
        }
    }

    pub fn forward_view(&self) -> EdgeViewIid {
        self.view_iid(&self.inner.from, &self.inner.to, Direction::Out)
    }

    pub fn backward_view(&self) -> EdgeViewIid {
        self.view_iid(&self.inner.to, &self.inner.from, Direction::In)
    }

    /// The view keyed under this edge's owner for the given adjacency
    /// direction.
    pub fn view(&self, direction: Direction) -> EdgeViewIid {
        match direction {
            Direction::Out => self.forward_view(),
            Direction::In => self.backward_view(),
        }
    }

    /// Writes both view keys with empty payloads.
    pub fn commit(&self, storage: &dyn Storage) -> Result<()> {
        debug_assert!(!self.inner.inferred);
        storage.put(self.forward_view().bytes(), &[])?;
        storage.put(self.backward_view().bytes(), &[])?;
        Ok(())
    }
}

impl PartialEq for ThingEdge {
    fn eq(&self, other: &Self) -> bool {
        self.inner.encoding == other.inner.encoding
            && self.inner.from == other.inner.from
            && self.inner.to == other.inner.to
            && self.inner.role_type == other.inner.role_type
            && self.inner.role_key == other.inner.role_key
    }
}

impl Eq for ThingEdge {}

impl fmt::Debug for ThingEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThingEdge")
            .field("encoding", &self.inner.encoding)
            .field("from", &self.inner.from)
            .field("to", &self.inner.to)
            .field("role_type", &self.inner.role_type)
            .field("inferred", &self.inner.inferred)
            .field("status", &self.inner.status)
            .finish()
    }
}

/// One directional view of a thing edge, ordered by view IID. The view IID
/// is the comparison key for every sorted edge stream, so buffered and
/// persisted instances of the same logical edge compare equal and collapse
/// under `distinct`.
#[derive(Clone, Debug)]
pub struct ThingEdgeView {
    pub iid: EdgeViewIid,
    pub edge: ThingEdge,
}

impl ThingEdgeView {
    pub fn of(edge: ThingEdge, direction: Direction) -> Self {
        Self { iid: edge.view(direction), edge }
    }
}

impl PartialEq for ThingEdgeView {
    fn eq(&self, other: &Self) -> bool {
        self.iid == other.iid
    }
}

impl Eq for ThingEdgeView {}

impl PartialOrd for ThingEdgeView {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ThingEdgeView {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.iid.cmp(&other.iid)
    }
}

/// One directional view of a type edge, ordered by view IID.
#[derive(Clone, Debug)]
pub struct TypeEdgeView {
    pub iid: EdgeViewIid,
    pub edge: TypeEdge,
}

impl TypeEdgeView {
    pub fn of(edge: TypeEdge, direction: Direction) -> Self {
        Self { iid: edge.view(direction), edge }
    }
}

impl PartialEq for TypeEdgeView {
    fn eq(&self, other: &Self) -> bool {
        self.iid == other.iid
    }
}

impl Eq for TypeEdgeView {}

impl PartialOrd for TypeEdgeView {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TypeEdgeView {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.iid.cmp(&other.iid)
    }
}
