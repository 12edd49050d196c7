//! Per-vertex, per-direction adjacency overlays.
//!
//! An adjacency is the union of buffered (uncommitted) edges and persisted
//! edges read from storage, filtered by encoding and by prefix lookaheads on
//! the adjacent identifier. Two orthogonal capability axes shape each
//! instance: the direction, which picks the view projection (forward for
//! `Out`, backward for `In`), and the storage posture, which decides whether
//! reads consult storage, the buffer, or both:
//!
//! | posture          | sees storage | sees buffer | mutates |
//! |------------------|--------------|-------------|---------|
//! | `Read`           | yes          | no          | no      |
//! | `WriteBuffered`  | no           | yes         | yes     |
//! | `WritePersisted` | yes          | yes         | yes     |
//!
//! A vertex created this transaction cannot have persisted edges, so its
//! writes skip storage; an existing vertex merges both sides under the view
//! IID order and relies on `distinct` to collapse edges present in both.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use parking_lot::RwLock;

use super::edge::{ThingEdge, ThingEdgeView, TypeEdge, TypeEdgeView};
use super::Graph;
use crate::encoding::{Direction, ThingEncoding, TypeEncoding};
use crate::error::Result;
use crate::iid::{
    bytes_of, edge_scan_prefix, EdgeViewIid, InfixIid, Lookahead, LookaheadChain, ThingIid,
    TypeIid,
};
use crate::iter::{empty_sorted, merge_all, BoxSorted, ForwardableExt};
use crate::storage::{KeyValue, Storage};

/// Storage-access posture of an adjacency, set by the owning vertex's
/// transaction lifecycle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Posture {
    Read,
    WriteBuffered,
    WritePersisted,
}

impl Posture {
    fn sees_storage(self) -> bool {
        matches!(self, Posture::Read | Posture::WritePersisted)
    }

    fn sees_buffer(self) -> bool {
        !matches!(self, Posture::Read)
    }

    fn writable(self) -> bool {
        !matches!(self, Posture::Read)
    }
}

/// Buffered-edge index: ordered view buckets keyed by full infix IIDs, plus
/// the extension index that lets a reader holding a shallow prefix discover
/// all descendant buckets one lookahead segment at a time.
#[derive(Default)]
struct AdjacencyBuffer {
    infixes: DashMap<InfixIid, DashSet<InfixIid>>,
    edges: DashMap<InfixIid, Arc<RwLock<BTreeMap<EdgeViewIid, ThingEdge>>>>,
}

/// The lookahead tail of an edge as seen from one direction: the components
/// of the adjacent IID that follow the infix (preceded by the role type for
/// optimised encodings).
fn infix_tails(edge: &ThingEdge, direction: Direction) -> LookaheadChain {
    let adjacent = edge.adjacent(direction);
    let mut chain = LookaheadChain::new();
    if let Some(role_type) = edge.role_type() {
        chain.push(Lookahead::Type(role_type));
    }
    chain.push(Lookahead::Prefix(adjacent.prefix()));
    chain.push(Lookahead::Type(adjacent.type_iid()));
    chain
}

pub struct ThingAdjacency {
    owner: ThingIid,
    direction: Direction,
    posture: Posture,
    buffer: AdjacencyBuffer,
    owner_modified: Arc<AtomicBool>,
    owner_deleted: Arc<AtomicBool>,
}

impl ThingAdjacency {
    pub(crate) fn new(
        owner: ThingIid,
        direction: Direction,
        posture: Posture,
        owner_modified: Arc<AtomicBool>,
        owner_deleted: Arc<AtomicBool>,
    ) -> Self {
        Self {
            owner,
            direction,
            posture,
            buffer: AdjacencyBuffer::default(),
            owner_modified,
            owner_deleted,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    fn infix_iid(&self, encoding: ThingEncoding, chain: &[Lookahead]) -> InfixIid {
        InfixIid::new(encoding.infix(self.direction), chain)
    }

    fn persisted_edge(&self, view: EdgeViewIid) -> ThingEdge {
        let decoded = view
            .decode_thing(&self.owner)
            .expect("well-formed edge view key");
        let (from, to) = match self.direction {
            Direction::Out => (self.owner.clone(), decoded.adjacent),
            Direction::In => (decoded.adjacent, self.owner.clone()),
        };
        ThingEdge::persisted(decoded.encoding, from, to, decoded.role_type, decoded.role_key)
    }

    fn bucket_views(&self, infix: &InfixIid) -> BoxSorted<ThingEdgeView> {
        match self.buffer.edges.get(infix) {
            Some(bucket) => {
                let snapshot: Vec<ThingEdgeView> = bucket
                    .read()
                    .iter()
                    .map(|(iid, edge)| ThingEdgeView { iid: iid.clone(), edge: edge.clone() })
                    .collect();
                crate::iter::VecSorted::new(snapshot).boxed()
            }
            None => empty_sorted().boxed(),
        }
    }

    /// Ordered stream of buffered views under a (possibly partial) lookahead.
    /// A partial lookahead walks the extension index to collect every
    /// descendant bucket, then merge-iterates them.
    fn buffered_views(&self, encoding: ThingEncoding, chain: &[Lookahead]) -> BoxSorted<ThingEdgeView> {
        let infix = self.infix_iid(encoding, chain);
        if chain.len() == encoding.lookahead() {
            return self.bucket_views(&infix);
        }
        assert!(
            chain.len() < encoding.lookahead(),
            "lookahead longer than the encoding records"
        );
        let mut iids: HashSet<InfixIid> = HashSet::from([infix]);
        for _ in chain.len()..encoding.lookahead() {
            if iids.is_empty() {
                break;
            }
            iids = iids
                .iter()
                .filter_map(|iid| self.buffer.infixes.get(iid))
                .flat_map(|set| set.iter().map(|iid| iid.key().clone()).collect::<Vec<_>>())
                .collect();
        }
        merge_all(iids.iter().map(|iid| self.bucket_views(iid)).collect()).boxed()
    }

    /// Ordered stream of persisted views under the scan prefix
    /// `owner | infix | lookahead bytes`.
    fn persisted_views(
        &self,
        storage: &dyn Storage,
        encoding: ThingEncoding,
        chain: &[Lookahead],
    ) -> BoxSorted<ThingEdgeView> {
        let prefix = edge_scan_prefix(self.owner.bytes(), &self.infix_iid(encoding, chain));
        let owner = self.owner.clone();
        let direction = self.direction;
        storage
            .iterate(&prefix)
            .map_sorted(
                move |kv| {
                    let iid = EdgeViewIid::from_bytes(&kv.key);
                    let decoded = iid.decode_thing(&owner).expect("well-formed edge view key");
                    let (from, to) = match direction {
                        Direction::Out => (owner.clone(), decoded.adjacent),
                        Direction::In => (decoded.adjacent, owner.clone()),
                    };
                    ThingEdgeView {
                        iid,
                        edge: ThingEdge::persisted(
                            decoded.encoding,
                            from,
                            to,
                            decoded.role_type,
                            decoded.role_key,
                        ),
                    }
                },
                |view| KeyValue::key_only(bytes_of(view.iid.bytes())),
            )
            .boxed()
    }

    /// Ordered stream of edge views for an encoding under a lookahead
    /// prefix, in view-IID order. Optimised encodings require at least the
    /// role type segment; use [`ThingAdjacency::edges_unsorted`] for a full
    /// bucket scan.
    pub fn edges(
        &self,
        storage: &dyn Storage,
        encoding: ThingEncoding,
        chain: &[Lookahead],
    ) -> BoxSorted<ThingEdgeView> {
        debug_assert!(!encoding.is_optimised() || !chain.is_empty());
        match self.posture {
            Posture::Read => self.persisted_views(storage, encoding, chain),
            Posture::WriteBuffered => self.buffered_views(encoding, chain),
            Posture::WritePersisted => {
                let buffered = self.buffered_views(encoding, chain);
                let persisted = self.persisted_views(storage, encoding, chain);
                // an edge can be both buffered (re-put) and persisted
                buffered.merge_with(persisted).distinct_sorted().boxed()
            }
        }
    }

    /// Ordered role-player stream for one role type, optionally narrowed
    /// further by player lookaheads.
    pub fn edges_optimised(
        &self,
        storage: &dyn Storage,
        encoding: ThingEncoding,
        role_type: TypeIid,
        chain: &[Lookahead],
    ) -> BoxSorted<ThingEdgeView> {
        assert!(encoding.is_optimised());
        let mut merged = LookaheadChain::new();
        merged.push(Lookahead::Type(role_type));
        merged.extend_from_slice(chain);
        self.edges(storage, encoding, &merged)
    }

    /// Unsorted full scan of an optimised encoding, used where order is
    /// irrelevant.
    pub fn edges_unsorted(
        &self,
        storage: &dyn Storage,
        encoding: ThingEncoding,
    ) -> Box<dyn Iterator<Item = ThingEdge> + Send> {
        assert!(encoding.is_optimised());
        let buffered = self.buffered_views(encoding, &[]).map(|view| view.edge);
        let persisted = self.persisted_views(storage, encoding, &[]).map(|view| view.edge);
        match self.posture {
            Posture::Read => Box::new(persisted),
            Posture::WriteBuffered => Box::new(buffered),
            Posture::WritePersisted => {
                let mut seen = HashSet::new();
                Box::new(
                    buffered
                        .chain(persisted)
                        .filter(move |edge| seen.insert(edge.forward_view())),
                )
            }
        }
    }

    /// Point lookup of a base edge by adjacent vertex.
    pub fn edge(
        &self,
        storage: &dyn Storage,
        encoding: ThingEncoding,
        adjacent: &ThingIid,
    ) -> Result<Option<ThingEdge>> {
        assert!(!encoding.is_optimised());
        let view = EdgeViewIid::base_thing(&self.owner, encoding.infix(self.direction), adjacent);
        self.lookup(storage, encoding, infix_chain_of(adjacent, None), view)
    }

    /// Point lookup of a role-player edge by adjacent vertex and role
    /// instance.
    pub fn edge_optimised(
        &self,
        storage: &dyn Storage,
        encoding: ThingEncoding,
        adjacent: &ThingIid,
        role: &ThingIid,
    ) -> Result<Option<ThingEdge>> {
        assert!(encoding.is_optimised());
        let view = EdgeViewIid::optimised_thing(
            &self.owner,
            encoding.infix(self.direction),
            role.type_iid(),
            adjacent,
            role.key(),
        );
        self.lookup(storage, encoding, infix_chain_of(adjacent, Some(role.type_iid())), view)
    }

    fn lookup(
        &self,
        storage: &dyn Storage,
        encoding: ThingEncoding,
        chain: LookaheadChain,
        view: EdgeViewIid,
    ) -> Result<Option<ThingEdge>> {
        if self.posture.sees_buffer() {
            let infix = self.infix_iid(encoding, &chain);
            if let Some(bucket) = self.buffer.edges.get(&infix) {
                if let Some(edge) = bucket.read().get(&view) {
                    return Ok(Some(edge.clone()));
                }
            }
        }
        if self.posture.sees_storage() && storage.get(view.bytes())?.is_some() {
            return Ok(Some(self.persisted_edge(view)));
        }
        Ok(None)
    }

    /// Creates or rediscovers a buffered base edge and registers its mirror
    /// on the adjacent vertex.
    pub fn put(
        &self,
        encoding: ThingEncoding,
        adjacent: &super::vertex::ThingVertex,
        inferred: bool,
    ) -> ThingEdge {
        assert!(!encoding.is_optimised());
        let (from, to) = self.endpoints(adjacent.iid());
        let edge = ThingEdge::buffered(encoding, from, to, inferred);
        self.insert(edge, Some(adjacent))
    }

    /// Creates or rediscovers a buffered role-player edge.
    pub fn put_optimised(
        &self,
        encoding: ThingEncoding,
        adjacent: &super::vertex::ThingVertex,
        role: &ThingIid,
        inferred: bool,
    ) -> ThingEdge {
        assert!(encoding.is_optimised());
        let (from, to) = self.endpoints(adjacent.iid());
        let edge = ThingEdge::buffered_optimised(encoding, from, to, role, inferred);
        self.insert(edge, Some(adjacent))
    }

    fn endpoints(&self, adjacent: &ThingIid) -> (ThingIid, ThingIid) {
        match self.direction {
            Direction::Out => (self.owner.clone(), adjacent.clone()),
            Direction::In => (adjacent.clone(), self.owner.clone()),
        }
    }

    /// Inserts into the ordered buckets and the extension index. The mirror
    /// insertion is non-reflexive: passing `None` for the adjacent vertex
    /// stops the recursion after one hop.
    fn insert(&self, edge: ThingEdge, mirror: Option<&super::vertex::ThingVertex>) -> ThingEdge {
        assert!(self.posture.writable());
        debug_assert!(!self.owner_deleted.load(Ordering::Acquire));
        let encoding = edge.encoding();
        let chain = infix_tails(&edge, self.direction);
        assert_eq!(chain.len(), encoding.lookahead());

        let mut infix = self.infix_iid(encoding, &[]);
        for len in 1..=chain.len() {
            let extended = self.infix_iid(encoding, &chain[..len]);
            self.buffer
                .infixes
                .entry(infix)
                .or_default()
                .insert(extended.clone());
            infix = extended;
        }

        let bucket = Arc::clone(
            self.buffer
                .edges
                .entry(infix)
                .or_insert_with(|| Arc::new(RwLock::new(BTreeMap::new())))
                .value(),
        );
        let view = edge.view(self.direction);
        let edge = {
            let mut bucket = bucket.write();
            match bucket.entry(view) {
                Entry::Occupied(existing) => {
                    let existing = existing.get().clone();
                    debug_assert_eq!(existing.is_inferred(), edge.is_inferred());
                    existing
                }
                Entry::Vacant(slot) => {
                    slot.insert(edge.clone());
                    edge
                }
            }
        };
        self.owner_modified.store(true, Ordering::Release);

        if let Some(adjacent) = mirror {
            let mirror_adjacency = match self.direction {
                Direction::Out => adjacent.ins(),
                Direction::In => adjacent.outs(),
            };
            mirror_adjacency.insert(edge.clone(), None);
        }
        edge
    }

    /// Removes an edge from this side's buffer only. Edge deletion is
    /// responsible for the mirror and for storage keys.
    pub fn remove(&self, edge: &ThingEdge) {
        if !self.posture.sees_buffer() {
            return;
        }
        let chain = infix_tails(edge, self.direction);
        let infix = self.infix_iid(edge.encoding(), &chain);
        if let Some(bucket) = self.buffer.edges.get(&infix) {
            if bucket.write().remove(&edge.view(self.direction)).is_some() {
                self.owner_modified.store(true, Ordering::Release);
            }
        }
    }

    /// Deletes every edge of an encoding reachable under a lookahead prefix,
    /// on both sides and in storage.
    pub fn delete(
        &self,
        graph: &Graph,
        encoding: ThingEncoding,
        chain: &[Lookahead],
    ) -> Result<()> {
        let edges: Vec<ThingEdge> = match self.posture {
            Posture::Read => return Ok(()),
            Posture::WriteBuffered => self.buffered_views(encoding, chain).map(|v| v.edge).collect(),
            Posture::WritePersisted => {
                let buffered = self.buffered_views(encoding, chain);
                let persisted = self.persisted_views(graph.storage(), encoding, chain);
                buffered
                    .merge_with(persisted)
                    .distinct_sorted()
                    .map(|v| v.edge)
                    .collect()
            }
        };
        for edge in edges {
            graph.delete_thing_edge(&edge)?;
        }
        Ok(())
    }

    pub fn delete_all(&self, graph: &Graph) -> Result<()> {
        for encoding in ThingEncoding::ALL {
            self.delete(graph, encoding, &[])?;
        }
        Ok(())
    }

    /// Persists every non-inferred buffered edge. Called on the forward side
    /// only; each edge writes both of its views.
    pub(crate) fn commit(&self, storage: &dyn Storage) -> Result<()> {
        debug_assert!(self.direction.is_out());
        for bucket in self.buffer.edges.iter() {
            let edges: Vec<ThingEdge> = bucket.value().read().values().cloned().collect();
            for edge in edges {
                if !edge.is_inferred() {
                    edge.commit(storage)?;
                }
            }
        }
        Ok(())
    }
}

fn infix_chain_of(adjacent: &ThingIid, role_type: Option<TypeIid>) -> LookaheadChain {
    let mut chain = LookaheadChain::new();
    if let Some(role_type) = role_type {
        chain.push(Lookahead::Type(role_type));
    }
    chain.push(Lookahead::Prefix(adjacent.prefix()));
    chain.push(Lookahead::Type(adjacent.type_iid()));
    chain
}

/// Adjacency between type vertices. Type edges have no lookahead discipline;
/// buckets are keyed by the directed infix byte alone.
pub struct TypeAdjacency {
    owner: TypeIid,
    direction: Direction,
    posture: Posture,
    buffer: DashMap<u8, Arc<RwLock<BTreeMap<EdgeViewIid, TypeEdge>>>>,
    owner_modified: Arc<AtomicBool>,
}

impl TypeAdjacency {
    pub(crate) fn new(
        owner: TypeIid,
        direction: Direction,
        posture: Posture,
        owner_modified: Arc<AtomicBool>,
    ) -> Self {
        Self {
            owner,
            direction,
            posture,
            buffer: DashMap::new(),
            owner_modified,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    fn persisted_edge(&self, view: &EdgeViewIid, value: &[u8]) -> Result<TypeEdge> {
        let (encoding, _, adjacent) = view.decode_type(self.owner)?;
        let (from, to) = match self.direction {
            Direction::Out => (self.owner, adjacent),
            Direction::In => (adjacent, self.owner),
        };
        let overridden = if value.is_empty() { None } else { Some(TypeIid::from_bytes(value)?) };
        Ok(TypeEdge::persisted(encoding, from, to, overridden))
    }

    fn buffered_views(&self, encoding: TypeEncoding) -> BoxSorted<TypeEdgeView> {
        match self.buffer.get(&encoding.infix(self.direction)) {
            Some(bucket) => {
                let snapshot: Vec<TypeEdgeView> = bucket
                    .read()
                    .iter()
                    .map(|(iid, edge)| TypeEdgeView { iid: iid.clone(), edge: edge.clone() })
                    .collect();
                crate::iter::VecSorted::new(snapshot).boxed()
            }
            None => empty_sorted().boxed(),
        }
    }

    fn persisted_views(&self, storage: &dyn Storage, encoding: TypeEncoding) -> BoxSorted<TypeEdgeView> {
        let infix = InfixIid::new(encoding.infix(self.direction), &[]);
        let prefix = edge_scan_prefix(self.owner.bytes(), &infix);
        let this_owner = self.owner;
        let direction = self.direction;
        storage
            .iterate(&prefix)
            .map_sorted(
                move |kv| {
                    let iid = EdgeViewIid::from_bytes(&kv.key);
                    let (encoding, _, adjacent) =
                        iid.decode_type(this_owner).expect("well-formed edge view key");
                    let (from, to) = match direction {
                        Direction::Out => (this_owner, adjacent),
                        Direction::In => (adjacent, this_owner),
                    };
                    let overridden = (!kv.value.is_empty())
                        .then(|| TypeIid::from_bytes(&kv.value).expect("overridden IID value"));
                    TypeEdgeView { iid, edge: TypeEdge::persisted(encoding, from, to, overridden) }
                },
                |view| KeyValue::key_only(bytes_of(view.iid.bytes())),
            )
            .boxed()
    }

    /// Ordered stream of type-edge views for one encoding.
    pub fn edges(&self, storage: &dyn Storage, encoding: TypeEncoding) -> BoxSorted<TypeEdgeView> {
        match self.posture {
            Posture::Read => self.persisted_views(storage, encoding),
            Posture::WriteBuffered => self.buffered_views(encoding),
            Posture::WritePersisted => {
                let buffered = self.buffered_views(encoding);
                let persisted = self.persisted_views(storage, encoding);
                buffered.merge_with(persisted).distinct_sorted().boxed()
            }
        }
    }

    /// Point lookup by adjacent type vertex.
    pub fn edge(
        &self,
        storage: &dyn Storage,
        encoding: TypeEncoding,
        adjacent: TypeIid,
    ) -> Result<Option<TypeEdge>> {
        let view = EdgeViewIid::type_edge(self.owner, encoding.infix(self.direction), adjacent);
        if self.posture.sees_buffer() {
            if let Some(bucket) = self.buffer.get(&encoding.infix(self.direction)) {
                if let Some(edge) = bucket.read().get(&view) {
                    return Ok(Some(edge.clone()));
                }
            }
        }
        if self.posture.sees_storage() {
            if let Some(value) = storage.get(view.bytes())? {
                return Ok(Some(self.persisted_edge(&view, &value)?));
            }
        }
        Ok(None)
    }

    pub fn put(
        &self,
        encoding: TypeEncoding,
        adjacent: &super::vertex::TypeVertex,
    ) -> TypeEdge {
        let (from, to) = match self.direction {
            Direction::Out => (self.owner, adjacent.iid()),
            Direction::In => (adjacent.iid(), self.owner),
        };
        let edge = TypeEdge::buffered(encoding, from, to);
        self.insert(edge, Some(adjacent))
    }

    fn insert(&self, edge: TypeEdge, mirror: Option<&super::vertex::TypeVertex>) -> TypeEdge {
        assert!(self.posture.writable());
        let bucket = Arc::clone(
            self.buffer
                .entry(edge.encoding().infix(self.direction))
                .or_insert_with(|| Arc::new(RwLock::new(BTreeMap::new())))
                .value(),
        );
        let view = edge.view(self.direction);
        let edge = {
            let mut bucket = bucket.write();
            match bucket.entry(view) {
                Entry::Occupied(existing) => existing.get().clone(),
                Entry::Vacant(slot) => {
                    slot.insert(edge.clone());
                    edge
                }
            }
        };
        self.owner_modified.store(true, Ordering::Release);
        if let Some(adjacent) = mirror {
            let mirror_adjacency = match self.direction {
                Direction::Out => adjacent.ins(),
                Direction::In => adjacent.outs(),
            };
            mirror_adjacency.insert(edge.clone(), None);
        }
        edge
    }

    pub fn remove(&self, edge: &TypeEdge) {
        if !self.posture.sees_buffer() {
            return;
        }
        if let Some(bucket) = self.buffer.get(&edge.encoding().infix(self.direction)) {
            if bucket.write().remove(&edge.view(self.direction)).is_some() {
                self.owner_modified.store(true, Ordering::Release);
            }
        }
    }

    pub fn delete(&self, graph: &Graph, encoding: TypeEncoding) -> Result<()> {
        let edges: Vec<TypeEdge> = match self.posture {
            Posture::Read => return Ok(()),
            Posture::WriteBuffered => self.buffered_views(encoding).map(|v| v.edge).collect(),
            Posture::WritePersisted => {
                let buffered = self.buffered_views(encoding);
                let persisted = self.persisted_views(graph.storage(), encoding);
                buffered
                    .merge_with(persisted)
                    .distinct_sorted()
                    .map(|v| v.edge)
                    .collect()
            }
        };
        for edge in edges {
            graph.delete_type_edge(&edge)?;
        }
        Ok(())
    }

    pub fn delete_all(&self, graph: &Graph) -> Result<()> {
        for encoding in TypeEncoding::ALL {
            self.delete(graph, encoding)?;
        }
        Ok(())
    }

    pub(crate) fn commit(&self, storage: &dyn Storage) -> Result<()> {
        debug_assert!(self.direction.is_out());
        for bucket in self.buffer.iter() {
            let edges: Vec<TypeEdge> = bucket.value().read().values().cloned().collect();
            for edge in edges {
                edge.commit(storage)?;
            }
        }
        Ok(())
    }
}
