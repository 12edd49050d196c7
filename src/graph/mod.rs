//! The typed property graph: vertex catalogues, key generation, edge
//! lifecycle orchestration and the transaction commit drain.
//!
//! A `Graph` is scoped to one transaction. It resolves vertices through a
//! buffered-first overlay: catalogue lookups hit the in-memory maps before
//! consulting storage, and vertices loaded from storage are materialized with
//! the posture the transaction mode dictates.

pub mod adjacency;
pub mod edge;
pub mod vertex;

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::encoding::{Prefix, PropertyInfix, ThingEncoding, TypeEncoding, Value, TYPE_IID_LENGTH};
use crate::error::{Result, UmbraError};
use crate::iid::{bytes_of, property_key, thing_scan_prefix, type_index_key, ThingIid, TypeIid};
use crate::iter::{BoxSorted, ForwardableExt, VecSorted};
use crate::storage::{KeyValue, Storage};

use adjacency::Posture;
use edge::{Status, ThingEdge, TypeEdge};
use vertex::{scoped_label, ThingVertex, TypeVertex};

/// Transaction posture of a graph.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Mode {
    Read,
    Write,
}

/// Monotonic per-prefix key generator. Type vertices draw 2-byte scoped ids
/// per kind prefix; thing vertices draw 8-byte instance keys per type.
/// Reopening a database restores the high-water marks from storage so
/// generated segments never collide with persisted ones.
pub struct KeyGenerator {
    type_ids: DashMap<u8, AtomicU16>,
    thing_keys: DashMap<TypeIid, AtomicU64>,
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyGenerator {
    pub fn new() -> Self {
        Self {
            type_ids: DashMap::new(),
            thing_keys: DashMap::new(),
        }
    }

    fn next_type_id(&self, prefix: Prefix) -> u16 {
        self.type_ids
            .entry(prefix.into_u8())
            .or_insert_with(|| AtomicU16::new(1))
            .fetch_add(1, Ordering::Relaxed)
    }

    fn next_thing_key(&self, type_iid: TypeIid) -> u64 {
        self.thing_keys
            .entry(type_iid)
            .or_insert_with(|| AtomicU64::new(1))
            .fetch_add(1, Ordering::Relaxed)
    }

    /// Restores counters from the vertex existence keys already in storage.
    pub fn sync(&self, storage: &dyn Storage) -> Result<()> {
        for prefix in [
            Prefix::EntityType,
            Prefix::RelationType,
            Prefix::RoleType,
            Prefix::AttributeType,
        ] {
            let mut max = 0u16;
            for kv in storage.iterate(&[prefix.into_u8()]) {
                if kv.key.len() == TYPE_IID_LENGTH {
                    max = max.max(TypeIid::from_bytes(&kv.key)?.short_id());
                }
            }
            if max > 0 {
                self.type_ids
                    .insert(prefix.into_u8(), AtomicU16::new(max + 1));
            }
        }
        for prefix in [Prefix::Entity, Prefix::Relation, Prefix::Role] {
            for kv in storage.iterate(&[prefix.into_u8()]) {
                let Ok(len) = ThingIid::leading_length(&kv.key) else {
                    continue;
                };
                if kv.key.len() != len {
                    continue;
                }
                let iid = ThingIid::from_bytes(&kv.key)?;
                let key = u64::from_be_bytes(
                    iid.key()
                        .try_into()
                        .map_err(|_| UmbraError::Corruption("thing instance key width"))?,
                );
                let bucket = self
                    .thing_keys
                    .entry(iid.type_iid())
                    .or_insert_with(|| AtomicU64::new(1));
                bucket.fetch_max(key + 1, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct TypeCatalogue {
    by_iid: DashMap<TypeIid, Arc<TypeVertex>>,
    by_label: DashMap<String, TypeIid>,
}

#[derive(Default)]
struct ThingCatalogue {
    by_iid: DashMap<ThingIid, Arc<ThingVertex>>,
    buffered_by_type: DashMap<TypeIid, Arc<RwLock<BTreeSet<ThingIid>>>>,
}

pub struct Graph {
    storage: Arc<dyn Storage>,
    keys: Arc<KeyGenerator>,
    mode: Mode,
    types: TypeCatalogue,
    things: ThingCatalogue,
}

impl Graph {
    pub fn new(storage: Arc<dyn Storage>, keys: Arc<KeyGenerator>, mode: Mode) -> Self {
        Self {
            storage,
            keys,
            mode,
            types: TypeCatalogue::default(),
            things: ThingCatalogue::default(),
        }
    }

    pub fn storage(&self) -> &dyn Storage {
        &*self.storage
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    fn ensure_write(&self) -> Result<()> {
        if self.mode != Mode::Write {
            return Err(UmbraError::InvalidArgument(
                "mutation on a read transaction".to_owned(),
            ));
        }
        Ok(())
    }

    fn loaded_posture(&self) -> Posture {
        match self.mode {
            Mode::Read => Posture::Read,
            Mode::Write => Posture::WritePersisted,
        }
    }

    // --- type vertices -----------------------------------------------------

    /// Creates a buffered type vertex with a fresh IID. The scoped label must
    /// be unused in the buffer and in the persisted index.
    pub fn create_type(
        &self,
        kind: Prefix,
        label: &str,
        scope: Option<&str>,
    ) -> Result<Arc<TypeVertex>> {
        self.ensure_write()?;
        assert!(kind.is_type());
        let scoped = scoped_label(label, scope);
        if self.type_by_label(&scoped)?.is_some() {
            warn!(label = %scoped, "rejected type creation: label in use");
            return Err(UmbraError::SchemaMutation(format!(
                "label '{scoped}' is already in use"
            )));
        }
        let iid = TypeIid::new(kind, self.keys.next_type_id(kind));
        let vertex = Arc::new(TypeVertex::buffered(
            iid,
            label.to_owned(),
            scope.map(str::to_owned),
        ));
        self.types.by_iid.insert(iid, Arc::clone(&vertex));
        self.types.by_label.insert(scoped, iid);
        debug!(iid = ?iid, label, "type vertex created");
        Ok(vertex)
    }

    /// Resolves a type vertex by scoped label, buffer first, then the
    /// persisted `TYPE_INDEX` key.
    pub fn type_by_label(&self, scoped: &str) -> Result<Option<Arc<TypeVertex>>> {
        if let Some(iid) = self.types.by_label.get(scoped) {
            let iid = *iid;
            return Ok(self.types.by_iid.get(&iid).map(|v| Arc::clone(&v)));
        }
        match self.storage.get(&type_index_key(scoped))? {
            Some(value) => {
                let iid = TypeIid::from_bytes(&value)?;
                self.type_vertex(iid)
            }
            None => Ok(None),
        }
    }

    /// Resolves a type vertex by IID, materializing from storage if needed.
    pub fn type_vertex(&self, iid: TypeIid) -> Result<Option<Arc<TypeVertex>>> {
        if let Some(vertex) = self.types.by_iid.get(&iid) {
            return Ok(Some(Arc::clone(&vertex)));
        }
        if self.storage.get(iid.bytes())?.is_none() {
            return Ok(None);
        }
        let label = self
            .storage
            .get(&property_key(iid, PropertyInfix::Label))?
            .ok_or(UmbraError::Corruption("type vertex without label"))?;
        let label =
            String::from_utf8(label.to_vec()).map_err(|_| UmbraError::Corruption("label bytes"))?;
        let scope = self
            .storage
            .get(&property_key(iid, PropertyInfix::Scope))?
            .map(|bytes| {
                String::from_utf8(bytes.to_vec()).map_err(|_| UmbraError::Corruption("scope bytes"))
            })
            .transpose()?;
        let vertex = Arc::new(TypeVertex::persisted(
            iid,
            label,
            scope,
            self.loaded_posture(),
        ));
        self.types.by_label.insert(vertex.scoped_label(), iid);
        self.types.by_iid.insert(iid, Arc::clone(&vertex));
        Ok(Some(vertex))
    }

    /// Validates and applies a scoped-label change in the catalogue. The
    /// caller updates storage and the vertex itself.
    pub(crate) fn relabel_type(
        &self,
        vertex: &TypeVertex,
        old_label: &str,
        old_scope: Option<&str>,
        new_label: &str,
        new_scope: Option<&str>,
    ) -> Result<()> {
        self.ensure_write()?;
        let new_scoped = scoped_label(new_label, new_scope);
        if let Some(existing) = self.type_by_label(&new_scoped)? {
            if existing.iid() != vertex.iid() {
                warn!(label = %new_scoped, "rejected rename: label in use");
                return Err(UmbraError::SchemaMutation(format!(
                    "label '{new_scoped}' is already in use"
                )));
            }
        }
        let old_scoped = scoped_label(old_label, old_scope);
        self.types.by_label.remove(&old_scoped);
        self.types.by_label.insert(new_scoped, vertex.iid());
        Ok(())
    }

    pub(crate) fn unregister_type(&self, vertex: &Arc<TypeVertex>) {
        vertex.mark_deleted();
        self.types.by_label.remove(&vertex.scoped_label());
        self.types.by_iid.remove(&vertex.iid());
    }

    // --- type edges --------------------------------------------------------

    /// Creates a type edge, rejecting SUB edges whose transitive closure
    /// would loop back to the child.
    pub fn put_type_edge(
        &self,
        from: &Arc<TypeVertex>,
        encoding: TypeEncoding,
        to: &Arc<TypeVertex>,
    ) -> Result<TypeEdge> {
        self.ensure_write()?;
        if encoding == TypeEncoding::Sub
            && (from.iid() == to.iid() || self.super_types(to.iid())?.contains(&from.iid()))
        {
            warn!(from = %from.scoped_label(), to = %to.scoped_label(), "rejected SUB edge: cycle");
            return Err(UmbraError::SchemaMutation(format!(
                "subtyping '{}' under '{}' creates a cycle",
                from.scoped_label(),
                to.scoped_label()
            )));
        }
        Ok(from.outs().put(encoding, to))
    }

    pub(crate) fn delete_type_edge(&self, edge: &TypeEdge) -> Result<()> {
        if !edge.mark_deleted() {
            return Ok(());
        }
        if let Some(from) = self.types.by_iid.get(&edge.from()) {
            from.outs().remove(edge);
        }
        if let Some(to) = self.types.by_iid.get(&edge.to()) {
            to.ins().remove(edge);
        }
        if edge.status() == Status::Persisted {
            self.storage.delete(edge.forward_view().bytes())?;
            self.storage.delete(edge.backward_view().bytes())?;
        }
        Ok(())
    }

    /// The transitive SUB chain above a type, nearest supertype first.
    pub fn super_types(&self, start: TypeIid) -> Result<Vec<TypeIid>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::from([start]);
        let mut current = start;
        while let Some(parent) = self.sub_parent(current)? {
            if !seen.insert(parent) {
                return Err(UmbraError::Corruption("SUB chain contains a cycle"));
            }
            chain.push(parent);
            current = parent;
        }
        Ok(chain)
    }

    fn sub_parent(&self, iid: TypeIid) -> Result<Option<TypeIid>> {
        let Some(vertex) = self.type_vertex(iid)? else {
            return Ok(None);
        };
        let mut edges = vertex.outs().edges(self.storage(), TypeEncoding::Sub);
        Ok(edges
            .next()
            .map(|view| view.edge.adjacent(crate::encoding::Direction::Out)))
    }

    /// A type and all its transitive subtypes.
    pub fn sub_types_transitive(&self, start: TypeIid) -> Result<Vec<TypeIid>> {
        let mut result = vec![start];
        let mut frontier = vec![start];
        let mut seen = HashSet::from([start]);
        while let Some(current) = frontier.pop() {
            let Some(vertex) = self.type_vertex(current)? else {
                continue;
            };
            for view in vertex.ins().edges(self.storage(), TypeEncoding::Sub) {
                let child = view.edge.adjacent(crate::encoding::Direction::In);
                if seen.insert(child) {
                    result.push(child);
                    frontier.push(child);
                }
            }
        }
        Ok(result)
    }

    // --- thing vertices ----------------------------------------------------

    /// Creates a buffered thing vertex of the given type with a generated
    /// instance key.
    pub fn create_thing(&self, type_iid: TypeIid) -> Result<Arc<ThingVertex>> {
        self.ensure_write()?;
        let iid = ThingIid::new(type_iid, self.keys.next_thing_key(type_iid));
        let vertex = Arc::new(ThingVertex::buffered(iid.clone()));
        self.register_buffered_thing(&vertex);
        Ok(vertex)
    }

    /// Creates or rediscovers the attribute vertex for a (type, value) pair.
    /// Content addressing makes this idempotent within and across
    /// transactions.
    pub fn put_attribute(&self, type_iid: TypeIid, value: &Value) -> Result<Arc<ThingVertex>> {
        self.ensure_write()?;
        let iid = ThingIid::attribute(type_iid, value)?;
        if let Some(existing) = self.thing_vertex(&iid)? {
            return Ok(existing);
        }
        let vertex = Arc::new(ThingVertex::buffered(iid));
        self.register_buffered_thing(&vertex);
        Ok(vertex)
    }

    /// Looks up the attribute vertex for a (type, value) pair without
    /// creating it.
    pub fn attribute(&self, type_iid: TypeIid, value: &Value) -> Result<Option<Arc<ThingVertex>>> {
        self.thing_vertex(&ThingIid::attribute(type_iid, value)?)
    }

    fn register_buffered_thing(&self, vertex: &Arc<ThingVertex>) {
        self.things
            .by_iid
            .insert(vertex.iid().clone(), Arc::clone(vertex));
        self.things
            .buffered_by_type
            .entry(vertex.type_iid())
            .or_default()
            .write()
            .insert(vertex.iid().clone());
    }

    /// Resolves a thing vertex by IID, materializing from storage if needed.
    pub fn thing_vertex(&self, iid: &ThingIid) -> Result<Option<Arc<ThingVertex>>> {
        if let Some(vertex) = self.things.by_iid.get(iid) {
            return Ok(Some(Arc::clone(&vertex)));
        }
        if self.storage.get(iid.bytes())?.is_none() {
            return Ok(None);
        }
        let vertex = Arc::new(ThingVertex::persisted(iid.clone(), self.loaded_posture()));
        self.things.by_iid.insert(iid.clone(), Arc::clone(&vertex));
        Ok(Some(vertex))
    }

    pub(crate) fn unregister_thing(&self, vertex: &Arc<ThingVertex>) {
        vertex.mark_deleted();
        self.things.by_iid.remove(vertex.iid());
        if let Some(set) = self.things.buffered_by_type.get(&vertex.type_iid()) {
            set.write().remove(vertex.iid());
        }
    }

    /// Ordered stream of all instance IIDs of one type: buffered vertices
    /// merged with the persisted existence keys under the type's prefix.
    pub fn things_of_type(&self, type_iid: TypeIid) -> BoxSorted<ThingIid> {
        let buffered: Vec<ThingIid> = self
            .things
            .buffered_by_type
            .get(&type_iid)
            .map(|set| set.read().iter().cloned().collect())
            .unwrap_or_default();
        let persisted = self
            .storage
            .iterate(&thing_scan_prefix(type_iid))
            .filter_sorted(|kv: &KeyValue| {
                ThingIid::leading_length(&kv.key).is_ok_and(|len| len == kv.key.len())
            })
            .map_sorted(
                |kv| ThingIid::from_bytes(&kv.key).expect("validated existence key"),
                |iid| KeyValue::key_only(bytes_of(iid.bytes())),
            )
            .boxed();
        VecSorted::new(buffered)
            .merge_with(persisted)
            .distinct_sorted()
            .boxed()
    }

    // --- thing edges -------------------------------------------------------

    /// Wires a player into a relation: creates the role instance and the
    /// RELATING, PLAYING and ROLEPLAYER edges around it.
    pub fn relate(
        &self,
        relation: &Arc<ThingVertex>,
        role_type: &Arc<TypeVertex>,
        player: &Arc<ThingVertex>,
    ) -> Result<Arc<ThingVertex>> {
        self.ensure_write()?;
        debug_assert_eq!(role_type.iid().prefix(), Prefix::RoleType);
        let role = self.create_thing(role_type.iid())?;
        relation.outs().put(ThingEncoding::Relating, &role, false);
        player.outs().put(ThingEncoding::Playing, &role, false);
        relation
            .outs()
            .put_optimised(ThingEncoding::RolePlayer, player, role.iid(), false);
        Ok(role)
    }

    pub(crate) fn delete_thing_edge(&self, edge: &ThingEdge) -> Result<()> {
        if !edge.mark_deleted() {
            return Ok(());
        }
        if let Some(from) = self.things.by_iid.get(edge.from()) {
            from.outs().remove(edge);
        }
        if let Some(to) = self.things.by_iid.get(edge.to()) {
            to.ins().remove(edge);
        }
        if edge.status() == Status::Persisted {
            self.storage.delete(edge.forward_view().bytes())?;
            self.storage.delete(edge.backward_view().bytes())?;
        }
        Ok(())
    }

    // --- commit ------------------------------------------------------------

    /// Drains every buffered vertex and every modified vertex's forward
    /// edges into storage. Inferred edges are dropped by the adjacency
    /// commit; the caller owns the atomic application of the writes.
    pub fn commit(&self) -> Result<()> {
        self.ensure_write()?;
        let mut vertices = 0usize;
        for entry in self.types.by_iid.iter() {
            let vertex = entry.value();
            if vertex.is_deleted() {
                continue;
            }
            if vertex.status() == Status::Buffered || vertex.is_modified() {
                vertex.commit(self.storage())?;
                vertices += 1;
            }
        }
        for entry in self.things.by_iid.iter() {
            let vertex = entry.value();
            if vertex.is_deleted() {
                continue;
            }
            if vertex.status() == Status::Buffered || vertex.is_modified() {
                vertex.commit(self.storage())?;
                vertices += 1;
            }
        }
        debug!(vertices, "graph buffers drained");
        Ok(())
    }
}
