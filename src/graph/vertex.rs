//! Type and thing vertices.
//!
//! A vertex is either buffered (created this transaction) or persisted
//! (loaded from storage). Buffered vertices hold their properties in memory
//! and write everything on commit; persisted vertices read properties lazily
//! from their `IID | infix` keys, memoize them, and write property mutations
//! through immediately so commit only has to drain edges.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::adjacency::{Posture, ThingAdjacency, TypeAdjacency};
use super::edge::{Status, ThingEdge};
use super::Graph;
use crate::encoding::{Direction, PropertyInfix, ThingEncoding, Value, ValueType};
use crate::error::{Result, UmbraError};
use crate::iid::{property_key, type_index_key, ThingIid, TypeIid};
use crate::storage::Storage;

pub fn scoped_label(label: &str, scope: Option<&str>) -> String {
    match scope {
        Some(scope) => format!("{scope}:{label}"),
        None => label.to_owned(),
    }
}

pub struct TypeVertex {
    iid: TypeIid,
    status: Status,
    label: RwLock<String>,
    scope: RwLock<Option<String>>,
    is_abstract: RwLock<Option<bool>>,
    value_type: RwLock<Option<Option<ValueType>>>,
    regex: RwLock<Option<Option<String>>>,
    modified: Arc<AtomicBool>,
    deleted: Arc<AtomicBool>,
    outs: TypeAdjacency,
    ins: TypeAdjacency,
}

impl std::fmt::Debug for TypeVertex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeVertex")
            .field("iid", &self.iid)
            .field("status", &self.status)
            .field("label", &*self.label.read())
            .field("scope", &*self.scope.read())
            .finish()
    }
}

impl TypeVertex {
    pub(crate) fn buffered(iid: TypeIid, label: String, scope: Option<String>) -> Self {
        Self::new(iid, Status::Buffered, Posture::WriteBuffered, label, scope)
    }

    pub(crate) fn persisted(
        iid: TypeIid,
        label: String,
        scope: Option<String>,
        posture: Posture,
    ) -> Self {
        Self::new(iid, Status::Persisted, posture, label, scope)
    }

    fn new(
        iid: TypeIid,
        status: Status,
        posture: Posture,
        label: String,
        scope: Option<String>,
    ) -> Self {
        let modified = Arc::new(AtomicBool::new(false));
        Self {
            iid,
            status,
            label: RwLock::new(label),
            scope: RwLock::new(scope),
            is_abstract: RwLock::new(None),
            value_type: RwLock::new(None),
            regex: RwLock::new(None),
            modified: Arc::clone(&modified),
            deleted: Arc::new(AtomicBool::new(false)),
            outs: TypeAdjacency::new(iid, Direction::Out, posture, Arc::clone(&modified)),
            ins: TypeAdjacency::new(iid, Direction::In, posture, modified),
        }
    }

    pub fn iid(&self) -> TypeIid {
        self.iid
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn label(&self) -> String {
        self.label.read().clone()
    }

    pub fn scope(&self) -> Option<String> {
        self.scope.read().clone()
    }

    pub fn scoped_label(&self) -> String {
        scoped_label(&self.label.read(), self.scope.read().as_deref())
    }

    pub fn outs(&self) -> &TypeAdjacency {
        &self.outs
    }

    pub fn ins(&self) -> &TypeAdjacency {
        &self.ins
    }

    pub fn is_modified(&self) -> bool {
        self.modified.load(Ordering::Acquire)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    pub(crate) fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::Release);
    }

    /// Renames this vertex. For a persisted vertex the label property and the
    /// scoped-label index are rewritten in one overlay step: new label
    /// property, delete old index entry, write new index entry, then the
    /// in-memory label; a reader inside the transaction sees the old pair or
    /// the new pair, never a split.
    pub fn set_label(&self, graph: &Graph, label: &str) -> Result<()> {
        let old_label = self.label();
        let scope = self.scope();
        graph.relabel_type(self, &old_label, scope.as_deref(), label, scope.as_deref())?;
        if self.status == Status::Persisted {
            let storage = graph.storage();
            storage.put(
                &property_key(self.iid, PropertyInfix::Label),
                label.as_bytes(),
            )?;
            storage.delete(&type_index_key(&scoped_label(&old_label, scope.as_deref())))?;
            storage.put(
                &type_index_key(&scoped_label(label, scope.as_deref())),
                self.iid.bytes(),
            )?;
        }
        *self.label.write() = label.to_owned();
        self.modified.store(true, Ordering::Release);
        Ok(())
    }

    pub fn set_scope(&self, graph: &Graph, scope: &str) -> Result<()> {
        let label = self.label();
        let old_scope = self.scope();
        graph.relabel_type(self, &label, old_scope.as_deref(), &label, Some(scope))?;
        if self.status == Status::Persisted {
            let storage = graph.storage();
            storage.put(&property_key(self.iid, PropertyInfix::Scope), scope.as_bytes())?;
            storage.delete(&type_index_key(&scoped_label(&label, old_scope.as_deref())))?;
            storage.put(
                &type_index_key(&scoped_label(&label, Some(scope))),
                self.iid.bytes(),
            )?;
        }
        *self.scope.write() = Some(scope.to_owned());
        self.modified.store(true, Ordering::Release);
        Ok(())
    }

    pub fn is_abstract(&self, graph: &Graph) -> Result<bool> {
        if let Some(cached) = *self.is_abstract.read() {
            return Ok(cached);
        }
        let loaded = match self.status {
            Status::Buffered => false,
            Status::Persisted => graph
                .storage()
                .get(&property_key(self.iid, PropertyInfix::Abstract))?
                .is_some(),
        };
        *self.is_abstract.write() = Some(loaded);
        Ok(loaded)
    }

    pub fn set_abstract(&self, graph: &Graph, is_abstract: bool) -> Result<()> {
        if self.status == Status::Persisted {
            let key = property_key(self.iid, PropertyInfix::Abstract);
            if is_abstract {
                graph.storage().put(&key, &[])?;
            } else {
                graph.storage().delete(&key)?;
            }
        }
        *self.is_abstract.write() = Some(is_abstract);
        self.modified.store(true, Ordering::Release);
        Ok(())
    }

    pub fn value_type(&self, graph: &Graph) -> Result<Option<ValueType>> {
        if let Some(cached) = &*self.value_type.read() {
            return Ok(*cached);
        }
        let loaded = match self.status {
            Status::Buffered => None,
            Status::Persisted => graph
                .storage()
                .get(&property_key(self.iid, PropertyInfix::ValueType))?
                .map(|bytes| match bytes.as_slice() {
                    [byte] => {
                        ValueType::from_u8(*byte).ok_or(UmbraError::Corruption("value type byte"))
                    }
                    _ => Err(UmbraError::Corruption("value type payload")),
                })
                .transpose()?,
        };
        *self.value_type.write() = Some(loaded);
        Ok(loaded)
    }

    pub fn set_value_type(&self, graph: &Graph, value_type: ValueType) -> Result<()> {
        if self.status == Status::Persisted {
            graph.storage().put(
                &property_key(self.iid, PropertyInfix::ValueType),
                &[value_type.into_u8()],
            )?;
        }
        *self.value_type.write() = Some(Some(value_type));
        self.modified.store(true, Ordering::Release);
        Ok(())
    }

    pub fn regex(&self, graph: &Graph) -> Result<Option<String>> {
        if let Some(cached) = &*self.regex.read() {
            return Ok(cached.clone());
        }
        let loaded = match self.status {
            Status::Buffered => None,
            Status::Persisted => graph
                .storage()
                .get(&property_key(self.iid, PropertyInfix::Regex))?
                .map(|bytes| {
                    String::from_utf8(bytes.to_vec())
                        .map_err(|_| UmbraError::Corruption("regex bytes"))
                })
                .transpose()?,
        };
        *self.regex.write() = Some(loaded.clone());
        Ok(loaded)
    }

    pub fn set_regex(&self, graph: &Graph, regex: &str) -> Result<()> {
        if self.status == Status::Persisted {
            graph
                .storage()
                .put(&property_key(self.iid, PropertyInfix::Regex), regex.as_bytes())?;
        }
        *self.regex.write() = Some(Some(regex.to_owned()));
        self.modified.store(true, Ordering::Release);
        Ok(())
    }

    /// Writes the existence key, the scoped-label index entry and all set
    /// properties for a buffered vertex, then drains forward edges. A
    /// persisted vertex only drains edges: its property writes went through
    /// the overlay as they happened.
    pub(crate) fn commit(&self, storage: &dyn Storage) -> Result<()> {
        if self.status == Status::Buffered {
            storage.put(self.iid.bytes(), &[])?;
            storage.put(&type_index_key(&self.scoped_label()), self.iid.bytes())?;
            storage.put(
                &property_key(self.iid, PropertyInfix::Label),
                self.label().as_bytes(),
            )?;
            if let Some(scope) = self.scope() {
                storage.put(&property_key(self.iid, PropertyInfix::Scope), scope.as_bytes())?;
            }
            if self.is_abstract.read().unwrap_or(false) {
                storage.put(&property_key(self.iid, PropertyInfix::Abstract), &[])?;
            }
            if let Some(Some(value_type)) = *self.value_type.read() {
                storage.put(
                    &property_key(self.iid, PropertyInfix::ValueType),
                    &[value_type.into_u8()],
                )?;
            }
            if let Some(Some(regex)) = &*self.regex.read() {
                storage.put(&property_key(self.iid, PropertyInfix::Regex), regex.as_bytes())?;
            }
        }
        self.outs.commit(storage)
    }

    /// Removes the vertex, its adjacencies, its index entry and every
    /// property key under `IID | *`.
    pub fn delete(self: &Arc<Self>, graph: &Graph) -> Result<()> {
        self.ins.delete_all(graph)?;
        self.outs.delete_all(graph)?;
        graph.unregister_type(self);
        if self.status == Status::Persisted {
            let storage = graph.storage();
            storage.delete(&type_index_key(&self.scoped_label()))?;
            let keys: Vec<_> = storage.iterate(self.iid.bytes()).map(|kv| kv.key).collect();
            for key in keys {
                storage.delete(&key)?;
            }
        }
        Ok(())
    }
}

pub struct ThingVertex {
    iid: ThingIid,
    status: Status,
    modified: Arc<AtomicBool>,
    deleted: Arc<AtomicBool>,
    outs: ThingAdjacency,
    ins: ThingAdjacency,
}

impl ThingVertex {
    pub(crate) fn buffered(iid: ThingIid) -> Self {
        Self::new(iid, Status::Buffered, Posture::WriteBuffered)
    }

    pub(crate) fn persisted(iid: ThingIid, posture: Posture) -> Self {
        Self::new(iid, Status::Persisted, posture)
    }

    fn new(iid: ThingIid, status: Status, posture: Posture) -> Self {
        let modified = Arc::new(AtomicBool::new(false));
        let deleted = Arc::new(AtomicBool::new(false));
        Self {
            iid: iid.clone(),
            status,
            outs: ThingAdjacency::new(
                iid.clone(),
                Direction::Out,
                posture,
                Arc::clone(&modified),
                Arc::clone(&deleted),
            ),
            ins: ThingAdjacency::new(iid, Direction::In, posture, Arc::clone(&modified), Arc::clone(&deleted)),
            modified,
            deleted,
        }
    }

    pub fn iid(&self) -> &ThingIid {
        &self.iid
    }

    pub fn type_iid(&self) -> TypeIid {
        self.iid.type_iid()
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn is_attribute(&self) -> bool {
        self.iid.is_attribute()
    }

    pub fn value(&self) -> Result<Option<Value>> {
        self.iid.value()
    }

    pub fn outs(&self) -> &ThingAdjacency {
        &self.outs
    }

    pub fn ins(&self) -> &ThingAdjacency {
        &self.ins
    }

    pub fn is_modified(&self) -> bool {
        self.modified.load(Ordering::Acquire)
    }

    pub(crate) fn set_modified(&self) {
        self.modified.store(true, Ordering::Release);
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    pub(crate) fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::Release);
    }

    /// Attaches an attribute: `self -HAS-> attribute`.
    pub fn put_has(&self, attribute: &ThingVertex) -> ThingEdge {
        self.outs.put(ThingEncoding::Has, attribute, false)
    }

    /// Writes the existence key of a buffered vertex and drains the forward
    /// side of its buffered edges; each edge writes both of its views, so the
    /// backward adjacency is never committed directly.
    pub(crate) fn commit(&self, storage: &dyn Storage) -> Result<()> {
        debug_assert!(!self.is_deleted());
        if self.status == Status::Buffered {
            storage.put(self.iid.bytes(), &[])?;
        }
        self.outs.commit(storage)
    }

    /// Removes the vertex and its adjacencies; after commit no key with this
    /// vertex's IID prefix remains.
    pub fn delete(self: &Arc<Self>, graph: &Graph) -> Result<()> {
        self.ins.delete_all(graph)?;
        self.outs.delete_all(graph)?;
        graph.unregister_thing(self);
        if self.status == Status::Persisted {
            let storage = graph.storage();
            let keys: Vec<_> = storage.iterate(self.iid.bytes()).map(|kv| kv.key).collect();
            for key in keys {
                storage.delete(&key)?;
            }
        }
        Ok(())
    }
}
