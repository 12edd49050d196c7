use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::RwLock;

use super::{KeyValue, Storage};
use crate::error::Result;
use crate::iid::{bytes_of, Bytes};
use crate::iter::{assert_seekable, BoxSorted, Forwardable};

type Table = Arc<RwLock<BTreeMap<Bytes, Bytes>>>;
type Overlay = Arc<RwLock<BTreeMap<Bytes, Option<Bytes>>>>;

/// The in-process ordered store: a lock-protected ordered map.
///
/// Scans are key-cursors: each step re-locks and re-seeks past the last key
/// returned, so a scan never holds the lock between pulls and never misses or
/// double-reads keys written at other prefixes while it is open.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    table: Table,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }

    pub fn key_count(&self) -> usize {
        self.table.read().len()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        Ok(self.table.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.table.write().insert(bytes_of(key), bytes_of(value));
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.table.write().remove(key);
        Ok(())
    }

    fn iterate(&self, prefix: &[u8]) -> BoxSorted<KeyValue> {
        Box::new(Cursor::new(self.table.clone(), None, prefix))
    }
}

/// Per-transaction storage: a write overlay (`None` marks a deletion) over
/// the shared base table. Reads see the overlay first; `commit_writes`
/// applies the whole overlay under one base write lock, so other
/// transactions observe the commit as a unit.
pub struct TransactionalStorage {
    base: MemoryStorage,
    overlay: Overlay,
}

impl TransactionalStorage {
    pub fn new(base: MemoryStorage) -> Self {
        Self {
            base,
            overlay: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    pub fn write_count(&self) -> usize {
        self.overlay.read().len()
    }

    pub fn commit_writes(&self) -> Result<()> {
        // lock order: base table before overlay, matching the scan cursor
        let mut base = self.base.table.write();
        let mut overlay = self.overlay.write();
        for (key, value) in std::mem::take(&mut *overlay) {
            match value {
                Some(value) => {
                    base.insert(key, value);
                }
                None => {
                    base.remove(&key);
                }
            }
        }
        Ok(())
    }
}

impl Storage for TransactionalStorage {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        if let Some(entry) = self.overlay.read().get(key) {
            return Ok(entry.clone());
        }
        self.base.get(key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.overlay
            .write()
            .insert(bytes_of(key), Some(bytes_of(value)));
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.overlay.write().insert(bytes_of(key), None);
        Ok(())
    }

    fn iterate(&self, prefix: &[u8]) -> BoxSorted<KeyValue> {
        Box::new(Cursor::new(
            self.base.table.clone(),
            Some(self.overlay.clone()),
            prefix,
        ))
    }
}

enum State {
    Empty,
    Fetched(KeyValue),
    Completed,
}

/// Forwardable prefix scan over the base table and an optional overlay. The
/// overlay wins on key collisions; tombstones suppress base entries.
struct Cursor {
    table: Table,
    overlay: Option<Overlay>,
    prefix: Bytes,
    lower: Bound<Bytes>,
    state: State,
    last: Option<KeyValue>,
}

impl Cursor {
    fn new(table: Table, overlay: Option<Overlay>, prefix: &[u8]) -> Self {
        Self {
            table,
            overlay,
            prefix: bytes_of(prefix),
            lower: Bound::Included(bytes_of(prefix)),
            state: State::Empty,
            last: None,
        }
    }

    fn fetch(&mut self) -> bool {
        loop {
            match &self.state {
                State::Fetched(_) => return true,
                State::Completed => return false,
                State::Empty => {}
            }
            let range = (self.lower.clone(), Bound::<Bytes>::Unbounded);
            let base_next = self
                .table
                .read()
                .range(range.clone())
                .next()
                .map(|(k, v)| (k.clone(), v.clone()));
            let overlay_next = self.overlay.as_ref().and_then(|overlay| {
                overlay
                    .read()
                    .range(range)
                    .next()
                    .map(|(k, v)| (k.clone(), v.clone()))
            });

            let key = match (&base_next, &overlay_next) {
                (None, None) => {
                    self.state = State::Completed;
                    return false;
                }
                (Some((b, _)), None) => b.clone(),
                (None, Some((o, _))) => o.clone(),
                (Some((b, _)), Some((o, _))) => b.min(o).clone(),
            };
            if !key.starts_with(&self.prefix) {
                self.state = State::Completed;
                return false;
            }
            self.lower = Bound::Excluded(key.clone());

            // overlay entry at this exact key governs; a tombstone skips it
            let effective = match &overlay_next {
                Some((o, entry)) if *o == key => entry.clone(),
                _ => base_next.and_then(|(b, v)| (b == key).then_some(v)),
            };
            if let Some(value) = effective {
                self.state = State::Fetched(KeyValue::new(key, value));
                return true;
            }
        }
    }
}

impl Iterator for Cursor {
    type Item = KeyValue;

    fn next(&mut self) -> Option<KeyValue> {
        if !self.fetch() {
            return None;
        }
        match std::mem::replace(&mut self.state, State::Empty) {
            State::Fetched(item) => {
                self.last = Some(item.clone());
                Some(item)
            }
            _ => unreachable!("fetch reported an element"),
        }
    }
}

impl Forwardable for Cursor {
    fn peek(&mut self) -> Option<&KeyValue> {
        if !self.fetch() {
            return None;
        }
        match &self.state {
            State::Fetched(item) => Some(item),
            _ => unreachable!("fetch reported an element"),
        }
    }

    fn seek(&mut self, target: &KeyValue) {
        assert_seekable(self.last.as_ref(), target);
        if let State::Fetched(item) = &self.state {
            if item >= target {
                return;
            }
            self.state = State::Empty;
        }
        if matches!(self.state, State::Completed) {
            return;
        }
        // only ever move the cursor forward
        let advances = match &self.lower {
            Bound::Included(lower) => target.key > *lower,
            Bound::Excluded(lower) => target.key > *lower,
            Bound::Unbounded => true,
        };
        if advances {
            self.lower = Bound::Included(target.key.clone());
        }
    }

    fn recycle(&mut self) {
        self.state = State::Completed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kv(key: &[u8], value: &[u8]) -> KeyValue {
        KeyValue::new(bytes_of(key), bytes_of(value))
    }

    #[test]
    fn prefix_scan_is_ascending_and_bounded() {
        let storage = MemoryStorage::new();
        storage.put(b"a1", b"").unwrap();
        storage.put(b"b1", b"x").unwrap();
        storage.put(b"b2", b"y").unwrap();
        storage.put(b"c1", b"").unwrap();
        let scanned: Vec<_> = storage.iterate(b"b").collect();
        assert_eq!(scanned, vec![kv(b"b1", b"x"), kv(b"b2", b"y")]);
    }

    #[test]
    fn scan_tolerates_writes_at_other_prefixes() {
        let storage = MemoryStorage::new();
        storage.put(b"b1", b"").unwrap();
        storage.put(b"b3", b"").unwrap();
        let mut scan = storage.iterate(b"b");
        assert_eq!(scan.next(), Some(kv(b"b1", b"")));
        storage.put(b"a9", b"").unwrap();
        storage.put(b"b2", b"").unwrap();
        assert_eq!(scan.next(), Some(kv(b"b2", b"")));
        assert_eq!(scan.next(), Some(kv(b"b3", b"")));
        assert_eq!(scan.next(), None);
    }

    #[test]
    fn cursor_seek_positions_at_smallest_geq() {
        let storage = MemoryStorage::new();
        for key in [b"k1", b"k3", b"k5"] {
            storage.put(key, b"").unwrap();
        }
        let mut scan = storage.iterate(b"k");
        scan.seek(&kv(b"k2", b""));
        assert_eq!(scan.next(), Some(kv(b"k3", b"")));
    }

    #[test]
    fn overlay_wins_and_tombstones_hide() {
        let base = MemoryStorage::new();
        base.put(b"k1", b"old").unwrap();
        base.put(b"k2", b"keep").unwrap();
        base.put(b"k3", b"dead").unwrap();
        let tx = TransactionalStorage::new(base.clone());
        tx.put(b"k1", b"new").unwrap();
        tx.delete(b"k3").unwrap();
        tx.put(b"k4", b"added").unwrap();

        assert_eq!(tx.get(b"k1").unwrap(), Some(bytes_of(b"new")));
        assert_eq!(tx.get(b"k3").unwrap(), None);
        let scanned: Vec<_> = tx.iterate(b"k").collect();
        assert_eq!(
            scanned,
            vec![kv(b"k1", b"new"), kv(b"k2", b"keep"), kv(b"k4", b"added")]
        );
        // base unchanged until commit
        assert_eq!(base.get(b"k1").unwrap(), Some(bytes_of(b"old")));

        tx.commit_writes().unwrap();
        assert_eq!(base.get(b"k1").unwrap(), Some(bytes_of(b"new")));
        assert_eq!(base.get(b"k3").unwrap(), None);
        assert_eq!(base.get(b"k4").unwrap(), Some(bytes_of(b"added")));
    }
}
