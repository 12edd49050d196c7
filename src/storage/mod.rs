//! Storage façade: an opaque ordered key/value store with point operations
//! and lazy ascending prefix scans.
//!
//! The core only assumes the thin contract here; atomicity of a commit batch
//! is the store's responsibility. [`MemoryStorage`] is the in-process
//! implementation, and [`TransactionalStorage`] layers a per-transaction
//! write overlay on top of it so that writes-in-flight are read back by the
//! same transaction and applied atomically on commit.

mod memory;

pub use memory::{MemoryStorage, TransactionalStorage};

use crate::error::Result;
use crate::iid::Bytes;
use crate::iter::BoxSorted;

/// One scanned entry. Ordering is by key, then value, matching the store's
/// lexicographic iteration order.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyValue {
    pub key: Bytes,
    pub value: Bytes,
}

impl KeyValue {
    pub fn new(key: Bytes, value: Bytes) -> Self {
        Self { key, value }
    }

    /// A key with an empty value; also the seek target for that key.
    pub fn key_only(key: Bytes) -> Self {
        Self { key, value: Bytes::new() }
    }
}

/// The ordered store contract.
///
/// `iterate` returns a lazy, forwardable, strictly ascending stream. Scans
/// tolerate concurrent writes by the same transaction at keys the scan does
/// not currently hold fetched; byte strings handed out are immutable.
pub trait Storage: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>>;

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    fn delete(&self, key: &[u8]) -> Result<()>;

    fn iterate(&self, prefix: &[u8]) -> BoxSorted<KeyValue>;
}
