//! Database handle and transaction lifecycle.

mod transaction;

pub use transaction::{Transaction, TxState};

use std::sync::Arc;

use crate::error::Result;
use crate::graph::{KeyGenerator, Mode};
use crate::storage::MemoryStorage;

/// An embedded database: the shared ordered store plus the process-wide
/// per-prefix key generator. Transactions are opened from here.
pub struct Database {
    storage: MemoryStorage,
    keys: Arc<KeyGenerator>,
}

impl Database {
    /// A fresh, empty database.
    pub fn new() -> Result<Self> {
        Self::open(MemoryStorage::new())
    }

    /// Opens a database over existing storage, restoring the key generator's
    /// high-water marks so generated IIDs never collide with persisted ones.
    pub fn open(storage: MemoryStorage) -> Result<Self> {
        let keys = KeyGenerator::new();
        keys.sync(&storage)?;
        Ok(Self { storage, keys: Arc::new(keys) })
    }

    pub fn transaction(&self, mode: Mode) -> Result<Transaction> {
        Transaction::open(self, mode)
    }

    /// The underlying store, shared by every transaction.
    pub fn storage(&self) -> &MemoryStorage {
        &self.storage
    }

    pub(crate) fn keys(&self) -> Arc<KeyGenerator> {
        Arc::clone(&self.keys)
    }
}
