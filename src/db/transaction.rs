use std::sync::Arc;

use tracing::{debug, info};

use super::Database;
use crate::error::{Result, UmbraError};
use crate::graph::{Graph, Mode};
use crate::storage::{Storage, TransactionalStorage};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TxState {
    Active,
    Committed,
    Closed,
}

/// An interactive transaction: a graph overlay over a private storage
/// overlay. Mutations buffer in the graph; property writes on persisted
/// vertices go straight to the storage overlay. `commit` drains the graph
/// buffers and applies the whole overlay atomically; dropping or closing an
/// uncommitted transaction discards every write.
pub struct Transaction {
    graph: Arc<Graph>,
    storage: Arc<TransactionalStorage>,
    mode: Mode,
    state: TxState,
}

impl Transaction {
    pub(crate) fn open(db: &Database, mode: Mode) -> Result<Self> {
        let storage = Arc::new(TransactionalStorage::new(db.storage().clone()));
        let graph = Arc::new(Graph::new(
            Arc::clone(&storage) as Arc<dyn Storage>,
            db.keys(),
            mode,
        ));
        debug!(?mode, "transaction opened");
        Ok(Self { graph, storage, mode, state: TxState::Active })
    }

    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    /// Flushes buffered vertices and edges and applies the storage overlay
    /// as one atomic batch. Partial commits are never observable.
    pub fn commit(mut self) -> Result<()> {
        if self.state != TxState::Active {
            return Err(UmbraError::InvalidArgument(
                "transaction is no longer active".to_owned(),
            ));
        }
        if self.mode != Mode::Write {
            return Err(UmbraError::InvalidArgument(
                "commit on a read transaction".to_owned(),
            ));
        }
        self.graph.commit()?;
        let writes = self.storage.write_count();
        self.storage.commit_writes()?;
        self.state = TxState::Committed;
        info!(writes, "transaction committed");
        Ok(())
    }

    /// Discards the transaction. Uncommitted writes are dropped with the
    /// overlay.
    pub fn close(mut self) {
        self.state = TxState::Closed;
    }
}
