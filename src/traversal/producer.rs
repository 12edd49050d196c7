//! Parallel procedure execution.
//!
//! The starting-vertex bindings are partitioned across worker threads, each
//! running independent [`GraphIterator`]s; answers fan into one channel.
//! Ordering across workers is not guaranteed; the consuming handle applies
//! `distinct` so duplicate projections from different workers collapse. A
//! storage failure inside a worker is forwarded as an `Err` item and stops
//! that worker.

use std::collections::HashSet;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::debug;

use super::procedure::Procedure;
use super::scanner::{start_candidates, GraphIterator};
use super::{Identifier, Parameters, VertexMap};
use crate::error::Result;
use crate::graph::Graph;

impl Procedure {
    /// Executes the procedure across `parallelisation` workers. Within a
    /// worker answers appear in procedure-edge order; across workers the
    /// interleaving is arbitrary.
    pub fn producer(
        self: &Arc<Self>,
        graph: &Arc<Graph>,
        params: &Parameters,
        filter: &HashSet<Identifier>,
        parallelisation: usize,
    ) -> Result<Producer> {
        let starts = start_candidates(graph, self, params)?;
        let queue = Arc::new(Mutex::new(starts.into_iter()));
        let (sender, receiver) = mpsc::channel();
        let workers = parallelisation.max(1);
        debug!(workers, "producer started");
        let handles = (0..workers)
            .map(|_| {
                let queue = Arc::clone(&queue);
                let graph = Arc::clone(graph);
                let procedure = Arc::clone(self);
                let params = params.clone();
                let filter = filter.clone();
                let sender = sender.clone();
                std::thread::spawn(move || loop {
                    let Some(start) = queue.lock().next() else {
                        return;
                    };
                    let mut answers = GraphIterator::new(
                        Arc::clone(&graph),
                        Arc::clone(&procedure),
                        params.clone(),
                        filter.clone(),
                        start,
                    );
                    loop {
                        match answers.try_next() {
                            Ok(Some(answer)) => {
                                // consumer gone: stop producing
                                if sender.send(Ok(answer)).is_err() {
                                    return;
                                }
                            }
                            Ok(None) => break,
                            Err(err) => {
                                let _ = sender.send(Err(err));
                                return;
                            }
                        }
                    }
                })
            })
            .collect();
        Ok(Producer { receiver, handles, seen: HashSet::new() })
    }
}

/// Streaming handle over the workers' answers, deduplicated. `Err` items
/// carry worker-side storage failures.
pub struct Producer {
    receiver: mpsc::Receiver<Result<VertexMap>>,
    handles: Vec<JoinHandle<()>>,
    seen: HashSet<VertexMap>,
}

impl Iterator for Producer {
    type Item = Result<VertexMap>;

    fn next(&mut self) -> Option<Result<VertexMap>> {
        loop {
            match self.receiver.recv() {
                Ok(Ok(answer)) => {
                    if self.seen.insert(answer.clone()) {
                        return Some(Ok(answer));
                    }
                }
                Ok(Err(err)) => return Some(Err(err)),
                Err(_) => {
                    for handle in self.handles.drain(..) {
                        let _ = handle.join();
                    }
                    return None;
                }
            }
        }
    }
}
