//! Storage and traversal core of an embedded, strongly-typed hypergraph
//! database.
//!
//! Vertices model *types* (schema) and *things* (instances); edges model
//! subtyping, attribute ownership, role-playing and instance relationships.
//! Everything lives in an opaque ordered key/value store under a bit-exact
//! key layout, interactive transactions buffer mutations until an atomic
//! commit, and compiled procedures traverse the overlay graph with a
//! backtracking executor.

pub mod db;
pub mod encoding;
pub mod error;
pub mod graph;
pub mod iid;
pub mod iter;
pub mod storage;
pub mod traversal;

pub use crate::db::{Database, Transaction, TxState};
pub use crate::encoding::{
    Direction, Prefix, ThingEncoding, TypeEncoding, Value, ValueType,
};
pub use crate::error::{Result, UmbraError};
pub use crate::graph::{Graph, KeyGenerator, Mode};
pub use crate::iid::{ThingIid, TypeIid};
pub use crate::traversal::{Identifier, Parameters, PredicateOp, TraversalVertex, VertexMap};
