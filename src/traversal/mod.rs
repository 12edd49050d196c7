//! Traversal of compiled procedures over the graph.
//!
//! A procedure is a totally ordered plan of edge steps; execution is a
//! backtracking search that yields variable-to-vertex maps. The procedure
//! builder lives in [`procedure`], the executor in [`scanner`], and the
//! parallel fan-out in [`producer`].

pub mod procedure;
pub mod producer;
pub mod scanner;

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use crate::encoding::Value;
use crate::iid::{ThingIid, TypeIid};

/// A procedure variable.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Identifier {
    Name(String),
    Anon(u32),
    Label(String),
    /// A role-instance variable, disambiguated by the traversal that reaches
    /// it: the same (relation, role type, player) walked twice gets distinct
    /// repetitions.
    Scoped {
        relation: Box<Identifier>,
        role_type: Box<Identifier>,
        player: Box<Identifier>,
        repetition: u32,
    },
}

impl Identifier {
    pub fn name(name: impl Into<String>) -> Self {
        Identifier::Name(name.into())
    }

    pub fn anon(id: u32) -> Self {
        Identifier::Anon(id)
    }

    pub fn label(label: impl Into<String>) -> Self {
        Identifier::Label(label.into())
    }

    pub fn scoped(
        relation: Identifier,
        role_type: Identifier,
        player: Identifier,
        repetition: u32,
    ) -> Self {
        Identifier::Scoped {
            relation: Box::new(relation),
            role_type: Box::new(role_type),
            player: Box::new(player),
            repetition,
        }
    }

    /// Whether this variable can appear in an answer projection.
    pub fn is_retrievable(&self) -> bool {
        !matches!(self, Identifier::Scoped { .. })
    }
}

/// A graph vertex as bound during traversal.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TraversalVertex {
    Type(TypeIid),
    Thing(ThingIid),
}

impl TraversalVertex {
    pub fn as_type(&self) -> Option<TypeIid> {
        match self {
            TraversalVertex::Type(iid) => Some(*iid),
            TraversalVertex::Thing(_) => None,
        }
    }

    pub fn as_thing(&self) -> Option<&ThingIid> {
        match self {
            TraversalVertex::Thing(iid) => Some(iid),
            TraversalVertex::Type(_) => None,
        }
    }
}

/// One answer: an assignment from retrievable variables to vertices.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct VertexMap {
    bindings: BTreeMap<Identifier, TraversalVertex>,
}

impl VertexMap {
    pub fn new(bindings: BTreeMap<Identifier, TraversalVertex>) -> Self {
        Self { bindings }
    }

    pub fn get(&self, id: &Identifier) -> Option<&TraversalVertex> {
        self.bindings.get(id)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Identifier, &TraversalVertex)> {
        self.bindings.iter()
    }
}

/// Value comparison operator of a predicate.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PredicateOp {
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl PredicateOp {
    /// Tests `lhs <op> rhs`. Values of different types never match.
    pub fn test(self, lhs: &Value, rhs: &Value) -> bool {
        let Some(ordering) = lhs.partial_cmp_typed(rhs) else {
            return false;
        };
        match self {
            PredicateOp::Eq => ordering == Ordering::Equal,
            PredicateOp::Neq => ordering != Ordering::Equal,
            PredicateOp::Lt => ordering == Ordering::Less,
            PredicateOp::Le => ordering != Ordering::Greater,
            PredicateOp::Gt => ordering == Ordering::Greater,
            PredicateOp::Ge => ordering != Ordering::Less,
        }
    }
}

/// Execution-time inputs: the comparison value behind each predicate
/// variable.
#[derive(Clone, Debug, Default)]
pub struct Parameters {
    values: HashMap<Identifier, (PredicateOp, Value)>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_value(&mut self, id: Identifier, op: PredicateOp, value: Value) {
        self.values.insert(id, (op, value));
    }

    pub fn value(&self, id: &Identifier) -> Option<&(PredicateOp, Value)> {
        self.values.get(id)
    }
}
