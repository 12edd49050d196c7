//! Compiled traversal procedures.
//!
//! A procedure is a DAG of vertices connected by totally ordered edge steps
//! `1..n`; the edge order is the search order. Exactly one vertex is the
//! starting vertex. The builder mirrors how a planner would emit a
//! procedure; tests drive it directly.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tracing::trace;

use super::scanner::GraphIterator;
use super::{Identifier, Parameters, PredicateOp, TraversalVertex, VertexMap};
use crate::encoding::Direction;
use crate::error::{Result, UmbraError};
use crate::graph::Graph;

/// Static properties constraining one procedure vertex.
#[derive(Clone, Debug, Default)]
pub struct VertexProps {
    /// Allowed scoped labels, for type vertices.
    pub labels: BTreeSet<String>,
    /// Allowed instance-type labels, for thing vertices.
    pub types: BTreeSet<String>,
    /// Value predicate operator; the comparison value arrives in
    /// [`Parameters`] keyed by this vertex's identifier.
    pub predicate: Option<PredicateOp>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VertexKind {
    Thing,
    Type,
}

#[derive(Clone, Debug)]
pub struct ProcedureVertex {
    pub id: Identifier,
    pub kind: VertexKind,
    pub is_start: bool,
    pub props: VertexProps,
}

/// The relationship one procedure edge walks.
#[derive(Clone, Debug)]
pub enum EdgeKind {
    /// Thing to its type; never materialized in storage, read from the
    /// thing IID's type segment (transitively through SUB when flagged).
    Isa { transitive: bool },
    Sub { transitive: bool },
    Owns,
    Plays,
    Relates,
    Has,
    Relating,
    Playing,
    /// Relation to player through role instances of the allowed role types.
    RolePlayer { role_types: BTreeSet<String> },
}

/// One ordered step: walk `kind` from the binding of `from` to candidate
/// bindings of `to`. `direction` picks the natural adjacency (`Out`) or its
/// mirror (`In`).
#[derive(Clone, Debug)]
pub struct ProcedureEdge {
    pub order: usize,
    pub from: Identifier,
    pub to: Identifier,
    pub kind: EdgeKind,
    pub direction: Direction,
}

pub struct Procedure {
    vertices: HashMap<Identifier, ProcedureVertex>,
    edges: Vec<ProcedureEdge>,
    start: Identifier,
}

impl Procedure {
    pub fn builder() -> ProcedureBuilder {
        ProcedureBuilder::default()
    }

    pub fn start(&self) -> &ProcedureVertex {
        &self.vertices[&self.start]
    }

    pub fn vertex(&self, id: &Identifier) -> Option<&ProcedureVertex> {
        self.vertices.get(id)
    }

    pub fn edge(&self, order: usize) -> &ProcedureEdge {
        &self.edges[order - 1]
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Executes the procedure, yielding distinct answers projected onto
    /// `filter`. A storage failure mid-traversal surfaces as the stream's
    /// final `Err` item.
    pub fn iterator(
        self: &Arc<Self>,
        graph: &Arc<Graph>,
        params: &Parameters,
        filter: &HashSet<Identifier>,
    ) -> Result<ProcedureIterator> {
        assert!(
            filter.iter().any(|id| self.vertices.contains_key(id)),
            "filter does not intersect the procedure's variables"
        );
        trace!(edges = self.edges.len(), "procedure execution started");
        let starts = super::scanner::start_candidates(graph, self, params)?;
        Ok(ProcedureIterator {
            graph: Arc::clone(graph),
            procedure: Arc::clone(self),
            params: params.clone(),
            filter: filter.clone(),
            starts: starts.into_iter(),
            current: None,
            seen: HashSet::new(),
        })
    }
}

/// Sequential execution handle: runs one [`GraphIterator`] per starting
/// binding, pulling through its fallible `try_next`, and deduplicates the
/// projected answers. An `Err` item ends the stream.
pub struct ProcedureIterator {
    graph: Arc<Graph>,
    procedure: Arc<Procedure>,
    params: Parameters,
    filter: HashSet<Identifier>,
    starts: std::vec::IntoIter<TraversalVertex>,
    current: Option<GraphIterator>,
    seen: HashSet<VertexMap>,
}

impl Iterator for ProcedureIterator {
    type Item = Result<VertexMap>;

    fn next(&mut self) -> Option<Result<VertexMap>> {
        loop {
            if let Some(active) = self.current.as_mut() {
                match active.try_next() {
                    Ok(Some(answer)) => {
                        if self.seen.insert(answer.clone()) {
                            return Some(Ok(answer));
                        }
                    }
                    Ok(None) => self.current = None,
                    Err(err) => {
                        self.current = None;
                        self.starts = Vec::new().into_iter();
                        return Some(Err(err));
                    }
                }
            } else {
                let start = self.starts.next()?;
                self.current = Some(GraphIterator::new(
                    Arc::clone(&self.graph),
                    Arc::clone(&self.procedure),
                    self.params.clone(),
                    self.filter.clone(),
                    start,
                ));
            }
        }
    }
}

/// Builds a procedure by registering vertices and ordered edges.
#[derive(Default)]
pub struct ProcedureBuilder {
    vertices: HashMap<Identifier, ProcedureVertex>,
    edges: BTreeMap<usize, ProcedureEdge>,
}

impl ProcedureBuilder {
    fn vertex(&mut self, id: Identifier, kind: VertexKind, is_start: bool) -> Identifier {
        self.vertices.entry(id.clone()).or_insert_with(|| ProcedureVertex {
            id: id.clone(),
            kind,
            is_start,
            props: VertexProps::default(),
        });
        id
    }

    pub fn named_thing(&mut self, name: &str, is_start: bool) -> Identifier {
        self.vertex(Identifier::name(name), VertexKind::Thing, is_start)
    }

    pub fn anonymous_thing(&mut self, id: u32) -> Identifier {
        self.vertex(Identifier::anon(id), VertexKind::Thing, false)
    }

    pub fn named_type(&mut self, name: &str, is_start: bool) -> Identifier {
        self.vertex(Identifier::name(name), VertexKind::Type, is_start)
    }

    pub fn labelled_type(&mut self, label: &str, is_start: bool) -> Identifier {
        let id = self.vertex(Identifier::label(label), VertexKind::Type, is_start);
        self.labels(&id, [label]);
        id
    }

    /// A role-instance vertex scoped to one traversal of a relation.
    pub fn scoped_thing(
        &mut self,
        relation: &Identifier,
        role_type: &Identifier,
        player: &Identifier,
        repetition: u32,
    ) -> Identifier {
        self.vertex(
            Identifier::scoped(relation.clone(), role_type.clone(), player.clone(), repetition),
            VertexKind::Thing,
            false,
        )
    }

    pub fn labels<const N: usize>(&mut self, id: &Identifier, labels: [&str; N]) {
        let props = &mut self.vertices.get_mut(id).expect("registered vertex").props;
        props.labels.extend(labels.iter().map(|l| l.to_string()));
    }

    pub fn types<const N: usize>(&mut self, id: &Identifier, types: [&str; N]) {
        let props = &mut self.vertices.get_mut(id).expect("registered vertex").props;
        props.types.extend(types.iter().map(|l| l.to_string()));
    }

    pub fn predicate(&mut self, id: &Identifier, op: PredicateOp) {
        self.vertices.get_mut(id).expect("registered vertex").props.predicate = Some(op);
    }

    fn edge(&mut self, order: usize, from: &Identifier, to: &Identifier, kind: EdgeKind, direction: Direction) {
        let previous = self.edges.insert(
            order,
            ProcedureEdge { order, from: from.clone(), to: to.clone(), kind, direction },
        );
        assert!(previous.is_none(), "duplicate edge order {order}");
    }

    pub fn forward_isa(&mut self, order: usize, thing: &Identifier, type_: &Identifier, transitive: bool) {
        self.edge(order, thing, type_, EdgeKind::Isa { transitive }, Direction::Out);
    }

    pub fn backward_isa(&mut self, order: usize, type_: &Identifier, thing: &Identifier, transitive: bool) {
        self.edge(order, type_, thing, EdgeKind::Isa { transitive }, Direction::In);
    }

    pub fn forward_sub(&mut self, order: usize, child: &Identifier, parent: &Identifier, transitive: bool) {
        self.edge(order, child, parent, EdgeKind::Sub { transitive }, Direction::Out);
    }

    pub fn backward_sub(&mut self, order: usize, parent: &Identifier, child: &Identifier, transitive: bool) {
        self.edge(order, parent, child, EdgeKind::Sub { transitive }, Direction::In);
    }

    pub fn forward_owns(&mut self, order: usize, owner: &Identifier, attribute: &Identifier) {
        self.edge(order, owner, attribute, EdgeKind::Owns, Direction::Out);
    }

    pub fn backward_owns(&mut self, order: usize, attribute: &Identifier, owner: &Identifier) {
        self.edge(order, attribute, owner, EdgeKind::Owns, Direction::In);
    }

    pub fn forward_plays(&mut self, order: usize, player: &Identifier, role_type: &Identifier) {
        self.edge(order, player, role_type, EdgeKind::Plays, Direction::Out);
    }

    pub fn backward_plays(&mut self, order: usize, role_type: &Identifier, player: &Identifier) {
        self.edge(order, role_type, player, EdgeKind::Plays, Direction::In);
    }

    pub fn forward_relates(&mut self, order: usize, relation_type: &Identifier, role_type: &Identifier) {
        self.edge(order, relation_type, role_type, EdgeKind::Relates, Direction::Out);
    }

    pub fn backward_relates(&mut self, order: usize, role_type: &Identifier, relation_type: &Identifier) {
        self.edge(order, role_type, relation_type, EdgeKind::Relates, Direction::In);
    }

    pub fn forward_has(&mut self, order: usize, owner: &Identifier, attribute: &Identifier) {
        self.edge(order, owner, attribute, EdgeKind::Has, Direction::Out);
    }

    pub fn backward_has(&mut self, order: usize, attribute: &Identifier, owner: &Identifier) {
        self.edge(order, attribute, owner, EdgeKind::Has, Direction::In);
    }

    pub fn forward_relating(&mut self, order: usize, relation: &Identifier, role: &Identifier) {
        self.edge(order, relation, role, EdgeKind::Relating, Direction::Out);
    }

    pub fn backward_relating(&mut self, order: usize, role: &Identifier, relation: &Identifier) {
        self.edge(order, role, relation, EdgeKind::Relating, Direction::In);
    }

    pub fn forward_playing(&mut self, order: usize, player: &Identifier, role: &Identifier) {
        self.edge(order, player, role, EdgeKind::Playing, Direction::Out);
    }

    pub fn backward_playing(&mut self, order: usize, role: &Identifier, player: &Identifier) {
        self.edge(order, role, player, EdgeKind::Playing, Direction::In);
    }

    pub fn forward_role_player<const N: usize>(
        &mut self,
        order: usize,
        relation: &Identifier,
        player: &Identifier,
        role_types: [&str; N],
    ) {
        let role_types = role_types.iter().map(|l| l.to_string()).collect();
        self.edge(order, relation, player, EdgeKind::RolePlayer { role_types }, Direction::Out);
    }

    pub fn backward_role_player<const N: usize>(
        &mut self,
        order: usize,
        player: &Identifier,
        relation: &Identifier,
        role_types: [&str; N],
    ) {
        let role_types = role_types.iter().map(|l| l.to_string()).collect();
        self.edge(order, player, relation, EdgeKind::RolePlayer { role_types }, Direction::In);
    }

    /// Validates the plan shape: one starting vertex, edge orders `1..n`
    /// with no gaps, every edge's source bound before its step runs.
    pub fn build(self) -> Result<Arc<Procedure>> {
        let start = self
            .vertices
            .values()
            .find(|v| v.is_start)
            .map(|v| v.id.clone())
            .ok_or_else(|| UmbraError::InvalidArgument("procedure has no starting vertex".into()))?;
        if self.vertices.values().filter(|v| v.is_start).count() > 1 {
            return Err(UmbraError::InvalidArgument(
                "procedure has more than one starting vertex".into(),
            ));
        }
        let mut edges = Vec::with_capacity(self.edges.len());
        let mut bound: HashSet<Identifier> = HashSet::from([start.clone()]);
        for (expected, (order, edge)) in self.edges.into_iter().enumerate() {
            if order != expected + 1 {
                return Err(UmbraError::InvalidArgument(format!(
                    "edge orders must be contiguous from 1; missing order {}",
                    expected + 1
                )));
            }
            if !self.vertices.contains_key(&edge.from) || !self.vertices.contains_key(&edge.to) {
                return Err(UmbraError::InvalidArgument(format!(
                    "edge {order} references an unregistered variable"
                )));
            }
            if !bound.contains(&edge.from) {
                return Err(UmbraError::InvalidArgument(format!(
                    "edge {order} starts at an unbound variable"
                )));
            }
            bound.insert(edge.to.clone());
            edges.push(edge);
        }
        Ok(Arc::new(Procedure { vertices: self.vertices, edges, start }))
    }
}
