//! The backtracking search over a compiled procedure.
//!
//! A [`GraphIterator`] holds one starting binding and walks the procedure's
//! edges in order, keeping a frame per step with an iterator of candidate
//! targets. Exhausting a frame backtracks; a frame that produced no
//! candidate at all may jump straight back to the step that bound its
//! source variable, clamped so the jump never skips a closure frame or a
//! frame holding a role-instance claim (skipping those can drop answers).
//!
//! Role-player steps operate in scopes keyed by the relation variable: each
//! claims the role instance it traversed, a candidate whose role instance is
//! already claimed by another step of the same scope is rejected, and
//! popping a frame releases exactly its own claims. A single frame can hold
//! more than one claim (a role-player edge whose target is a scoped
//! variable claims as the edge and as the vertex), so claims accumulate per
//! frame and release together.
//!
//! Answers are pulled through the fallible [`GraphIterator::try_next`]; a
//! storage failure mid-traversal surfaces as `Err` and ends the search.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::trace;

use super::procedure::{EdgeKind, Procedure, ProcedureEdge, VertexKind, VertexProps};
use super::{Identifier, Parameters, PredicateOp, TraversalVertex, VertexMap};
use crate::encoding::{Direction, ThingEncoding, TypeEncoding, Value};
use crate::error::{Result, UmbraError};
use crate::graph::Graph;
use crate::iid::{Lookahead, ThingIid, TypeIid};

/// One candidate binding for a step: the target vertex, plus the role
/// instance the step traversed for role-player edges.
struct Candidate {
    vertex: TraversalVertex,
    role: Option<ThingIid>,
}

type CandidateIter = Box<dyn Iterator<Item = Candidate> + Send>;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum ScopeOwner {
    Edge(usize),
    Vertex(Identifier),
}

/// Role instances consumed per relation variable, by the step or scoped
/// vertex that claimed them.
#[derive(Default)]
struct Scopes {
    claims: HashMap<Identifier, HashMap<ScopeOwner, ThingIid>>,
}

impl Scopes {
    fn taken_by_other(&self, relation: &Identifier, owner: &ScopeOwner, role: &ThingIid) -> bool {
        self.claims
            .get(relation)
            .is_some_and(|claims| claims.iter().any(|(o, r)| o != owner && r == role))
    }

    fn record(&mut self, relation: Identifier, owner: ScopeOwner, role: ThingIid) {
        self.claims.entry(relation).or_default().insert(owner, role);
    }

    fn release(&mut self, relation: &Identifier, owner: &ScopeOwner) {
        if let Some(claims) = self.claims.get_mut(relation) {
            claims.remove(owner);
        }
    }
}

/// Effects of the currently applied candidate of one frame, undone when the
/// frame advances or pops.
struct Applied {
    bound_target: bool,
    claims: Vec<(Identifier, ScopeOwner)>,
}

struct Frame {
    target: Identifier,
    is_closure: bool,
    candidates: CandidateIter,
    current: Option<Applied>,
    yielded_any: bool,
}

enum State {
    Init,
    Emitted,
    Done,
}

pub struct GraphIterator {
    graph: Arc<Graph>,
    procedure: Arc<Procedure>,
    params: Parameters,
    filter: HashSet<Identifier>,
    start: TraversalVertex,
    answer: HashMap<Identifier, TraversalVertex>,
    binder: HashMap<Identifier, usize>,
    frames: Vec<Frame>,
    scopes: Scopes,
    state: State,
}

impl GraphIterator {
    pub fn new(
        graph: Arc<Graph>,
        procedure: Arc<Procedure>,
        params: Parameters,
        filter: HashSet<Identifier>,
        start: TraversalVertex,
    ) -> Self {
        Self {
            graph,
            procedure,
            params,
            filter,
            start,
            answer: HashMap::new(),
            binder: HashMap::new(),
            frames: Vec::new(),
            scopes: Scopes::default(),
            state: State::Init,
        }
    }

    /// Pulls the next answer. Missing answers are `Ok(None)`; a storage
    /// failure is `Err` and poisons the iterator.
    pub fn try_next(&mut self) -> Result<Option<VertexMap>> {
        match self.state {
            State::Done => Ok(None),
            State::Init => {
                let start_id = self.procedure.start().id.clone();
                self.answer.insert(start_id.clone(), self.start.clone());
                self.binder.insert(start_id, 0);
                if self.procedure.edge_count() == 0 {
                    self.state = State::Done;
                    return Ok(Some(self.project()));
                }
                self.search(1)
            }
            State::Emitted => {
                let last = self.procedure.edge_count();
                self.search(last)
            }
        }
    }

    fn project(&self) -> VertexMap {
        VertexMap::new(
            self.answer
                .iter()
                .filter(|(id, _)| id.is_retrievable() && self.filter.contains(*id))
                .map(|(id, vertex)| (id.clone(), vertex.clone()))
                .collect(),
        )
    }

    fn release(&mut self, step: usize) {
        let frame = &mut self.frames[step - 1];
        if let Some(applied) = frame.current.take() {
            if applied.bound_target {
                self.answer.remove(&frame.target);
                self.binder.remove(&frame.target);
            }
            for (relation, owner) in applied.claims {
                self.scopes.release(&relation, &owner);
            }
        }
    }

    /// Applies a candidate at `step`: claims its role instance and binds the
    /// target. Returns false (with nothing left applied) when a role
    /// instance is already consumed by another step of the same scope.
    fn apply(&mut self, step: usize, candidate: Candidate) -> bool {
        let edge = self.procedure.edge(step).clone();
        let is_closure = self.frames[step - 1].is_closure;
        let mut applied = Applied { bound_target: false, claims: Vec::new() };

        if let EdgeKind::RolePlayer { .. } = edge.kind {
            let relation_var = match edge.direction {
                Direction::Out => edge.from.clone(),
                Direction::In => edge.to.clone(),
            };
            let role = candidate.role.clone().expect("role-player candidate carries a role");
            let owner = ScopeOwner::Edge(step);
            if self.scopes.taken_by_other(&relation_var, &owner, &role) {
                return false;
            }
            self.scopes.record(relation_var.clone(), owner.clone(), role);
            applied.claims.push((relation_var, owner));
        }

        if !is_closure {
            // a scoped variable binding consumes its role instance in the
            // scope of its relation variable
            if let Identifier::Scoped { relation, .. } = &edge.to {
                if let TraversalVertex::Thing(role) = &candidate.vertex {
                    let owner = ScopeOwner::Vertex(edge.to.clone());
                    if self.scopes.taken_by_other(relation, &owner, role) {
                        for (relation, owner) in applied.claims.drain(..) {
                            self.scopes.release(&relation, &owner);
                        }
                        return false;
                    }
                    self.scopes.record((**relation).clone(), owner.clone(), role.clone());
                    applied.claims.push(((**relation).clone(), owner));
                }
            }
            self.answer.insert(edge.to.clone(), candidate.vertex);
            self.binder.insert(edge.to.clone(), step);
            applied.bound_target = true;
        }

        self.frames[step - 1].current = Some(applied);
        true
    }

    /// Where to resume after the frame at `failed_step` is exhausted. A
    /// frame that never yielded jumps to the binder of its source variable,
    /// clamped at intermediate closure or claiming frames.
    fn backtrack_target(&self, failed_step: usize) -> usize {
        let frame = &self.frames[failed_step - 1];
        if frame.yielded_any {
            return failed_step - 1;
        }
        let edge = self.procedure.edge(failed_step);
        let cause = self.binder.get(&edge.from).copied().unwrap_or(0);
        let mut target = cause;
        for step in (cause + 1)..failed_step {
            let intermediate = &self.frames[step - 1];
            let claims = intermediate
                .current
                .as_ref()
                .is_some_and(|applied| !applied.claims.is_empty());
            if intermediate.is_closure || claims {
                target = target.max(step);
            }
        }
        if target < failed_step - 1 {
            trace!(failed_step, target, "seek backtrack");
        }
        target
    }

    fn create_frame(&self, step: usize) -> Result<Frame> {
        let edge = self.procedure.edge(step);
        let source = self.answer[&edge.from].clone();
        let bound_target = self.answer.get(&edge.to).cloned();
        let candidates = candidate_iterator(
            &self.graph,
            &self.procedure,
            &self.params,
            edge,
            &source,
            bound_target.as_ref(),
        )?;
        Ok(Frame {
            target: edge.to.clone(),
            is_closure: bound_target.is_some(),
            candidates,
            current: None,
            yielded_any: false,
        })
    }

    fn search(&mut self, mut step: usize) -> Result<Option<VertexMap>> {
        let edge_count = self.procedure.edge_count();
        loop {
            if step == 0 {
                self.state = State::Done;
                return Ok(None);
            }
            if self.frames.len() < step {
                let frame = match self.create_frame(step) {
                    Ok(frame) => frame,
                    Err(err) => {
                        self.state = State::Done;
                        return Err(err);
                    }
                };
                self.frames.push(frame);
            } else {
                self.release(step);
            }
            match self.frames[step - 1].candidates.next() {
                Some(candidate) => {
                    self.frames[step - 1].yielded_any = true;
                    if !self.apply(step, candidate) {
                        continue;
                    }
                    if step == edge_count {
                        self.state = State::Emitted;
                        return Ok(Some(self.project()));
                    }
                    step += 1;
                }
                None => {
                    let jump = self.backtrack_target(step);
                    while self.frames.len() > jump {
                        self.release(self.frames.len());
                        self.frames.pop();
                    }
                    step = jump;
                }
            }
        }
    }
}

// --- candidate enumeration ---------------------------------------------------

fn resolve_types(
    graph: &Graph,
    labels: impl IntoIterator<Item = String>,
) -> Result<HashSet<TypeIid>> {
    let mut resolved = HashSet::new();
    for label in labels {
        if let Some(vertex) = graph.type_by_label(&label)? {
            resolved.insert(vertex.iid());
        }
    }
    Ok(resolved)
}

/// Compiles a thing-vertex property check into a predicate over IIDs.
fn thing_filter(
    graph: &Graph,
    params: &Parameters,
    id: &Identifier,
    props: &VertexProps,
) -> Result<impl Fn(&ThingIid) -> bool + Send + 'static> {
    let allowed = if props.types.is_empty() {
        None
    } else {
        Some(resolve_types(graph, props.types.iter().cloned())?)
    };
    let predicate: Option<(PredicateOp, Value)> = props
        .predicate
        .and_then(|_| params.value(id).cloned());
    Ok(move |iid: &ThingIid| {
        if let Some(allowed) = &allowed {
            if !allowed.contains(&iid.type_iid()) {
                return false;
            }
        }
        if let Some((op, value)) = &predicate {
            match iid.value().ok().flatten() {
                Some(actual) => {
                    if !op.test(&actual, value) {
                        return false;
                    }
                }
                None => return false,
            }
        }
        true
    })
}

fn type_filter(
    graph: &Graph,
    props: &VertexProps,
) -> Result<impl Fn(&TypeIid) -> bool + Send + 'static> {
    let allowed = if props.labels.is_empty() {
        None
    } else {
        Some(resolve_types(graph, props.labels.iter().cloned())?)
    };
    Ok(move |iid: &TypeIid| allowed.as_ref().map_or(true, |set| set.contains(iid)))
}

fn things(candidates: impl Iterator<Item = ThingIid> + Send + 'static) -> CandidateIter {
    Box::new(candidates.map(|iid| Candidate { vertex: TraversalVertex::Thing(iid), role: None }))
}

fn types(candidates: impl Iterator<Item = TypeIid> + Send + 'static) -> CandidateIter {
    Box::new(candidates.map(|iid| Candidate { vertex: TraversalVertex::Type(iid), role: None }))
}

/// Candidate targets of one procedure edge from a bound source. When the
/// target is already bound the same enumeration is narrowed to it, which for
/// role-player edges still yields one candidate per matching role instance.
fn candidate_iterator(
    graph: &Arc<Graph>,
    procedure: &Procedure,
    params: &Parameters,
    edge: &ProcedureEdge,
    source: &TraversalVertex,
    bound_target: Option<&TraversalVertex>,
) -> Result<CandidateIter> {
    let target_props = &procedure.vertex(&edge.to).expect("registered vertex").props;
    let branch = branch_iterator(graph, params, edge, source, target_props, &edge.to)?;
    Ok(match bound_target {
        None => branch,
        Some(bound) => {
            let bound = bound.clone();
            Box::new(branch.filter(move |candidate| candidate.vertex == bound))
        }
    })
}

fn branch_iterator(
    graph: &Arc<Graph>,
    params: &Parameters,
    edge: &ProcedureEdge,
    source: &TraversalVertex,
    target_props: &VertexProps,
    target_id: &Identifier,
) -> Result<CandidateIter> {
    match (&edge.kind, edge.direction) {
        (EdgeKind::Isa { transitive }, Direction::Out) => {
            let thing = source.as_thing().expect("isa source is a thing");
            let mut candidates = vec![thing.type_iid()];
            if *transitive {
                candidates.extend(graph.super_types(thing.type_iid())?);
            }
            let accept = type_filter(graph, target_props)?;
            Ok(types(candidates.into_iter().filter(move |iid| accept(iid))))
        }
        (EdgeKind::Isa { transitive }, Direction::In) => {
            let type_iid = source.as_type().expect("reverse isa source is a type");
            let sources = if *transitive {
                graph.sub_types_transitive(type_iid)?
            } else {
                vec![type_iid]
            };
            let graph = Arc::clone(graph);
            let accept = thing_filter(&graph, params, target_id, target_props)?;
            Ok(things(
                sources
                    .into_iter()
                    .flat_map(move |t| graph.things_of_type(t))
                    .filter(move |iid| accept(iid)),
            ))
        }
        (EdgeKind::Sub { transitive }, Direction::Out) => {
            let type_iid = source.as_type().expect("sub source is a type");
            let candidates = if *transitive {
                let mut all = vec![type_iid];
                all.extend(graph.super_types(type_iid)?);
                all
            } else {
                graph.super_types(type_iid)?.into_iter().take(1).collect()
            };
            let accept = type_filter(graph, target_props)?;
            Ok(types(candidates.into_iter().filter(move |iid| accept(iid))))
        }
        (EdgeKind::Sub { transitive }, Direction::In) => {
            let type_iid = source.as_type().expect("reverse sub source is a type");
            let candidates = if *transitive {
                graph.sub_types_transitive(type_iid)?
            } else {
                type_adjacents(graph, type_iid, TypeEncoding::Sub, Direction::In)?
            };
            let accept = type_filter(graph, target_props)?;
            Ok(types(candidates.into_iter().filter(move |iid| accept(iid))))
        }
        (EdgeKind::Owns, direction) => {
            type_edge_candidates(graph, source, TypeEncoding::Owns, direction, target_props)
        }
        (EdgeKind::Plays, direction) => {
            type_edge_candidates(graph, source, TypeEncoding::Plays, direction, target_props)
        }
        (EdgeKind::Relates, direction) => {
            type_edge_candidates(graph, source, TypeEncoding::Relates, direction, target_props)
        }
        (EdgeKind::Has, direction) => {
            thing_edge_candidates(graph, params, source, ThingEncoding::Has, direction, target_props, target_id)
        }
        (EdgeKind::Relating, direction) => {
            thing_edge_candidates(graph, params, source, ThingEncoding::Relating, direction, target_props, target_id)
        }
        (EdgeKind::Playing, direction) => {
            thing_edge_candidates(graph, params, source, ThingEncoding::Playing, direction, target_props, target_id)
        }
        (EdgeKind::RolePlayer { role_types }, direction) => {
            let owner = source.as_thing().expect("role-player source is a thing");
            let vertex = graph
                .thing_vertex(owner)?
                .ok_or(UmbraError::Corruption("bound vertex is missing"))?;
            let adjacency = match direction {
                Direction::Out => vertex.outs(),
                Direction::In => vertex.ins(),
            };
            let accept = thing_filter(graph, params, target_id, target_props)?;
            let resolved = resolve_types(graph, role_types.iter().cloned())?;
            let mut streams: Vec<CandidateIter> = Vec::new();
            for role_type in resolved {
                let views = adjacency.edges_optimised(
                    graph.storage(),
                    ThingEncoding::RolePlayer,
                    role_type,
                    &[],
                );
                streams.push(Box::new(views.map(move |view| Candidate {
                    vertex: TraversalVertex::Thing(view.edge.adjacent(direction).clone()),
                    role: view.edge.role_iid(),
                })));
            }
            Ok(Box::new(
                streams
                    .into_iter()
                    .flatten()
                    .filter(move |candidate| match &candidate.vertex {
                        TraversalVertex::Thing(iid) => accept(iid),
                        TraversalVertex::Type(_) => false,
                    }),
            ))
        }
    }
}

fn type_adjacents(
    graph: &Graph,
    source: TypeIid,
    encoding: TypeEncoding,
    direction: Direction,
) -> Result<Vec<TypeIid>> {
    let Some(vertex) = graph.type_vertex(source)? else {
        return Ok(Vec::new());
    };
    let adjacency = match direction {
        Direction::Out => vertex.outs(),
        Direction::In => vertex.ins(),
    };
    Ok(adjacency
        .edges(graph.storage(), encoding)
        .map(|view| view.edge.adjacent(direction))
        .collect())
}

fn type_edge_candidates(
    graph: &Arc<Graph>,
    source: &TraversalVertex,
    encoding: TypeEncoding,
    direction: Direction,
    target_props: &VertexProps,
) -> Result<CandidateIter> {
    let source = source.as_type().expect("type-edge source is a type");
    let accept = type_filter(graph, target_props)?;
    Ok(types(
        type_adjacents(graph, source, encoding, direction)?
            .into_iter()
            .filter(move |iid| accept(iid)),
    ))
}

fn thing_edge_candidates(
    graph: &Arc<Graph>,
    params: &Parameters,
    source: &TraversalVertex,
    encoding: ThingEncoding,
    direction: Direction,
    target_props: &VertexProps,
    target_id: &Identifier,
) -> Result<CandidateIter> {
    let owner = source.as_thing().expect("thing-edge source is a thing");
    let vertex = graph
        .thing_vertex(owner)?
        .ok_or(UmbraError::Corruption("bound vertex is missing"))?;
    let adjacency = match direction {
        Direction::Out => vertex.outs(),
        Direction::In => vertex.ins(),
    };
    let accept = thing_filter(graph, params, target_id, target_props)?;
    // narrow the scan with type lookaheads when the target's types are known
    let allowed = resolve_types(graph, target_props.types.iter().cloned())?;
    let streams: Vec<_> = if allowed.is_empty() {
        vec![adjacency.edges(graph.storage(), encoding, &[])]
    } else {
        allowed
            .into_iter()
            .map(|type_iid| {
                let chain = [
                    Lookahead::Prefix(type_iid.prefix().instance()),
                    Lookahead::Type(type_iid),
                ];
                adjacency.edges(graph.storage(), encoding, &chain)
            })
            .collect()
    };
    Ok(things(
        streams
            .into_iter()
            .flatten()
            .map(move |view| view.edge.adjacent(direction).clone())
            .filter(move |iid| accept(iid)),
    ))
}

/// Materializes the starting bindings of a procedure from the start
/// vertex's properties.
pub(crate) fn start_candidates(
    graph: &Arc<Graph>,
    procedure: &Procedure,
    params: &Parameters,
) -> Result<Vec<TraversalVertex>> {
    let start = procedure.start();
    match start.kind {
        VertexKind::Type => {
            let mut out = Vec::new();
            for label in &start.props.labels {
                if let Some(vertex) = graph.type_by_label(label)? {
                    out.push(TraversalVertex::Type(vertex.iid()));
                }
            }
            Ok(out)
        }
        VertexKind::Thing => {
            assert!(
                !start.props.types.is_empty(),
                "starting thing vertex requires instance types"
            );
            let mut type_iids = Vec::new();
            for label in &start.props.types {
                if let Some(vertex) = graph.type_by_label(label)? {
                    type_iids.push(vertex.iid());
                }
            }
            // content addressing answers equality predicates point-wise
            if let (Some(PredicateOp::Eq), Some((PredicateOp::Eq, value))) =
                (start.props.predicate, params.value(&start.id))
            {
                let mut out = Vec::new();
                for type_iid in type_iids {
                    if let Some(vertex) = graph.attribute(type_iid, value)? {
                        out.push(TraversalVertex::Thing(vertex.iid().clone()));
                    }
                }
                return Ok(out);
            }
            let accept = thing_filter(graph, params, &start.id, &start.props)?;
            let mut out = Vec::new();
            for type_iid in type_iids {
                for iid in graph.things_of_type(type_iid) {
                    if accept(&iid) {
                        out.push(TraversalVertex::Thing(iid));
                    }
                }
            }
            Ok(out)
        }
    }
}
