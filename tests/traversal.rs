//! Procedure execution scenarios, including the two backtracking
//! regressions: scope clearing when a reflexive relation is revisited, and
//! seek jumps that must not skip alternative closure candidates.

use std::collections::HashSet;

use umbra::encoding::{Prefix, Value};
use umbra::traversal::procedure::Procedure;
use umbra::{
    Database, Identifier, Mode, Parameters, PredicateOp, ThingIid, TraversalVertex, TypeEncoding,
    ValueType,
};

fn filter<const N: usize>(ids: [&Identifier; N]) -> HashSet<Identifier> {
    ids.iter().map(|id| (*id).clone()).collect()
}

fn bound_thing(answer: &umbra::VertexMap, id: &Identifier) -> ThingIid {
    match answer.get(id) {
        Some(TraversalVertex::Thing(iid)) => iid.clone(),
        other => panic!("expected a thing binding, got {other:?}"),
    }
}

#[test]
fn attribute_predicate_drives_has_traversal() {
    let db = Database::new().unwrap();
    let tx = db.transaction(Mode::Write).unwrap();
    {
        let graph = tx.graph();
        let person = graph.create_type(Prefix::EntityType, "person", None).unwrap();
        let name = graph.create_type(Prefix::AttributeType, "name", None).unwrap();
        name.set_value_type(graph, ValueType::String).unwrap();
        graph.put_type_edge(&person, TypeEncoding::Owns, &name).unwrap();

        let alex = graph.create_thing(person.iid()).unwrap();
        alex.put_has(
            &graph
                .put_attribute(name.iid(), &Value::String("Alex".into()))
                .unwrap(),
        );
        let john = graph.create_thing(person.iid()).unwrap();
        john.put_has(
            &graph
                .put_attribute(name.iid(), &Value::String("John".into()))
                .unwrap(),
        );
    }
    tx.commit().unwrap();

    let tx = db.transaction(Mode::Read).unwrap();
    let mut proc = Procedure::builder();
    let n = proc.named_thing("n", true);
    proc.types(&n, ["name"]);
    proc.predicate(&n, PredicateOp::Eq);
    let x = proc.named_thing("x", false);
    proc.types(&x, ["person"]);
    proc.backward_has(1, &n, &x);
    let procedure = proc.build().unwrap();

    let mut params = Parameters::new();
    params.push_value(n.clone(), PredicateOp::Eq, Value::String("Alex".into()));

    let answers: Vec<_> = procedure
        .iterator(tx.graph(), &params, &filter([&n, &x]))
        .unwrap()
        .map(|answer| answer.unwrap())
        .collect();
    assert_eq!(answers.len(), 1);
    let x_binding = bound_thing(&answers[0], &x);
    let graph = tx.graph();
    let x_vertex = graph.thing_vertex(&x_binding).unwrap().unwrap();
    let names: Vec<_> = x_vertex
        .outs()
        .edges(graph.storage(), umbra::ThingEncoding::Has, &[])
        .map(|view| view.edge.to().value().unwrap().unwrap())
        .collect();
    assert_eq!(names, vec![Value::String("Alex".into())]);
}

/// The §8.5-style regression: walking a reflexive friendship before the real
/// one must not leave stale role-instance claims behind after backtracking.
/// A failure to clear the scope makes this query return no answers.
#[test]
fn closure_backtrack_clears_scopes() {
    let db = Database::new().unwrap();
    let tx = db.transaction(Mode::Write).unwrap();
    {
        let graph = tx.graph();
        let person = graph.create_type(Prefix::EntityType, "person", None).unwrap();
        let name = graph.create_type(Prefix::AttributeType, "name", None).unwrap();
        name.set_value_type(graph, ValueType::String).unwrap();
        let lastname = graph
            .create_type(Prefix::AttributeType, "lastname", None)
            .unwrap();
        lastname.set_value_type(graph, ValueType::String).unwrap();
        let reference = graph.create_type(Prefix::AttributeType, "ref", None).unwrap();
        reference.set_value_type(graph, ValueType::Long).unwrap();
        let friendship = graph
            .create_type(Prefix::RelationType, "friendship", None)
            .unwrap();
        let friend = graph
            .create_type(Prefix::RoleType, "friend", Some("friendship"))
            .unwrap();
        graph.put_type_edge(&person, TypeEncoding::Owns, &name).unwrap();
        graph.put_type_edge(&person, TypeEncoding::Owns, &lastname).unwrap();
        graph
            .put_type_edge(&friendship, TypeEncoding::Owns, &reference)
            .unwrap();
        graph
            .put_type_edge(&friendship, TypeEncoding::Relates, &friend)
            .unwrap();

        let smith = graph
            .put_attribute(lastname.iid(), &Value::String("Smith".into()))
            .unwrap();
        let x = graph.create_thing(person.iid()).unwrap();
        x.put_has(&smith);
        x.put_has(
            &graph
                .put_attribute(name.iid(), &Value::String("Alex".into()))
                .unwrap(),
        );
        let y = graph.create_thing(person.iid()).unwrap();
        y.put_has(&smith);
        y.put_has(
            &graph
                .put_attribute(name.iid(), &Value::String("John".into()))
                .unwrap(),
        );

        let mut friendship_with_ref = |a, b, ref_value: i64| {
            let relation = graph.create_thing(friendship.iid()).unwrap();
            graph.relate(&relation, &friend, a).unwrap();
            graph.relate(&relation, &friend, b).unwrap();
            relation.put_has(
                &graph
                    .put_attribute(reference.iid(), &Value::Long(ref_value))
                    .unwrap(),
            );
        };
        friendship_with_ref(&x, &y, 1);
        friendship_with_ref(&x, &y, 2);
        friendship_with_ref(&x, &x, 3);
    }
    tx.commit().unwrap();

    let tx = db.transaction(Mode::Read).unwrap();
    let mut proc = Procedure::builder();
    let anon0 = proc.anonymous_thing(0);
    proc.types(&anon0, ["name"]);
    proc.predicate(&anon0, PredicateOp::Eq);
    let anon1 = proc.anonymous_thing(1);
    proc.types(&anon1, ["name"]);
    proc.predicate(&anon1, PredicateOp::Eq);
    let f1 = proc.named_thing("f1", false);
    proc.types(&f1, ["friendship"]);
    let refl = proc.named_thing("refl", false);
    proc.types(&refl, ["friendship"]);
    let n = proc.named_thing("n", true);
    proc.types(&n, ["lastname"]);
    let r1 = proc.named_thing("r1", false);
    proc.types(&r1, ["ref"]);
    proc.predicate(&r1, PredicateOp::Eq);
    let r2 = proc.named_thing("r2", false);
    proc.types(&r2, ["ref"]);
    proc.predicate(&r2, PredicateOp::Eq);
    let x = proc.named_thing("x", false);
    proc.types(&x, ["person"]);
    let y = proc.named_thing("y", false);
    proc.types(&y, ["person"]);

    proc.backward_has(1, &n, &x);
    proc.backward_has(2, &n, &y);
    proc.forward_has(3, &x, &anon0);
    proc.backward_role_player(4, &x, &refl, ["friendship:friend"]);
    proc.backward_role_player(5, &x, &refl, ["friendship:friend"]);
    proc.backward_role_player(6, &x, &f1, ["friendship:friend"]);
    proc.forward_has(7, &y, &anon1);
    proc.backward_role_player(8, &y, &f1, ["friendship:friend"]);
    proc.forward_has(9, &refl, &r1);
    proc.forward_has(10, &f1, &r2);
    let procedure = proc.build().unwrap();

    let mut params = Parameters::new();
    params.push_value(anon0.clone(), PredicateOp::Eq, Value::String("Alex".into()));
    params.push_value(anon1.clone(), PredicateOp::Eq, Value::String("John".into()));
    params.push_value(r1.clone(), PredicateOp::Eq, Value::Long(3));
    params.push_value(r2.clone(), PredicateOp::Eq, Value::Long(1));

    let answers: Vec<_> = procedure
        .iterator(
            tx.graph(),
            &params,
            &filter([&n, &x, &y, &refl, &f1, &r1, &r2, &anon0, &anon1]),
        )
        .unwrap()
        .map(|answer| answer.unwrap())
        .collect();
    assert!(!answers.is_empty(), "scope leakage across backtracks drops this answer");
    let first = &answers[0];
    assert_ne!(bound_thing(first, &x), bound_thing(first, &y));
    assert_ne!(bound_thing(first, &refl), bound_thing(first, &f1));
}

/// The §8.6-style regression: a closure step between the seek origin and
/// the branch cause still has alternative candidates; jumping over it would
/// miss the answer through the second relation.
#[test]
fn backtrack_seeks_do_not_skip_answers() {
    let db = Database::new().unwrap();
    let tx = db.transaction(Mode::Write).unwrap();
    {
        let graph = tx.graph();
        let person = graph.create_type(Prefix::EntityType, "person", None).unwrap();
        let dog = graph.create_type(Prefix::EntityType, "dog", None).unwrap();
        let friendship = graph
            .create_type(Prefix::RelationType, "friendship", None)
            .unwrap();
        let friend = graph
            .create_type(Prefix::RoleType, "friend", Some("friendship"))
            .unwrap();
        graph
            .put_type_edge(&friendship, TypeEncoding::Relates, &friend)
            .unwrap();

        let p = graph.create_thing(person.iid()).unwrap();
        let first = graph.create_thing(friendship.iid()).unwrap();
        graph.relate(&first, &friend, &p).unwrap();
        let d = graph.create_thing(dog.iid()).unwrap();
        let second = graph.create_thing(friendship.iid()).unwrap();
        graph.relate(&second, &friend, &d).unwrap();
    }
    tx.commit().unwrap();

    let tx = db.transaction(Mode::Read).unwrap();
    let mut proc = Procedure::builder();
    let rel_type = proc.named_type("rel-type", true);
    proc.labels(&rel_type, ["friendship"]);
    let role_type = proc.named_type("role-type", false);
    proc.labels(&role_type, ["friendship:friend"]);
    let rel = proc.named_thing("rel", false);
    proc.types(&rel, ["friendship"]);
    let friend = proc.named_thing("friend", false);
    proc.types(&friend, ["dog"]);
    let role = proc.scoped_thing(&rel, &role_type, &friend, 0);
    proc.types(&role, ["friendship:friend"]);

    proc.forward_relates(1, &rel_type, &role_type);
    proc.backward_isa(2, &rel_type, &rel, true);
    proc.backward_isa(3, &role_type, &role, true);
    proc.forward_relating(4, &rel, &role);
    proc.backward_playing(5, &role, &friend);
    let procedure = proc.build().unwrap();

    let answers: Vec<_> = procedure
        .iterator(
            tx.graph(),
            &Parameters::new(),
            &filter([&rel_type, &role_type, &rel, &friend]),
        )
        .unwrap()
        .map(|answer| answer.unwrap())
        .collect();
    assert_eq!(answers.len(), 1, "seek jump skipped a closure alternative");
}

/// A role-player edge whose target is a scoped variable claims into its
/// scope both as the edge (the role instance) and as the vertex (the
/// binding). Backtracking through such a step must release both claims
/// together; a leaked edge claim blocks the role instance for every later
/// step of the same scope and drops the only answer here.
#[test]
fn scoped_role_player_backtrack_releases_claims() {
    let db = Database::new().unwrap();
    let tx = db.transaction(Mode::Write).unwrap();
    {
        let graph = tx.graph();
        let person = graph.create_type(Prefix::EntityType, "person", None).unwrap();
        let name = graph.create_type(Prefix::AttributeType, "name", None).unwrap();
        name.set_value_type(graph, ValueType::String).unwrap();
        graph.put_type_edge(&person, TypeEncoding::Owns, &name).unwrap();
        let friendship = graph
            .create_type(Prefix::RelationType, "friendship", None)
            .unwrap();
        let friend = graph
            .create_type(Prefix::RoleType, "friend", Some("friendship"))
            .unwrap();
        graph
            .put_type_edge(&friendship, TypeEncoding::Relates, &friend)
            .unwrap();

        let x = graph.create_thing(person.iid()).unwrap();
        x.put_has(
            &graph
                .put_attribute(name.iid(), &Value::String("Alex".into()))
                .unwrap(),
        );
        let y = graph.create_thing(person.iid()).unwrap();
        y.put_has(
            &graph
                .put_attribute(name.iid(), &Value::String("John".into()))
                .unwrap(),
        );
        let relation = graph.create_thing(friendship.iid()).unwrap();
        graph.relate(&relation, &friend, &x).unwrap();
        graph.relate(&relation, &friend, &y).unwrap();
    }
    tx.commit().unwrap();

    let tx = db.transaction(Mode::Read).unwrap();
    let mut proc = Procedure::builder();
    let rel_type = proc.labelled_type("friendship", true);
    let rel = proc.named_thing("rel", false);
    proc.types(&rel, ["friendship"]);
    let role_type = Identifier::label("friendship:friend");
    let s1 = proc.scoped_thing(&rel, &role_type, &Identifier::name("p0"), 0);
    proc.types(&s1, ["person"]);
    let s2 = proc.scoped_thing(&rel, &role_type, &Identifier::name("p1"), 1);
    proc.types(&s2, ["person"]);
    let nm1 = proc.anonymous_thing(0);
    proc.types(&nm1, ["name"]);
    proc.predicate(&nm1, PredicateOp::Eq);
    let nm2 = proc.anonymous_thing(1);
    proc.types(&nm2, ["name"]);
    proc.predicate(&nm2, PredicateOp::Eq);

    // the first role-player assignment (s1 = Alex's role) fails at step 4
    // and must be fully unclaimed before s1 rebinds to John's role
    proc.backward_isa(1, &rel_type, &rel, true);
    proc.forward_role_player(2, &rel, &s1, ["friendship:friend"]);
    proc.forward_role_player(3, &rel, &s2, ["friendship:friend"]);
    proc.forward_has(4, &s2, &nm2);
    proc.forward_has(5, &s1, &nm1);
    let procedure = proc.build().unwrap();

    let mut params = Parameters::new();
    params.push_value(nm2.clone(), PredicateOp::Eq, Value::String("Alex".into()));
    params.push_value(nm1.clone(), PredicateOp::Eq, Value::String("John".into()));

    let answers: Vec<_> = procedure
        .iterator(tx.graph(), &params, &filter([&rel, &nm1, &nm2]))
        .unwrap()
        .map(|answer| answer.unwrap())
        .collect();
    assert_eq!(answers.len(), 1, "a leaked role-instance claim blocks the rebind");
}

#[test]
fn isa_traversal_is_transitive_through_sub() {
    let db = Database::new().unwrap();
    let tx = db.transaction(Mode::Write).unwrap();
    {
        let graph = tx.graph();
        let animal = graph.create_type(Prefix::EntityType, "animal", None).unwrap();
        let dog = graph.create_type(Prefix::EntityType, "dog", None).unwrap();
        graph.put_type_edge(&dog, TypeEncoding::Sub, &animal).unwrap();
        graph.create_thing(dog.iid()).unwrap();
        graph.create_thing(animal.iid()).unwrap();
    }
    tx.commit().unwrap();

    let tx = db.transaction(Mode::Read).unwrap();
    let mut proc = Procedure::builder();
    let t = proc.labelled_type("animal", true);
    let thing = proc.named_thing("thing", false);
    proc.backward_isa(1, &t, &thing, true);
    let procedure = proc.build().unwrap();
    let answers: Vec<_> = procedure
        .iterator(tx.graph(), &Parameters::new(), &filter([&thing]))
        .unwrap()
        .map(|answer| answer.unwrap())
        .collect();
    assert_eq!(answers.len(), 2);

    // non-transitive isa only reaches direct instances
    let mut proc = Procedure::builder();
    let t = proc.labelled_type("animal", true);
    let thing = proc.named_thing("thing", false);
    proc.backward_isa(1, &t, &thing, false);
    let procedure = proc.build().unwrap();
    let answers: Vec<_> = procedure
        .iterator(tx.graph(), &Parameters::new(), &filter([&thing]))
        .unwrap()
        .map(|answer| answer.unwrap())
        .collect();
    assert_eq!(answers.len(), 1);
}

#[test]
fn producer_matches_sequential_answers() {
    let db = Database::new().unwrap();
    let tx = db.transaction(Mode::Write).unwrap();
    {
        let graph = tx.graph();
        let person = graph.create_type(Prefix::EntityType, "person", None).unwrap();
        let lastname = graph
            .create_type(Prefix::AttributeType, "lastname", None)
            .unwrap();
        lastname.set_value_type(graph, ValueType::String).unwrap();
        graph.put_type_edge(&person, TypeEncoding::Owns, &lastname).unwrap();
        for family in ["Smith", "Jones", "Miller"] {
            let attr = graph
                .put_attribute(lastname.iid(), &Value::String(family.into()))
                .unwrap();
            for _ in 0..4 {
                graph.create_thing(person.iid()).unwrap().put_has(&attr);
            }
        }
    }
    tx.commit().unwrap();

    let tx = db.transaction(Mode::Read).unwrap();
    let mut proc = Procedure::builder();
    let n = proc.named_thing("n", true);
    proc.types(&n, ["lastname"]);
    let x = proc.named_thing("x", false);
    proc.types(&x, ["person"]);
    proc.backward_has(1, &n, &x);
    let procedure = proc.build().unwrap();
    let ids = filter([&n, &x]);

    let sequential: HashSet<_> = procedure
        .iterator(tx.graph(), &Parameters::new(), &ids)
        .unwrap()
        .map(|answer| answer.unwrap())
        .collect();
    assert_eq!(sequential.len(), 12);

    let parallel: HashSet<_> = procedure
        .producer(tx.graph(), &Parameters::new(), &ids, 4)
        .unwrap()
        .map(|answer| answer.unwrap())
        .collect();
    assert_eq!(parallel, sequential);
}
