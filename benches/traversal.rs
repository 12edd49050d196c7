use std::collections::HashSet;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use umbra::encoding::{Prefix, Value};
use umbra::traversal::procedure::Procedure;
use umbra::{Database, Mode, Parameters, ThingEncoding, ThingIid, TypeEncoding, ValueType};

const PERSONS: usize = 500;

fn seed() -> (Database, ThingIid) {
    let db = Database::new().unwrap();
    let tx = db.transaction(Mode::Write).unwrap();
    let relation_iid;
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

        let relation = graph.create_thing(friendship.iid()).unwrap();
        relation_iid = relation.iid().clone();
        for i in 0..PERSONS {
            let p = graph.create_thing(person.iid()).unwrap();
            p.put_has(
                &graph
                    .put_attribute(name.iid(), &Value::String(format!("name-{i}")))
                    .unwrap(),
            );
            graph.relate(&relation, &friend, &p).unwrap();
        }
    }
    tx.commit().unwrap();
    (db, relation_iid)
}

fn bench_role_player_scan(c: &mut Criterion) {
    let (db, relation_iid) = seed();
    let tx = db.transaction(Mode::Read).unwrap();
    let graph = tx.graph();
    let friend = graph.type_by_label("friendship:friend").unwrap().unwrap();
    let relation = graph.thing_vertex(&relation_iid).unwrap().unwrap();
    c.bench_function("role_player_scan", |b| {
        b.iter(|| {
            let count = relation
                .outs()
                .edges_optimised(graph.storage(), ThingEncoding::RolePlayer, friend.iid(), &[])
                .count();
            assert_eq!(black_box(count), PERSONS);
        })
    });
}

fn bench_has_traversal(c: &mut Criterion) {
    let (db, _) = seed();
    let tx = db.transaction(Mode::Read).unwrap();
    let mut proc = Procedure::builder();
    let n = proc.named_thing("n", true);
    proc.types(&n, ["name"]);
    let x = proc.named_thing("x", false);
    proc.types(&x, ["person"]);
    proc.backward_has(1, &n, &x);
    let procedure = proc.build().unwrap();
    let filter: HashSet<_> = [n, x].into_iter().collect();
    c.bench_function("has_traversal", |b| {
        b.iter(|| {
            let answers = procedure
                .iterator(tx.graph(), &Parameters::new(), &filter)
                .unwrap()
                .map(|answer| answer.unwrap())
                .count();
            assert_eq!(black_box(answers), PERSONS);
        })
    });
}

criterion_group!(benches, bench_role_player_scan, bench_has_traversal);
criterion_main!(benches);
