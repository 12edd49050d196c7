//! Schema mutation scenarios: label index consistency, rename collisions,
//! supertype cycles, delete completeness.

use umbra::encoding::Prefix;
use umbra::storage::Storage;
use umbra::{Database, Mode, TypeEncoding, UmbraError, ValueType};

#[test]
fn rename_to_taken_label_is_rejected() {
    let db = Database::new().unwrap();
    let tx = db.transaction(Mode::Write).unwrap();
    let graph = tx.graph();
    let person = graph.create_type(Prefix::EntityType, "person", None).unwrap();
    let dog = graph.create_type(Prefix::EntityType, "dog", None).unwrap();

    let err = dog.set_label(graph, "person").unwrap_err();
    assert!(matches!(err, UmbraError::SchemaMutation(_)));

    // the index still resolves "person" to the original vertex, both remain
    let resolved = graph.type_by_label("person").unwrap().unwrap();
    assert_eq!(resolved.iid(), person.iid());
    assert_eq!(dog.label(), "dog");
    assert!(graph.type_by_label("dog").unwrap().is_some());
    tx.commit().unwrap();
}

#[test]
fn creating_duplicate_label_is_rejected() {
    let db = Database::new().unwrap();
    let tx = db.transaction(Mode::Write).unwrap();
    let graph = tx.graph();
    graph.create_type(Prefix::EntityType, "person", None).unwrap();
    let err = graph
        .create_type(Prefix::RelationType, "person", None)
        .unwrap_err();
    assert!(matches!(err, UmbraError::SchemaMutation(_)));
}

#[test]
fn persisted_rename_updates_index_atomically() {
    let db = Database::new().unwrap();
    let tx = db.transaction(Mode::Write).unwrap();
    tx.graph()
        .create_type(Prefix::EntityType, "person", None)
        .unwrap();
    tx.commit().unwrap();

    let tx = db.transaction(Mode::Write).unwrap();
    let graph = tx.graph();
    let person = graph.type_by_label("person").unwrap().unwrap();
    person.set_label(graph, "human").unwrap();
    // inside the transaction: new pair visible, old pair gone
    assert!(graph.type_by_label("person").unwrap().is_none());
    let renamed = graph.type_by_label("human").unwrap().unwrap();
    assert_eq!(renamed.iid(), person.iid());
    tx.commit().unwrap();

    let tx = db.transaction(Mode::Read).unwrap();
    let graph = tx.graph();
    assert!(graph.type_by_label("person").unwrap().is_none());
    let reloaded = graph.type_by_label("human").unwrap().unwrap();
    assert_eq!(reloaded.label(), "human");
}

#[test]
fn role_types_use_scoped_labels() {
    let db = Database::new().unwrap();
    let tx = db.transaction(Mode::Write).unwrap();
    let graph = tx.graph();
    let friendship = graph
        .create_type(Prefix::RelationType, "friendship", None)
        .unwrap();
    let friend = graph
        .create_type(Prefix::RoleType, "friend", Some("friendship"))
        .unwrap();
    graph
        .put_type_edge(&friendship, TypeEncoding::Relates, &friend)
        .unwrap();
    assert_eq!(friend.scoped_label(), "friendship:friend");
    tx.commit().unwrap();

    let tx = db.transaction(Mode::Read).unwrap();
    let reloaded = tx.graph().type_by_label("friendship:friend").unwrap().unwrap();
    assert_eq!(reloaded.label(), "friend");
    assert_eq!(reloaded.scope().as_deref(), Some("friendship"));
}

#[test]
fn supertype_cycles_are_rejected() {
    let db = Database::new().unwrap();
    let tx = db.transaction(Mode::Write).unwrap();
    let graph = tx.graph();
    let a = graph.create_type(Prefix::EntityType, "a", None).unwrap();
    let b = graph.create_type(Prefix::EntityType, "b", None).unwrap();
    let c = graph.create_type(Prefix::EntityType, "c", None).unwrap();
    graph.put_type_edge(&a, TypeEncoding::Sub, &b).unwrap();
    graph.put_type_edge(&b, TypeEncoding::Sub, &c).unwrap();

    let err = graph.put_type_edge(&c, TypeEncoding::Sub, &a).unwrap_err();
    assert!(matches!(err, UmbraError::SchemaMutation(_)));
    let err = graph.put_type_edge(&a, TypeEncoding::Sub, &a).unwrap_err();
    assert!(matches!(err, UmbraError::SchemaMutation(_)));

    // the transaction stays usable after a rejected mutation
    assert_eq!(graph.super_types(a.iid()).unwrap(), vec![b.iid(), c.iid()]);
}

#[test]
fn persisted_properties_are_read_lazily() {
    let db = Database::new().unwrap();
    let tx = db.transaction(Mode::Write).unwrap();
    let graph = tx.graph();
    let name = graph.create_type(Prefix::AttributeType, "name", None).unwrap();
    name.set_value_type(graph, ValueType::String).unwrap();
    name.set_regex(graph, "[A-Z][a-z]*").unwrap();
    name.set_abstract(graph, true).unwrap();
    tx.commit().unwrap();

    let tx = db.transaction(Mode::Read).unwrap();
    let graph = tx.graph();
    let name = graph.type_by_label("name").unwrap().unwrap();
    assert_eq!(name.value_type(graph).unwrap(), Some(ValueType::String));
    assert_eq!(name.regex(graph).unwrap().as_deref(), Some("[A-Z][a-z]*"));
    assert!(name.is_abstract(graph).unwrap());
}

#[test]
fn deleted_type_leaves_no_keys_behind() {
    let db = Database::new().unwrap();
    let tx = db.transaction(Mode::Write).unwrap();
    let graph = tx.graph();
    let person = graph.create_type(Prefix::EntityType, "person", None).unwrap();
    let animal = graph.create_type(Prefix::EntityType, "animal", None).unwrap();
    graph.put_type_edge(&person, TypeEncoding::Sub, &animal).unwrap();
    tx.commit().unwrap();

    let tx = db.transaction(Mode::Write).unwrap();
    let graph = tx.graph();
    let person = graph.type_by_label("person").unwrap().unwrap();
    let person_iid = person.iid();
    person.delete(graph).unwrap();
    tx.commit().unwrap();

    assert_eq!(db.storage().iterate(person_iid.bytes()).count(), 0);
    let tx = db.transaction(Mode::Read).unwrap();
    assert!(tx.graph().type_by_label("person").unwrap().is_none());
    // the mirror side of the SUB edge is gone too
    let animal = tx.graph().type_by_label("animal").unwrap().unwrap();
    let graph = tx.graph();
    assert_eq!(animal.ins().edges(graph.storage(), TypeEncoding::Sub).count(), 0);
}

#[test]
fn type_edges_carry_overridden_targets() {
    let db = Database::new().unwrap();
    let tx = db.transaction(Mode::Write).unwrap();
    let graph = tx.graph();
    let name = graph.create_type(Prefix::AttributeType, "name", None).unwrap();
    let nickname = graph
        .create_type(Prefix::AttributeType, "nickname", None)
        .unwrap();
    let person = graph.create_type(Prefix::EntityType, "person", None).unwrap();
    let edge = graph.put_type_edge(&person, TypeEncoding::Owns, &nickname).unwrap();
    edge.set_overridden(name.iid());
    tx.commit().unwrap();

    let tx = db.transaction(Mode::Read).unwrap();
    let graph = tx.graph();
    let person = graph.type_by_label("person").unwrap().unwrap();
    let nickname = graph.type_by_label("nickname").unwrap().unwrap();
    let reloaded = person
        .outs()
        .edge(graph.storage(), TypeEncoding::Owns, nickname.iid())
        .unwrap()
        .expect("persisted owns edge");
    let name = graph.type_by_label("name").unwrap().unwrap();
    assert_eq!(reloaded.overridden(), Some(name.iid()));
}

#[test]
fn key_generator_resumes_after_reopen() {
    let db = Database::new().unwrap();
    let tx = db.transaction(Mode::Write).unwrap();
    let graph = tx.graph();
    let person = graph.create_type(Prefix::EntityType, "person", None).unwrap();
    let first = graph.create_thing(person.iid()).unwrap();
    tx.commit().unwrap();

    let reopened = Database::open(db.storage().clone()).unwrap();
    let tx = reopened.transaction(Mode::Write).unwrap();
    let graph = tx.graph();
    let person = graph.type_by_label("person").unwrap().unwrap();
    let second = graph.create_thing(person.iid()).unwrap();
    assert_ne!(first.iid(), second.iid());
    let err = graph.create_type(Prefix::EntityType, "person", None).unwrap_err();
    assert!(matches!(err, UmbraError::SchemaMutation(_)));
}
