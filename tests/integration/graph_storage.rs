#![allow(missing_docs)]

use typegraph::{
    Database, ErrorKind, GraphOptions, Label, Result, Status, ThingEdge, TypeEdge, TypeEncoding,
    Value, ValueType,
};

fn open() -> Result<Database> {
    Database::open_in_memory(GraphOptions::new().background_reconcile(false))
}

/// `person` owning `name: string`, committed.
fn person_schema(db: &Database) -> Result<()> {
    let graph = db.write()?;
    let schema = graph.schema();
    let person = schema.create(TypeEncoding::Entity, Label::new("person"))?;
    let name = schema.create(TypeEncoding::Attribute, Label::new("name"))?;
    schema.set_value_type(name, ValueType::String)?;
    schema.put_edge(person, TypeEdge::Owns, name)?;
    db.commit(graph)?;
    Ok(())
}

#[test]
fn bootstrap_creates_abstract_roots() -> Result<()> {
    let db = open()?;
    let graph = db.read()?;
    let schema = graph.schema();
    let thing = schema.require_type(&Label::new("thing"))?;
    for name in ["entity", "attribute", "relation"] {
        let root = schema.require_type(&Label::new(name))?;
        assert!(schema.is_abstract(root)?);
        assert_eq!(schema.supertype(root)?, Some(thing));
    }
    let relation = schema.require_type(&Label::new("relation"))?;
    let role = schema.require_type(&Label::scoped("role", "relation"))?;
    assert_eq!(schema.outs(relation, TypeEdge::Relates)?[0].other, role);
    let attribute = schema.require_type(&Label::new("attribute"))?;
    assert_eq!(schema.value_type(attribute)?, Some(ValueType::Object));
    Ok(())
}

#[test]
fn created_instances_are_counted() -> Result<()> {
    let db = open()?;
    let graph = db.write()?;
    let person = graph
        .schema()
        .create(TypeEncoding::Entity, Label::new("person"))?;
    graph.data().create(person, false)?;
    graph.data().create(person, false)?;
    assert_eq!(graph.data().statistics().thing_vertex_count(person)?, 2);
    db.commit(graph)?;

    let read = db.read()?;
    let person = read.schema().require_type(&Label::new("person"))?;
    assert_eq!(read.data().statistics().thing_vertex_count(person)?, 2);
    assert_eq!(read.data().instances(person)?.len(), 2);
    Ok(())
}

#[test]
fn buffered_state_is_invisible_to_other_transactions() -> Result<()> {
    let db = open()?;
    let writer = db.write()?;
    let person = writer
        .schema()
        .create(TypeEncoding::Entity, Label::new("person"))?;
    let alice = writer.data().create(person, false)?;
    let iid = writer.data().iid(alice)?;
    assert!(writer.schema().iid(person)?.is_buffered());

    let reader = db.read()?;
    assert!(reader.schema().get_type(&Label::new("person"))?.is_none());
    assert!(reader.data().get_readable(&iid)?.is_none());

    writer.clear();
    db.commit(writer)?;
    assert!(db.read()?.schema().get_type(&Label::new("person"))?.is_none());
    Ok(())
}

#[test]
fn commit_writes_edges_between_persisted_vertices() -> Result<()> {
    let db = open()?;
    person_schema(&db)?;
    let graph = db.write()?;
    let person = graph.schema().require_type(&Label::new("person"))?;
    let name = graph.schema().require_type(&Label::new("name"))?;
    let alice = graph.data().create(person, false)?;
    let value = graph.data().put(name, Value::from("alice"), false)?;
    graph.data().put_edge(alice, ThingEdge::Has, value, false)?;
    db.commit(graph)?;

    let read = db.read()?;
    let person = read.schema().require_type(&Label::new("person"))?;
    let alice = read.data().instances(person)?[0];
    assert_eq!(read.data().status(alice)?, Status::Persisted);
    assert!(read.data().iid(alice)?.body().is_some_and(|body| body >= 0));

    let has = read.data().outs(alice, ThingEdge::Has)?;
    assert_eq!(has.len(), 1);
    assert_eq!(has[0].status, Status::Persisted);
    assert_eq!(read.data().value(has[0].other)?, Some(Value::from("alice")));
    let owners = read.data().ins(has[0].other, ThingEdge::Has)?;
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].other, alice);

    let iid = read.data().iid(alice)?;
    assert_eq!(read.data().get_readable(&iid)?, Some(alice));
    Ok(())
}

#[test]
fn attribute_put_deduplicates_within_a_transaction() -> Result<()> {
    let db = open()?;
    let graph = db.write()?;
    let age = graph
        .schema()
        .create(TypeEncoding::Attribute, Label::new("age"))?;
    graph.schema().set_value_type(age, ValueType::Long)?;
    let first = graph.data().put(age, Value::Long(10), false)?;
    let second = graph.data().put(age, Value::Long(10), false)?;
    assert_eq!(first, second);
    assert_eq!(graph.data().instances(age)?.len(), 1);
    assert_eq!(graph.data().statistics().thing_vertex_count(age)?, 1);
    Ok(())
}

#[test]
fn attribute_put_finds_stored_vertex() -> Result<()> {
    let db = open()?;
    let graph = db.write()?;
    let age = graph
        .schema()
        .create(TypeEncoding::Attribute, Label::new("age"))?;
    graph.schema().set_value_type(age, ValueType::Long)?;
    graph.data().put(age, Value::Long(10), false)?;
    db.commit(graph)?;

    let graph = db.write()?;
    let age = graph.schema().require_type(&Label::new("age"))?;
    let again = graph.data().put(age, Value::Long(10), false)?;
    assert_eq!(graph.data().status(again)?, Status::Persisted);
    assert_eq!(graph.data().instances(age)?, vec![again]);
    Ok(())
}

#[test]
fn explicit_put_promotes_inferred_attribute() -> Result<()> {
    let db = open()?;
    let graph = db.write()?;
    let age = graph
        .schema()
        .create(TypeEncoding::Attribute, Label::new("age"))?;
    graph.schema().set_value_type(age, ValueType::Long)?;
    let inferred = graph.data().put(age, Value::Long(5), true)?;
    assert!(graph.data().is_inferred(inferred)?);
    assert_eq!(graph.data().statistics().inferred_vertex_count(age), 1);
    assert_eq!(graph.data().statistics().thing_vertex_count(age)?, 0);

    let explicit = graph.data().put(age, Value::Long(5), false)?;
    assert_eq!(inferred, explicit);
    assert!(!graph.data().is_inferred(explicit)?);
    assert_eq!(graph.data().statistics().inferred_vertex_count(age), 0);
    assert_eq!(graph.data().statistics().thing_vertex_count(age)?, 1);
    Ok(())
}

#[test]
fn inferred_things_are_not_persisted() -> Result<()> {
    let db = open()?;
    let graph = db.write()?;
    let person = graph
        .schema()
        .create(TypeEncoding::Entity, Label::new("person"))?;
    graph.data().create(person, true)?;
    assert_eq!(graph.data().statistics().inferred_vertex_count(person), 1);
    db.commit(graph)?;

    let read = db.read()?;
    let person = read.schema().require_type(&Label::new("person"))?;
    assert!(read.data().instances(person)?.is_empty());
    assert_eq!(read.data().statistics().thing_vertex_count(person)?, 0);
    Ok(())
}

#[test]
fn deleting_a_thing_removes_its_edges() -> Result<()> {
    let db = open()?;
    person_schema(&db)?;
    let graph = db.write()?;
    let person = graph.schema().require_type(&Label::new("person"))?;
    let name = graph.schema().require_type(&Label::new("name"))?;
    let alice = graph.data().create(person, false)?;
    let value = graph.data().put(name, Value::from("alice"), false)?;
    graph.data().put_edge(alice, ThingEdge::Has, value, false)?;
    db.commit(graph)?;

    let graph = db.write()?;
    let person = graph.schema().require_type(&Label::new("person"))?;
    let alice = graph.data().instances(person)?[0];
    let value = graph.data().outs(alice, ThingEdge::Has)?[0].other;
    graph.data().delete(alice)?;
    assert!(graph.data().ins(value, ThingEdge::Has)?.is_empty());
    assert!(graph.data().instances(person)?.is_empty());
    db.commit(graph)?;

    let read = db.read()?;
    let person = read.schema().require_type(&Label::new("person"))?;
    let name = read.schema().require_type(&Label::new("name"))?;
    assert!(read.data().instances(person)?.is_empty());
    assert_eq!(read.data().statistics().thing_vertex_count(person)?, 0);
    let value = read.data().instances(name)?[0];
    assert!(read.data().ins(value, ThingEdge::Has)?.is_empty());
    Ok(())
}

#[test]
fn role_players_carry_their_role_type() -> Result<()> {
    let db = open()?;
    let graph = db.write()?;
    let schema = graph.schema();
    let person = schema.create(TypeEncoding::Entity, Label::new("person"))?;
    let marriage = schema.create(TypeEncoding::Relation, Label::new("marriage"))?;
    let spouse = schema.create(TypeEncoding::Role, Label::scoped("spouse", "marriage"))?;
    schema.put_edge(marriage, TypeEdge::Relates, spouse)?;
    schema.put_edge(person, TypeEdge::Plays, spouse)?;
    let alice = graph.data().create(person, false)?;
    let bob = graph.data().create(person, false)?;
    let wedding = graph.data().create(marriage, false)?;
    graph.data().put_role_player(wedding, alice, spouse, false)?;
    graph.data().put_role_player(wedding, bob, spouse, false)?;
    db.commit(graph)?;

    let read = db.read()?;
    let marriage = read.schema().require_type(&Label::new("marriage"))?;
    let spouse = read
        .schema()
        .require_type(&Label::scoped("spouse", "marriage"))?;
    let wedding = read.data().instances(marriage)?[0];
    let players = read.data().outs(wedding, ThingEdge::RolePlayer)?;
    assert_eq!(players.len(), 2);
    assert!(players.iter().all(|p| p.role_type == Some(spouse)));
    let person = read.schema().require_type(&Label::new("person"))?;
    for player in players {
        assert_eq!(read.data().type_of(player.other)?, person);
    }
    Ok(())
}

#[test]
fn instances_merge_stored_and_buffered() -> Result<()> {
    let db = open()?;
    let graph = db.write()?;
    let person = graph
        .schema()
        .create(TypeEncoding::Entity, Label::new("person"))?;
    graph.data().create(person, false)?;
    db.commit(graph)?;

    let graph = db.write()?;
    let person = graph.schema().require_type(&Label::new("person"))?;
    let fresh = graph.data().create(person, false)?;
    let all = graph.data().instances(person)?;
    assert_eq!(all.len(), 2);
    // buffered bodies are negative and sort first
    assert_eq!(all[0], fresh);
    Ok(())
}

#[test]
fn oversized_string_is_rejected() -> Result<()> {
    let db = open()?;
    let graph = db.write()?;
    let name = graph
        .schema()
        .create(TypeEncoding::Attribute, Label::new("name"))?;
    graph.schema().set_value_type(name, ValueType::String)?;
    let err = graph
        .data()
        .put(name, Value::String("x".repeat(70_000)), false)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IllegalValueSize);
    Ok(())
}

#[test]
fn read_only_graphs_reject_writes() -> Result<()> {
    let db = open()?;
    let read = db.read()?;
    let err = read
        .schema()
        .create(TypeEncoding::Entity, Label::new("person"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SchemaReadViolation);
    let entity = read.schema().require_type(&Label::new("entity"))?;
    assert_eq!(
        read.data().create(entity, false).unwrap_err().kind(),
        ErrorKind::Invalid
    );
    assert_eq!(read.commit().unwrap_err().kind(), ErrorKind::Invalid);
    Ok(())
}
