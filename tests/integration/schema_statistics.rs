#![allow(missing_docs)]

use typegraph::{Database, GraphOptions, Label, Result, TypeEdge, TypeEncoding, ValueType};

fn open() -> Result<Database> {
    Database::open_in_memory(GraphOptions::new().background_reconcile(false))
}

/// `person` (abstract) > `employee` > `manager`, a `name` attribute and a
/// `marriage` relation with one `spouse` role, committed.
fn office_schema(db: &Database) -> Result<()> {
    let graph = db.write()?;
    let schema = graph.schema();
    let person = schema.create(TypeEncoding::Entity, Label::new("person"))?;
    let employee = schema.create(TypeEncoding::Entity, Label::new("employee"))?;
    let manager = schema.create(TypeEncoding::Entity, Label::new("manager"))?;
    schema.set_supertype(employee, person)?;
    schema.set_supertype(manager, employee)?;
    schema.set_abstract(person, true)?;
    let name = schema.create(TypeEncoding::Attribute, Label::new("name"))?;
    schema.set_value_type(name, ValueType::String)?;
    let marriage = schema.create(TypeEncoding::Relation, Label::new("marriage"))?;
    let spouse = schema.create(TypeEncoding::Role, Label::scoped("spouse", "marriage"))?;
    schema.put_edge(marriage, TypeEdge::Relates, spouse)?;
    db.commit(graph)?;
    Ok(())
}

#[test]
fn bootstrap_counts_only_roots() -> Result<()> {
    let db = open()?;
    let read = db.read()?;
    let stats = read.schema().statistics();
    assert_eq!(stats.thing_type_count()?, 4);
    assert_eq!(stats.abstract_thing_type_count()?, 4);
    assert_eq!(stats.attribute_type_count()?, 1);
    assert_eq!(stats.relation_type_count()?, 1);
    assert_eq!(stats.role_type_count()?, 1);
    Ok(())
}

#[test]
fn counts_cover_every_category() -> Result<()> {
    let db = open()?;
    office_schema(&db)?;
    let read = db.read()?;
    let schema = read.schema();
    let stats = schema.statistics();
    assert_eq!(stats.thing_type_count()?, 9);
    assert_eq!(stats.abstract_thing_type_count()?, 5);
    assert_eq!(stats.attribute_type_count()?, 2);
    assert_eq!(stats.relation_type_count()?, 2);
    assert_eq!(stats.role_type_count()?, 2);

    let thing = schema.require_type(&Label::new("thing"))?;
    let entity = schema.require_type(&Label::new("entity"))?;
    let person = schema.require_type(&Label::new("person"))?;
    let manager = schema.require_type(&Label::new("manager"))?;
    assert_eq!(stats.subtype_count(thing)?, 3);
    assert_eq!(stats.subtype_count(entity)?, 1);
    assert_eq!(stats.subtype_count(manager)?, 0);
    assert_eq!(stats.transitive_subtype_count(thing)?, 8);
    assert_eq!(stats.transitive_subtype_count(person)?, 2);
    assert_eq!(stats.transitive_subtype_count(manager)?, 0);
    assert_eq!(stats.subtype_depth(thing)?, 4);
    assert_eq!(stats.subtype_depth(person)?, 2);
    assert_eq!(stats.subtype_depth(manager)?, 0);
    Ok(())
}

#[test]
fn read_view_statistics_stay_fixed_after_later_commits() -> Result<()> {
    let db = open()?;
    office_schema(&db)?;
    let read = db.read()?;
    let schema = read.schema();
    let person = schema.require_type(&Label::new("person"))?;
    assert_eq!(schema.statistics().thing_type_count()?, 9);
    assert_eq!(schema.statistics().transitive_subtype_count(person)?, 2);

    let graph = db.write()?;
    let intern = graph
        .schema()
        .create(TypeEncoding::Entity, Label::new("intern"))?;
    let writer_person = graph.schema().require_type(&Label::new("person"))?;
    graph.schema().set_supertype(intern, writer_person)?;
    db.commit(graph)?;

    // Same view, fresh statistics handle: memoised values are reused.
    assert_eq!(schema.statistics().thing_type_count()?, 9);
    assert_eq!(schema.statistics().transitive_subtype_count(person)?, 2);
    assert_eq!(schema.statistics().subtype_depth(person)?, 2);

    let later = db.read()?;
    let later_person = later.schema().require_type(&Label::new("person"))?;
    let stats = later.schema().statistics();
    assert_eq!(stats.thing_type_count()?, 10);
    assert_eq!(stats.transitive_subtype_count(later_person)?, 3);
    assert_eq!(stats.subtype_count(later_person)?, 2);
    Ok(())
}

#[test]
fn write_view_statistics_follow_its_own_changes() -> Result<()> {
    let db = open()?;
    office_schema(&db)?;
    let graph = db.write()?;
    let schema = graph.schema();
    let person = schema.require_type(&Label::new("person"))?;
    let stats = schema.statistics();
    assert_eq!(stats.thing_type_count()?, 9);
    assert_eq!(stats.subtype_count(person)?, 1);

    let intern = schema.create(TypeEncoding::Entity, Label::new("intern"))?;
    schema.set_supertype(intern, person)?;
    assert_eq!(stats.thing_type_count()?, 10);
    assert_eq!(stats.subtype_count(person)?, 2);
    assert_eq!(stats.transitive_subtype_count(person)?, 3);

    schema.set_abstract(intern, true)?;
    assert_eq!(stats.abstract_thing_type_count()?, 6);
    Ok(())
}
