#![allow(missing_docs)]

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use typegraph::storage::CounterMetrics;
use typegraph::{
    Database, ErrorKind, GraphOptions, Label, Result, ThingEdge, TypeEdge, TypeEncoding, Value,
    ValueType,
};

fn open() -> Result<Database> {
    Database::open_in_memory(GraphOptions::new().background_reconcile(false))
}

/// `person` owning `name: string` and `age: long`, committed.
fn person_schema(db: &Database) -> Result<()> {
    let graph = db.write()?;
    let schema = graph.schema();
    let person = schema.create(TypeEncoding::Entity, Label::new("person"))?;
    let name = schema.create(TypeEncoding::Attribute, Label::new("name"))?;
    let age = schema.create(TypeEncoding::Attribute, Label::new("age"))?;
    schema.set_value_type(name, ValueType::String)?;
    schema.set_value_type(age, ValueType::Long)?;
    schema.put_edge(person, TypeEdge::Owns, name)?;
    schema.put_edge(person, TypeEdge::Owns, age)?;
    db.commit(graph)?;
    Ok(())
}

fn age_count(db: &Database) -> Result<i64> {
    let read = db.read()?;
    let age = read.schema().require_type(&Label::new("age"))?;
    read.data().statistics().thing_vertex_count(age)
}

fn put_age(db: &Database, value: i64) -> Result<()> {
    let graph = db.write()?;
    let age = graph.schema().require_type(&Label::new("age"))?;
    graph.data().put(age, Value::Long(value), false)?;
    db.commit(graph)?;
    Ok(())
}

#[test]
fn attribute_counts_settle_after_reconcile() -> Result<()> {
    let db = open()?;
    person_schema(&db)?;
    put_age(&db, 10)?;
    assert_eq!(age_count(&db)?, 0);

    let report = db.reconcile_statistics()?;
    assert_eq!(report.applied, 1);
    assert!(!report.remaining);
    assert_eq!(age_count(&db)?, 1);
    Ok(())
}

#[test]
fn concurrent_puts_of_one_value_count_once() -> Result<()> {
    let db = open()?;
    person_schema(&db)?;
    let first = db.write()?;
    let second = db.write()?;
    for graph in [&first, &second] {
        let age = graph.schema().require_type(&Label::new("age"))?;
        graph.data().put(age, Value::Long(30), false)?;
    }
    db.commit(first)?;
    db.commit(second)?;
    db.reconcile_statistics()?;
    assert_eq!(age_count(&db)?, 1);
    Ok(())
}

#[test]
fn late_duplicate_job_is_skipped() -> Result<()> {
    let db = open()?;
    person_schema(&db)?;
    let late = db.write()?;
    let age = late.schema().require_type(&Label::new("age"))?;
    late.data().put(age, Value::Long(30), false)?;

    put_age(&db, 30)?;
    assert_eq!(db.reconcile_statistics()?.applied, 1);

    db.commit(late)?;
    let report = db.reconcile_statistics()?;
    assert_eq!(report.applied, 0);
    assert_eq!(report.skipped, 1);
    assert_eq!(age_count(&db)?, 1);
    Ok(())
}

#[test]
fn deleted_attribute_is_uncounted() -> Result<()> {
    let db = open()?;
    person_schema(&db)?;
    put_age(&db, 10)?;
    db.reconcile_statistics()?;

    let graph = db.write()?;
    let age = graph.schema().require_type(&Label::new("age"))?;
    let ten = graph.data().put(age, Value::Long(10), false)?;
    graph.data().delete(ten)?;
    assert_eq!(graph.data().statistics().thing_vertex_count(age)?, 0);
    db.commit(graph)?;

    assert_eq!(age_count(&db)?, 1);
    db.reconcile_statistics()?;
    assert_eq!(age_count(&db)?, 0);
    Ok(())
}

#[test]
fn has_edges_are_counted_per_type_pair() -> Result<()> {
    let db = open()?;
    person_schema(&db)?;
    let graph = db.write()?;
    let person = graph.schema().require_type(&Label::new("person"))?;
    let name = graph.schema().require_type(&Label::new("name"))?;
    let alice = graph.data().create(person, false)?;
    let bob = graph.data().create(person, false)?;
    let shared = graph.data().put(name, Value::from("sam"), false)?;
    graph.data().put_edge(alice, ThingEdge::Has, shared, false)?;
    graph.data().put_edge(bob, ThingEdge::Has, shared, false)?;
    assert_eq!(graph.data().statistics().has_edge_count(person, name)?, 2);
    let report = db.commit(graph)?;
    assert_eq!(report.count_jobs, 3);

    assert_eq!(db.reconcile_statistics()?.applied, 3);
    let read = db.read()?;
    let person = read.schema().require_type(&Label::new("person"))?;
    let name = read.schema().require_type(&Label::new("name"))?;
    let age = read.schema().require_type(&Label::new("age"))?;
    let stats = read.data().statistics();
    assert_eq!(stats.has_edge_count(person, name)?, 2);
    assert_eq!(stats.has_edge_count(person, age)?, 0);
    assert_eq!(stats.has_edge_sum(&[person], &[name, age])?, 2);
    assert_eq!(stats.thing_vertex_count(name)?, 1);
    assert_eq!(stats.thing_vertex_count(person)?, 2);
    Ok(())
}

#[test]
fn removing_a_fresh_has_edge_cancels_its_job() -> Result<()> {
    let db = open()?;
    person_schema(&db)?;
    let graph = db.write()?;
    let person = graph.schema().require_type(&Label::new("person"))?;
    let name = graph.schema().require_type(&Label::new("name"))?;
    let alice = graph.data().create(person, false)?;
    let value = graph.data().put(name, Value::from("alice"), false)?;
    graph.data().put_edge(alice, ThingEdge::Has, value, false)?;
    assert!(graph.data().delete_edge(alice, ThingEdge::Has, value)?);
    assert_eq!(graph.data().statistics().has_edge_count(person, name)?, 0);
    assert_eq!(db.commit(graph)?.count_jobs, 1);
    Ok(())
}

#[test]
fn transitive_counts_include_subtypes() -> Result<()> {
    let db = open()?;
    let graph = db.write()?;
    let schema = graph.schema();
    let person = schema.create(TypeEncoding::Entity, Label::new("person"))?;
    let employee = schema.create(TypeEncoding::Entity, Label::new("employee"))?;
    schema.set_supertype(employee, person)?;
    graph.data().create(person, false)?;
    graph.data().create(person, false)?;
    graph.data().create(employee, false)?;
    let stats = graph.data().statistics();
    assert_eq!(stats.thing_vertex_transitive_count(person)?, 3);
    assert_eq!(stats.thing_vertex_sum(&[person, employee])?, 3);
    assert_eq!(stats.thing_vertex_max(&[person, employee])?, 2);
    assert_eq!(stats.thing_vertex_max(&[])?, 0);
    db.commit(graph)?;

    let read = db.read()?;
    let person = read.schema().require_type(&Label::new("person"))?;
    let entity = read.schema().require_type(&Label::new("entity"))?;
    let stats = read.data().statistics();
    assert_eq!(stats.thing_vertex_transitive_count(person)?, 3);
    assert_eq!(stats.thing_vertex_transitive_count(entity)?, 3);
    assert_eq!(stats.snapshot_version()?, 1);
    Ok(())
}

#[test]
fn inferred_has_edges_are_counted_apart() -> Result<()> {
    let db = open()?;
    person_schema(&db)?;
    let graph = db.write()?;
    let person = graph.schema().require_type(&Label::new("person"))?;
    let name = graph.schema().require_type(&Label::new("name"))?;
    let alice = graph.data().create(person, false)?;
    let value = graph.data().put(name, Value::from("alice"), false)?;
    graph.data().put_edge(alice, ThingEdge::Has, value, true)?;
    let stats = graph.data().statistics();
    assert_eq!(stats.inferred_has_edge_count(person, name), 1);
    assert_eq!(stats.has_edge_count(person, name)?, 0);

    graph.data().put_edge(alice, ThingEdge::Has, value, false)?;
    assert_eq!(stats.inferred_has_edge_count(person, name), 0);
    assert_eq!(stats.has_edge_count(person, name)?, 1);
    Ok(())
}

#[test]
fn metrics_follow_commits_and_reconciliation() -> Result<()> {
    let metrics = Arc::new(CounterMetrics::default());
    let db = Database::open_in_memory(
        GraphOptions::new()
            .background_reconcile(false)
            .metrics(metrics.clone()),
    )?;
    person_schema(&db)?;
    put_age(&db, 7)?;
    db.reconcile_statistics()?;
    assert_eq!(metrics.commits.load(Ordering::Relaxed), 3);
    assert_eq!(metrics.vertices_created.load(Ordering::Relaxed), 1);
    assert_eq!(metrics.count_jobs_queued.load(Ordering::Relaxed), 1);
    assert_eq!(metrics.count_jobs_applied.load(Ordering::Relaxed), 1);
    Ok(())
}

#[test]
fn background_reconciler_drains_jobs() -> Result<()> {
    let db = Database::open_in_memory(
        GraphOptions::new().reconcile_interval(Duration::from_millis(10)),
    )?;
    person_schema(&db)?;
    put_age(&db, 42)?;
    let deadline = Instant::now() + Duration::from_secs(5);
    while age_count(&db)? != 1 {
        assert!(Instant::now() < deadline, "count jobs were not reconciled");
        thread::sleep(Duration::from_millis(10));
    }
    Ok(())
}

#[test]
fn explicit_has_edge_to_an_inferred_attribute_is_rejected() -> Result<()> {
    let db = open()?;
    person_schema(&db)?;
    let graph = db.write()?;
    let person = graph.schema().require_type(&Label::new("person"))?;
    let age = graph.schema().require_type(&Label::new("age"))?;
    let alice = graph.data().create(person, false)?;
    let ten = graph.data().put(age, Value::Long(10), true)?;
    let err = graph
        .data()
        .put_edge(alice, ThingEdge::Has, ten, false)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invalid);
    assert!(graph.data().outs(alice, ThingEdge::Has)?.is_empty());
    assert_eq!(graph.data().statistics().has_edge_count(person, age)?, 0);

    graph.data().put_edge(alice, ThingEdge::Has, ten, true)?;
    assert_eq!(graph.data().statistics().inferred_has_edge_count(person, age), 1);
    db.commit(graph)?;
    db.reconcile_statistics()?;

    let read = db.read()?;
    let person = read.schema().require_type(&Label::new("person"))?;
    let age = read.schema().require_type(&Label::new("age"))?;
    let alice = read.data().instances(person)?[0];
    assert!(read.data().outs(alice, ThingEdge::Has)?.is_empty());
    assert_eq!(read.data().statistics().has_edge_count(person, age)?, 0);
    Ok(())
}
