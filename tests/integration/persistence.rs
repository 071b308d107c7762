#![allow(missing_docs)]

use std::fs::OpenOptions;
use std::io::Write;
use std::time::Duration;

use tempfile::tempdir;
use typegraph::{
    Conclusion, Database, GraphOptions, Label, Result, RuleBody, ThingEdge, TypeEdge,
    TypeEncoding, Value, ValueType,
};

fn options() -> GraphOptions {
    GraphOptions::new()
        .background_reconcile(false)
        .sync_on_commit(false)
}

#[test]
fn reopen_preserves_schema_and_data() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("graph.log");
    {
        let db = Database::open(&path, options())?;
        let graph = db.write()?;
        let schema = graph.schema();
        let person = schema.create(TypeEncoding::Entity, Label::new("person"))?;
        let name = schema.create(TypeEncoding::Attribute, Label::new("name"))?;
        schema.set_value_type(name, ValueType::String)?;
        schema.put_edge(person, TypeEdge::Owns, name)?;
        let alice = graph.data().create(person, false)?;
        let value = graph.data().put(name, Value::from("alice"), false)?;
        graph.data().put_edge(alice, ThingEdge::Has, value, false)?;
        db.commit(graph)?;
    }

    let db = Database::open(&path, options())?;
    let read = db.read()?;
    let person = read.schema().require_type(&Label::new("person"))?;
    let name = read.schema().require_type(&Label::new("name"))?;
    assert_eq!(read.schema().value_type(name)?, Some(ValueType::String));
    assert_eq!(read.schema().owned_attribute_types(person)?, vec![name]);
    let alice = read.data().instances(person)?[0];
    let has = read.data().outs(alice, ThingEdge::Has)?;
    assert_eq!(read.data().value(has[0].other)?, Some(Value::from("alice")));
    Ok(())
}

#[test]
fn identifiers_are_not_reused_after_reopen() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("graph.log");
    let first = {
        let db = Database::open(&path, options())?;
        let graph = db.write()?;
        let person = graph
            .schema()
            .create(TypeEncoding::Entity, Label::new("person"))?;
        graph.data().create(person, false)?;
        db.commit(graph)?;
        let read = db.read()?;
        let person = read.schema().require_type(&Label::new("person"))?;
        let thing = read.data().instances(person)?[0];
        read.data().iid(thing)?
    };

    let db = Database::open(&path, options())?;
    let graph = db.write()?;
    let person = graph.schema().require_type(&Label::new("person"))?;
    graph
        .schema()
        .create(TypeEncoding::Entity, Label::new("company"))?;
    graph.data().create(person, false)?;
    db.commit(graph)?;

    let read = db.read()?;
    let person = read.schema().require_type(&Label::new("person"))?;
    let company = read.schema().require_type(&Label::new("company"))?;
    assert_ne!(read.schema().iid(company)?, read.schema().iid(person)?);
    let iids = read
        .data()
        .instances(person)?
        .into_iter()
        .map(|thing| read.data().iid(thing))
        .collect::<Result<Vec<_>>>()?;
    assert_eq!(iids.len(), 2);
    assert_eq!(iids[0], first);
    assert!(iids[1].body() > first.body());
    Ok(())
}

#[test]
fn rules_survive_reopen() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("graph.log");
    {
        let db = Database::open(&path, options())?;
        let graph = db.write()?;
        let schema = graph.schema();
        schema.create(TypeEncoding::Entity, Label::new("person"))?;
        schema.create(TypeEncoding::Entity, Label::new("adult"))?;
        schema.create_rule(
            "grown-up",
            RuleBody {
                when: vec![Label::new("person")],
                then: Conclusion::Isa {
                    type_label: Label::new("adult"),
                },
            },
        )?;
        db.commit(graph)?;
    }

    let db = Database::open(&path, options())?;
    let read = db.read()?;
    let rule = read
        .schema()
        .get_rule("grown-up")?
        .expect("rule should be stored");
    let adult = read.schema().require_type(&Label::new("adult"))?;
    assert_eq!(read.schema().rules_concluding_vertex(adult)?, vec![rule]);
    assert_eq!(read.schema().rule_body(rule)?.when, vec![Label::new("person")]);
    Ok(())
}

#[test]
fn queued_count_jobs_survive_reopen() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("graph.log");
    {
        let db = Database::open(&path, options())?;
        let graph = db.write()?;
        let age = graph
            .schema()
            .create(TypeEncoding::Attribute, Label::new("age"))?;
        graph.schema().set_value_type(age, ValueType::Long)?;
        graph.data().put(age, Value::Long(3), false)?;
        graph.data().put(age, Value::Long(4), false)?;
        assert_eq!(db.commit(graph)?.count_jobs, 2);
    }

    let db = Database::open(&path, options())?;
    assert_eq!(db.reconcile_statistics()?.applied, 2);
    let read = db.read()?;
    let age = read.schema().require_type(&Label::new("age"))?;
    assert_eq!(read.data().statistics().thing_vertex_count(age)?, 2);
    Ok(())
}

#[test]
fn torn_tail_is_discarded_on_open() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("graph.log");
    {
        let db = Database::open(&path, options())?;
        let graph = db.write()?;
        graph
            .schema()
            .create(TypeEncoding::Entity, Label::new("person"))?;
        db.commit(graph)?;
    }
    {
        let mut file = OpenOptions::new().append(true).open(&path)?;
        file.write_all(&[0, 0, 0, 42, 1, 2])?;
    }

    let db = Database::open(&path, options())?;
    assert!(db.read()?.schema().get_type(&Label::new("person"))?.is_some());
    let graph = db.write()?;
    graph
        .schema()
        .create(TypeEncoding::Entity, Label::new("company"))?;
    db.commit(graph)?;
    drop(db);

    let db = Database::open(&path, options())?;
    assert!(db.read()?.schema().get_type(&Label::new("company"))?.is_some());
    Ok(())
}

#[test]
fn options_load_from_a_toml_file() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("typegraph.toml");
    std::fs::write(
        &path,
        "count_job_batch_size = 64\nbackground_reconcile = false\nlabel_lock_timeout_ms = 500\n",
    )?;
    let options = GraphOptions::from_toml_file(&path)?;
    assert_eq!(options.count_job_batch_size, 64);
    assert!(!options.background_reconcile);
    assert_eq!(options.label_lock_timeout, Duration::from_millis(500));

    let db = Database::open(dir.path().join("graph.log"), options)?;
    assert!(db.read()?.schema().is_initialised()?);
    Ok(())
}
