#![allow(missing_docs)]

use std::sync::Barrier;
use std::thread;

use typegraph::{Database, ErrorKind, GraphError, GraphOptions, Label, Result, TypeEncoding};

fn open() -> Result<Database> {
    Database::open_in_memory(GraphOptions::new().background_reconcile(false))
}

#[test]
fn second_commit_of_a_label_loses() -> Result<()> {
    let db = open()?;
    let first = db.write()?;
    let second = db.write()?;
    first
        .schema()
        .create(TypeEncoding::Entity, Label::new("person"))?;
    second
        .schema()
        .create(TypeEncoding::Relation, Label::new("person"))?;
    db.commit(first)?;
    let err = db.commit(second).unwrap_err();
    assert!(matches!(err, GraphError::DuplicateLabel { ref label } if label == "person"));

    let read = db.read()?;
    let person = read.schema().require_type(&Label::new("person"))?;
    assert_eq!(read.schema().encoding(person)?, TypeEncoding::Entity);
    Ok(())
}

#[test]
fn renames_to_one_label_race_at_commit() -> Result<()> {
    let db = open()?;
    let graph = db.write()?;
    graph
        .schema()
        .create(TypeEncoding::Entity, Label::new("a"))?;
    graph
        .schema()
        .create(TypeEncoding::Entity, Label::new("b"))?;
    db.commit(graph)?;

    let first = db.write()?;
    let second = db.write()?;
    let a = first.schema().require_type(&Label::new("a"))?;
    first
        .schema()
        .update_label(a, &Label::new("a"), Label::new("c"))?;
    let b = second.schema().require_type(&Label::new("b"))?;
    second
        .schema()
        .update_label(b, &Label::new("b"), Label::new("c"))?;
    db.commit(first)?;
    assert_eq!(
        db.commit(second).unwrap_err().kind(),
        ErrorKind::DuplicateLabel
    );

    let read = db.read()?;
    assert!(read.schema().get_type(&Label::new("a"))?.is_none());
    assert!(read.schema().get_type(&Label::new("b"))?.is_some());
    assert!(read.schema().get_type(&Label::new("c"))?.is_some());
    Ok(())
}

#[test]
fn racing_creates_in_one_transaction_admit_one() -> Result<()> {
    const THREADS: usize = 8;
    let db = open()?;
    let graph = db.write()?;
    let barrier = Barrier::new(THREADS);
    let outcomes: Vec<Result<_>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    graph
                        .schema()
                        .create(TypeEncoding::Entity, Label::new("person"))
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("thread panicked"))
            .collect()
    });
    let created: Vec<_> = outcomes.iter().filter_map(|o| o.as_ref().ok()).collect();
    assert_eq!(created.len(), 1);
    for outcome in &outcomes {
        if let Err(err) = outcome {
            assert_eq!(err.kind(), ErrorKind::DuplicateLabel);
        }
    }
    assert_eq!(
        graph.schema().get_type(&Label::new("person"))?,
        Some(*created[0])
    );
    Ok(())
}

#[test]
fn distinct_labels_are_created_concurrently() -> Result<()> {
    const THREADS: usize = 8;
    let db = open()?;
    let graph = db.write()?;
    thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|i| {
                let graph = &graph;
                scope.spawn(move || {
                    graph
                        .schema()
                        .create(TypeEncoding::Entity, Label::new(format!("type-{i}")))
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("thread panicked"))
            .collect::<Result<Vec<_>>>()
    })?;
    db.commit(graph)?;

    let read = db.read()?;
    let entity = read.schema().require_type(&Label::new("entity"))?;
    assert_eq!(read.schema().entity_types()?.len(), THREADS + 1);
    for i in 0..THREADS {
        let vertex = read.schema().require_type(&Label::new(format!("type-{i}")))?;
        assert_eq!(read.schema().supertype(vertex)?, Some(entity));
    }
    Ok(())
}

#[test]
fn rename_and_create_of_one_label_admit_one() -> Result<()> {
    let db = open()?;
    let graph = db.write()?;
    graph
        .schema()
        .create(TypeEncoding::Entity, Label::new("person"))?;
    db.commit(graph)?;

    let graph = db.write()?;
    let person = graph.schema().require_type(&Label::new("person"))?;
    let barrier = Barrier::new(2);
    let (renamed, created) = thread::scope(|scope| {
        let rename = scope.spawn(|| {
            barrier.wait();
            graph
                .schema()
                .update_label(person, &Label::new("person"), Label::new("human"))
        });
        let create = scope.spawn(|| {
            barrier.wait();
            graph
                .schema()
                .create(TypeEncoding::Entity, Label::new("human"))
        });
        (
            rename.join().expect("thread panicked"),
            create.join().expect("thread panicked"),
        )
    });
    assert!(renamed.is_ok() != created.is_ok());
    let loser = renamed.err().or(created.err()).expect("one side fails");
    assert_eq!(loser.kind(), ErrorKind::DuplicateLabel);
    assert!(graph.schema().get_type(&Label::new("human"))?.is_some());
    Ok(())
}
