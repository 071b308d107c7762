#![allow(missing_docs)]

use typegraph::{
    Conclusion, Database, ErrorKind, GraphError, GraphOptions, Label, Result, RuleBody, TypeEdge,
    TypeEncoding, Transitivity, ValueType,
};
use typegraph::graph::TypeEdgeProps;

fn open() -> Result<Database> {
    Database::open_in_memory(GraphOptions::new().background_reconcile(false))
}

fn isa(when: &[&str], then: &str) -> RuleBody {
    RuleBody {
        when: when.iter().map(|l| Label::new(*l)).collect(),
        then: Conclusion::Isa {
            type_label: Label::new(then),
        },
    }
}

#[test]
fn supertype_cycles_are_rejected() -> Result<()> {
    let db = open()?;
    let graph = db.write()?;
    let schema = graph.schema();
    let person = schema.create(TypeEncoding::Entity, Label::new("person"))?;
    let manager = schema.create(TypeEncoding::Entity, Label::new("manager"))?;
    schema.set_supertype(manager, person)?;
    let entity = schema.require_type(&Label::new("entity"))?;

    let err = schema.set_supertype(person, manager).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CyclicHierarchy);
    assert_eq!(schema.supertype(person)?, Some(entity));

    let err = schema.set_supertype(person, person).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CyclicHierarchy);
    Ok(())
}

#[test]
fn supertype_must_share_the_category() -> Result<()> {
    let db = open()?;
    let graph = db.write()?;
    let schema = graph.schema();
    let person = schema.create(TypeEncoding::Entity, Label::new("person"))?;
    let name = schema.create(TypeEncoding::Attribute, Label::new("name"))?;
    assert_eq!(
        schema.set_supertype(person, name).unwrap_err().kind(),
        ErrorKind::Invalid
    );
    Ok(())
}

#[test]
fn hierarchy_traversals() -> Result<()> {
    let db = open()?;
    let graph = db.write()?;
    let schema = graph.schema();
    let person = schema.create(TypeEncoding::Entity, Label::new("person"))?;
    let employee = schema.create(TypeEncoding::Entity, Label::new("employee"))?;
    let manager = schema.create(TypeEncoding::Entity, Label::new("manager"))?;
    schema.set_supertype(employee, person)?;
    schema.set_supertype(manager, employee)?;
    let entity = schema.require_type(&Label::new("entity"))?;
    let thing = schema.require_type(&Label::new("thing"))?;

    assert_eq!(schema.subtypes(person, Transitivity::Explicit)?, vec![employee]);
    assert_eq!(
        schema.subtypes(person, Transitivity::Transitive)?,
        vec![person, employee, manager]
    );
    assert_eq!(schema.supertypes(manager)?, vec![manager, employee, person, entity, thing]);
    assert_eq!(schema.entity_types()?.len(), 4);

    let stats = schema.statistics();
    assert_eq!(stats.subtype_count(person)?, 1);
    assert_eq!(stats.transitive_subtype_count(person)?, 2);
    assert_eq!(stats.subtype_depth(person)?, 2);
    assert_eq!(stats.subtype_depth(manager)?, 0);
    Ok(())
}

#[test]
fn hierarchy_survives_commit() -> Result<()> {
    let db = open()?;
    let graph = db.write()?;
    let person = graph
        .schema()
        .create(TypeEncoding::Entity, Label::new("person"))?;
    let manager = graph
        .schema()
        .create(TypeEncoding::Entity, Label::new("manager"))?;
    graph.schema().set_supertype(manager, person)?;
    db.commit(graph)?;

    let read = db.read()?;
    let schema = read.schema();
    let person = schema.require_type(&Label::new("person"))?;
    let manager = schema.require_type(&Label::new("manager"))?;
    assert_eq!(schema.supertype(manager)?, Some(person));
    assert_eq!(schema.subtypes(person, Transitivity::Explicit)?, vec![manager]);
    assert!(!schema.iid(manager)?.is_buffered());
    let stats = schema.statistics();
    assert_eq!(stats.thing_type_count()?, 6);
    assert_eq!(stats.abstract_thing_type_count()?, 4);
    Ok(())
}

#[test]
fn duplicate_labels_are_rejected() -> Result<()> {
    let db = open()?;
    let graph = db.write()?;
    graph
        .schema()
        .create(TypeEncoding::Entity, Label::new("person"))?;
    let err = graph
        .schema()
        .create(TypeEncoding::Relation, Label::new("person"))
        .unwrap_err();
    assert!(matches!(err, GraphError::DuplicateLabel { ref label } if label == "person"));
    db.commit(graph)?;

    let graph = db.write()?;
    let err = graph
        .schema()
        .create(TypeEncoding::Entity, Label::new("person"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateLabel);
    Ok(())
}

#[test]
fn rename_moves_the_label() -> Result<()> {
    let db = open()?;
    let graph = db.write()?;
    graph
        .schema()
        .create(TypeEncoding::Entity, Label::new("person"))?;
    graph
        .schema()
        .create(TypeEncoding::Entity, Label::new("company"))?;
    db.commit(graph)?;

    let graph = db.write()?;
    let schema = graph.schema();
    let person = schema.require_type(&Label::new("person"))?;
    let err = schema
        .update_label(person, &Label::new("person"), Label::new("company"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateLabel);
    schema.update_label(person, &Label::new("person"), Label::new("human"))?;
    assert!(schema.get_type(&Label::new("person"))?.is_none());
    assert_eq!(schema.get_type(&Label::new("human"))?, Some(person));
    // the freed label can be reused in the same transaction
    schema.create(TypeEncoding::Entity, Label::new("person"))?;
    db.commit(graph)?;

    let read = db.read()?;
    let human = read.schema().require_type(&Label::new("human"))?;
    let person = read.schema().require_type(&Label::new("person"))?;
    assert_ne!(human, person);
    assert_eq!(read.schema().label(human)?, Label::new("human"));
    Ok(())
}

#[test]
fn deleted_type_disappears() -> Result<()> {
    let db = open()?;
    let graph = db.write()?;
    graph
        .schema()
        .create(TypeEncoding::Entity, Label::new("person"))?;
    db.commit(graph)?;

    let graph = db.write()?;
    let person = graph.schema().require_type(&Label::new("person"))?;
    let entity = graph.schema().require_type(&Label::new("entity"))?;
    graph.schema().delete(person)?;
    assert!(graph.schema().get_type(&Label::new("person"))?.is_none());
    assert!(graph
        .schema()
        .subtypes(entity, Transitivity::Explicit)?
        .is_empty());
    db.commit(graph)?;

    let read = db.read()?;
    assert!(read.schema().get_type(&Label::new("person"))?.is_none());
    let entity = read.schema().require_type(&Label::new("entity"))?;
    assert!(read
        .schema()
        .subtypes(entity, Transitivity::Explicit)?
        .is_empty());
    Ok(())
}

#[test]
fn types_referenced_by_rules_cannot_be_deleted() -> Result<()> {
    let db = open()?;
    let graph = db.write()?;
    let schema = graph.schema();
    schema.create(TypeEncoding::Entity, Label::new("person"))?;
    schema.create(TypeEncoding::Relation, Label::new("friendship"))?;
    schema.create_rule("friends-are-people", isa(&["friendship"], "person"))?;
    db.commit(graph)?;

    let graph = db.write()?;
    let schema = graph.schema();
    let friendship = schema.require_type(&Label::new("friendship"))?;
    let err = schema.delete(friendship).unwrap_err();
    match err {
        GraphError::TypeReferencedInRules { label, rules } => {
            assert_eq!(label, "friendship");
            assert_eq!(rules, vec!["friends-are-people".to_owned()]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(schema.get_type(&Label::new("friendship"))?.is_some());

    let rule = schema.get_rule("friends-are-people")?.expect("rule exists");
    schema.delete_rule(rule)?;
    schema.delete(friendship)?;
    db.commit(graph)?;

    let read = db.read()?;
    assert!(read.schema().get_type(&Label::new("friendship"))?.is_none());
    assert!(read.schema().rules()?.is_empty());
    Ok(())
}

#[test]
fn rule_bodies_must_name_existing_types() -> Result<()> {
    let db = open()?;
    let graph = db.write()?;
    let err = graph
        .schema()
        .create_rule("orphan", isa(&["ghost"], "entity"))
        .unwrap_err();
    assert!(matches!(err, GraphError::NotFound { ref what } if what == "ghost"));
    Ok(())
}

#[test]
fn conclusion_indexes_cover_subtypes() -> Result<()> {
    let db = open()?;
    let graph = db.write()?;
    let schema = graph.schema();
    let person = schema.create(TypeEncoding::Entity, Label::new("person"))?;
    let manager = schema.create(TypeEncoding::Entity, Label::new("manager"))?;
    schema.set_supertype(manager, person)?;
    let name = schema.create(TypeEncoding::Attribute, Label::new("name"))?;
    schema.set_value_type(name, ValueType::String)?;
    schema.create_rule("promote", isa(&["person"], "manager"))?;
    schema.create_rule(
        "named",
        RuleBody {
            when: vec![Label::new("person")],
            then: Conclusion::Has {
                attribute_type: Label::new("name"),
            },
        },
    )?;
    db.commit(graph)?;

    let read = db.read()?;
    let schema = read.schema();
    let person = schema.require_type(&Label::new("person"))?;
    let manager = schema.require_type(&Label::new("manager"))?;
    let name = schema.require_type(&Label::new("name"))?;
    let promote = schema.get_rule("promote")?.expect("rule exists");
    let named = schema.get_rule("named")?.expect("rule exists");

    assert_eq!(schema.rules_concluding_vertex(person)?, vec![promote]);
    assert_eq!(schema.rules_concluding_vertex(manager)?, vec![promote]);
    assert_eq!(schema.rules_concluding_has_edge(name)?, vec![named]);
    let mut referencing = schema.rules_referencing(person)?;
    referencing.sort();
    let mut expected = vec![promote, named];
    expected.sort();
    assert_eq!(referencing, expected);
    assert_eq!(schema.rule_body(named)?.when, vec![Label::new("person")]);
    assert_eq!(schema.rules()?, vec![named, promote]);
    Ok(())
}

#[test]
fn rules_can_be_renamed() -> Result<()> {
    let db = open()?;
    let graph = db.write()?;
    graph
        .schema()
        .create(TypeEncoding::Entity, Label::new("person"))?;
    graph.schema().create_rule("a", isa(&["person"], "person"))?;
    graph.schema().create_rule("b", isa(&["person"], "person"))?;
    db.commit(graph)?;

    let graph = db.write()?;
    let schema = graph.schema();
    let a = schema.get_rule("a")?.expect("rule exists");
    assert_eq!(
        schema.update_rule_label(a, "a", "b").unwrap_err().kind(),
        ErrorKind::DuplicateLabel
    );
    schema.update_rule_label(a, "a", "c")?;
    db.commit(graph)?;

    let read = db.read()?;
    assert!(read.schema().get_rule("a")?.is_none());
    let c = read.schema().get_rule("c")?.expect("renamed rule");
    assert_eq!(read.schema().rule_label(c)?, "c");
    Ok(())
}

#[test]
fn owned_attributes_follow_inheritance_and_overrides() -> Result<()> {
    let db = open()?;
    let graph = db.write()?;
    let schema = graph.schema();
    let person = schema.create(TypeEncoding::Entity, Label::new("person"))?;
    let employee = schema.create(TypeEncoding::Entity, Label::new("employee"))?;
    schema.set_supertype(employee, person)?;
    let name = schema.create(TypeEncoding::Attribute, Label::new("name"))?;
    let staff_name = schema.create(TypeEncoding::Attribute, Label::new("staff-name"))?;
    let email = schema.create(TypeEncoding::Attribute, Label::new("email"))?;
    schema.set_supertype(staff_name, name)?;
    for attribute in [name, staff_name, email] {
        schema.set_value_type(attribute, ValueType::String)?;
    }
    schema.put_edge(person, TypeEdge::Owns, name)?;
    schema.put_edge_with(
        person,
        TypeEdge::OwnsKey,
        email,
        TypeEdgeProps {
            overridden: None,
            unique: true,
        },
    )?;
    schema.put_edge_with(
        employee,
        TypeEdge::Owns,
        staff_name,
        TypeEdgeProps {
            overridden: Some(name),
            unique: false,
        },
    )?;
    db.commit(graph)?;

    let read = db.read()?;
    let schema = read.schema();
    let person = schema.require_type(&Label::new("person"))?;
    let employee = schema.require_type(&Label::new("employee"))?;
    let name = schema.require_type(&Label::new("name"))?;
    let staff_name = schema.require_type(&Label::new("staff-name"))?;
    let email = schema.require_type(&Label::new("email"))?;

    assert_eq!(schema.owned_attribute_types(person)?, vec![name, email]);
    assert_eq!(schema.owned_attribute_types(employee)?, vec![staff_name, email]);
    assert_eq!(schema.owners_of_attribute_type(name)?, vec![person, employee]);
    let key = schema.edge(person, TypeEdge::OwnsKey, email)?.expect("key edge");
    assert!(key.unique);
    let overriding = schema.edge(employee, TypeEdge::Owns, staff_name)?.expect("owns edge");
    assert_eq!(overriding.overridden, Some(name));
    assert_eq!(schema.attribute_types_of(ValueType::String)?.len(), 3);
    Ok(())
}

#[test]
fn renamed_type_is_deletable_once_its_rule_is_gone() -> Result<()> {
    let db = open()?;
    let graph = db.write()?;
    graph
        .schema()
        .create(TypeEncoding::Relation, Label::new("friendship"))?;
    graph.schema().create_rule("r", isa(&["friendship"], "friendship"))?;
    db.commit(graph)?;

    let graph = db.write()?;
    let friendship = graph.schema().require_type(&Label::new("friendship"))?;
    graph
        .schema()
        .update_label(friendship, &Label::new("friendship"), Label::new("f2"))?;
    let rule = graph.schema().get_rule("r")?.expect("rule exists");
    assert_eq!(graph.schema().rule_body(rule)?, isa(&["f2"], "f2"));
    db.commit(graph)?;

    let read = db.read()?;
    let rule = read.schema().get_rule("r")?.expect("rule exists");
    assert_eq!(read.schema().rule_body(rule)?, isa(&["f2"], "f2"));
    let f2 = read.schema().require_type(&Label::new("f2"))?;
    assert_eq!(read.schema().rules_referencing(f2)?, vec![rule]);

    let graph = db.write()?;
    let rule = graph.schema().get_rule("r")?.expect("rule exists");
    graph.schema().delete_rule(rule)?;
    db.commit(graph)?;

    let graph = db.write()?;
    let f2 = graph.schema().require_type(&Label::new("f2"))?;
    assert!(graph.schema().rules_referencing(f2)?.is_empty());
    graph.schema().delete(f2)?;
    db.commit(graph)?;

    assert!(db.read()?.schema().get_type(&Label::new("f2"))?.is_none());
    Ok(())
}

#[test]
fn rule_naming_a_concurrently_renamed_type_conflicts() -> Result<()> {
    let db = open()?;
    let graph = db.write()?;
    graph
        .schema()
        .create(TypeEncoding::Entity, Label::new("person"))?;
    db.commit(graph)?;

    let rename = db.write()?;
    let create = db.write()?;
    let person = rename.schema().require_type(&Label::new("person"))?;
    rename
        .schema()
        .update_label(person, &Label::new("person"), Label::new("human"))?;
    create.schema().create_rule("adults", isa(&["person"], "person"))?;
    db.commit(rename)?;
    assert_eq!(db.commit(create).unwrap_err().kind(), ErrorKind::Conflict);
    assert!(db.read()?.schema().get_rule("adults")?.is_none());
    Ok(())
}

#[test]
fn rule_committed_before_a_rename_reads_the_new_label() -> Result<()> {
    let db = open()?;
    let graph = db.write()?;
    graph
        .schema()
        .create(TypeEncoding::Entity, Label::new("person"))?;
    db.commit(graph)?;

    let rename = db.write()?;
    let create = db.write()?;
    let person = rename.schema().require_type(&Label::new("person"))?;
    rename
        .schema()
        .update_label(person, &Label::new("person"), Label::new("human"))?;
    create.schema().create_rule("adults", isa(&["person"], "person"))?;
    db.commit(create)?;
    db.commit(rename)?;

    let read = db.read()?;
    let rule = read.schema().get_rule("adults")?.expect("rule exists");
    assert_eq!(read.schema().rule_body(rule)?, isa(&["human"], "human"));
    let human = read.schema().require_type(&Label::new("human"))?;
    assert_eq!(read.schema().rules_referencing(human)?, vec![rule]);
    Ok(())
}
