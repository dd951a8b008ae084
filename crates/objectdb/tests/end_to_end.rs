//! Integration tests exercising the testable properties (schema shape,
//! object CRUD, attribute-class CRUD per type, text/number idempotence,
//! link symmetry, display-cache freshness, table idx rebuild, filter
//! compilation) and the end-to-end scenarios they compose into.

use objectdb::attribute::{self, link, number, text, Attribute, AttributeClass};
use objectdb::error::{Error, NotFoundKind};
use objectdb::query;
use objectdb::table::Table;
use objectdb::view::View;
use objectdb::{Database, OpenOptions};
use serde_json::json;

fn test_db() -> Database {
    Database::open(OpenOptions::memory()).expect("open in-memory test database")
}

#[test]
fn fresh_database_has_every_core_table() {
    let db = test_db();
    let tx = db.read_tx().unwrap();
    for name in [
        "tables",
        "table_views",
        "objects",
        "attribute_classes",
        "table_to_attribute_classes",
        "object_to_attribute_classes",
        "object_to_tables",
    ] {
        let exists: bool = tx
            .query_row(
                "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?)",
                [name],
                |row| row.get(0),
            )
            .unwrap();
        assert!(exists, "missing table {name}");
    }
}

#[test]
fn object_crud_round_trips_then_not_found_after_delete() {
    let db = test_db();
    let tx = db.write_tx().unwrap();
    let obj = objectdb::object::create(&tx).unwrap();
    objectdb::object::update(&db, &tx, obj.id, json!({"k": "v"})).unwrap();
    let reopened = objectdb::object::open(&tx, obj.id).unwrap();
    assert_eq!(reopened.data, json!({"k": "v"}));

    objectdb::object::delete(&db, &tx, obj.id).unwrap();
    let err = objectdb::object::open(&tx, obj.id).unwrap_err();
    assert!(matches!(err, Error::NotFound { kind: NotFoundKind::Object, .. }));
}

#[test]
fn attribute_class_crud_per_type_creates_and_drops_side_tables() {
    let db = test_db();
    let tx = db.write_tx().unwrap();

    let text_class = text::create(&tx, "Title", "title").unwrap();
    assert!(table_exists(&tx, &text_class.meta.updated_table));

    let number_class = number::create(&tx, "Age", "age").unwrap();
    assert!(table_exists(&tx, &number_class.meta.updated_table));

    let (a, b) = link::create_pair(
        &db,
        &tx,
        link::PairSpec {
            a_name: "Parent",
            a_key: "parent",
            a_ref_table: None,
            a_dep_attribute: vec![],
            b_name: "Child",
            b_key: "child",
            b_ref_table: None,
            b_dep_attribute: vec![],
        },
    )
    .unwrap();
    assert!(table_exists(&tx, &a.meta.updated_table));
    assert!(table_exists(&tx, &a.meta.link_obj_table));
    assert!(table_exists(&tx, &b.meta.updated_table));

    // Rename via `set({name: s})` is observable on reopen.
    let mut class = AttributeClass::Text(text_class);
    let mut patch = objectdb::json_path::JsonMap::new();
    patch.insert("name".into(), json!("Headline"));
    class.set(&db, &tx, patch).unwrap();
    let reopened = attribute::open(&tx, class.id()).unwrap();
    assert_eq!(reopened.name(), "Headline");

    let updated_table = class.updated_table().to_string();
    class.drop_class(&db, &tx).unwrap();
    assert!(!table_exists(&tx, &updated_table));

    let link_updated_table = a.meta.updated_table.clone();
    let link_obj_table = a.meta.link_obj_table.clone();
    AttributeClass::Link(a).drop_class(&db, &tx).unwrap();
    assert!(!table_exists(&tx, &link_updated_table));
    assert!(!table_exists(&tx, &link_obj_table));
}

fn table_exists(tx: &objectdb::txn::WriteTx<'_>, name: &str) -> bool {
    tx.query_row(
        "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?)",
        [name],
        |row| row.get(0),
    )
    .unwrap()
}

#[test]
fn text_value_round_trips_including_empty_string() {
    let db = test_db();
    let tx = db.write_tx().unwrap();
    let class = AttributeClass::Text(text::create(&tx, "Title", "title").unwrap());
    let obj = objectdb::object::create(&tx).unwrap();
    class.insert(&db, &tx, obj.id).unwrap();
    class
        .update(&db, &tx, obj.id, &Attribute::Text(text::TextAttribute { value: "".into() }))
        .unwrap();
    let found = class.find(&tx, obj.id).unwrap();
    assert_eq!(found, Attribute::Text(text::TextAttribute { value: "".into() }));

    class
        .update(
            &db,
            &tx,
            obj.id,
            &Attribute::Text(text::TextAttribute { value: "hello".into() }),
        )
        .unwrap();
    let found = class.find(&tx, obj.id).unwrap();
    assert_eq!(found.string(), "hello");
}

#[test]
fn number_value_round_trips() {
    let db = test_db();
    let tx = db.write_tx().unwrap();
    let class = AttributeClass::Number(number::create(&tx, "Age", "age").unwrap());
    let obj = objectdb::object::create(&tx).unwrap();
    class.insert(&db, &tx, obj.id).unwrap();
    class
        .update(&db, &tx, obj.id, &Attribute::Number(number::NumberAttribute { value: 42.5 }))
        .unwrap();
    let found = class.find(&tx, obj.id).unwrap();
    assert_eq!(found, Attribute::Number(number::NumberAttribute { value: 42.5 }));
}

#[test]
fn link_pair_stays_symmetric_across_update_and_delete() {
    let db = test_db();
    let tx = db.write_tx().unwrap();
    let (a, b) = link::create_pair(
        &db,
        &tx,
        link::PairSpec {
            a_name: "Parent",
            a_key: "parent",
            a_ref_table: None,
            a_dep_attribute: vec![],
            b_name: "Child",
            b_key: "child",
            b_ref_table: None,
            b_dep_attribute: vec![],
        },
    )
    .unwrap();
    let a = AttributeClass::Link(a);
    let b = AttributeClass::Link(b);

    let o = objectdb::object::create(&tx).unwrap();
    let r = objectdb::object::create(&tx).unwrap();
    a.insert(&db, &tx, o.id).unwrap();
    let mut attr = link::LinkAttribute::default();
    attr.raw.push(r.id);
    a.update(&db, &tx, o.id, &Attribute::Link(attr)).unwrap();

    let back = match b.find(&tx, r.id).unwrap() {
        Attribute::Link(a) => a,
        _ => unreachable!(),
    };
    assert_eq!(back.raw, vec![o.id]);

    a.delete(&db, &tx, o.id).unwrap();
    let back = match b.find(&tx, r.id).unwrap() {
        Attribute::Link(a) => a,
        _ => unreachable!(),
    };
    assert!(!back.raw.contains(&o.id));
}

#[test]
fn display_cache_refreshes_when_dependency_value_changes() {
    let db = test_db();
    let tx = db.write_tx().unwrap();
    let name_class = AttributeClass::Text(text::create(&tx, "Name", "name").unwrap());
    let name_id = name_class.id();

    let (a, b) = link::create_pair(
        &db,
        &tx,
        link::PairSpec {
            a_name: "Owner",
            a_key: "owner",
            a_ref_table: None,
            a_dep_attribute: vec![],
            b_name: "Pets",
            b_key: "pets",
            b_ref_table: None,
            b_dep_attribute: vec![name_id],
        },
    )
    .unwrap();
    let owner_class = AttributeClass::Link(a);
    let pets_class = AttributeClass::Link(b);

    let r = objectdb::object::create(&tx).unwrap();
    name_class.insert(&db, &tx, r.id).unwrap();
    name_class
        .update(&db, &tx, r.id, &Attribute::Text(text::TextAttribute { value: "Alice".into() }))
        .unwrap();

    let o = objectdb::object::create(&tx).unwrap();
    owner_class.insert(&db, &tx, o.id).unwrap();
    let mut attr = link::LinkAttribute::default();
    attr.raw.push(r.id);
    owner_class.update(&db, &tx, o.id, &Attribute::Link(attr)).unwrap();

    let found = match owner_class.find(&tx, o.id).unwrap() {
        Attribute::Link(a) => a,
        _ => unreachable!(),
    };
    assert_eq!(found.raw, vec![r.id]);
    assert_eq!(found.show.get(&r.id).map(String::as_str), Some("Alice"));
    let back = match pets_class.find(&tx, r.id).unwrap() {
        Attribute::Link(a) => a,
        _ => unreachable!(),
    };
    assert_eq!(back.raw, vec![o.id]);

    name_class
        .update(&db, &tx, r.id, &Attribute::Text(text::TextAttribute { value: "Bob".into() }))
        .unwrap();
    let found = match owner_class.find(&tx, o.id).unwrap() {
        Attribute::Link(a) => a,
        _ => unreachable!(),
    };
    assert_eq!(found.show.get(&r.id).map(String::as_str), Some("Bob"));
}

#[test]
fn table_idx_rebuilds_to_concatenated_field_stringifications() {
    let db = test_db();
    let tx = db.write_tx().unwrap();
    let table = Table::create(&tx, "People").unwrap();
    let name_class = AttributeClass::Text(text::create(&tx, "Name", "name").unwrap());
    let age_class = AttributeClass::Number(number::create(&tx, "Age", "age").unwrap());
    table.add_attribute_class(&tx, &name_class).unwrap();
    table.add_attribute_class(&tx, &age_class).unwrap();

    let o = objectdb::object::create(&tx).unwrap();
    name_class.insert(&db, &tx, o.id).unwrap();
    name_class
        .update(&db, &tx, o.id, &Attribute::Text(text::TextAttribute { value: "Ada".into() }))
        .unwrap();
    age_class.insert(&db, &tx, o.id).unwrap();
    age_class
        .update(&db, &tx, o.id, &Attribute::Number(number::NumberAttribute { value: 36.0 }))
        .unwrap();
    table.insert(&tx, &[o.id]).unwrap();

    let idx: String = tx
        .query_row(
            &format!("SELECT idx FROM \"{}\" WHERE object_id = ?", table.data_table()),
            rusqlite::params![o.id],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(idx, "Ada36");
}

#[test]
fn filter_compilation_matches_spec_grammar() {
    let db = test_db();
    let tx = db.write_tx().unwrap();
    let text_class = text::create(&tx, "Title", "title").unwrap();
    let num_class = number::create(&tx, "Age", "age").unwrap();

    let doc = json!({
        "$and": [
            {"$fts": {"search": "a b"}},
            {text_class.base.id.to_string(): {"like": "x"}},
        ]
    });
    let filter = query::parse_filter(&doc).unwrap();
    let sql = query::compile_filter(&tx, &filter).unwrap();
    assert!(sql.contains("idx LIKE '%a%' AND idx LIKE '%b%'"));
    assert!(sql.contains("LIKE '%x%'"));

    let not_doc = json!({"$not": [{num_class.base.id.to_string(): {"gte": 3}}]});
    let not_filter = query::parse_filter(&not_doc).unwrap();
    let not_sql = query::compile_filter(&tx, &not_filter).unwrap();
    assert!(not_sql.starts_with("NOT ("));

    let cmp_doc = json!({num_class.base.id.to_string(): {"gte": 3}});
    let cmp_filter = query::parse_filter(&cmp_doc).unwrap();
    let cmp_sql = query::compile_filter(&tx, &cmp_filter).unwrap();
    assert!(cmp_sql.ends_with(">= 3"));
}

/// Insert then set then update round-trips a single text value.
#[test]
fn scenario_text_insert_then_update_round_trips() {
    let db = test_db();
    let tx = db.write_tx().unwrap();
    let class = AttributeClass::Text(text::create(&tx, "Title", "title").unwrap());
    let o = objectdb::object::create(&tx).unwrap();
    class.insert(&db, &tx, o.id).unwrap();
    class
        .update(&db, &tx, o.id, &Attribute::Text(text::TextAttribute { value: "hello".into() }))
        .unwrap();
    assert_eq!(class.find(&tx, o.id).unwrap().string(), "hello");
}

/// A dependency-bearing link pair keeps its cached display string current,
/// and the back-reference symmetric, across edits to both the link and its
/// dependency.
#[test]
fn scenario_link_pair_with_dependency_stays_consistent_across_edits() {
    let db = test_db();
    let tx = db.write_tx().unwrap();
    let name_class = AttributeClass::Text(text::create(&tx, "Name", "name").unwrap());
    let name_id = name_class.id();

    let (a, b) = link::create_pair(
        &db,
        &tx,
        link::PairSpec {
            a_name: "A",
            a_key: "a",
            a_ref_table: None,
            a_dep_attribute: vec![name_id],
            b_name: "B",
            b_key: "b",
            b_ref_table: None,
            b_dep_attribute: vec![],
        },
    )
    .unwrap();
    let class_a = AttributeClass::Link(a);
    let class_b = AttributeClass::Link(b);

    let r = objectdb::object::create(&tx).unwrap();
    name_class.insert(&db, &tx, r.id).unwrap();
    name_class
        .update(&db, &tx, r.id, &Attribute::Text(text::TextAttribute { value: "Alice".into() }))
        .unwrap();

    let o = objectdb::object::create(&tx).unwrap();
    class_a.insert(&db, &tx, o.id).unwrap();
    let mut attr = link::LinkAttribute::default();
    attr.raw.push(r.id);
    class_a.update(&db, &tx, o.id, &Attribute::Link(attr)).unwrap();

    let a_val = match class_a.find(&tx, o.id).unwrap() {
        Attribute::Link(a) => a,
        _ => unreachable!(),
    };
    assert_eq!(a_val.raw, vec![r.id]);
    assert_eq!(a_val.show.get(&r.id).map(String::as_str), Some("Alice"));
    let b_val = match class_b.find(&tx, r.id).unwrap() {
        Attribute::Link(a) => a,
        _ => unreachable!(),
    };
    assert_eq!(b_val.raw, vec![o.id]);

    name_class
        .update(&db, &tx, r.id, &Attribute::Text(text::TextAttribute { value: "Bob".into() }))
        .unwrap();
    let a_val = match class_a.find(&tx, o.id).unwrap() {
        Attribute::Link(a) => a,
        _ => unreachable!(),
    };
    assert_eq!(a_val.show.get(&r.id).map(String::as_str), Some("Bob"));
}

/// A view's `like` filter against a table returns only the matching objects.
#[test]
fn scenario_view_filter_returns_matching_objects() {
    let db = test_db();
    let tx = db.write_tx().unwrap();
    let table = Table::create(&tx, "Widgets").unwrap();
    let class = AttributeClass::Text(text::create(&tx, "Title", "title").unwrap());
    table.add_attribute_class(&tx, &class).unwrap();

    let o = objectdb::object::create(&tx).unwrap();
    class.insert(&db, &tx, o.id).unwrap();
    class
        .update(&db, &tx, o.id, &Attribute::Text(text::TextAttribute { value: "hello".into() }))
        .unwrap();
    table.insert(&tx, &[o.id]).unwrap();

    let mut view = View::create(&tx, table.id).unwrap();
    view.filter(&tx, json!({class.id().to_string(): {"like": "ell"}})).unwrap();
    let result = view.query(&tx).unwrap();
    assert_eq!(result.object_ids(), vec![o.id]);
}

/// Dropping an attribute class that is a table field unattaches it
/// everywhere and scrubs it from every object.
#[test]
fn scenario_dropping_a_field_class_cleans_up_table_and_objects() {
    let db = test_db();
    let tx = db.write_tx().unwrap();
    let table = Table::create(&tx, "Widgets").unwrap();
    let class = AttributeClass::Text(text::create(&tx, "Title", "title").unwrap());
    let class_id = class.id();
    table.add_attribute_class(&tx, &class).unwrap();

    let o = objectdb::object::create(&tx).unwrap();
    class.insert(&db, &tx, o.id).unwrap();
    table.insert(&tx, &[o.id]).unwrap();

    class.drop_class(&db, &tx).unwrap();

    let table = Table::open(&tx, table.id).unwrap();
    assert!(!table.fields().contains(&class_id));
    let obj = objectdb::object::open(&tx, o.id).unwrap();
    assert!(obj.data.as_object().unwrap().get(&class_id.to_string()).is_none());
    let err = attribute::open(&tx, class_id).unwrap_err();
    assert!(matches!(err, Error::NotFound { kind: NotFoundKind::AttributeClass, .. }));
}

/// The `std` aggregate over five known values matches the textbook sample
/// standard deviation.
#[test]
fn scenario_std_aggregate_matches_known_value() {
    let db = test_db();
    let tx = db.write_tx().unwrap();
    tx.execute_batch("CREATE TABLE nums(x); INSERT INTO nums VALUES (1),(2),(3),(4),(5);")
        .unwrap();
    let result: f64 = tx.query_row("SELECT std(x) FROM nums", [], |row| row.get(0)).unwrap();
    assert!((result - 2f64.sqrt()).abs() < 1e-9, "got {result}");
}
