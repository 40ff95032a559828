use std::io;
use std::sync::Arc;

use alderdb_core::collation::Collation;
use alderdb_core::query::{QueryOptions, QueryRow};
use alderdb_core::view::{
    Emitter, IndexUpdate, MapFunction, ReduceFunction, ViewCompiler,
};
use alderdb_core::{AnyError, Error, JsonObject, JsonValue};
use serde_json::json;

use crate::{Configuration, Database, LocalStore};

fn test_db() -> (Arc<LocalStore>, Database) {
    let store = Arc::new(LocalStore::in_memory());
    let database = Database::new(store.clone(), Configuration::default());
    (store, database)
}

/// Emits `(doc._id, doc.value)` for every document.
fn by_id_map() -> Arc<dyn MapFunction> {
    Arc::new(|document: &JsonObject, emitter: &mut Emitter| {
        emitter.emit(document["_id"].clone(), Some(document["value"].clone()));
    })
}

/// Emits `(doc.key, 1)` for every document.
fn by_key_map() -> Arc<dyn MapFunction> {
    Arc::new(|document: &JsonObject, emitter: &mut Emitter| {
        emitter.emit(document["key"].clone(), Some(json!(1)));
    })
}

fn count_reduce() -> Arc<dyn ReduceFunction> {
    Arc::new(|_keys: &[JsonValue], values: &[JsonValue], _rereduce: bool| json!(values.len()))
}

fn keys(rows: &[QueryRow]) -> Vec<JsonValue> {
    rows.iter().map(|row| row.key.clone()).collect()
}

fn key_values(rows: &[QueryRow]) -> Vec<(JsonValue, Option<JsonValue>)> {
    rows.iter()
        .map(|row| (row.key.clone(), row.value.clone()))
        .collect()
}

#[test]
fn fresh_build_returns_rows_in_key_order() -> anyhow::Result<()> {
    let (store, db) = test_db();
    store.put_document("b", &json!({"value": 2}), None)?;
    store.put_document("c", &json!({"value": 3}), None)?;
    store.put_document("a", &json!({"value": 1}), None)?;

    let view = db.register_view("by-id", "1", by_id_map(), None)?;
    assert_eq!(view.update_index()?, IndexUpdate::Updated);

    let rows = view.query(&QueryOptions::default())?;
    assert_eq!(
        key_values(&rows),
        vec![
            (json!("a"), Some(json!(1))),
            (json!("b"), Some(json!(2))),
            (json!("c"), Some(json!(3))),
        ]
    );
    assert_eq!(rows[0].doc_id.as_deref(), Some("a"));
    assert_eq!(view.total_rows()?, 3);
    assert_eq!(view.last_sequence_indexed()?, db.max_sequence()?);
    Ok(())
}

#[test]
fn incremental_update_replaces_old_emissions() -> anyhow::Result<()> {
    let (store, db) = test_db();
    store.put_document("a", &json!({"value": 1}), None)?;
    let b = store.put_document("b", &json!({"value": 2}), None)?;
    store.put_document("c", &json!({"value": 3}), None)?;

    let view = db.register_view("by-id", "1", by_id_map(), None)?;
    view.update_index()?;

    store.put_document("b", &json!({"value": 20}), Some(&b.rev_id))?;
    assert!(view.is_stale()?);
    assert_eq!(view.update_index()?, IndexUpdate::Updated);

    let rows = view.query(&QueryOptions::default())?;
    assert_eq!(
        key_values(&rows),
        vec![
            (json!("a"), Some(json!(1))),
            (json!("b"), Some(json!(20))),
            (json!("c"), Some(json!(3))),
        ]
    );
    assert_eq!(view.total_rows()?, 3);
    Ok(())
}

#[test]
fn update_index_is_idempotent() -> anyhow::Result<()> {
    let (store, db) = test_db();
    store.put_document("a", &json!({"value": 1}), None)?;
    let view = db.register_view("by-id", "1", by_id_map(), None)?;
    assert_eq!(view.update_index()?, IndexUpdate::Updated);
    assert_eq!(view.update_index()?, IndexUpdate::NotModified);
    assert!(!view.is_stale()?);
    Ok(())
}

#[test]
fn update_index_requires_registration() {
    let (_store, db) = test_db();
    let view = db.view("never-registered");
    assert!(matches!(view.update_index(), Err(Error::NotFound(_))));
}

#[test]
fn version_bump_rebuilds_from_scratch() -> anyhow::Result<()> {
    let (store, db) = test_db();
    store.put_document("a", &json!({"value": 1}), None)?;
    let view = db.register_view("by-id", "1", by_id_map(), None)?;
    view.update_index()?;
    assert_eq!(view.last_sequence_indexed()?, 1);

    let changed = view.set_map(by_id_map(), "2")?;
    assert!(changed);
    assert_eq!(view.last_sequence_indexed()?, 0);

    assert_eq!(view.update_index()?, IndexUpdate::Updated);
    assert_eq!(view.total_rows()?, 1);
    assert_eq!(view.last_sequence_indexed()?, db.max_sequence()?);

    // Re-registering the same version leaves the index alone.
    assert!(!view.set_map(by_id_map(), "2")?);
    assert_eq!(view.update_index()?, IndexUpdate::NotModified);
    Ok(())
}

#[test]
fn deleted_documents_lose_their_emissions() -> anyhow::Result<()> {
    let (store, db) = test_db();
    store.put_document("a", &json!({"value": 1}), None)?;
    store.put_document("b", &json!({"value": 2}), None)?;
    let view = db.register_view("by-id", "1", by_id_map(), None)?;
    view.update_index()?;
    assert_eq!(view.total_rows()?, 2);

    store.delete_document("a", None)?;
    view.update_index()?;
    assert_eq!(view.total_rows()?, 1);
    assert_eq!(keys(&view.query(&QueryOptions::default())?), vec![json!("b")]);
    Ok(())
}

#[test]
fn documents_deleted_before_the_first_build_never_index() -> anyhow::Result<()> {
    let (store, db) = test_db();
    store.put_document("a", &json!({"value": 1}), None)?;
    store.delete_document("a", None)?;
    store.put_document("b", &json!({"value": 2}), None)?;

    let view = db.register_view("by-id", "1", by_id_map(), None)?;
    view.update_index()?;
    assert_eq!(keys(&view.query(&QueryOptions::default())?), vec![json!("b")]);
    Ok(())
}

#[test]
fn design_documents_are_not_indexed() -> anyhow::Result<()> {
    let (store, db) = test_db();
    store.put_document("_design/ignored", &json!({"value": 9}), None)?;
    store.put_document("a", &json!({"value": 1}), None)?;
    let view = db.register_view("by-id", "1", by_id_map(), None)?;
    view.update_index()?;
    assert_eq!(keys(&view.query(&QueryOptions::default())?), vec![json!("a")]);
    Ok(())
}

#[test]
fn conflicting_revisions_index_only_the_winner() -> anyhow::Result<()> {
    let (store, db) = test_db();
    store.put_document("x", &json!({"value": "base"}), None)?;
    store.force_insert("x", "2-aaaa", &json!({"value": "a"}))?;
    store.force_insert("x", "2-bbbb", &json!({"value": "b"}))?;

    let view = db.register_view("by-id", "1", by_id_map(), None)?;
    view.update_index()?;
    let rows = view.query(&QueryOptions::default())?;
    assert_eq!(key_values(&rows), vec![(json!("x"), Some(json!("b")))]);

    // Tombstoning the winner promotes the other branch's emissions.
    store.delete_document("x", None)?;
    view.update_index()?;
    let rows = view.query(&QueryOptions::default())?;
    assert_eq!(key_values(&rows), vec![(json!("x"), Some(json!("a")))]);
    assert_eq!(view.total_rows()?, 1);
    Ok(())
}

#[test]
fn map_function_failures_do_not_block_the_index() -> anyhow::Result<()> {
    struct EmitsThenFails;
    impl MapFunction for EmitsThenFails {
        fn map(
            &self,
            document: &JsonObject,
            emitter: &mut Emitter,
        ) -> Result<(), Box<dyn AnyError>> {
            emitter.emit(document["_id"].clone(), None);
            Err(Box::new(io::Error::new(io::ErrorKind::Other, "poison")))
        }
    }

    let (store, db) = test_db();
    store.put_document("a", &json!({"value": 1}), None)?;
    store.put_document("b", &json!({"value": 2}), None)?;
    let view = db.register_view("by-id", "1", Arc::new(EmitsThenFails), None)?;

    // The failure is logged, the emissions made before it stay applied, and
    // the index still advances.
    assert_eq!(view.update_index()?, IndexUpdate::Updated);
    assert_eq!(view.total_rows()?, 2);
    assert_eq!(view.last_sequence_indexed()?, db.max_sequence()?);
    Ok(())
}

#[test]
fn prefix_match_widens_the_end_key() -> anyhow::Result<()> {
    let (store, db) = test_db();
    store.put_document("k1", &json!({"key": ["US", "CA", "SF"]}), None)?;
    store.put_document("k2", &json!({"key": ["US", "CA", "LA"]}), None)?;
    store.put_document("k3", &json!({"key": ["US", "NY", "NYC"]}), None)?;
    store.put_document("k4", &json!({"key": ["CA", "ON", "TOR"]}), None)?;
    let view = db.register_view("by-key", "1", by_key_map(), None)?;
    view.update_index()?;

    let rows = view.query(
        &QueryOptions::default()
            .with_start_key(json!(["US"]))
            .with_end_key(json!(["US"]))
            .with_prefix_match_level(1),
    )?;
    assert_eq!(
        keys(&rows),
        vec![
            json!(["US", "CA", "LA"]),
            json!(["US", "CA", "SF"]),
            json!(["US", "NY", "NYC"]),
        ]
    );
    Ok(())
}

#[test]
fn group_level_buckets_array_keys() -> anyhow::Result<()> {
    let (store, db) = test_db();
    store.put_document("k1", &json!({"key": ["US", "CA", "SF"]}), None)?;
    store.put_document("k2", &json!({"key": ["US", "CA", "LA"]}), None)?;
    store.put_document("k3", &json!({"key": ["US", "NY", "NYC"]}), None)?;
    store.put_document("k4", &json!({"key": ["CA", "ON", "TOR"]}), None)?;
    let view = db.register_view("by-key", "1", by_key_map(), Some(count_reduce()))?;
    view.update_index()?;

    let rows = view.query(&QueryOptions::default().with_group_level(2))?;
    assert_eq!(
        key_values(&rows),
        vec![
            (json!(["CA", "ON"]), Some(json!(1))),
            (json!(["US", "CA"]), Some(json!(2))),
            (json!(["US", "NY"]), Some(json!(1))),
        ]
    );
    Ok(())
}

#[test]
fn ungrouped_reduce_produces_one_null_keyed_row() -> anyhow::Result<()> {
    let (store, db) = test_db();
    store.put_document("a", &json!({"key": "x"}), None)?;
    store.put_document("b", &json!({"key": "y"}), None)?;
    let view = db.register_view("by-key", "1", by_key_map(), Some(count_reduce()))?;
    view.update_index()?;

    let rows = view.query(&QueryOptions::default().reduced())?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].key, json!(null));
    assert_eq!(rows[0].value, Some(json!(2)));
    assert_eq!(rows[0].doc_id, None);
    Ok(())
}

#[test]
fn reduce_without_a_reduce_function_is_a_bad_request() -> anyhow::Result<()> {
    let (store, db) = test_db();
    store.put_document("a", &json!({"key": "x"}), None)?;
    let view = db.register_view("by-key", "1", by_key_map(), None)?;
    view.update_index()?;

    let error = view
        .query(&QueryOptions::default().reduced())
        .expect_err("reduce should require a reduce function");
    assert!(matches!(error, Error::BadRequest(_)));

    // Grouping alone is fine; the rows carry null values.
    let rows = view.query(&QueryOptions::default().grouped())?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].value, None);
    Ok(())
}

#[test]
fn descending_reverses_rows_and_doc_id_tiebreak() -> anyhow::Result<()> {
    let (store, db) = test_db();
    store.put_document("d1", &json!({"key": "k"}), None)?;
    store.put_document("d2", &json!({"key": "k"}), None)?;
    let view = db.register_view("by-key", "1", by_key_map(), None)?;
    view.update_index()?;

    let ascending = view.query(&QueryOptions::default())?;
    assert_eq!(
        ascending
            .iter()
            .map(|row| row.doc_id.clone())
            .collect::<Vec<_>>(),
        vec![Some(String::from("d1")), Some(String::from("d2"))]
    );

    let descending = view.query(
        &QueryOptions::default()
            .descending()
            .with_inclusive_end(false),
    )?;
    assert_eq!(
        descending
            .iter()
            .map(|row| row.doc_id.clone())
            .collect::<Vec<_>>(),
        vec![Some(String::from("d2")), Some(String::from("d1"))]
    );
    Ok(())
}

#[test]
fn exclusive_end_keys_drop_matching_rows() -> anyhow::Result<()> {
    let (store, db) = test_db();
    store.put_document("a", &json!({"value": 1}), None)?;
    store.put_document("b", &json!({"value": 2}), None)?;
    store.put_document("c", &json!({"value": 3}), None)?;
    let view = db.register_view("by-id", "1", by_id_map(), None)?;
    view.update_index()?;

    let rows = view.query(
        &QueryOptions::default()
            .with_start_key(json!("a"))
            .with_end_key(json!("c"))
            .with_inclusive_end(false),
    )?;
    assert_eq!(keys(&rows), vec![json!("a"), json!("b")]);
    Ok(())
}

#[test]
fn start_key_doc_id_breaks_ties() -> anyhow::Result<()> {
    let (store, db) = test_db();
    store.put_document("d1", &json!({"key": "k"}), None)?;
    store.put_document("d2", &json!({"key": "k"}), None)?;
    store.put_document("d3", &json!({"key": "z"}), None)?;
    let view = db.register_view("by-key", "1", by_key_map(), None)?;
    view.update_index()?;

    let rows = view.query(
        &QueryOptions::default()
            .with_start_key(json!("k"))
            .with_start_key_doc_id("d2"),
    )?;
    assert_eq!(
        rows.iter()
            .map(|row| row.doc_id.clone())
            .collect::<Vec<_>>(),
        vec![Some(String::from("d2")), Some(String::from("d3"))]
    );
    Ok(())
}

#[test]
fn key_sets_return_rows_in_caller_order() -> anyhow::Result<()> {
    let (store, db) = test_db();
    store.put_document("a", &json!({"value": 1}), None)?;
    store.put_document("b", &json!({"value": 2}), None)?;
    store.put_document("c", &json!({"value": 3}), None)?;
    let view = db.register_view("by-id", "1", by_id_map(), None)?;
    view.update_index()?;

    let rows = view.query(
        &QueryOptions::default().with_keys(vec![json!("c"), json!("a"), json!("missing")]),
    )?;
    assert_eq!(keys(&rows), vec![json!("c"), json!("a")]);
    Ok(())
}

#[test]
fn skip_and_limit_page_the_scan() -> anyhow::Result<()> {
    let (store, db) = test_db();
    store.put_document("a", &json!({"value": 1}), None)?;
    store.put_document("b", &json!({"value": 2}), None)?;
    store.put_document("c", &json!({"value": 3}), None)?;
    let view = db.register_view("by-id", "1", by_id_map(), None)?;
    view.update_index()?;

    let rows = view.query(&QueryOptions::default().with_skip(1).with_limit(1))?;
    assert_eq!(keys(&rows), vec![json!("b")]);
    Ok(())
}

#[test]
fn mixed_key_types_scan_in_collation_order() -> anyhow::Result<()> {
    let (store, db) = test_db();
    let unordered = [
        json!({}),
        json!("text"),
        json!([1, 2]),
        json!(true),
        json!(7),
        json!(null),
        json!(false),
    ];
    for (index, key) in unordered.iter().enumerate() {
        store.put_document(&format!("d{index}"), &json!({ "key": key }), None)?;
    }
    let view = db.register_view("by-key", "1", by_key_map(), None)?;
    view.update_index()?;

    assert_eq!(
        keys(&view.query(&QueryOptions::default())?),
        vec![
            json!(null),
            json!(false),
            json!(true),
            json!(7),
            json!("text"),
            json!([1, 2]),
            json!({}),
        ]
    );
    Ok(())
}

#[test]
fn raw_collation_orders_by_serialized_bytes() -> anyhow::Result<()> {
    let (store, db) = test_db();
    store.put_document("a", &json!({"key": 9}), None)?;
    store.put_document("b", &json!({"key": 10}), None)?;
    let view = db.register_view("by-key", "1", by_key_map(), None)?;
    view.update_index()?;

    assert_eq!(
        keys(&view.query(&QueryOptions::default())?),
        vec![json!(9), json!(10)]
    );
    view.set_collation(Collation::Raw);
    assert_eq!(
        keys(&view.query(&QueryOptions::default())?),
        vec![json!(10), json!(9)]
    );
    Ok(())
}

#[test]
fn include_docs_joins_document_properties() -> anyhow::Result<()> {
    let (store, db) = test_db();
    let revision = store.put_document("a", &json!({"value": 1}), None)?;
    let view = db.register_view("by-id", "1", by_id_map(), None)?;
    view.update_index()?;

    let rows = view.query(&QueryOptions::default().including_docs())?;
    let contents = rows[0].doc_contents.as_ref().expect("missing doc contents");
    assert_eq!(contents["value"], json!(1));
    assert_eq!(contents["_id"], json!("a"));
    assert_eq!(contents["_rev"], json!(revision.rev_id));
    Ok(())
}

#[test]
fn include_docs_follows_linked_documents() -> anyhow::Result<()> {
    let (store, db) = test_db();
    store.put_document("target", &json!({"value": 42}), None)?;
    store.put_document("source", &json!({"value": {"_id": "target"}}), None)?;
    let view = db.register_view("by-id", "1", by_id_map(), None)?;
    view.update_index()?;

    let rows = view.query(
        &QueryOptions::default()
            .with_keys(vec![json!("source")])
            .including_docs(),
    )?;
    let contents = rows[0].doc_contents.as_ref().expect("missing doc contents");
    assert_eq!(contents["_id"], json!("target"));
    assert_eq!(contents["value"], json!(42));
    Ok(())
}

#[test]
fn post_filter_drops_rows_after_construction() -> anyhow::Result<()> {
    let (store, db) = test_db();
    store.put_document("a", &json!({"value": 1}), None)?;
    store.put_document("b", &json!({"value": 2}), None)?;
    let view = db.register_view("by-id", "1", by_id_map(), None)?;
    view.update_index()?;

    let rows = view.query(
        &QueryOptions::default()
            .with_post_filter(|row| row.value == Some(json!(2))),
    )?;
    assert_eq!(keys(&rows), vec![json!("b")]);
    Ok(())
}

#[test]
fn delete_index_clears_rows_but_keeps_the_registration() -> anyhow::Result<()> {
    let (store, db) = test_db();
    store.put_document("a", &json!({"value": 1}), None)?;
    let view = db.register_view("by-id", "1", by_id_map(), None)?;
    view.update_index()?;
    assert_eq!(view.total_rows()?, 1);

    view.delete_index()?;
    assert_eq!(view.total_rows()?, 0);
    assert_eq!(view.last_sequence_indexed()?, 0);
    assert!(view.query(&QueryOptions::default())?.is_empty());

    assert_eq!(view.update_index()?, IndexUpdate::Updated);
    assert_eq!(view.total_rows()?, 1);
    Ok(())
}

#[test]
fn delete_removes_the_view_entirely() -> anyhow::Result<()> {
    let (store, db) = test_db();
    store.put_document("a", &json!({"value": 1}), None)?;
    let view = db.register_view("by-id", "1", by_id_map(), None)?;
    view.update_index()?;

    view.delete()?;
    assert!(matches!(view.update_index(), Err(Error::NotFound(_))));
    assert_eq!(view.last_sequence_indexed()?, -1);

    // The name can be registered again from scratch.
    let reborn = db.register_view("by-id", "1", by_id_map(), None)?;
    assert_eq!(reborn.update_index()?, IndexUpdate::Updated);
    assert_eq!(reborn.total_rows()?, 1);
    Ok(())
}

#[test]
fn closing_the_database_invalidates_view_handles() -> anyhow::Result<()> {
    let (store, db) = test_db();
    store.put_document("a", &json!({"value": 1}), None)?;
    let view = db.register_view("by-id", "1", by_id_map(), None)?;
    view.update_index()?;

    db.close();
    assert!(!db.is_open());
    assert!(matches!(view.update_index(), Err(Error::NotOpen)));
    assert!(matches!(
        view.query(&QueryOptions::default()),
        Err(Error::NotOpen)
    ));
    assert!(matches!(db.max_sequence(), Err(Error::NotOpen)));
    Ok(())
}

#[test]
fn query_view_updates_before_querying() -> anyhow::Result<()> {
    let (store, db) = test_db();
    store.put_document("a", &json!({"value": 1}), None)?;
    db.register_view("by-id", "1", by_id_map(), None)?;

    let rows = db.query_view("by-id", &QueryOptions::default())?;
    assert_eq!(keys(&rows), vec![json!("a")]);
    Ok(())
}

#[test]
fn views_register_from_source_through_the_compiler() -> anyhow::Result<()> {
    #[derive(Debug)]
    struct StubCompiler;
    impl ViewCompiler for StubCompiler {
        fn compile_map(&self, source: &str, language: &str) -> Option<Arc<dyn MapFunction>> {
            (language == "stub" && source == "emit-id").then(by_id_map)
        }

        fn compile_reduce(
            &self,
            source: &str,
            language: &str,
        ) -> Option<Arc<dyn ReduceFunction>> {
            (language == "stub" && source == "count").then(count_reduce)
        }
    }

    let store = Arc::new(LocalStore::in_memory());
    let db = Database::new(
        store.clone(),
        Configuration::default().with_view_compiler(Arc::new(StubCompiler)),
    );
    store.put_document("a", &json!({"value": 1}), None)?;

    let view = db.register_view_from_source("by-id", "1", "emit-id", Some("count"), "stub")?;
    view.update_index()?;
    let rows = view.query(&QueryOptions::default().reduced())?;
    assert_eq!(rows[0].value, Some(json!(1)));

    assert!(matches!(
        db.register_view_from_source("broken", "1", "emit-id", None, "javascript"),
        Err(Error::BadRequest(_))
    ));
    Ok(())
}

#[test]
fn registering_from_source_requires_a_compiler() {
    let (_store, db) = test_db();
    assert!(matches!(
        db.register_view_from_source("by-id", "1", "emit-id", None, "stub"),
        Err(Error::BadRequest(_))
    ));
}

#[test]
fn dump_lists_rows_in_key_order() -> anyhow::Result<()> {
    let (store, db) = test_db();
    store.put_document("b", &json!({"value": 2}), None)?;
    store.put_document("a", &json!({"value": 1}), None)?;
    let view = db.register_view("by-id", "1", by_id_map(), None)?;
    view.update_index()?;

    let rows = view.dump()?;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].key, "\"a\"");
    assert_eq!(rows[0].value.as_deref(), Some("1"));
    assert_eq!(rows[1].key, "\"b\"");
    Ok(())
}

#[test]
fn persisted_indexes_survive_a_reopen() -> anyhow::Result<()> {
    let directory = tempfile::tempdir()?;
    let path = directory.path().join("store.alder");
    {
        let store = Arc::new(LocalStore::open(&path)?);
        let db = Database::new(store.clone(), Configuration::default());
        store.put_document("a", &json!({"value": 1}), None)?;
        db.register_view("by-id", "1", by_id_map(), None)?
            .update_index()?;
    }

    let store = Arc::new(LocalStore::open(&path)?);
    let db = Database::new(store, Configuration::default());
    // Queries read the persisted index; no map function is needed.
    let view = db.view("by-id");
    assert_eq!(keys(&view.query(&QueryOptions::default())?), vec![json!("a")]);
    assert_eq!(view.total_rows()?, 1);
    Ok(())
}
