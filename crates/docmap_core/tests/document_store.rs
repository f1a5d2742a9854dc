use docmap_core::store::DUPLICATE_KEY_CODE;
use docmap_core::{
    BulkWriteOptions, Collection, CollectionOptions, DocumentStore, HookRegistry, MapperError,
    Record, RecordId, RecordOutcome, SqliteDocumentStore, StoreError, Value,
};
use futures::executor::block_on;
use serde_json::json;
use std::sync::Arc;

const FLASH_ID: &str = "5aa9399f229cbe35cc9174ca";

fn collection_over(store: &Arc<SqliteDocumentStore>, options: CollectionOptions) -> Collection {
    let shared: Arc<dyn DocumentStore> = store.clone();
    Collection::new(options, shared, HookRegistry::new().freeze())
}

fn people(store: &Arc<SqliteDocumentStore>) -> Collection {
    collection_over(store, CollectionOptions::named("people"))
}

fn memory_store() -> Arc<SqliteDocumentStore> {
    Arc::new(SqliteDocumentStore::open_in_memory().unwrap())
}

fn seed_flash(store: &Arc<SqliteDocumentStore>) {
    let mut seed = people(store);
    let mut record = seed.create_record();
    record
        .assign(Value::from(json!({
            "_id": {"$oid": FLASH_ID},
            "first": "Flash",
            "address": {"city": "Mongo", "zip": "M1"},
        })))
        .unwrap();
    seed.push_record(record).unwrap();
    block_on(seed.save(false)).unwrap();
}

#[test]
fn duplicate_identity_fails_only_its_own_record() {
    let store = memory_store();
    seed_flash(&store);

    let mut batch = people(&store);
    batch
        .push_values(vec![
            Value::from(json!({"first": "Dale"})),
            Value::from(json!({"first": "Ming"})),
        ])
        .unwrap();
    batch
        .record_mut(1)
        .unwrap()
        .set("_id", RecordId::parse_str(FLASH_ID).unwrap())
        .unwrap();

    let report = block_on(batch.save(false)).unwrap();
    assert_eq!(report.committed_count(), 1);
    let failed: Vec<_> = report.failed().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].0, 1);
    assert_eq!(failed[0].1.code, DUPLICATE_KEY_CODE);

    assert!(batch.record(0).unwrap().is_persisted());
    let rejected = batch.record(1).unwrap();
    assert!(rejected.is_dirty());
    assert!(!rejected.is_persisted());
    assert_eq!(store.count("people").unwrap(), 2);
}

#[test]
fn single_record_duplicate_is_an_adapter_error() {
    let store = memory_store();
    seed_flash(&store);

    let people = people(&store);
    let mut record = people.create_record();
    record
        .set("_id", FLASH_ID)
        .unwrap()
        .set("first", "Imposter")
        .unwrap();

    match block_on(record.save(false)) {
        Err(MapperError::Adapter {
            source: StoreError::Write(err),
            operations,
            partial,
        }) => {
            assert_eq!(err.code, DUPLICATE_KEY_CODE);
            assert_eq!(operations.len(), 1);
            assert_eq!(partial.map(|write| write.write_errors.len()), Some(1));
        }
        other => panic!("expected adapter error, got {other:?}"),
    }
    assert!(record.is_dirty());
}

#[test]
fn ordered_bulk_write_stops_at_first_failure() {
    let store = memory_store();
    seed_flash(&store);

    let options = CollectionOptions::named("people").with_bulk_write(BulkWriteOptions { ordered: true });
    let mut batch = collection_over(&store, options);
    batch
        .push_values(vec![
            Value::from(json!({"first": "Dale"})),
            Value::from(json!({"first": "Ming"})),
            Value::from(json!({"first": "Zarkov"})),
        ])
        .unwrap();
    batch
        .record_mut(1)
        .unwrap()
        .set("_id", FLASH_ID)
        .unwrap();

    let report = block_on(batch.save(false)).unwrap();
    assert!(matches!(report.outcomes[0], RecordOutcome::Inserted(_)));
    assert!(matches!(report.outcomes[1], RecordOutcome::Failed(_)));
    assert_eq!(report.outcomes[2], RecordOutcome::Skipped);
    assert!(batch.record(2).unwrap().is_dirty());
    assert_eq!(store.count("people").unwrap(), 2);
}

#[test]
fn updates_apply_nested_sets_and_unsets() {
    let store = memory_store();
    seed_flash(&store);
    let people = people(&store);
    let id = RecordId::parse_str(FLASH_ID).unwrap();

    let mut flash = block_on(people.find_by_id(id)).unwrap().unwrap();
    assert!(flash.is_persisted());
    flash
        .set("address.city", "Arboria")
        .unwrap()
        .unset("address.zip")
        .unwrap();
    block_on(flash.save(false)).unwrap();

    let reloaded = block_on(people.find_by_id(id)).unwrap().unwrap();
    assert_eq!(
        reloaded.get_written(None),
        Some(Value::from(json!({
            "_id": {"$oid": FLASH_ID},
            "first": "Flash",
            "address": {"city": "Arboria"},
        })))
    );
}

#[test]
fn refresh_replaces_written_state_and_keeps_changes() {
    let store = memory_store();
    seed_flash(&store);
    let people = people(&store);
    let id = RecordId::parse_str(FLASH_ID).unwrap();

    let mut stale = block_on(people.find_by_id(id)).unwrap().unwrap();
    let mut fresh = block_on(people.find_by_id(id)).unwrap().unwrap();
    fresh.set("first", "Gordon").unwrap();
    block_on(fresh.save(false)).unwrap();

    stale.set("nickname", "Flash").unwrap();
    let written = block_on(stale.refresh()).unwrap();
    assert_eq!(written.get_path("first"), Some(&Value::from("Gordon")));
    assert_eq!(stale.get("nickname"), Some(Value::from("Flash")));
    assert!(stale.is_dirty());
}

#[test]
fn refresh_requires_a_persisted_record() {
    let store = memory_store();
    let people = people(&store);
    let mut record = people.create_record();
    record.set("first", "Dale").unwrap();

    let err = block_on(record.refresh()).unwrap_err();
    assert_eq!(err.code(), "not_persisted");
}

#[test]
fn refresh_of_deleted_document_leaves_empty_written_state() {
    let store = memory_store();
    let people = people(&store);
    let mut ghost = Record::from_persisted(
        people.context(),
        Value::from(json!({"_id": {"$oid": FLASH_ID}, "first": "Ghost"}))
            .into_object()
            .unwrap(),
    );

    let written = block_on(ghost.refresh()).unwrap();
    assert_eq!(written, Value::object());
    assert!(ghost.is_persisted());
}

#[test]
fn documents_survive_reopening_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("docmap.db");

    {
        let store = Arc::new(SqliteDocumentStore::open(&path).unwrap());
        seed_flash(&store);
    }

    let store = Arc::new(SqliteDocumentStore::open(&path).unwrap());
    let people = people(&store);
    let found = block_on(people.find_by_id(RecordId::parse_str(FLASH_ID).unwrap()))
        .unwrap()
        .unwrap();
    assert_eq!(found.get("address.city"), Some(Value::from("Mongo")));
}

#[test]
fn find_one_matches_dotted_filters() {
    let store = memory_store();
    seed_flash(&store);
    let people = people(&store);

    let filter = Value::from(json!({"address.city": "Mongo"}))
        .into_object()
        .unwrap();
    let found = block_on(people.context().find_one(filter)).unwrap().unwrap();
    assert_eq!(found.id(), Some(RecordId::parse_str(FLASH_ID).unwrap()));

    let missing = Value::from(json!({"address.city": "Earth"}))
        .into_object()
        .unwrap();
    assert!(block_on(people.context().find_one(missing)).unwrap().is_none());
}

#[test]
fn update_of_vanished_document_is_not_committed() {
    let store = memory_store();
    let people = people(&store);
    let mut ghost = Record::from_value(
        people.context(),
        Value::from(json!({"_id": {"$oid": FLASH_ID}, "n": 1})),
    )
    .unwrap();
    ghost.set("n", 2).unwrap();

    match block_on(ghost.save(false)) {
        Err(MapperError::Missing { collection, id }) => {
            assert_eq!(collection, "people");
            assert_eq!(id, RecordId::parse_str(FLASH_ID).unwrap());
        }
        other => panic!("expected missing document, got {other:?}"),
    }
    assert!(ghost.is_dirty());
    assert_eq!(ghost.get_written(Some("n")), Some(Value::from(1)));
    assert_eq!(store.count("people").unwrap(), 0);
}

#[test]
fn batch_reports_unmatched_updates_per_record() {
    let store = memory_store();
    seed_flash(&store);

    let mut batch = people(&store);
    batch
        .push_values(vec![
            Value::from(json!({"_id": {"$oid": FLASH_ID}, "first": "Flash"})),
            Value::from(json!({"_id": {"$oid": "5aa9399f229cbe35cc9174cb"}, "first": "Ghost"})),
        ])
        .unwrap();
    batch.set("seen", true).unwrap();

    let report = block_on(batch.save(false)).unwrap();
    assert_eq!(report.outcomes[0], RecordOutcome::Updated);
    assert_eq!(report.outcomes[1], RecordOutcome::NotFound);
    assert_eq!(report.not_found().collect::<Vec<_>>(), vec![1]);

    let write = report.write.unwrap();
    assert_eq!(write.n_matched, 1);
    assert!(write.is_unmatched(1));

    assert!(!batch.record(0).unwrap().is_dirty());
    assert!(batch.record(1).unwrap().is_dirty());
    assert_eq!(store.count("people").unwrap(), 1);
}

#[test]
fn empty_object_save_keeps_stored_children() {
    let store = memory_store();
    seed_flash(&store);
    let people = people(&store);
    let id = RecordId::parse_str(FLASH_ID).unwrap();

    let mut flash = block_on(people.find_by_id(id)).unwrap().unwrap();
    flash
        .set("address", Value::object())
        .unwrap()
        .set("first", "Gordon")
        .unwrap();
    block_on(flash.save(false)).unwrap();

    let reloaded = block_on(people.find_by_id(id)).unwrap().unwrap();
    assert_eq!(reloaded.get("address.zip"), Some(Value::from("M1")));
    assert_eq!(reloaded.get("first"), Some(Value::from("Gordon")));
}
