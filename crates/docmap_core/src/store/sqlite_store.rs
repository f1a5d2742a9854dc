//! SQLite-backed document store.
//!
//! # Responsibility
//! - Persist record bodies as extended-JSON text keyed by collection and id.
//! - Execute `insertOne` / `updateOne` batches with per-operation errors.
//! - Answer equality `find_one` lookups.
//!
//! # Invariants
//! - A batch runs inside one transaction; only whole-batch failures roll
//!   back, per-operation failures are reported and skipped.
//! - Ordered batches stop at the first write error.
//! - Stored bodies always carry the identity field.

use super::{
    BulkWriteResult, DocumentStore, StoreError, StoreResult, WriteError, DUPLICATE_KEY_CODE,
};
use crate::config::BulkWriteOptions;
use crate::db::{open_db, open_db_in_memory};
use crate::model::record_id::RecordId;
use crate::model::value::{Map, Value};
use crate::planner::WriteOperation;
use crate::tracking::change_store::DEFAULT_IDENTITY_FIELD;
use crate::tracking::dot_path::{get_path, remove_path, set_path};
use async_trait::async_trait;
use log::{debug, error};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Transaction};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

/// Error code reported for malformed operations.
const BAD_VALUE_CODE: i32 = 2;

/// Document store over a single SQLite connection.
pub struct SqliteDocumentStore {
    conn: Mutex<Connection>,
    identity_field: String,
}

impl SqliteDocumentStore {
    /// Wraps an already migrated connection.
    pub fn new(conn: Connection) -> Self {
        Self::with_identity_field(conn, DEFAULT_IDENTITY_FIELD)
    }

    pub fn with_identity_field(conn: Connection, identity_field: impl Into<String>) -> Self {
        Self {
            conn: Mutex::new(conn),
            identity_field: identity_field.into(),
        }
    }

    /// Opens (and migrates) a database file.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Ok(Self::new(open_db(path)?))
    }

    /// Opens (and migrates) a private in-memory database.
    pub fn open_in_memory() -> StoreResult<Self> {
        Ok(Self::new(open_db_in_memory()?))
    }

    pub fn identity_field(&self) -> &str {
        &self.identity_field
    }

    /// Number of stored documents in `collection`.
    pub fn count(&self, collection: &str) -> StoreResult<u64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE collection = ?1;",
            [collection],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Backend("sqlite connection mutex poisoned".to_string()))
    }

    fn run_bulk(
        &self,
        collection: &str,
        operations: &[WriteOperation],
        options: &BulkWriteOptions,
    ) -> StoreResult<BulkWriteResult> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut result = BulkWriteResult::default();

        for (index, operation) in operations.iter().enumerate() {
            let outcome = match operation {
                WriteOperation::InsertOne { document } => {
                    self.insert_one(&tx, collection, index, document, &mut result)
                }
                WriteOperation::UpdateOne {
                    filter,
                    set,
                    unset,
                    upsert,
                } => self.update_one(&tx, collection, index, filter, set, unset, *upsert, &mut result),
            };

            if let Err(write_error) = outcome? {
                result.write_errors.push(write_error);
                if options.ordered {
                    break;
                }
            }
        }

        tx.commit()?;
        Ok(result)
    }

    fn insert_one(
        &self,
        tx: &Transaction<'_>,
        collection: &str,
        index: usize,
        document: &Map,
        result: &mut BulkWriteResult,
    ) -> StoreResult<Result<(), WriteError>> {
        let mut document = document.clone();
        let id = match document.get(&self.identity_field) {
            Some(Value::Id(id)) => *id,
            Some(other) => {
                return Ok(Err(WriteError {
                    index,
                    code: BAD_VALUE_CODE,
                    message: format!("`{}` must be a record id, got {other}", self.identity_field),
                }))
            }
            None => {
                let id = RecordId::new();
                document.insert(self.identity_field.clone(), Value::Id(id));
                id
            }
        };

        match insert_row(tx, collection, id, &document) {
            Ok(()) => {
                result.n_inserted += 1;
                result.inserted_ids.insert(index, id);
                Ok(Ok(()))
            }
            Err(StoreError::Db(crate::db::DbError::Sqlite(err))) if is_constraint_violation(&err) => {
                Ok(Err(WriteError {
                    index,
                    code: DUPLICATE_KEY_CODE,
                    message: format!("duplicate key: {collection} {} {id}", self.identity_field),
                }))
            }
            Err(err) => Err(err),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn update_one(
        &self,
        tx: &Transaction<'_>,
        collection: &str,
        index: usize,
        filter: &Map,
        set: &Map,
        unset: &Map,
        upsert: bool,
        result: &mut BulkWriteResult,
    ) -> StoreResult<Result<(), WriteError>> {
        if set.contains_key(&self.identity_field) {
            return Ok(Err(WriteError {
                index,
                code: BAD_VALUE_CODE,
                message: format!("`{}` cannot be modified by an update", self.identity_field),
            }));
        }

        let Some((id, mut body)) = self.find_row(tx, collection, filter)? else {
            if upsert {
                let mut document = Map::new();
                for (path, value) in filter.iter().chain(set.iter()) {
                    set_path(&mut document, path, value.clone());
                }
                let id = match document.get(&self.identity_field) {
                    Some(Value::Id(id)) => *id,
                    _ => {
                        let id = RecordId::new();
                        document.insert(self.identity_field.clone(), Value::Id(id));
                        id
                    }
                };
                insert_row(tx, collection, id, &document)?;
                result.n_upserted += 1;
                result.upserted_ids.insert(index, id);
            } else {
                result.unmatched.insert(index);
            }
            return Ok(Ok(()));
        };

        let before = body.clone();
        for (path, value) in set {
            set_path(&mut body, path, value.clone());
        }
        for path in unset.keys() {
            remove_path(&mut body, path, false);
        }

        result.n_matched += 1;
        result.n_updated += 1;
        if body != before {
            tx.execute(
                "UPDATE documents
                 SET
                    body = ?1,
                    updated_at = (strftime('%s', 'now') * 1000)
                 WHERE collection = ?2 AND id = ?3;",
                params![encode_body(&body)?, collection, id],
            )?;
            result.n_modified += 1;
        }
        Ok(Ok(()))
    }

    fn find_row(
        &self,
        conn: &Connection,
        collection: &str,
        filter: &Map,
    ) -> StoreResult<Option<(String, Map)>> {
        if let Some(Value::Id(id)) = filter.get(&self.identity_field) {
            let body: Option<String> = conn
                .query_row(
                    "SELECT body FROM documents WHERE collection = ?1 AND id = ?2;",
                    params![collection, id.to_hex()],
                    |row| row.get(0),
                )
                .optional()?;
            return match body {
                Some(text) => {
                    let body = decode_body(&text)?;
                    Ok(matches_filter(&body, filter).then(|| (id.to_hex(), body)))
                }
                None => Ok(None),
            };
        }

        let mut stmt = conn.prepare(
            "SELECT id, body FROM documents
             WHERE collection = ?1
             ORDER BY created_at ASC, id ASC;",
        )?;
        let mut rows = stmt.query([collection])?;
        while let Some(row) = rows.next()? {
            let id: String = row.get(0)?;
            let text: String = row.get(1)?;
            let body = decode_body(&text)?;
            if matches_filter(&body, filter) {
                return Ok(Some((id, body)));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn bulk_write(
        &self,
        collection: &str,
        operations: &[WriteOperation],
        options: &BulkWriteOptions,
    ) -> StoreResult<BulkWriteResult> {
        let started_at = Instant::now();
        match self.run_bulk(collection, operations, options) {
            Ok(result) => {
                debug!(
                    "event=store_bulk_write module=store status=ok collection={} operations={} inserted={} modified={} write_errors={} duration_ms={}",
                    collection,
                    operations.len(),
                    result.n_inserted,
                    result.n_modified,
                    result.write_errors.len(),
                    started_at.elapsed().as_millis()
                );
                Ok(result)
            }
            Err(err) => {
                error!(
                    "event=store_bulk_write module=store status=error collection={} operations={} duration_ms={} error={}",
                    collection,
                    operations.len(),
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    async fn find_one(&self, collection: &str, filter: &Map) -> StoreResult<Option<Map>> {
        let conn = self.lock()?;
        Ok(self
            .find_row(&conn, collection, filter)?
            .map(|(_, body)| body))
    }
}

fn insert_row(tx: &Connection, collection: &str, id: RecordId, document: &Map) -> StoreResult<()> {
    tx.execute(
        "INSERT INTO documents (collection, id, body) VALUES (?1, ?2, ?3);",
        params![collection, id.to_hex(), encode_body(document)?],
    )?;
    Ok(())
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _) if failure.code == ErrorCode::ConstraintViolation
    )
}

fn matches_filter(body: &Map, filter: &Map) -> bool {
    filter
        .iter()
        .all(|(path, expected)| get_path(body, path) == Some(expected))
}

fn encode_body(body: &Map) -> StoreResult<String> {
    Ok(serde_json::to_string(&Value::Object(body.clone()).to_json())?)
}

fn decode_body(text: &str) -> StoreResult<Map> {
    let json: serde_json::Value = serde_json::from_str(text)?;
    Value::from(json)
        .into_object()
        .ok_or_else(|| StoreError::Serialization("stored body is not an object".to_string()))
}

#[cfg(test)]
mod tests {
    use super::SqliteDocumentStore;
    use crate::config::BulkWriteOptions;
    use crate::model::record_id::RecordId;
    use crate::model::value::{Map, Value};
    use crate::planner::WriteOperation;
    use crate::store::{DocumentStore, DUPLICATE_KEY_CODE};
    use futures::executor::block_on;
    use serde_json::json;

    fn map(json: serde_json::Value) -> Map {
        Value::from(json).into_object().expect("fixture must be an object")
    }

    fn id_filter(id: RecordId) -> Map {
        let mut filter = Map::new();
        filter.insert("_id".to_string(), Value::Id(id));
        filter
    }

    #[test]
    fn duplicate_insert_reports_write_error_and_keeps_batch() {
        let store = SqliteDocumentStore::open_in_memory().expect("open store");
        let id = RecordId::new();
        let mut document = map(json!({"n": 1}));
        document.insert("_id".to_string(), Value::Id(id));
        let operations = vec![
            WriteOperation::InsertOne {
                document: document.clone(),
            },
            WriteOperation::InsertOne { document },
            WriteOperation::InsertOne {
                document: map(json!({"n": 2})),
            },
        ];

        let result = block_on(store.bulk_write("things", &operations, &BulkWriteOptions::default()))
            .expect("bulk write");

        assert_eq!(result.n_inserted, 2);
        assert_eq!(result.write_errors.len(), 1);
        assert_eq!(
            result.error_for(1).map(|err| err.code),
            Some(DUPLICATE_KEY_CODE)
        );
        assert!(result.inserted_ids.contains_key(&2));
        assert_eq!(store.count("things").expect("count"), 2);
    }

    #[test]
    fn ordered_batches_stop_at_first_error() {
        let store = SqliteDocumentStore::open_in_memory().expect("open store");
        let document = map(json!({"_id": {"$oid": "5aa9399f229cbe35cc9174ca"}}));
        let operations = vec![
            WriteOperation::InsertOne {
                document: document.clone(),
            },
            WriteOperation::InsertOne { document },
            WriteOperation::InsertOne {
                document: map(json!({"n": 2})),
            },
        ];

        let result =
            block_on(store.bulk_write("things", &operations, &BulkWriteOptions { ordered: true }))
                .expect("bulk write");
        assert_eq!(result.n_inserted, 1);
        assert_eq!(store.count("things").expect("count"), 1);
    }

    #[test]
    fn update_applies_set_and_unset_paths() {
        let store = SqliteDocumentStore::open_in_memory().expect("open store");
        let id = RecordId::new();
        let mut document = map(json!({"a": {"b": 1, "c": 2}, "gone": true}));
        document.insert("_id".to_string(), Value::Id(id));
        block_on(store.bulk_write(
            "things",
            &[WriteOperation::InsertOne { document }],
            &BulkWriteOptions::default(),
        ))
        .expect("insert");

        let update = WriteOperation::UpdateOne {
            filter: id_filter(id),
            set: map(json!({"a.b": 99})),
            unset: map(json!({"gone": ""})),
            upsert: false,
        };
        let result = block_on(store.bulk_write("things", &[update], &BulkWriteOptions::default()))
            .expect("update");
        assert_eq!((result.n_matched, result.n_modified), (1, 1));
        assert!(result.unmatched.is_empty());

        let found = block_on(store.find_one("things", &id_filter(id)))
            .expect("find")
            .expect("document should exist");
        assert_eq!(found.get("a"), Some(&Value::from(json!({"b": 99, "c": 2}))));
        assert!(!found.contains_key("gone"));
    }

    #[test]
    fn find_one_matches_nested_equality() {
        let store = SqliteDocumentStore::open_in_memory().expect("open store");
        let operations = vec![
            WriteOperation::InsertOne {
                document: map(json!({"profile": {"name": "Flash"}})),
            },
            WriteOperation::InsertOne {
                document: map(json!({"profile": {"name": "Dale"}})),
            },
        ];
        block_on(store.bulk_write("people", &operations, &BulkWriteOptions::default()))
            .expect("insert");

        let found = block_on(store.find_one("people", &map(json!({"profile.name": "Dale"}))))
            .expect("find")
            .expect("match expected");
        assert_eq!(found.get("profile"), Some(&Value::from(json!({"name": "Dale"}))));

        let missing = block_on(store.find_one("people", &map(json!({"profile.name": "Ming"}))))
            .expect("find");
        assert!(missing.is_none());
    }

    #[test]
    fn update_without_match_is_reported_not_failed() {
        let store = SqliteDocumentStore::open_in_memory().expect("open store");
        let update = WriteOperation::UpdateOne {
            filter: id_filter(RecordId::new()),
            set: map(json!({"n": 1})),
            unset: Map::new(),
            upsert: false,
        };
        let result = block_on(store.bulk_write("things", &[update], &BulkWriteOptions::default()))
            .expect("update");
        assert_eq!((result.n_matched, result.n_updated), (0, 0));
        assert!(result.write_errors.is_empty());
        assert!(result.is_unmatched(0));
        assert_eq!(
            result.to_value().get_path("nMatched"),
            Some(&Value::Int(0))
        );
    }
}
