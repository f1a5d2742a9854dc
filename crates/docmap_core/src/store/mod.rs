//! Storage adapter contract.
//!
//! # Responsibility
//! - Define the narrow `bulk_write` / `find_one` surface the mapper needs.
//! - Define bulk-write results and per-operation write errors.
//!
//! # Invariants
//! - `BulkWriteResult::write_errors` indexes match positions in the
//!   submitted operation list.
//! - Adapters never reorder `inserted_ids` keys; they are operation indexes.
//!
//! # See also
//! - `sqlite_store` for the bundled implementation.

use crate::config::BulkWriteOptions;
use crate::db::DbError;
use crate::model::record_id::RecordId;
use crate::model::value::{Map, Value};
use crate::planner::WriteOperation;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod sqlite_store;

pub use sqlite_store::SqliteDocumentStore;

/// Error code reported when an insert collides with an existing identity.
pub const DUPLICATE_KEY_CODE: i32 = 11000;

pub type StoreResult<T> = Result<T, StoreError>;

/// Failure of one operation inside a bulk write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteError {
    pub index: usize,
    pub code: i32,
    pub message: String,
}

impl Display for WriteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "operation {} failed with code {}: {}",
            self.index, self.code, self.message
        )
    }
}

impl Error for WriteError {}

/// Outcome counters of one bulk write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkWriteResult {
    pub n_inserted: u64,
    /// Update filters that found a document.
    pub n_matched: u64,
    pub n_updated: u64,
    pub n_upserted: u64,
    pub n_modified: u64,
    pub n_removed: u64,
    pub inserted_ids: BTreeMap<usize, RecordId>,
    pub upserted_ids: BTreeMap<usize, RecordId>,
    pub write_errors: Vec<WriteError>,
    /// Indexes of updates whose filter found nothing and that did not upsert.
    pub unmatched: BTreeSet<usize>,
}

impl BulkWriteResult {
    /// Write error reported for the operation at `index`, if any.
    pub fn error_for(&self, index: usize) -> Option<&WriteError> {
        self.write_errors.iter().find(|err| err.index == index)
    }

    /// True when the update at `index` ran but touched no document.
    pub fn is_unmatched(&self, index: usize) -> bool {
        self.unmatched.contains(&index)
    }

    pub fn has_errors(&self) -> bool {
        !self.write_errors.is_empty()
    }

    pub fn to_value(&self) -> Value {
        let ids = |ids: &BTreeMap<usize, RecordId>| {
            Value::Object(
                ids.iter()
                    .map(|(index, id)| (index.to_string(), Value::Id(*id)))
                    .collect(),
            )
        };

        let mut map = Map::new();
        map.insert("nInserted".to_string(), count(self.n_inserted));
        map.insert("nMatched".to_string(), count(self.n_matched));
        map.insert("nUpdated".to_string(), count(self.n_updated));
        map.insert("nUpserted".to_string(), count(self.n_upserted));
        map.insert("nModified".to_string(), count(self.n_modified));
        map.insert("nRemoved".to_string(), count(self.n_removed));
        map.insert("insertedIds".to_string(), ids(&self.inserted_ids));
        map.insert("upsertedIds".to_string(), ids(&self.upserted_ids));
        map.insert(
            "writeErrors".to_string(),
            Value::Array(
                self.write_errors
                    .iter()
                    .map(|err| {
                        let mut entry = Map::new();
                        entry.insert("index".to_string(), count(err.index as u64));
                        entry.insert("code".to_string(), Value::from(err.code));
                        entry.insert("errmsg".to_string(), Value::from(err.message.as_str()));
                        Value::Object(entry)
                    })
                    .collect(),
            ),
        );
        Value::Object(map)
    }
}

fn count(value: u64) -> Value {
    Value::Int(i64::try_from(value).unwrap_or(i64::MAX))
}

#[derive(Debug)]
pub enum StoreError {
    Db(DbError),
    Serialization(String),
    Backend(String),
    /// A single operation was rejected by the store.
    Write(WriteError),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Serialization(message) => write!(f, "document serialization failed: {message}"),
            Self::Backend(message) => write!(f, "store backend failed: {message}"),
            Self::Write(err) => write!(f, "{err}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Write(err) => Some(err),
            Self::Serialization(_) | Self::Backend(_) => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::from(value))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value.to_string())
    }
}

/// Document store reachable by the mapper.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Executes `operations` against `collection`.
    ///
    /// Per-operation failures are reported in
    /// [`BulkWriteResult::write_errors`]; `Err` means the batch as a whole
    /// could not run.
    async fn bulk_write(
        &self,
        collection: &str,
        operations: &[WriteOperation],
        options: &BulkWriteOptions,
    ) -> StoreResult<BulkWriteResult>;

    /// Returns the first document of `collection` whose fields equal every
    /// dot-path entry of `filter`.
    async fn find_one(&self, collection: &str, filter: &Map) -> StoreResult<Option<Map>>;
}
