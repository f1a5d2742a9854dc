//! Storage file layer behind `SqliteDocumentStore`.
//!
//! # Responsibility
//! - Hand out connections whose `documents` table (one JSON body per
//!   `(collection, id)` row) is at the schema this build understands.
//! - Report schema problems with the migration or version that caused them.
//!
//! # Invariants
//! - The schema version lives in `PRAGMA user_version`.
//! - A connection is only returned once every migration has committed; a
//!   failing migration rolls the whole batch back.
//!
//! # See also
//! - `crate::store::sqlite_store` for how document rows are read and written.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    /// Driver failure outside any migration step.
    Sqlite(rusqlite::Error),
    /// A migration script failed; nothing from its batch was kept.
    Migration {
        version: u32,
        name: &'static str,
        source: rusqlite::Error,
    },
    /// The file was written by a build with a newer `documents` schema.
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "sqlite: {err}"),
            Self::Migration {
                version,
                name,
                source,
            } => write!(f, "documents migration {version} ({name}) failed: {source}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "documents schema version {db_version} is newer than this build supports ({latest_supported})"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) | Self::Migration { source: err, .. } => Some(err),
            Self::UnsupportedSchemaVersion { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
