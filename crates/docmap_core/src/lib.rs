//! Document mapping core.
//!
//! Tracks pending changes on semi-structured records, plans minimal bulk
//! writes against a document store and runs named before/after hooks around
//! every persistence operation.

pub mod config;
pub mod db;
pub mod error;
pub mod hooks;
pub mod logging;
pub mod model;
pub mod planner;
pub mod plugins;
pub mod service;
pub mod store;
pub mod tracking;

pub use config::{derive_collection_name, BulkWriteOptions, CollectionOptions};
pub use error::{FieldError, MapperError, MapperResult, ValidationFailure};
pub use hooks::{HookAction, HookEvent, HookPhase, HookRegistry, HookResult, Plugin};
pub use logging::{default_log_level, init_logging, init_logging_with, logging_status, LogConfig};
pub use model::record_id::{RecordId, RecordIdParseError};
pub use model::value::{Map, Value};
pub use planner::{plan_write, WriteMethod, WriteOperation, WritePlan};
pub use plugins::{RuntimePlugin, SchemaPlugin, Validator};
pub use service::{Collection, CollectionContext, Record, RecordOutcome, SaveReport};
pub use store::{BulkWriteResult, DocumentStore, SqliteDocumentStore, StoreError, WriteError};
pub use tracking::change_store::{ChangeStore, FieldDiff, Prior, SetMode};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
