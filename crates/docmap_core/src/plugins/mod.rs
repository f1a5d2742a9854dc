//! Bundled hook plugins.
//!
//! # Responsibility
//! - `schema`: veto saves of documents that fail an external validator.
//! - `runtime`: time dispatches and log the elapsed time.

pub mod runtime;
pub mod schema;

pub use runtime::{RuntimePlugin, RuntimeSample};
pub use schema::{require_fields, validate_payload, SchemaPlugin, Validator};
