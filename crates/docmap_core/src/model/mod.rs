//! Document data model shared by tracking, planning and storage.
//!
//! # Responsibility
//! - Define the dynamic `Value` tree used for every record body.
//! - Define the 12-byte `RecordId` identity type.
//!
//! # Invariants
//! - Only `Value::Object` is a mergeable container.
//! - `RecordId` renders as exactly 24 lowercase hex characters.

pub mod record_id;
pub mod value;
