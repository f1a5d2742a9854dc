//! Mapper-level error taxonomy.
//!
//! # Responsibility
//! - Classify failures raised by tracking, planning, hooks and storage.
//! - Carry enough context (operations, partial results) for callers to
//!   decide what to retry.
//!
//! # Invariants
//! - In-memory failures are returned synchronously; storage failures only
//!   surface from async calls.

use crate::model::record_id::{RecordId, RecordIdParseError};
use crate::model::value::Value;
use crate::store::{BulkWriteResult, StoreError};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type MapperResult<T> = Result<T, MapperError>;

/// One failing field reported by a validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub path: String,
    pub message: String,
}

impl FieldError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl Display for FieldError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Records of one batch that failed schema checks, keyed by batch position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationFailure {
    pub collection: String,
    pub failures: BTreeMap<usize, Vec<FieldError>>,
}

impl ValidationFailure {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            failures: BTreeMap::new(),
        }
    }

    /// Records `errors` for `position`; empty lists are ignored.
    pub fn push(&mut self, position: usize, errors: Vec<FieldError>) {
        if errors.is_empty() {
            return;
        }
        self.failures.entry(position).or_default().extend(errors);
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed_positions(&self) -> impl Iterator<Item = usize> + '_ {
        self.failures.keys().copied()
    }
}

impl Display for ValidationFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "validation failed for {} record(s) in `{}`",
            self.failures.len(),
            self.collection
        )?;
        if let Some((position, errors)) = self.failures.iter().next() {
            if let Some(first) = errors.first() {
                write!(f, " (record {position}: {first})")?;
            }
        }
        Ok(())
    }
}

impl Error for ValidationFailure {}

#[derive(Debug)]
pub enum MapperError {
    /// Schema checks rejected one or more records before any storage call.
    Validation(ValidationFailure),
    /// An identity-requiring operation ran on a record with no written state.
    NotPersisted { collection: String },
    /// An update addressed a persisted record the store no longer holds.
    Missing { collection: String, id: RecordId },
    /// The storage round trip failed.
    Adapter {
        source: StoreError,
        operations: Vec<Value>,
        partial: Option<BulkWriteResult>,
    },
    /// Invalid argument shape or call sequence.
    ProgrammerMisuse(String),
    /// A listener vetoed the dispatch.
    Cancelled(String),
}

impl MapperError {
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled(reason.into())
    }

    pub fn misuse(message: impl Into<String>) -> Self {
        Self::ProgrammerMisuse(message.into())
    }

    /// Stable identifier used in log lines.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_failed",
            Self::NotPersisted { .. } => "not_persisted",
            Self::Missing { .. } => "document_missing",
            Self::Adapter { .. } => "adapter_failed",
            Self::ProgrammerMisuse(_) => "programmer_misuse",
            Self::Cancelled(_) => "cancelled",
        }
    }
}

impl Display for MapperError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(failure) => write!(f, "{failure}"),
            Self::NotPersisted { collection } => write!(
                f,
                "record in `{collection}` has no persisted state; save it first"
            ),
            Self::Missing { collection, id } => {
                write!(f, "no document {id} in `{collection}` to update")
            }
            Self::Adapter {
                source, operations, ..
            } => write!(
                f,
                "storage round trip failed after {} operation(s): {source}",
                operations.len()
            ),
            Self::ProgrammerMisuse(message) => write!(f, "{message}"),
            Self::Cancelled(reason) => write!(f, "dispatch cancelled: {reason}"),
        }
    }
}

impl Error for MapperError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(failure) => Some(failure),
            Self::Adapter { source, .. } => Some(source),
            Self::NotPersisted { .. }
            | Self::Missing { .. }
            | Self::ProgrammerMisuse(_)
            | Self::Cancelled(_) => None,
        }
    }
}

impl From<RecordIdParseError> for MapperError {
    fn from(value: RecordIdParseError) -> Self {
        Self::ProgrammerMisuse(value.to_string())
    }
}

impl From<StoreError> for MapperError {
    fn from(value: StoreError) -> Self {
        Self::Adapter {
            source: value,
            operations: Vec::new(),
            partial: None,
        }
    }
}

impl From<ValidationFailure> for MapperError {
    fn from(value: ValidationFailure) -> Self {
        Self::Validation(value)
    }
}
