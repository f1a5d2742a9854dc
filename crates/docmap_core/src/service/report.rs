//! Save results.

use crate::hooks::HookResponse;
use crate::model::record_id::RecordId;
use crate::model::value::{Map, Value};
use crate::store::{BulkWriteResult, WriteError};
use std::time::Duration;

/// What a save did to one record of the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Nothing to write.
    Unchanged,
    Inserted(RecordId),
    Updated,
    /// The store rejected this record's operation; its changes stay pending.
    Failed(WriteError),
    /// An earlier failure halted an ordered bulk write before this record's
    /// operation ran; its changes stay pending.
    Skipped,
    /// The update's filter found no stored document; changes stay pending.
    NotFound,
}

impl RecordOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Inserted(_) | Self::Updated)
    }
}

/// Per-record result of one save.
///
/// `outcomes` is indexed by batch position. An empty `operations` list
/// means nothing needed saving and no dispatch took place.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveReport {
    pub collection: String,
    pub operations: Vec<Value>,
    pub outcomes: Vec<RecordOutcome>,
    pub write: Option<BulkWriteResult>,
    /// Time spent inside the store round trip.
    pub write_elapsed: Duration,
    pub elapsed: Duration,
}

impl SaveReport {
    pub(crate) fn unchanged(collection: &str, records: usize, elapsed: Duration) -> Self {
        Self {
            collection: collection.to_string(),
            operations: Vec::new(),
            outcomes: vec![RecordOutcome::Unchanged; records],
            write: None,
            write_elapsed: Duration::ZERO,
            elapsed,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.operations.is_empty()
    }

    /// Positions whose operation the store rejected.
    pub fn failed(&self) -> impl Iterator<Item = (usize, &WriteError)> + '_ {
        self.outcomes
            .iter()
            .enumerate()
            .filter_map(|(position, outcome)| match outcome {
                RecordOutcome::Failed(err) => Some((position, err)),
                _ => None,
            })
    }

    pub fn committed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.is_committed())
            .count()
    }

    /// Positions whose update found no stored document.
    pub fn not_found(&self) -> impl Iterator<Item = usize> + '_ {
        self.outcomes
            .iter()
            .enumerate()
            .filter(|(_, outcome)| **outcome == RecordOutcome::NotFound)
            .map(|(position, _)| position)
    }

    /// Time spent outside the store round trip.
    pub fn overhead(&self) -> Duration {
        self.elapsed.saturating_sub(self.write_elapsed)
    }
}

impl HookResponse for SaveReport {
    fn response_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("collection".to_string(), Value::from(self.collection.as_str()));
        map.insert(
            "count".to_string(),
            Value::Int(i64::try_from(self.operations.len()).unwrap_or(i64::MAX)),
        );
        map.insert("operations".to_string(), Value::Array(self.operations.clone()));
        map.insert(
            "write".to_string(),
            self.write
                .as_ref()
                .map_or(Value::Null, BulkWriteResult::to_value),
        );
        Value::Object(map)
    }
}
