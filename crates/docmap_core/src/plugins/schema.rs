//! Schema validation plugin.
//!
//! # Responsibility
//! - Consume an external `validate(document) -> errors` contract.
//! - Veto saves whose pending documents fail validation.
//!
//! # Invariants
//! - A veto lists every failing record position, not just the first.
//! - Vetoed saves never reach the store.

use crate::error::{FieldError, MapperError, ValidationFailure};
use crate::hooks::{HookAction, HookEvent, HookRegistry, Plugin};
use crate::model::value::Value;
use log::info;
use std::sync::Arc;

/// Event names validated when none are configured.
pub const DEFAULT_SCHEMA_EVENTS: &str = "save";

/// External schema check.
pub trait Validator: Send + Sync {
    /// Returns every field error of `document`; empty means valid.
    fn validate(&self, document: &Value) -> Vec<FieldError>;
}

impl<F> Validator for F
where
    F: Fn(&Value) -> Vec<FieldError> + Send + Sync,
{
    fn validate(&self, document: &Value) -> Vec<FieldError> {
        self(document)
    }
}

/// Validates every record document of a dispatch payload.
///
/// Reads `data.records[*].{position, document}` and `data.collection`.
pub fn validate_payload<V: Validator + ?Sized>(validator: &V, data: &Value) -> ValidationFailure {
    let collection = data
        .get_path("collection")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let mut failure = ValidationFailure::new(collection);

    let records = data
        .get_path("records")
        .and_then(Value::as_array)
        .unwrap_or_default();
    for (fallback, entry) in records.iter().enumerate() {
        let position = entry
            .get_path("position")
            .and_then(Value::as_i64)
            .and_then(|position| usize::try_from(position).ok())
            .unwrap_or(fallback);
        let document = entry.get_path("document").unwrap_or(&Value::Null);
        failure.push(position, validator.validate(document));
    }
    failure
}

/// Registers a `before` listener that cancels invalid saves.
pub struct SchemaPlugin<V> {
    validator: Arc<V>,
    events: String,
}

impl<V: Validator + 'static> SchemaPlugin<V> {
    pub fn new(validator: V) -> Self {
        Self {
            validator: Arc::new(validator),
            events: DEFAULT_SCHEMA_EVENTS.to_string(),
        }
    }

    /// Overrides the comma-separated event names to validate.
    pub fn on(mut self, events: impl Into<String>) -> Self {
        self.events = events.into();
        self
    }

    fn check(validator: &V, event: &mut HookEvent) -> HookAction {
        let failure = validate_payload(validator, &event.data);
        if failure.is_empty() {
            return HookAction::proceed();
        }

        info!(
            "event=schema_validate module=plugins status=rejected collection={} name={} failed={}",
            failure.collection,
            event.name(),
            failure.failures.len()
        );
        HookAction::cancel(MapperError::Validation(failure))
    }
}

impl<V: Validator + 'static> Plugin for SchemaPlugin<V> {
    fn install(&self, hooks: &mut HookRegistry) {
        let validator = Arc::clone(&self.validator);
        hooks.before(&self.events, move |event| Self::check(&validator, event));
    }
}

/// Field error helper for validators that check required keys.
pub fn require_fields(document: &Value, fields: &[&str]) -> Vec<FieldError> {
    fields
        .iter()
        .filter(|field| match document.get_path(field) {
            None | Some(Value::Null) => true,
            Some(_) => false,
        })
        .map(|field| FieldError::new(*field, "is required"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{require_fields, validate_payload, SchemaPlugin};
    use crate::error::{FieldError, MapperError};
    use crate::hooks::{HookPhase, HookRegistry};
    use crate::model::value::Value;
    use serde_json::json;

    fn payload() -> Value {
        Value::from(json!({
            "collection": "people",
            "records": [
                {"position": 0, "document": {"first": "Flash"}},
                {"position": 3, "document": {"first": "Dale", "last": "Arden"}},
                {"position": 4, "document": {}},
            ],
        }))
    }

    #[test]
    fn payload_failures_are_keyed_by_position() {
        let validator = |document: &Value| require_fields(document, &["first", "last"]);
        let failure = validate_payload(&validator, &payload());

        assert_eq!(failure.collection, "people");
        assert_eq!(failure.failed_positions().collect::<Vec<_>>(), vec![0, 4]);
        assert_eq!(failure.failures[&4].len(), 2);
    }

    #[test]
    fn plugin_cancels_with_validation_error() {
        let mut hooks = HookRegistry::new();
        hooks.use_plugin(&SchemaPlugin::new(|document: &Value| {
            require_fields(document, &["last"])
        }));
        assert_eq!(hooks.listener_count(HookPhase::Before, "save"), 1);

        let pending = hooks.dispatch_sync("save", payload());
        match pending.cancellation() {
            Some(MapperError::Validation(failure)) => {
                assert_eq!(failure.failed_positions().collect::<Vec<_>>(), vec![0, 4]);
            }
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn plugin_events_are_configurable() {
        let mut hooks = HookRegistry::new();
        hooks.use_plugin(&SchemaPlugin::new(|_: &Value| Vec::<FieldError>::new()).on("save,push"));
        assert_eq!(hooks.listener_count(HookPhase::Before, "push"), 1);
        assert!(!hooks.dispatch_sync("push", payload()).is_cancelled());
    }
}
