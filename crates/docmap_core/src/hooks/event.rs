//! Hook event payload and listener return types.

use crate::error::MapperError;
use crate::model::value::Value;
use futures::future::BoxFuture;
use std::any::Any;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};

/// Which listener list an event is running through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPhase {
    Before,
    After,
}

impl HookPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Before => "before",
            Self::After => "after",
        }
    }
}

/// Listener verdict.
#[derive(Debug)]
pub enum HookResult {
    Continue,
    /// Stops the remaining listeners and the wrapped action.
    Cancel(MapperError),
}

impl HookResult {
    pub fn cancel(reason: impl Into<String>) -> Self {
        Self::Cancel(MapperError::cancelled(reason))
    }

    pub fn is_cancel(&self) -> bool {
        matches!(self, Self::Cancel(_))
    }
}

/// Deferred listener completion.
pub type HookFuture = BoxFuture<'static, HookResult>;

/// What a listener hands back to the dispatcher.
pub enum HookAction {
    /// Completed synchronously.
    Done(HookResult),
    /// Completes later; only awaited by async dispatch.
    Deferred(HookFuture),
}

impl HookAction {
    pub fn proceed() -> Self {
        Self::Done(HookResult::Continue)
    }

    pub fn cancel(err: MapperError) -> Self {
        Self::Done(HookResult::Cancel(err))
    }
}

impl From<HookResult> for HookAction {
    fn from(value: HookResult) -> Self {
        Self::Done(value)
    }
}

impl Debug for HookAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Done(result) => f.debug_tuple("Done").field(result).finish(),
            Self::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

/// Per-dispatch scratch space shared by every listener of one event.
///
/// Values are keyed by string and retrieved by type; a lookup with the
/// wrong type behaves like a missing key.
#[derive(Default)]
pub struct Scratch {
    slots: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl Scratch {
    pub fn insert<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.slots.insert(key.into(), Box::new(value));
    }

    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.slots
            .get(key)
            .and_then(|value| value.downcast_ref::<T>())
    }

    pub fn get_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        self.slots
            .get_mut(key)
            .and_then(|value| value.downcast_mut::<T>())
    }

    pub fn remove<T: Any>(&mut self, key: &str) -> Option<T> {
        if self.get::<T>(key).is_none() {
            return None;
        }
        self.slots
            .remove(key)
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.slots.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Debug for Scratch {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.slots.keys()).finish()
    }
}

/// Event shared by every listener of one dispatch.
#[derive(Debug)]
pub struct HookEvent {
    names: Vec<String>,
    name: String,
    phase: HookPhase,
    /// Payload supplied by the dispatching operation.
    pub data: Value,
    pub scratch: Scratch,
    /// Summary of the wrapped action's result, set before after listeners run.
    pub res: Option<Value>,
}

impl HookEvent {
    pub fn new(names: Vec<String>, data: Value) -> Self {
        let name = names.first().cloned().unwrap_or_default();
        Self {
            names,
            name,
            phase: HookPhase::Before,
            data,
            scratch: Scratch::default(),
            res: None,
        }
    }

    /// Every name of the dispatch, in caller order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Name whose listeners are currently running.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phase(&self) -> HookPhase {
        self.phase
    }

    pub(crate) fn enter(&mut self, phase: HookPhase, name: &str) {
        self.phase = phase;
        if self.name != name {
            self.name = name.to_string();
        }
    }
}

/// Converts an action result into the `res` value after listeners see.
pub trait HookResponse {
    fn response_value(&self) -> Value;
}

impl HookResponse for () {
    fn response_value(&self) -> Value {
        Value::Null
    }
}

impl HookResponse for usize {
    fn response_value(&self) -> Value {
        Value::Int(i64::try_from(*self).unwrap_or(i64::MAX))
    }
}

impl HookResponse for Value {
    fn response_value(&self) -> Value {
        self.clone()
    }
}

impl<T: HookResponse> HookResponse for Option<T> {
    fn response_value(&self) -> Value {
        self.as_ref().map_or(Value::Null, HookResponse::response_value)
    }
}
