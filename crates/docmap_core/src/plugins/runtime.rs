//! Runtime instrumentation plugin.
//!
//! # Responsibility
//! - Time dispatches from the first `before` listener to the `after` phase.
//! - Log one `hook_runtime` line per timed dispatch and keep the samples.
//!
//! # Invariants
//! - The plugin never cancels a dispatch.
//! - A dispatch with no start mark (for example a cancelled one) records
//!   nothing.

use crate::hooks::{HookAction, HookEvent, HookRegistry, Plugin};
use crate::model::value::Value;
use log::info;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Event names timed when none are configured.
pub const DEFAULT_RUNTIME_EVENTS: &str = "save,refresh";

const STARTED_AT_KEY: &str = "runtime.started_at";

/// One timed dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeSample {
    pub name: String,
    pub elapsed: Duration,
    /// Number of items in the action's result (1 for scalar results).
    pub count: usize,
}

/// Registers before/after listeners that time dispatches.
#[derive(Debug, Clone)]
pub struct RuntimePlugin {
    events: String,
    samples: Arc<Mutex<Vec<RuntimeSample>>>,
}

impl Default for RuntimePlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimePlugin {
    pub fn new() -> Self {
        Self {
            events: DEFAULT_RUNTIME_EVENTS.to_string(),
            samples: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Overrides the comma-separated event names to time.
    pub fn on(mut self, events: impl Into<String>) -> Self {
        self.events = events.into();
        self
    }

    /// Samples recorded so far, oldest first.
    pub fn samples(&self) -> Vec<RuntimeSample> {
        self.samples
            .lock()
            .map(|samples| samples.clone())
            .unwrap_or_default()
    }

    fn mark(event: &mut HookEvent) -> HookAction {
        if !event.scratch.contains_key(STARTED_AT_KEY) {
            event.scratch.insert(STARTED_AT_KEY, Instant::now());
        }
        HookAction::proceed()
    }

    fn record(samples: &Mutex<Vec<RuntimeSample>>, event: &mut HookEvent) -> HookAction {
        let Some(started_at) = event.scratch.get::<Instant>(STARTED_AT_KEY).copied() else {
            return HookAction::proceed();
        };

        let sample = RuntimeSample {
            name: event.name().to_string(),
            elapsed: started_at.elapsed(),
            count: result_count(event.res.as_ref()),
        };
        info!(
            "event=hook_runtime module=plugins status=ok name={} count={} duration_ms={}",
            sample.name,
            sample.count,
            sample.elapsed.as_millis()
        );
        if let Ok(mut samples) = samples.lock() {
            samples.push(sample);
        }
        HookAction::proceed()
    }
}

impl Plugin for RuntimePlugin {
    fn install(&self, hooks: &mut HookRegistry) {
        let samples = Arc::clone(&self.samples);
        hooks
            .before(&self.events, Self::mark)
            .after(&self.events, move |event| Self::record(&samples, event));
    }
}

fn result_count(res: Option<&Value>) -> usize {
    match res {
        None | Some(Value::Null) => 0,
        Some(Value::Array(items)) => items.len(),
        Some(Value::Int(count)) => usize::try_from(*count).unwrap_or_default(),
        Some(Value::Object(map)) => map
            .get("count")
            .and_then(Value::as_i64)
            .and_then(|count| usize::try_from(count).ok())
            .unwrap_or(1),
        Some(_) => 1,
    }
}
