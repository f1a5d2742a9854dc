//! Sync and async event dispatch.

use super::event::{HookAction, HookEvent, HookPhase, HookResponse, HookResult};
use super::registry::{split_names, HookRegistry};
use crate::error::{MapperError, MapperResult};
use crate::model::value::Value;
use futures::future::BoxFuture;
use log::{debug, info, warn};
use std::time::Instant;

impl HookRegistry {
    /// Runs `before` listeners synchronously.
    ///
    /// Listeners returning a deferred completion are skipped with a warning.
    /// The returned handle runs the matching `after` listeners.
    pub fn dispatch_sync(&self, names: &str, data: Value) -> PendingDispatch<'_> {
        let started_at = Instant::now();
        let mut event = HookEvent::new(split_names(names), data);
        let cancellation = match self.run_phase_sync(HookPhase::Before, &mut event) {
            HookResult::Continue => None,
            HookResult::Cancel(err) => {
                log_cancelled(&event, &err);
                Some(err)
            }
        };

        PendingDispatch {
            registry: self,
            event,
            cancellation,
            started_at,
        }
    }

    /// Runs `before` listeners, `action`, then `after` listeners.
    ///
    /// Deferred listener completions are awaited in registration order. A
    /// cancel from any listener rejects the dispatch with its error; a
    /// `before` cancel also prevents `action` from running. The action's
    /// result is summarized into `event.res` for `after` listeners.
    pub async fn dispatch<'a, R, F>(&self, names: &str, data: Value, action: F) -> MapperResult<R>
    where
        R: HookResponse,
        F: FnOnce(&mut HookEvent) -> BoxFuture<'a, MapperResult<R>>,
    {
        let started_at = Instant::now();
        let mut event = HookEvent::new(split_names(names), data);

        if let HookResult::Cancel(err) = self.run_phase(HookPhase::Before, &mut event).await {
            log_cancelled(&event, &err);
            return Err(err);
        }

        let output = action(&mut event).await?;
        event.res = Some(output.response_value());

        if let HookResult::Cancel(err) = self.run_phase(HookPhase::After, &mut event).await {
            log_cancelled(&event, &err);
            return Err(err);
        }

        debug!(
            "event=hook_dispatch module=hooks status=ok mode=async names={} duration_ms={}",
            event.names().join(","),
            started_at.elapsed().as_millis()
        );
        Ok(output)
    }

    async fn run_phase(&self, phase: HookPhase, event: &mut HookEvent) -> HookResult {
        let names = event.names().to_vec();
        for name in &names {
            event.enter(phase, name);
            for listener in self.listeners(phase, name) {
                let result = match listener(event) {
                    HookAction::Done(result) => result,
                    HookAction::Deferred(pending) => pending.await,
                };
                if result.is_cancel() {
                    return result;
                }
            }
        }
        HookResult::Continue
    }

    fn run_phase_sync(&self, phase: HookPhase, event: &mut HookEvent) -> HookResult {
        let names = event.names().to_vec();
        for name in &names {
            event.enter(phase, name);
            for listener in self.listeners(phase, name) {
                match listener(event) {
                    HookAction::Done(HookResult::Continue) => {}
                    HookAction::Done(cancel) => return cancel,
                    HookAction::Deferred(_) => {
                        warn!(
                            "event=hook_dispatch module=hooks status=skipped mode=sync name={} phase={} reason=deferred_listener",
                            name,
                            phase.as_str()
                        );
                    }
                }
            }
        }
        HookResult::Continue
    }
}

fn log_cancelled(event: &HookEvent, err: &MapperError) {
    info!(
        "event=hook_dispatch module=hooks status=cancelled name={} phase={} error_code={} error={}",
        event.name(),
        event.phase().as_str(),
        err.code(),
        err
    );
}

/// Result of a synchronous `before` phase, waiting for its `after` phase.
#[must_use = "after listeners only run through `complete` or `run_after`"]
pub struct PendingDispatch<'r> {
    registry: &'r HookRegistry,
    event: HookEvent,
    cancellation: Option<MapperError>,
    started_at: Instant,
}

impl PendingDispatch<'_> {
    pub fn event(&self) -> &HookEvent {
        &self.event
    }

    pub fn event_mut(&mut self) -> &mut HookEvent {
        &mut self.event
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_some()
    }

    pub fn cancellation(&self) -> Option<&MapperError> {
        self.cancellation.as_ref()
    }

    /// Runs `action` unless cancelled, then the `after` listeners.
    ///
    /// # Errors
    /// - The `before` cancellation, the action's error, or an `after`
    ///   cancellation, whichever comes first.
    pub fn complete<R, F>(mut self, action: F) -> MapperResult<R>
    where
        R: HookResponse,
        F: FnOnce(&mut HookEvent) -> MapperResult<R>,
    {
        if let Some(err) = self.cancellation.take() {
            return Err(err);
        }

        let output = action(&mut self.event)?;
        self.event.res = Some(output.response_value());
        self.finish()?;
        Ok(output)
    }

    /// Runs the `after` listeners without an action and returns the event.
    ///
    /// # Errors
    /// - The `before` cancellation, or an `after` cancellation.
    pub fn run_after(mut self) -> MapperResult<HookEvent> {
        if let Some(err) = self.cancellation.take() {
            return Err(err);
        }
        self.finish()?;
        Ok(self.event)
    }

    fn finish(&mut self) -> MapperResult<()> {
        if let HookResult::Cancel(err) = self
            .registry
            .run_phase_sync(HookPhase::After, &mut self.event)
        {
            log_cancelled(&self.event, &err);
            return Err(err);
        }
        debug!(
            "event=hook_dispatch module=hooks status=ok mode=sync names={} duration_ms={}",
            self.event.names().join(","),
            self.started_at.elapsed().as_millis()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::error::MapperError;
    use crate::hooks::event::{HookAction, HookPhase, HookResult};
    use crate::hooks::registry::HookRegistry;
    use crate::model::value::Value;
    use futures::executor::block_on;
    use futures::FutureExt;
    use std::sync::{Arc, Mutex};

    type Trail = Arc<Mutex<Vec<String>>>;

    fn push(trail: &Trail, entry: String) {
        trail.lock().expect("trail lock").push(entry);
    }

    #[test]
    fn listeners_run_in_name_then_registration_order() {
        let trail = Trail::default();
        let mut hooks = HookRegistry::new();
        for label in ["b1", "b2"] {
            let trail = Arc::clone(&trail);
            hooks.before("save,write", move |event| {
                push(&trail, format!("{label}:{}:{}", event.name(), event.phase().as_str()));
                HookAction::proceed()
            });
        }
        let after_trail = Arc::clone(&trail);
        hooks.after("save", move |event| {
            push(&after_trail, format!("a:{}:{}", event.name(), event.res.is_some()));
            HookAction::proceed()
        });

        let result = block_on(hooks.dispatch("save,write", Value::Null, |_| {
            async { Ok(Value::from("done")) }.boxed()
        }))
        .expect("dispatch should succeed");

        assert_eq!(result, Value::from("done"));
        assert_eq!(
            *trail.lock().expect("trail lock"),
            vec![
                "b1:save:before",
                "b2:save:before",
                "b1:write:before",
                "b2:write:before",
                "a:save:true",
            ]
        );
    }

    #[test]
    fn deferred_listeners_are_awaited_async_and_skipped_sync() {
        let trail = Trail::default();
        let mut hooks = HookRegistry::new();
        let deferred_trail = Arc::clone(&trail);
        hooks.before("save", move |_| {
            let trail = Arc::clone(&deferred_trail);
            HookAction::Deferred(
                async move {
                    push(&trail, "deferred".to_string());
                    HookResult::Continue
                }
                .boxed(),
            )
        });

        block_on(hooks.dispatch("save", Value::Null, |_| async { Ok(()) }.boxed()))
            .expect("async dispatch");
        assert_eq!(trail.lock().expect("trail lock").len(), 1);

        hooks
            .dispatch_sync("save", Value::Null)
            .run_after()
            .expect("sync dispatch");
        assert_eq!(trail.lock().expect("trail lock").len(), 1);
    }

    #[test]
    fn sync_dispatch_lets_listeners_rewrite_data() {
        let mut hooks = HookRegistry::new();
        hooks.before("push", |event| {
            if let Some(map) = event.data.as_object_mut() {
                map.insert("seen".to_string(), Value::Bool(true));
            }
            HookAction::proceed()
        });

        let pending = hooks.dispatch_sync("push", Value::object());
        assert!(!pending.is_cancelled());
        let data = pending
            .complete(|event| Ok(event.data.clone()))
            .expect("complete");
        assert_eq!(data.get_path("seen"), Some(&Value::Bool(true)));
    }

    #[test]
    fn sync_cancel_skips_action_and_after_listeners() {
        let trail = Trail::default();
        let mut hooks = HookRegistry::new();
        hooks.before("push", |_| HookAction::cancel(MapperError::cancelled("full")));
        let after_trail = Arc::clone(&trail);
        hooks.after("push", move |_| {
            push(&after_trail, "after".to_string());
            HookAction::proceed()
        });

        let pending = hooks.dispatch_sync("push", Value::Null);
        assert!(pending.is_cancelled());
        let err = pending
            .complete(|_| -> Result<(), MapperError> { panic!("action must not run") })
            .expect_err("cancelled dispatch");
        assert_eq!(err.code(), "cancelled");
        assert!(trail.lock().expect("trail lock").is_empty());
        assert_eq!(hooks.listener_count(HookPhase::After, "push"), 1);
    }

    #[test]
    fn after_cancel_rejects_async_dispatch() {
        let mut hooks = HookRegistry::new();
        hooks.after("refresh", |_| HookResult::cancel("audit failed").into());

        let err = block_on(hooks.dispatch("refresh", Value::Null, |_| async { Ok(1_usize) }.boxed()))
            .expect_err("after cancel should reject");
        assert!(err.to_string().contains("audit failed"));
    }
}
