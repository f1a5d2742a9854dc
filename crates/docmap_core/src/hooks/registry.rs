//! Listener registration.

use super::event::{HookAction, HookEvent, HookPhase};
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// Registered listener.
pub type Listener = Arc<dyn Fn(&mut HookEvent) -> HookAction + Send + Sync>;

/// Splits a comma-separated name list, dropping blanks.
pub(crate) fn split_names(names: &str) -> Vec<String> {
    names
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// Before/after listener lists keyed by event name.
///
/// Built with `&mut` access during setup, then frozen behind an `Arc` and
/// shared read-only by every record and collection of one type.
#[derive(Clone, Default)]
pub struct HookRegistry {
    before: HashMap<String, Vec<Listener>>,
    after: HashMap<String, Vec<Listener>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener` to run before every event in `names`.
    pub fn before<F>(&mut self, names: &str, listener: F) -> &mut Self
    where
        F: Fn(&mut HookEvent) -> HookAction + Send + Sync + 'static,
    {
        self.register(HookPhase::Before, names, Arc::new(listener))
    }

    /// Registers `listener` to run after every event in `names`.
    pub fn after<F>(&mut self, names: &str, listener: F) -> &mut Self
    where
        F: Fn(&mut HookEvent) -> HookAction + Send + Sync + 'static,
    {
        self.register(HookPhase::After, names, Arc::new(listener))
    }

    /// Installs a plugin, or every plugin of a list.
    pub fn use_plugin<P: Plugin + ?Sized>(&mut self, plugin: &P) -> &mut Self {
        plugin.install(self);
        self
    }

    /// Installs a one-off setup closure.
    pub fn use_fn(&mut self, setup: impl FnOnce(&mut HookRegistry)) -> &mut Self {
        setup(self);
        self
    }

    pub fn listener_count(&self, phase: HookPhase, name: &str) -> usize {
        self.table(phase).get(name).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.before.is_empty() && self.after.is_empty()
    }

    /// Ends setup; the frozen registry is shared read-only.
    pub fn freeze(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub(crate) fn listeners(&self, phase: HookPhase, name: &str) -> &[Listener] {
        self.table(phase)
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn table(&self, phase: HookPhase) -> &HashMap<String, Vec<Listener>> {
        match phase {
            HookPhase::Before => &self.before,
            HookPhase::After => &self.after,
        }
    }

    fn register(&mut self, phase: HookPhase, names: &str, listener: Listener) -> &mut Self {
        let table = match phase {
            HookPhase::Before => &mut self.before,
            HookPhase::After => &mut self.after,
        };
        for name in split_names(names) {
            table.entry(name).or_default().push(Arc::clone(&listener));
        }
        self
    }
}

impl Debug for HookRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let counts = |table: &HashMap<String, Vec<Listener>>| {
            let mut counts: Vec<(String, usize)> = table
                .iter()
                .map(|(name, listeners)| (name.clone(), listeners.len()))
                .collect();
            counts.sort();
            counts
        };
        f.debug_struct("HookRegistry")
            .field("before", &counts(&self.before))
            .field("after", &counts(&self.after))
            .finish()
    }
}

/// Reusable bundle of listeners.
pub trait Plugin {
    fn install(&self, hooks: &mut HookRegistry);
}

impl Plugin for fn(&mut HookRegistry) {
    fn install(&self, hooks: &mut HookRegistry) {
        self(hooks);
    }
}

impl<P: Plugin + ?Sized> Plugin for &P {
    fn install(&self, hooks: &mut HookRegistry) {
        (**self).install(hooks);
    }
}

impl<P: Plugin + ?Sized> Plugin for Box<P> {
    fn install(&self, hooks: &mut HookRegistry) {
        (**self).install(hooks);
    }
}

impl<P: Plugin> Plugin for [P] {
    fn install(&self, hooks: &mut HookRegistry) {
        for plugin in self {
            plugin.install(hooks);
        }
    }
}

impl<P: Plugin> Plugin for Vec<P> {
    fn install(&self, hooks: &mut HookRegistry) {
        self.as_slice().install(hooks);
    }
}

#[cfg(test)]
mod tests {
    use super::{split_names, HookRegistry, Plugin};
    use crate::hooks::event::{HookAction, HookPhase};

    struct Tag(&'static str);

    impl Plugin for Tag {
        fn install(&self, hooks: &mut HookRegistry) {
            hooks.before(self.0, |_| HookAction::proceed());
        }
    }

    fn audit(hooks: &mut HookRegistry) {
        hooks.after("save", |_| HookAction::proceed());
    }

    #[test]
    fn names_fan_out_and_ignore_blanks() {
        assert_eq!(split_names(" save, refresh,,"), vec!["save", "refresh"]);

        let mut hooks = HookRegistry::new();
        hooks.before("save,refresh", |_| HookAction::proceed());
        assert_eq!(hooks.listener_count(HookPhase::Before, "save"), 1);
        assert_eq!(hooks.listener_count(HookPhase::Before, "refresh"), 1);
        assert_eq!(hooks.listener_count(HookPhase::After, "save"), 0);
    }

    #[test]
    fn nested_plugin_lists_are_flattened() {
        let mut hooks = HookRegistry::new();
        let nested: Vec<Vec<Box<dyn Plugin>>> = vec![
            vec![Box::new(Tag("save")), Box::new(Tag("push"))],
            vec![Box::new(audit as fn(&mut HookRegistry))],
        ];
        hooks.use_plugin(&nested);

        assert_eq!(hooks.listener_count(HookPhase::Before, "save"), 1);
        assert_eq!(hooks.listener_count(HookPhase::Before, "push"), 1);
        assert_eq!(hooks.listener_count(HookPhase::After, "save"), 1);
    }

    #[test]
    fn use_fn_runs_setup_once() {
        let mut hooks = HookRegistry::new();
        hooks.use_fn(|hooks| {
            hooks.after("refresh", |_| HookAction::proceed());
        });
        assert!(!hooks.is_empty());
        assert_eq!(hooks.listener_count(HookPhase::After, "refresh"), 1);
    }
}
