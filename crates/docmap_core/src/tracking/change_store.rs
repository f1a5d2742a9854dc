//! Per-record change tracking.
//!
//! # Responsibility
//! - Hold the written (persisted), changes (pending) and merged views of one
//!   record body.
//! - Apply set/unset mutations and fold pending changes into written state
//!   once a write is confirmed.
//!
//! # Invariants
//! - Every view keeps a dot-path index consistent with its nested tree after
//!   each mutating call returns.
//! - The merged view is an owned copy, rebuilt lazily after invalidation; it
//!   never aliases written or changes.
//! - Reads return clones, so callers cannot corrupt internal state.
//! - `changes` is `None` whenever no pending mutation remains.

use crate::error::{MapperError, MapperResult};
use crate::model::record_id::RecordId;
use crate::model::value::{Map, Value};
use crate::tracking::dot_path::{
    deep_merge, flatten, get_path, has_descendants, is_empty_object, overlay, remove_path,
    set_path, unflatten, DotIndex, PATH_SEPARATOR,
};
use once_cell::sync::OnceCell;
use std::collections::BTreeMap;

/// Identity field used when the collection does not configure one.
pub const DEFAULT_IDENTITY_FIELD: &str = "_id";

/// Where and how a `set` call lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SetMode {
    /// Pending change; nested objects deep-merge.
    #[default]
    Default,
    /// Persisted state; top-level keys are replaced wholesale.
    AsPersisted,
    /// Persisted state; nested objects deep-merge.
    MergeAsPersisted,
}

impl SetMode {
    fn targets_written(self) -> bool {
        matches!(self, Self::AsPersisted | Self::MergeAsPersisted)
    }

    fn deep_merges(self) -> bool {
        matches!(self, Self::Default | Self::MergeAsPersisted)
    }
}

/// Previous value of a changed path.
#[derive(Debug, Clone, PartialEq)]
pub enum Prior {
    Absent,
    Value(Value),
}

/// One entry of [`ChangeStore::diff`].
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDiff {
    pub old: Prior,
    pub new: Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct View {
    tree: Map,
    index: DotIndex,
}

impl View {
    fn from_tree(tree: Map) -> Self {
        let index = flatten(&tree);
        Self { tree, index }
    }

    fn from_index(index: DotIndex) -> Self {
        let tree = unflatten(&index);
        Self { tree, index }
    }

    fn reindex(&mut self) {
        self.index = flatten(&self.tree);
    }

    fn lookup(&self, key: &str) -> Option<&Value> {
        self.index.get(key).or_else(|| get_path(&self.tree, key))
    }
}

/// Written/changes/merged state of one record.
#[derive(Debug, Clone)]
pub struct ChangeStore {
    identity_field: String,
    written: Option<View>,
    changes: Option<View>,
    merged: OnceCell<View>,
}

impl Default for ChangeStore {
    fn default() -> Self {
        Self::new(DEFAULT_IDENTITY_FIELD)
    }
}

impl ChangeStore {
    /// Creates an empty store that treats `identity_field` as the record id.
    pub fn new(identity_field: impl Into<String>) -> Self {
        Self {
            identity_field: identity_field.into(),
            written: None,
            changes: None,
            merged: OnceCell::new(),
        }
    }

    pub fn identity_field(&self) -> &str {
        &self.identity_field
    }

    /// Pending changes exist and are non-empty.
    pub fn is_dirty(&self) -> bool {
        self.changes
            .as_ref()
            .is_some_and(|changes| !changes.tree.is_empty())
    }

    /// Written state has been loaded or saved.
    pub fn is_persisted(&self) -> bool {
        self.written.is_some()
    }

    /// Sets `value` at `key`.
    ///
    /// Dotted keys go through path assignment; plain keys merge, deep when
    /// `mode` asks for it and both sides are objects. An empty key is a
    /// no-op.
    ///
    /// # Errors
    /// - `ProgrammerMisuse` when a textual id assigned to the identity field
    ///   is not valid hex.
    pub fn set(&mut self, mode: SetMode, key: &str, value: impl Into<Value>) -> MapperResult<&mut Self> {
        if key.is_empty() {
            return Ok(self);
        }

        let value = self.coerce_identity(key, value.into())?;
        let view = self.target_mut(mode);
        apply(view, mode, key, value);
        view.reindex();
        self.invalidate_merged();
        Ok(self)
    }

    /// Applies every top-level entry of `document` as one `set`.
    ///
    /// # Errors
    /// - `ProgrammerMisuse` when `document` is not an object or carries an
    ///   invalid textual id.
    pub fn assign(&mut self, mode: SetMode, document: Value) -> MapperResult<&mut Self> {
        let Value::Object(entries) = document else {
            return Err(MapperError::ProgrammerMisuse(format!(
                "assign expects an object, got {document}"
            )));
        };

        let mut coerced = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            if key.is_empty() {
                continue;
            }
            let value = self.coerce_identity(&key, value)?;
            coerced.push((key, value));
        }

        let view = self.target_mut(mode);
        for (key, value) in coerced {
            apply(view, mode, &key, value);
        }
        view.reindex();
        self.invalidate_merged();
        Ok(self)
    }

    /// Reads the record body.
    ///
    /// With `include_changes`, pending changes overlay written state;
    /// otherwise only written state is visible. Without `key` the whole tree
    /// is returned (an empty object for a blank record read with changes).
    /// With `key`, the indexed leaf is returned, or the sub-tree when `key`
    /// names an interior object.
    pub fn get(&self, include_changes: bool, key: Option<&str>) -> Option<Value> {
        let view = if include_changes && self.changes.is_some() {
            Some(self.merged_view())
        } else {
            self.written.as_ref()
        };

        match key {
            None => match view {
                Some(view) => Some(Value::Object(view.tree.clone())),
                None if include_changes => Some(Value::object()),
                None => None,
            },
            Some(key) => view?.lookup(key).cloned(),
        }
    }

    /// Written state overlaid by pending changes, removals applied.
    ///
    /// This is the document the store holds after the next successful save.
    pub fn projected(&self) -> Map {
        let index: DotIndex = self
            .merged_index()
            .iter()
            .filter(|(_, value)| !value.is_unset())
            .map(|(path, value)| (path.clone(), value.clone()))
            .collect();
        unflatten(&index)
    }

    /// Identity value of the record, pending or written.
    pub fn identity(&self) -> Option<RecordId> {
        self.get(true, Some(&self.identity_field))
            .and_then(|value| value.as_id())
    }

    /// Identity as last persisted.
    pub fn written_identity(&self) -> Option<RecordId> {
        self.written
            .as_ref()
            .and_then(|view| view.tree.get(&self.identity_field))
            .and_then(Value::as_id)
    }

    /// Removes `key`.
    ///
    /// With `persist_removal`, a removal marker is recorded as a pending
    /// change so the next save emits a remove-field instruction. Otherwise
    /// the pending change at `key` is discarded locally; objects emptied by
    /// the discard are pruned and `changes` resets once nothing is left.
    pub fn unset(&mut self, persist_removal: bool, key: &str) -> MapperResult<&mut Self> {
        if key.is_empty() {
            return Ok(self);
        }
        if persist_removal {
            return self.set(SetMode::Default, key, Value::Unset);
        }

        let Some(changes) = self.changes.as_mut() else {
            return Ok(self);
        };
        if remove_path(&mut changes.tree, key, true).is_some() {
            changes.reindex();
        }
        if changes.tree.is_empty() {
            self.changes = None;
        }
        self.invalidate_merged();
        Ok(self)
    }

    /// Pending leaf changes with their written counterparts.
    pub fn diff(&self) -> BTreeMap<String, FieldDiff> {
        let Some(changes) = self.changes.as_ref() else {
            return BTreeMap::new();
        };

        changes
            .index
            .iter()
            .map(|(path, new)| {
                let old = self
                    .written
                    .as_ref()
                    .and_then(|written| written.lookup(path))
                    .map_or(Prior::Absent, |value| Prior::Value(value.clone()));
                (
                    path.clone(),
                    FieldDiff {
                        old,
                        new: new.clone(),
                    },
                )
            })
            .collect()
    }

    /// Folds pending changes into written state after a confirmed write.
    ///
    /// Removal markers delete their path from written state. An empty object
    /// over a populated written container merges nothing and keeps it.
    pub fn commit(&mut self) {
        let Some(changes) = self.changes.take() else {
            return;
        };

        let written = self.written.get_or_insert_with(View::default);
        for (path, value) in changes.index {
            if is_empty_object(&value) && has_descendants(&written.index, &path) {
                continue;
            }
            if value.is_unset() {
                remove_path(&mut written.tree, &path, false);
            } else {
                set_path(&mut written.tree, &path, value);
            }
        }
        written.reindex();
        self.invalidate_merged();
    }

    /// Replaces written state wholesale, keeping pending changes.
    pub fn replace_written(&mut self, tree: Map) {
        self.written = Some(View::from_tree(tree));
        self.invalidate_merged();
    }

    /// Flat index of pending changes, if any.
    pub fn changes_index(&self) -> Option<&DotIndex> {
        self.changes.as_ref().map(|view| &view.index)
    }

    /// Flat index of written state, if any.
    pub fn written_index(&self) -> Option<&DotIndex> {
        self.written.as_ref().map(|view| &view.index)
    }

    /// Flat index of written state overlaid by pending changes.
    pub fn merged_index(&self) -> &DotIndex {
        &self.merged_view().index
    }

    fn merged_view(&self) -> &View {
        self.merged.get_or_init(|| {
            let mut index = self
                .written
                .as_ref()
                .map(|view| view.index.clone())
                .unwrap_or_default();
            if let Some(changes) = self.changes.as_ref() {
                overlay(&mut index, &changes.index);
            }
            View::from_index(index)
        })
    }

    fn invalidate_merged(&mut self) {
        self.merged.take();
    }

    fn target_mut(&mut self, mode: SetMode) -> &mut View {
        let slot = if mode.targets_written() {
            &mut self.written
        } else {
            &mut self.changes
        };
        slot.get_or_insert_with(View::default)
    }

    fn coerce_identity(&self, key: &str, value: Value) -> MapperResult<Value> {
        if key != self.identity_field {
            return Ok(value);
        }
        match value {
            Value::String(text) => RecordId::parse_str(&text)
                .map(Value::Id)
                .map_err(|err| {
                    MapperError::ProgrammerMisuse(format!(
                        "cannot assign `{text}` to identity field `{key}`: {err}"
                    ))
                }),
            other => Ok(other),
        }
    }
}

fn apply(view: &mut View, mode: SetMode, key: &str, value: Value) {
    if key.contains(PATH_SEPARATOR) {
        set_path(&mut view.tree, key, value);
    } else if mode.deep_merges() {
        let mut single = Map::new();
        single.insert(key.to_string(), value);
        deep_merge(&mut view.tree, single);
    } else {
        view.tree.insert(key.to_string(), value);
    }
}
