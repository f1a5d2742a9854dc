//! Flat dot-path index over nested document trees.
//!
//! # Responsibility
//! - Flatten nested objects into `"a.b.c" -> leaf` maps and back.
//! - Read, write and remove values addressed by dotted paths.
//! - Overlay one index on another without leaving shadowed paths behind.
//!
//! # Invariants
//! - Only non-empty objects are recursed into; every other value (including
//!   `{}`) is stored as a leaf.
//! - A consistent index never holds both a path and one of its prefixes.
//! - An `{}` leaf never shadows a populated container: overlaying it onto a
//!   path that has descendants is a merge of nothing and leaves them intact.

use crate::model::value::{Map, Value};
use std::collections::BTreeMap;

/// Separator between path segments.
pub const PATH_SEPARATOR: char = '.';

/// Flat, ordered map from dotted path to leaf value.
pub type DotIndex = BTreeMap<String, Value>;

/// Joins a parent path and a child key.
pub fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}{PATH_SEPARATOR}{key}")
    }
}

/// Depth-first flatten of `tree` into a dot-path index.
pub fn flatten(tree: &Map) -> DotIndex {
    let mut index = DotIndex::new();
    flatten_into(tree, "", &mut index);
    index
}

fn flatten_into(tree: &Map, prefix: &str, index: &mut DotIndex) {
    for (key, value) in tree {
        let path = join_path(prefix, key);
        match value {
            Value::Object(child) if !child.is_empty() => flatten_into(child, &path, index),
            leaf => {
                index.insert(path, leaf.clone());
            }
        }
    }
}

/// Rebuilds a nested tree from a dot-path index.
pub fn unflatten(index: &DotIndex) -> Map {
    let mut tree = Map::new();
    for (path, value) in index {
        set_path(&mut tree, path, value.clone());
    }
    tree
}

/// Sets `value` at `path`, creating or overwriting intermediate objects.
pub fn set_path(tree: &mut Map, path: &str, value: Value) {
    let (parents, leaf) = match path.rsplit_once(PATH_SEPARATOR) {
        Some((parents, leaf)) => (Some(parents), leaf),
        None => (None, path),
    };

    let mut node = tree;
    if let Some(parents) = parents {
        for segment in parents.split(PATH_SEPARATOR) {
            let slot = node.entry(segment.to_string()).or_insert(Value::Null);
            if !slot.is_mergeable() {
                *slot = Value::object();
            }
            let Value::Object(child) = slot else {
                return;
            };
            node = child;
        }
    }

    node.insert(leaf.to_string(), value);
}

/// Returns the value at `path`, leaf or container.
pub fn get_path<'a>(tree: &'a Map, path: &str) -> Option<&'a Value> {
    let mut segments = path.split(PATH_SEPARATOR);
    let mut current = tree.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Removes the value at `path`.
///
/// With `prune_empty`, objects left empty by the removal are removed too.
pub fn remove_path(tree: &mut Map, path: &str, prune_empty: bool) -> Option<Value> {
    match path.split_once(PATH_SEPARATOR) {
        None => tree.remove(path),
        Some((head, rest)) => {
            let child = tree.get_mut(head)?.as_object_mut()?;
            let removed = remove_path(child, rest, prune_empty);
            let now_empty = child.is_empty();
            if prune_empty && removed.is_some() && now_empty {
                tree.remove(head);
            }
            removed
        }
    }
}

/// Deep-merges `source` into `target`.
///
/// Objects present on both sides merge key by key; anything else replaces
/// the target value.
pub fn deep_merge(target: &mut Map, source: Map) {
    for (key, incoming) in source {
        let both_objects = matches!(
            (target.get(&key), &incoming),
            (Some(Value::Object(_)), Value::Object(_))
        );
        if both_objects {
            if let (Some(Value::Object(existing)), Value::Object(nested)) =
                (target.get_mut(&key), incoming)
            {
                deep_merge(existing, nested);
            }
        } else {
            target.insert(key, incoming);
        }
    }
}

/// Overlays `top` onto `base`; entries of `top` win.
///
/// Each overlaid path first evicts every `base` path that it prefixes or
/// that prefixes it, so the result stays consistent. An empty object from
/// `top` over a path with `base` descendants is skipped.
pub fn overlay(base: &mut DotIndex, top: &DotIndex) {
    for (path, value) in top {
        if is_empty_object(value) && has_descendants(base, path) {
            continue;
        }
        evict_conflicts(base, path);
        base.insert(path.clone(), value.clone());
    }
}

/// True when `index` holds at least one path below `path`.
pub fn has_descendants(index: &DotIndex, path: &str) -> bool {
    let descendant_prefix = format!("{path}{PATH_SEPARATOR}");
    index
        .range(descendant_prefix.clone()..)
        .next()
        .is_some_and(|(key, _)| key.starts_with(&descendant_prefix))
}

pub(crate) fn is_empty_object(value: &Value) -> bool {
    matches!(value, Value::Object(map) if map.is_empty())
}

fn evict_conflicts(index: &mut DotIndex, path: &str) {
    let descendant_prefix = format!("{path}{PATH_SEPARATOR}");
    let descendants: Vec<String> = index
        .range(descendant_prefix.clone()..)
        .take_while(|(key, _)| key.starts_with(&descendant_prefix))
        .map(|(key, _)| key.clone())
        .collect();
    for key in descendants {
        index.remove(&key);
    }

    for (position, _) in path.match_indices(PATH_SEPARATOR) {
        index.remove(&path[..position]);
    }
}

#[cfg(test)]
mod tests {
    use super::{
        deep_merge, flatten, get_path, has_descendants, overlay, remove_path, set_path,
        unflatten, DotIndex,
    };
    use crate::model::value::{Map, Value};
    use serde_json::json;

    fn tree(json: serde_json::Value) -> Map {
        Value::from(json).into_object().expect("fixture must be an object")
    }

    #[test]
    fn flatten_stops_at_leaves_and_keeps_empty_objects() {
        let index = flatten(&tree(json!({
            "k1": "v1",
            "k2": {},
            "k3": {"l1": {"l2": "deep"}},
            "list": [{"a": 1}],
        })));

        let keys: Vec<&str> = index.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["k1", "k2", "k3.l1.l2", "list"]);
        assert_eq!(index["k2"], Value::object());
    }

    #[test]
    fn flatten_is_idempotent_through_unflatten() {
        let source = tree(json!({"a": {"b": 1, "c": {"d": [1, 2]}}, "e": {}}));
        let once = flatten(&source);
        let twice = flatten(&unflatten(&once));
        assert_eq!(once, twice);
        assert_eq!(unflatten(&once), source);
    }

    #[test]
    fn set_path_overwrites_scalar_parents() {
        let mut target = tree(json!({"a": 5}));
        set_path(&mut target, "a.b.c", Value::Int(1));
        assert_eq!(target, tree(json!({"a": {"b": {"c": 1}}})));
    }

    #[test]
    fn get_path_returns_subtrees() {
        let source = tree(json!({"a": {"b": {"c": 1}}}));
        assert_eq!(
            get_path(&source, "a.b"),
            Some(&Value::from(json!({"c": 1})))
        );
        assert_eq!(get_path(&source, "a.b.c.d"), None);
    }

    #[test]
    fn remove_path_prunes_only_when_asked() {
        let mut pruned = tree(json!({"a": {"b": {"c": 1}}, "x": 1}));
        assert_eq!(remove_path(&mut pruned, "a.b.c", true), Some(Value::Int(1)));
        assert_eq!(pruned, tree(json!({"x": 1})));

        let mut kept = tree(json!({"a": {"b": {"c": 1}}}));
        remove_path(&mut kept, "a.b.c", false);
        assert_eq!(kept, tree(json!({"a": {"b": {}}})));
    }

    #[test]
    fn deep_merge_composes_nested_objects() {
        let mut target = tree(json!({"a": {"b": 1, "c": 2}, "list": [1]}));
        deep_merge(&mut target, tree(json!({"a": {"b": 99}, "list": [2, 3]})));
        assert_eq!(target, tree(json!({"a": {"b": 99, "c": 2}, "list": [2, 3]})));
    }

    #[test]
    fn overlay_evicts_shadowed_paths_both_ways() {
        let mut base = flatten(&tree(json!({"a": {"b": 1, "c": 2}, "x": 1})));
        let mut top = DotIndex::new();
        top.insert("a".to_string(), Value::Int(5));
        top.insert("x.y".to_string(), Value::Int(6));

        overlay(&mut base, &top);

        assert_eq!(unflatten(&base), tree(json!({"a": 5, "x": {"y": 6}})));
        assert!(!base.contains_key("a.b"));
        assert!(!base.contains_key("x"));
    }

    #[test]
    fn overlay_keeps_written_children_under_empty_object() {
        let mut base = flatten(&tree(json!({"a": {"b": 1}, "s": 2})));
        let mut top = DotIndex::new();
        top.insert("a".to_string(), Value::object());
        top.insert("s".to_string(), Value::object());

        overlay(&mut base, &top);

        assert_eq!(unflatten(&base), tree(json!({"a": {"b": 1}, "s": {}})));
    }

    #[test]
    fn has_descendants_ignores_sibling_prefixes() {
        let index = flatten(&tree(json!({"a": {"b": 1}, "ab": 2})));
        assert!(has_descendants(&index, "a"));
        assert!(!has_descendants(&index, "ab"));
        assert!(!has_descendants(&index, "a.b"));
    }
}
