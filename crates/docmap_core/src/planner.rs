//! Write-operation planning.
//!
//! # Responsibility
//! - Decide insert, update or no-op for one record.
//! - Build the bulk-write payload in the backing store's vocabulary.
//!
//! # Invariants
//! - Planning never mutates the `ChangeStore`.
//! - Update `$set` clauses use dot paths and never contain the identity
//!   field; removal markers only ever land in `$unset`.
//! - Exactly one of insert, update or no-op results from each call.

use crate::error::{MapperError, MapperResult};
use crate::model::record_id::RecordId;
use crate::model::value::{Map, Value};
use crate::tracking::change_store::ChangeStore;
use crate::tracking::dot_path::{has_descendants, is_empty_object, unflatten, DotIndex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMethod {
    Insert,
    Update,
    Noop,
}

impl WriteMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Noop => "noop",
        }
    }
}

/// One entry of a bulk write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOperation {
    InsertOne {
        document: Map,
    },
    UpdateOne {
        filter: Map,
        set: Map,
        unset: Map,
        upsert: bool,
    },
}

impl WriteOperation {
    /// Renders the `insertOne` / `updateOne` shape understood by the store.
    ///
    /// Empty `$set` or `$unset` clauses are left out.
    pub fn to_value(&self) -> Value {
        match self {
            Self::InsertOne { document } => {
                let mut body = Map::new();
                body.insert("document".to_string(), Value::Object(document.clone()));
                single("insertOne", Value::Object(body))
            }
            Self::UpdateOne {
                filter,
                set,
                unset,
                upsert,
            } => {
                let mut update = Map::new();
                if !set.is_empty() {
                    update.insert("$set".to_string(), Value::Object(set.clone()));
                }
                if !unset.is_empty() {
                    update.insert("$unset".to_string(), Value::Object(unset.clone()));
                }

                let mut body = Map::new();
                body.insert("filter".to_string(), Value::Object(filter.clone()));
                body.insert("update".to_string(), Value::Object(update));
                body.insert("upsert".to_string(), Value::Bool(*upsert));
                single("updateOne", Value::Object(body))
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::InsertOne { .. } => "insertOne",
            Self::UpdateOne { .. } => "updateOne",
        }
    }
}

fn single(key: &str, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    Value::Object(map)
}

/// Planner decision for one record.
#[derive(Debug, Clone, PartialEq)]
pub struct WritePlan {
    pub method: WriteMethod,
    /// Dot-path fields written by the operation (removals excluded).
    pub fields: DotIndex,
    pub filter: Option<Map>,
    pub operation: Option<WriteOperation>,
    /// Identity the record has after the write.
    pub id: Option<RecordId>,
    /// Identity minted by this plan for an insert.
    pub generated_id: Option<RecordId>,
}

impl WritePlan {
    fn noop(id: Option<RecordId>) -> Self {
        Self {
            method: WriteMethod::Noop,
            fields: DotIndex::new(),
            filter: None,
            operation: None,
            id,
            generated_id: None,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.method == WriteMethod::Noop
    }
}

/// Plans the write for `store`.
///
/// | dirty | persisted | force | result |
/// |---|---|---|---|
/// | no | any | no | no-op |
/// | no | yes | yes | update with the full written snapshot |
/// | yes | yes | any | update with pending changes only |
/// | yes | no | any | insert of written overlaid by changes |
///
/// A forced save of a clean record that was never persisted has no
/// identity to filter by and plans a no-op.
///
/// Pending changes that write nothing (the unchanged identity, an empty
/// object over a populated container) plan a no-op.
///
/// # Errors
/// - `ProgrammerMisuse` when a persisted record has no identity value, or
///   when pending changes give it a different one.
pub fn plan_write(store: &ChangeStore, force: bool) -> MapperResult<WritePlan> {
    let dirty = store.is_dirty();
    let persisted = store.is_persisted();

    match (dirty, persisted) {
        (false, _) if !force => Ok(WritePlan::noop(store.identity())),
        (false, false) => Ok(WritePlan::noop(store.identity())),
        (false, true) => {
            let index = store.written_index().cloned().unwrap_or_default();
            plan_update(store, &index)
        }
        (true, true) => {
            let index = store.changes_index().cloned().unwrap_or_default();
            plan_update(store, &index)
        }
        (true, false) => Ok(plan_insert(store)),
    }
}

fn plan_update(store: &ChangeStore, index: &DotIndex) -> MapperResult<WritePlan> {
    let identity_field = store.identity_field();
    let id = store
        .written_identity()
        .or_else(|| store.identity())
        .ok_or_else(|| {
            MapperError::misuse(format!(
                "persisted record has no `{identity_field}` value to update by"
            ))
        })?;

    if let Some(written_id) = store.written_identity() {
        let pending = store
            .changes_index()
            .and_then(|changes| changes.get(identity_field));
        if let Some(pending) = pending {
            if pending.as_id() != Some(written_id) {
                return Err(MapperError::misuse(format!(
                    "cannot change `{identity_field}` of persisted record {written_id} to {pending}"
                )));
            }
        }
    }

    let written = store.written_index();
    let mut set = Map::new();
    let mut unset = Map::new();
    for (path, value) in index {
        if path == identity_field {
            continue;
        }
        let shadows_children = is_empty_object(value)
            && written.is_some_and(|written| has_descendants(written, path));
        if shadows_children {
            continue;
        }
        if value.is_unset() {
            unset.insert(path.clone(), Value::String(String::new()));
        } else {
            set.insert(path.clone(), value.clone());
        }
    }

    if set.is_empty() && unset.is_empty() {
        return Ok(WritePlan::noop(Some(id)));
    }

    let mut filter = Map::new();
    filter.insert(identity_field.to_string(), Value::Id(id));

    Ok(WritePlan {
        method: WriteMethod::Update,
        fields: set.clone(),
        filter: Some(filter.clone()),
        operation: Some(WriteOperation::UpdateOne {
            filter,
            set,
            unset,
            upsert: false,
        }),
        id: Some(id),
        generated_id: None,
    })
}

fn plan_insert(store: &ChangeStore) -> WritePlan {
    let mut fields: DotIndex = store
        .merged_index()
        .iter()
        .filter(|(_, value)| !value.is_unset())
        .map(|(path, value)| (path.clone(), value.clone()))
        .collect();

    let (id, generated_id) = match store.identity() {
        Some(id) => (id, None),
        None => {
            let id = RecordId::new();
            (id, Some(id))
        }
    };
    fields.insert(store.identity_field().to_string(), Value::Id(id));

    let document = unflatten(&fields);
    WritePlan {
        method: WriteMethod::Insert,
        fields,
        filter: None,
        operation: Some(WriteOperation::InsertOne { document }),
        id: Some(id),
        generated_id,
    }
}
