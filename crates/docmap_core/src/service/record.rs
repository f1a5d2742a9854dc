//! Single-record controller.
//!
//! # Responsibility
//! - Expose get/set/unset over one record's `ChangeStore`.
//! - Route save and refresh through the owning collection context so
//!   hooks and the store see one code path for single and bulk work.
//!
//! # Invariants
//! - A record always belongs to exactly one collection context.
//! - Pending changes survive a failed save untouched.

use crate::error::{FieldError, MapperError, MapperResult};
use crate::hooks::HookResponse;
use crate::model::record_id::RecordId;
use crate::model::value::{Map, Value};
use crate::planner::{plan_write, WritePlan};
use crate::plugins::schema::Validator;
use crate::service::collection::CollectionContext;
use crate::service::report::SaveReport;
use crate::tracking::change_store::{ChangeStore, FieldDiff, SetMode};
use futures::FutureExt;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One tracked document bound to its collection.
#[derive(Debug, Clone)]
pub struct Record {
    ctx: Arc<CollectionContext>,
    data: ChangeStore,
}

impl Record {
    /// Creates a blank, never-persisted record.
    pub fn new(ctx: &Arc<CollectionContext>) -> Self {
        Self {
            ctx: Arc::clone(ctx),
            data: ChangeStore::new(ctx.identity_field()),
        }
    }

    /// Creates a record from a plain document.
    ///
    /// A document carrying the identity field is taken as already persisted;
    /// anything else becomes pending changes. `Null` yields a blank record.
    ///
    /// # Errors
    /// - `ProgrammerMisuse` when `document` is neither an object nor `Null`,
    ///   or carries an invalid textual id.
    pub fn from_value(ctx: &Arc<CollectionContext>, document: Value) -> MapperResult<Self> {
        let mut record = Self::new(ctx);
        if document.is_null() {
            return Ok(record);
        }

        let has_identity = document
            .as_object()
            .is_some_and(|map| map.contains_key(ctx.identity_field()));
        let mode = if has_identity {
            SetMode::AsPersisted
        } else {
            SetMode::Default
        };
        record.data.assign(mode, document)?;
        Ok(record)
    }

    /// Creates a record whose written state is `document`.
    pub fn from_persisted(ctx: &Arc<CollectionContext>, document: Map) -> Self {
        let mut record = Self::new(ctx);
        record.data.replace_written(document);
        record
    }

    pub fn context(&self) -> &Arc<CollectionContext> {
        &self.ctx
    }

    pub fn collection_name(&self) -> &str {
        self.ctx.name()
    }

    pub fn id(&self) -> Option<RecordId> {
        self.data.identity()
    }

    /// Reads `key` with pending changes applied.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.data.get(true, Some(key))
    }

    /// Reads persisted state only; `None` key returns the whole document.
    pub fn get_written(&self, key: Option<&str>) -> Option<Value> {
        self.data.get(false, key)
    }

    /// Whole document with pending changes applied.
    pub fn snapshot(&self) -> Value {
        self.data.get(true, None).unwrap_or_else(Value::object)
    }

    /// Document as it will be stored after the next successful save.
    pub fn projected(&self) -> Map {
        self.data.projected()
    }

    /// Records a pending change.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> MapperResult<&mut Self> {
        self.set_with(SetMode::Default, key, value)
    }

    /// Writes straight into persisted state, replacing top-level values.
    pub fn set_as_persisted(&mut self, key: &str, value: impl Into<Value>) -> MapperResult<&mut Self> {
        self.set_with(SetMode::AsPersisted, key, value)
    }

    pub fn set_with(
        &mut self,
        mode: SetMode,
        key: &str,
        value: impl Into<Value>,
    ) -> MapperResult<&mut Self> {
        self.data.set(mode, key, value)?;
        Ok(self)
    }

    /// Records every top-level entry of `document` as a pending change.
    pub fn assign(&mut self, document: impl Into<Value>) -> MapperResult<&mut Self> {
        self.assign_with(SetMode::Default, document)
    }

    pub fn assign_with(&mut self, mode: SetMode, document: impl Into<Value>) -> MapperResult<&mut Self> {
        self.data.assign(mode, document.into())?;
        Ok(self)
    }

    /// Marks `key` for removal on the next save.
    pub fn unset(&mut self, key: &str) -> MapperResult<&mut Self> {
        self.data.unset(true, key)?;
        Ok(self)
    }

    /// Discards the pending change at `key` without touching storage.
    pub fn unset_local(&mut self, key: &str) -> MapperResult<&mut Self> {
        self.data.unset(false, key)?;
        Ok(self)
    }

    pub fn diff(&self) -> BTreeMap<String, FieldDiff> {
        self.data.diff()
    }

    pub fn is_dirty(&self) -> bool {
        self.data.is_dirty()
    }

    pub fn is_persisted(&self) -> bool {
        self.data.is_persisted()
    }

    pub fn changes(&self) -> &ChangeStore {
        &self.data
    }

    /// Plans this record's next write without performing it.
    pub fn plan(&self, force: bool) -> MapperResult<WritePlan> {
        plan_write(&self.data, force)
    }

    /// Saves this record as a single-record batch.
    ///
    /// # Errors
    /// - Any error of the bulk path, plus `Adapter` when the store rejected
    ///   this record's operation, or `Missing` when its update found no
    ///   stored document.
    pub async fn save(&mut self, force: bool) -> MapperResult<SaveReport> {
        let ctx = Arc::clone(&self.ctx);
        ctx.save_batch(std::slice::from_mut(self), force, true).await
    }

    /// Replaces persisted state with the stored document, keeping pending
    /// changes. A document that vanished from the store reloads as `{}`.
    ///
    /// # Errors
    /// - `NotPersisted` for records that were never saved or loaded.
    pub async fn refresh(&mut self) -> MapperResult<Value> {
        if !self.is_persisted() {
            return Err(MapperError::NotPersisted {
                collection: self.ctx.name().to_string(),
            });
        }

        let ctx = Arc::clone(&self.ctx);
        let hooks = Arc::clone(ctx.hooks());
        let mut data = Map::new();
        data.insert("collection".to_string(), Value::from(ctx.name()));
        data.insert("id".to_string(), Value::from(self.data.written_identity()));

        hooks
            .dispatch("refresh", Value::Object(data), move |_| {
                async move { ctx.reload(self).await }.boxed()
            })
            .await
    }

    /// Runs `validator` against the projected document.
    pub fn validate<V: Validator + ?Sized>(&self, validator: &V) -> Vec<FieldError> {
        validator.validate(&Value::Object(self.projected()))
    }

    pub(crate) fn data_mut(&mut self) -> &mut ChangeStore {
        &mut self.data
    }

    /// Folds a confirmed write into written state.
    pub(crate) fn apply_plan(&mut self, plan: &WritePlan) -> MapperResult<()> {
        if let Some(id) = plan.generated_id {
            let field = self.ctx.identity_field().to_string();
            self.data.set(SetMode::Default, &field, id)?;
        }
        self.data.commit();
        Ok(())
    }
}

impl HookResponse for Record {
    fn response_value(&self) -> Value {
        self.snapshot()
    }
}
