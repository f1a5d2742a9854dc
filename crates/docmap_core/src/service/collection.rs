//! Collection controller and the shared save/refresh path.
//!
//! # Responsibility
//! - Hold the options, store and frozen hooks one collection shares with
//!   its records (`CollectionContext`).
//! - Plan, dispatch and commit bulk saves; reload persisted records.
//! - Keep an ordered batch of records (`Collection`).
//!
//! # Invariants
//! - Saves with nothing to write skip both the dispatch and the store.
//! - After a store round trip, only records whose own operation succeeded
//!   are committed; failed records keep their pending changes.
//! - Commit happens inside the dispatched action, before `after` listeners
//!   run, so a failing listener cannot desync written state.

use crate::config::CollectionOptions;
use crate::error::{MapperError, MapperResult, ValidationFailure};
use crate::hooks::HookRegistry;
use crate::model::record_id::RecordId;
use crate::model::value::{Map, Value};
use crate::planner::{plan_write, WriteMethod, WriteOperation, WritePlan};
use crate::plugins::schema::Validator;
use crate::service::record::Record;
use crate::service::report::{RecordOutcome, SaveReport};
use crate::store::{DocumentStore, StoreError};
use futures::FutureExt;
use log::{error, info};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared state of one collection.
pub struct CollectionContext {
    options: CollectionOptions,
    store: Arc<dyn DocumentStore>,
    hooks: Arc<HookRegistry>,
}

impl Debug for CollectionContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionContext")
            .field("options", &self.options)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

impl CollectionContext {
    pub fn new(
        options: CollectionOptions,
        store: Arc<dyn DocumentStore>,
        hooks: Arc<HookRegistry>,
    ) -> Arc<Self> {
        Arc::new(Self {
            options,
            store,
            hooks,
        })
    }

    pub fn name(&self) -> &str {
        &self.options.name
    }

    pub fn identity_field(&self) -> &str {
        &self.options.identity_field
    }

    pub fn options(&self) -> &CollectionOptions {
        &self.options
    }

    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Loads the first stored document matching `filter`.
    pub async fn find_one(self: &Arc<Self>, filter: Map) -> MapperResult<Option<Record>> {
        let mut data = Map::new();
        data.insert("collection".to_string(), Value::from(self.name()));
        data.insert("filter".to_string(), Value::Object(filter.clone()));

        self.hooks
            .dispatch("find", Value::Object(data), |_| {
                async move {
                    let found = self.store.find_one(self.name(), &filter).await?;
                    Ok(found.map(|document| Record::from_persisted(self, document)))
                }
                .boxed()
            })
            .await
    }

    /// Loads the stored document with identity `id`.
    pub async fn find_by_id(self: &Arc<Self>, id: RecordId) -> MapperResult<Option<Record>> {
        let mut filter = Map::new();
        filter.insert(self.identity_field().to_string(), Value::Id(id));
        self.find_one(filter).await
    }

    /// Saves `records` as one batch.
    ///
    /// With `single`, a store rejection of the record's operation is
    /// returned as `Adapter` instead of a `Failed` outcome, and an update
    /// that found no document as `Missing` instead of `NotFound`.
    ///
    /// Dirty records whose pending changes write nothing are committed
    /// locally without a store call.
    pub(crate) async fn save_batch(
        &self,
        records: &mut [Record],
        force: bool,
        single: bool,
    ) -> MapperResult<SaveReport> {
        let started_at = Instant::now();
        info!(
            "event=collection_save module=service status=start collection={} records={} force={}",
            self.name(),
            records.len(),
            force
        );

        let mut planned: Vec<(usize, WritePlan)> = Vec::new();
        for (position, record) in records.iter_mut().enumerate() {
            let plan = plan_write(record.changes(), force)?;
            if !plan.is_noop() {
                planned.push((position, plan));
            } else if record.is_dirty() {
                record.data_mut().commit();
            }
        }

        if planned.is_empty() {
            info!(
                "event=collection_save module=service status=ok collection={} operations=0 duration_ms={}",
                self.name(),
                started_at.elapsed().as_millis()
            );
            return Ok(SaveReport::unchanged(
                self.name(),
                records.len(),
                started_at.elapsed(),
            ));
        }

        let operations: Vec<WriteOperation> = planned
            .iter()
            .filter_map(|(_, plan)| plan.operation.clone())
            .collect();
        let rendered: Vec<Value> = operations.iter().map(WriteOperation::to_value).collect();
        let data = self.save_payload(records, &planned, force, &rendered);
        let record_count = records.len();
        let write_records = &mut *records;

        let outcome = self
            .hooks
            .dispatch("save", data, |_| {
                let rendered = rendered.clone();
                async move {
                    let write_started = Instant::now();
                    let write = self
                        .store
                        .bulk_write(self.name(), &operations, &self.options.bulk_write)
                        .await
                        .map_err(|source| MapperError::Adapter {
                            source,
                            operations: rendered.clone(),
                            partial: None,
                        })?;
                    let write_elapsed = write_started.elapsed();
                    let halted_at = self
                        .options
                        .bulk_write
                        .ordered
                        .then(|| write.write_errors.iter().map(|err| err.index).min())
                        .flatten();

                    let mut outcomes = vec![RecordOutcome::Unchanged; record_count];
                    for (index, (position, plan)) in planned.iter().enumerate() {
                        outcomes[*position] = match write.error_for(index) {
                            Some(err) => RecordOutcome::Failed(err.clone()),
                            None if halted_at.is_some_and(|halt| index > halt) => {
                                RecordOutcome::Skipped
                            }
                            None if write.is_unmatched(index) => RecordOutcome::NotFound,
                            None => {
                                write_records[*position].apply_plan(plan)?;
                                match (plan.method, plan.id) {
                                    (WriteMethod::Insert, Some(id)) => RecordOutcome::Inserted(id),
                                    _ => RecordOutcome::Updated,
                                }
                            }
                        };
                    }

                    Ok(SaveReport {
                        collection: self.name().to_string(),
                        operations: rendered,
                        outcomes,
                        write: Some(write),
                        write_elapsed,
                        elapsed: Duration::ZERO,
                    })
                }
                .boxed()
            })
            .await;

        let mut report = match outcome {
            Ok(report) => report,
            Err(err) => {
                error!(
                    "event=collection_save module=service status=error collection={} operations={} duration_ms={} error_code={} error={}",
                    self.name(),
                    rendered.len(),
                    started_at.elapsed().as_millis(),
                    err.code(),
                    err
                );
                return Err(err);
            }
        };
        report.elapsed = started_at.elapsed();

        info!(
            "event=collection_save module=service status=ok collection={} operations={} committed={} failed={} not_found={} write_ms={} duration_ms={}",
            self.name(),
            report.operations.len(),
            report.committed_count(),
            report.failed().count(),
            report.not_found().count(),
            report.write_elapsed.as_millis(),
            report.elapsed.as_millis()
        );

        if single {
            if let Some((_, err)) = report.failed().next() {
                return Err(MapperError::Adapter {
                    source: StoreError::Write(err.clone()),
                    operations: report.operations.clone(),
                    partial: report.write.clone(),
                });
            }
            let missing = report
                .not_found()
                .next()
                .and_then(|position| records.get(position))
                .and_then(Record::id);
            if let Some(id) = missing {
                return Err(MapperError::Missing {
                    collection: self.name().to_string(),
                    id,
                });
            }
        }
        Ok(report)
    }

    /// Replaces `record`'s written state with the stored document.
    pub(crate) async fn reload(&self, record: &mut Record) -> MapperResult<Value> {
        let id = record.changes().written_identity().ok_or_else(|| {
            MapperError::misuse(format!(
                "persisted record in `{}` has no `{}` value to refresh by",
                self.name(),
                self.identity_field()
            ))
        })?;

        let mut filter = Map::new();
        filter.insert(self.identity_field().to_string(), Value::Id(id));
        let found = self.store.find_one(self.name(), &filter).await?;
        record.data_mut().replace_written(found.unwrap_or_default());
        Ok(record.get_written(None).unwrap_or_else(Value::object))
    }

    fn save_payload(
        &self,
        records: &[Record],
        planned: &[(usize, WritePlan)],
        force: bool,
        rendered: &[Value],
    ) -> Value {
        let entries = planned
            .iter()
            .map(|(position, plan)| {
                let mut entry = Map::new();
                entry.insert("position".to_string(), Value::from(*position as i64));
                entry.insert("method".to_string(), Value::from(plan.method.as_str()));
                entry.insert("id".to_string(), Value::from(plan.id));
                entry.insert(
                    "document".to_string(),
                    Value::Object(records[*position].projected()),
                );
                Value::Object(entry)
            })
            .collect::<Vec<_>>();

        let mut data = Map::new();
        data.insert("collection".to_string(), Value::from(self.name()));
        data.insert("force".to_string(), Value::Bool(force));
        data.insert("operations".to_string(), Value::Array(rendered.to_vec()));
        data.insert("records".to_string(), Value::Array(entries));
        Value::Object(data)
    }
}

/// Ordered batch of records sharing one collection context.
#[derive(Debug, Clone)]
pub struct Collection {
    ctx: Arc<CollectionContext>,
    records: Vec<Record>,
}

impl Collection {
    pub fn new(
        options: CollectionOptions,
        store: Arc<dyn DocumentStore>,
        hooks: Arc<HookRegistry>,
    ) -> Self {
        Self::from_context(CollectionContext::new(options, store, hooks))
    }

    pub fn from_context(ctx: Arc<CollectionContext>) -> Self {
        Self {
            ctx,
            records: Vec::new(),
        }
    }

    pub fn context(&self) -> &Arc<CollectionContext> {
        &self.ctx
    }

    pub fn name(&self) -> &str {
        self.ctx.name()
    }

    /// Blank record bound to this collection, not yet added to the batch.
    pub fn create_record(&self) -> Record {
        Record::new(&self.ctx)
    }

    /// Appends an existing record.
    ///
    /// # Errors
    /// - `ProgrammerMisuse` when `record` belongs to another collection.
    pub fn push_record(&mut self, record: Record) -> MapperResult<&mut Self> {
        if !Arc::ptr_eq(record.context(), &self.ctx) {
            return Err(MapperError::misuse(format!(
                "record of `{}` cannot join collection `{}`",
                record.collection_name(),
                self.name()
            )));
        }
        self.records.push(record);
        Ok(self)
    }

    /// Builds a record from `document` and appends it.
    ///
    /// Dispatches `push` synchronously so listeners can rewrite or veto the
    /// document first. `Null` documents are skipped.
    pub fn push_value(&mut self, document: impl Into<Value>) -> MapperResult<&mut Self> {
        let document = document.into();
        if document.is_null() {
            return Ok(self);
        }

        let ctx = Arc::clone(&self.ctx);
        let record = ctx
            .hooks()
            .dispatch_sync("push", document)
            .complete(|event| Record::from_value(&ctx, event.data.clone()))?;
        self.records.push(record);
        Ok(self)
    }

    /// Appends every document of `documents`, stopping at the first error.
    pub fn push_values<I>(&mut self, documents: I) -> MapperResult<&mut Self>
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        for document in documents {
            self.push_value(document)?;
        }
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Record> {
        self.records.iter_mut()
    }

    pub fn record(&self, position: usize) -> Option<&Record> {
        self.records.get(position)
    }

    pub fn record_mut(&mut self, position: usize) -> Option<&mut Record> {
        self.records.get_mut(position)
    }

    /// Reads `key` from every record, in batch order.
    pub fn get(&self, key: &str) -> Vec<Option<Value>> {
        self.records.iter().map(|record| record.get(key)).collect()
    }

    /// Sets `key` on every record.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> MapperResult<&mut Self> {
        let value = value.into();
        for record in &mut self.records {
            record.set(key, value.clone())?;
        }
        Ok(self)
    }

    /// Saves every record with pending work in one bulk write.
    ///
    /// # Errors
    /// - `Validation` when a `save` listener rejects the batch; nothing is
    ///   written.
    /// - `Adapter` when the store round trip fails as a whole.
    ///
    /// Per-record store rejections are reported as `Failed` outcomes.
    pub async fn save(&mut self, force: bool) -> MapperResult<SaveReport> {
        let ctx = Arc::clone(&self.ctx);
        ctx.save_batch(&mut self.records, force, false).await
    }

    /// Reloads every persisted record and returns how many were reloaded.
    ///
    /// Never-persisted records are skipped.
    pub async fn refresh(&mut self) -> MapperResult<usize> {
        let ctx = Arc::clone(&self.ctx);
        let hooks = Arc::clone(ctx.hooks());
        let records = &mut self.records;

        let mut data = Map::new();
        data.insert("collection".to_string(), Value::from(ctx.name()));
        data.insert("records".to_string(), Value::from(records.len() as i64));

        hooks
            .dispatch("refresh", Value::Object(data), move |_| {
                async move {
                    let mut reloaded = 0;
                    for record in records.iter_mut().filter(|record| record.is_persisted()) {
                        ctx.reload(record).await?;
                        reloaded += 1;
                    }
                    Ok(reloaded)
                }
                .boxed()
            })
            .await
    }

    /// Loads the stored document with identity `id` without adding it.
    pub async fn find_by_id(&self, id: RecordId) -> MapperResult<Option<Record>> {
        self.ctx.find_by_id(id).await
    }

    /// Runs `validator` on every record.
    ///
    /// Returns `None` when every record passes.
    pub fn validate<V: Validator + ?Sized>(&self, validator: &V) -> Option<ValidationFailure> {
        let mut failure = ValidationFailure::new(self.name());
        for (position, record) in self.records.iter().enumerate() {
            failure.push(position, record.validate(validator));
        }
        (!failure.is_empty()).then_some(failure)
    }
}

impl<'c> IntoIterator for &'c Collection {
    type Item = &'c Record;
    type IntoIter = std::slice::Iter<'c, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
