//! Change propagator
//!
//! Subscribed to the record store as a `MutationObserver`. Around every
//! mutation it keeps two kinds of documents current:
//!
//! - **direct**: the mutated record's own documents, in every index declared
//!   on its type or an ancestor type
//! - **dependent**: records of other indexes that reach the mutated record
//!   through a declared dependency path, captured before the change and
//!   recomputed after it, so records that gained or lost the relation are
//!   both reindexed

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use indexsync_storage::{
    DependentSnapshot, MutationEvent, MutationKind, MutationObserver, ObserverError, Record,
    RecordId, RecordQuery, RecordStore,
};

use super::suspension::{SuspensionScope, SuspensionStack};
use crate::config::{SyncConfig, DEFAULT_SUSPENSION_BUFFER_SECS};
use crate::errors::{Result, SyncError};
use crate::features::index::IndexRuntime;

pub struct ChangePropagator {
    runtime: Arc<IndexRuntime>,
    suspension: Arc<SuspensionStack>,
    buffer: Duration,
}

impl ChangePropagator {
    pub fn new(runtime: Arc<IndexRuntime>) -> Self {
        Self::with_buffer(runtime, Duration::from_secs(DEFAULT_SUSPENSION_BUFFER_SECS))
    }

    /// `buffer` is subtracted from a scope's start to form the replay window
    pub fn with_buffer(runtime: Arc<IndexRuntime>, buffer: Duration) -> Self {
        Self {
            runtime,
            suspension: Arc::new(SuspensionStack::new()),
            buffer,
        }
    }

    pub fn from_config(config: &SyncConfig, runtime: Arc<IndexRuntime>) -> Self {
        Self::with_buffer(runtime, config.suspension_buffer)
    }

    pub fn runtime(&self) -> &Arc<IndexRuntime> {
        &self.runtime
    }

    pub fn suspension(&self) -> &Arc<SuspensionStack> {
        &self.suspension
    }

    pub fn buffer(&self) -> Duration {
        self.buffer
    }

    /// Open a scope suspending `types`
    pub fn suspend<I, S>(&self, types: I) -> SuspensionScope<'_>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SuspensionScope::open(self, types.into_iter().map(Into::into).collect())
    }

    /// Open a scope suspending every record type that has an index.
    ///
    /// Types that are only dependencies keep propagating, so their changes
    /// still reach the dependent documents while the scope is open.
    pub fn suspend_all(&self) -> SuspensionScope<'_> {
        let types: BTreeSet<String> = self
            .runtime
            .registry()
            .iter()
            .map(|index| index.record_type().to_string())
            .collect();
        SuspensionScope::open(self, types)
    }

    /// Run `f` with `types` suspended (all types when empty), then replay
    ///
    /// ```rust,ignore
    /// propagator.suspended(["blog.post"], || import_posts(&store))?;
    /// ```
    pub fn suspended<I, S, T, F>(&self, types: I, f: F) -> Result<T>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: FnOnce() -> T,
    {
        let types: BTreeSet<String> = types.into_iter().map(Into::into).collect();
        let scope = if types.is_empty() {
            self.suspend_all()
        } else {
            SuspensionScope::open(self, types)
        };
        let value = f();
        scope.close()?;
        Ok(value)
    }

    pub fn is_suspended(&self, record_type: &str) -> bool {
        self.suspension
            .is_suspended(record_type, self.runtime.store().as_ref())
    }

    /// Ids of dependent records per index key, as the store sees them now
    fn dependent_ids(&self, store: &dyn RecordStore, record: &Record) -> Result<DependentSnapshot> {
        let mut snapshot = DependentSnapshot::new();
        for (index, path) in self
            .runtime
            .registry()
            .dependents_of(&record.record_type, store)
        {
            let query = RecordQuery::all().related_to(path, record.reference());
            let ids = store
                .query(index.record_type(), &query)?
                .into_iter()
                .map(|related| related.id);
            snapshot.insert(index.key().to_string(), ids);
        }
        Ok(snapshot)
    }

    fn reindex_direct(&self, store: &dyn RecordStore, event: &MutationEvent) -> Result<()> {
        let record = &event.record;
        for index in self
            .runtime
            .registry()
            .for_record_type(&record.record_type, store)
        {
            let bound = self.runtime.bind(&index)?;
            match &event.kind {
                MutationKind::Create | MutationKind::Update => bound.upsert_one(record)?,
                MutationKind::Delete => {
                    bound.remove_one(record.id)?;
                }
                MutationKind::RelationAdd { .. }
                | MutationKind::RelationRemove { .. }
                | MutationKind::RelationClear { .. } => {
                    if let Some(current) = store.get(&record.record_type, record.id)? {
                        bound.upsert_one(&current)?;
                    }
                }
            }
            debug!(index = %index.key(), record = %record.reference(), "Reindexed record");
        }
        Ok(())
    }

    fn reindex_dependents(&self, store: &dyn RecordStore, snapshot: DependentSnapshot) -> Result<()> {
        for (key, ids) in snapshot.iter() {
            if ids.is_empty() {
                continue;
            }
            let index = self
                .runtime
                .registry()
                .get_by_name(key)
                .cloned()
                .ok_or_else(|| SyncError::UnknownIndex(key.clone()))?;
            let ids: Vec<RecordId> = ids.iter().copied().collect();
            let records = store.get_many(index.record_type(), &ids)?;
            let outcome = self.runtime.bind(&index)?.upsert_many(&records)?;
            debug!(
                index = %key,
                dependents = records.len(),
                succeeded = outcome.success_count,
                "Reindexed dependent records"
            );
        }
        Ok(())
    }

    fn propagate(
        &self,
        store: &dyn RecordStore,
        event: &MutationEvent,
        before: DependentSnapshot,
    ) -> Result<()> {
        if self.suspension.is_suspended(event.record_type(), store) {
            return Ok(());
        }

        self.reindex_direct(store, event)?;

        let after = if event.is_delete() {
            DependentSnapshot::new()
        } else {
            self.dependent_ids(store, &event.record)?
        };
        self.reindex_dependents(store, before.union(after))
    }
}

impl MutationObserver for ChangePropagator {
    fn before_change(
        &self,
        store: &dyn RecordStore,
        event: &MutationEvent,
    ) -> std::result::Result<DependentSnapshot, ObserverError> {
        if event.record.id.is_unsaved() || self.suspension.is_suspended(event.record_type(), store)
        {
            return Ok(DependentSnapshot::new());
        }
        Ok(self.dependent_ids(store, &event.record)?)
    }

    fn after_change(
        &self,
        store: &dyn RecordStore,
        event: &MutationEvent,
        snapshot: DependentSnapshot,
    ) -> std::result::Result<(), ObserverError> {
        Ok(self.propagate(store, event, snapshot)?)
    }
}
