//! In-Memory Record Store
//!
//! BTreeMap-backed adapter for tests and embedding. Ids are allocated from one
//! counter shared by every record type, so a `RecordId` identifies exactly one
//! row across the whole store.
//!
//! Observers are fired without any internal lock held; they may read back
//! through the store while handling an event.

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::domain::meta::{AttributeKind, Method, RecordTypeMeta};
use crate::domain::models::{Record, RecordId, RecordRef, Value};
use crate::domain::ports::{
    Attr, DependentSnapshot, MutationEvent, MutationKind, MutationObserver, RecordQuery,
    RecordStore, RelatedSet,
};
use crate::error::{Result, StorageError};

#[derive(Clone)]
pub struct MemoryRecordStore {
    inner: Arc<Inner>,
}

struct Inner {
    types: RwLock<BTreeMap<String, RecordTypeMeta>>,
    /// Rows keyed by their concrete record type
    rows: RwLock<BTreeMap<String, BTreeMap<RecordId, Record>>>,
    /// Many-to-many membership per link table: `(owner, target)` in insertion order
    links: RwLock<HashMap<String, Vec<(RecordId, RecordId)>>>,
    next_id: AtomicI64,
    observers: RwLock<Vec<Arc<dyn MutationObserver>>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                types: RwLock::new(BTreeMap::new()),
                rows: RwLock::new(BTreeMap::new()),
                links: RwLock::new(HashMap::new()),
                next_id: AtomicI64::new(1),
                observers: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn register_type(&self, meta: RecordTypeMeta) {
        self.inner.rows.write().entry(meta.name.clone()).or_default();
        self.inner.types.write().insert(meta.name.clone(), meta);
    }

    pub fn subscribe(&self, observer: Arc<dyn MutationObserver>) {
        self.inner.observers.write().push(observer);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Mutations
    // ═══════════════════════════════════════════════════════════════════════

    /// Insert (unsaved or unknown id) or update a record; returns the stored row
    pub fn save(&self, mut record: Record) -> Result<Record> {
        if self.record_type(&record.record_type).is_none() {
            return Err(StorageError::record_type_not_found(&record.record_type));
        }

        let exists = !record.id.is_unsaved()
            && self
                .inner
                .rows
                .read()
                .get(&record.record_type)
                .is_some_and(|rows| rows.contains_key(&record.id));

        let now = Utc::now();
        for attribute in self.attributes(&record.record_type) {
            if attribute.auto_now {
                record.set(attribute.name, now);
            }
        }

        let kind = if exists {
            MutationKind::Update
        } else {
            MutationKind::Create
        };
        let event = MutationEvent::new(kind, record);
        let snapshots = self.fire_before(&event)?;

        let mut stored = event.record.clone();
        if stored.id.is_unsaved() {
            stored.id = RecordId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        } else {
            self.inner.next_id.fetch_max(stored.id.0 + 1, Ordering::SeqCst);
        }
        self.inner
            .rows
            .write()
            .entry(stored.record_type.clone())
            .or_default()
            .insert(stored.id, stored.clone());
        debug!(record = %stored.reference(), kind = ?event.kind, "Saved record");

        let event = MutationEvent::new(event.kind, stored.clone());
        self.fire_after(&event, snapshots)?;
        Ok(stored)
    }

    pub fn delete(&self, reference: &RecordRef) -> Result<()> {
        let record = self
            .get(&reference.record_type, reference.id)?
            .ok_or_else(|| StorageError::record_not_found(&reference.record_type, reference.id))?;

        let event = MutationEvent::new(MutationKind::Delete, record);
        let snapshots = self.fire_before(&event)?;

        let id = event.record.id;
        if let Some(rows) = self.inner.rows.write().get_mut(&event.record.record_type) {
            rows.remove(&id);
        }
        for pairs in self.inner.links.write().values_mut() {
            pairs.retain(|(owner, target)| *owner != id && *target != id);
        }
        debug!(record = %event.record.reference(), "Deleted record");

        self.fire_after(&event, snapshots)
    }

    /// Add members to a many-to-many relation (either side)
    pub fn add_related(&self, record: &Record, attribute: &str, ids: &[RecordId]) -> Result<()> {
        let event = MutationEvent::new(
            MutationKind::RelationAdd {
                attribute: attribute.to_string(),
                ids: ids.to_vec(),
            },
            record.clone(),
        );
        self.change_links(&event, attribute, |pairs, side| {
            for id in ids {
                let pair = side.pair(*id);
                if !pairs.contains(&pair) {
                    pairs.push(pair);
                }
            }
        })
    }

    pub fn remove_related(&self, record: &Record, attribute: &str, ids: &[RecordId]) -> Result<()> {
        let event = MutationEvent::new(
            MutationKind::RelationRemove {
                attribute: attribute.to_string(),
                ids: ids.to_vec(),
            },
            record.clone(),
        );
        self.change_links(&event, attribute, |pairs, side| {
            let removed: Vec<_> = ids.iter().map(|id| side.pair(*id)).collect();
            pairs.retain(|pair| !removed.contains(pair));
        })
    }

    pub fn clear_related(&self, record: &Record, attribute: &str) -> Result<()> {
        let event = MutationEvent::new(
            MutationKind::RelationClear {
                attribute: attribute.to_string(),
            },
            record.clone(),
        );
        self.change_links(&event, attribute, |pairs, side| {
            pairs.retain(|pair| !side.owns(pair));
        })
    }

    fn change_links<F>(&self, event: &MutationEvent, attribute: &str, apply: F) -> Result<()>
    where
        F: FnOnce(&mut Vec<(RecordId, RecordId)>, LinkSide),
    {
        let record = &event.record;
        let meta = self
            .lookup_attribute(&record.record_type, attribute)
            .ok_or_else(|| StorageError::attribute_not_found(&record.record_type, attribute))?;

        let (table, owner_first) = match meta.kind {
            AttributeKind::ManyToMany { table, .. } => (table, true),
            AttributeKind::ReverseManyToMany { table, .. } => (table, false),
            _ => {
                return Err(StorageError::config(format!(
                    "'{}' on {} is not a many-to-many relation",
                    attribute, record.record_type
                )))
            }
        };
        let side = LinkSide {
            owner: record.id,
            owner_first,
        };

        let snapshots = self.fire_before(event)?;
        apply(self.inner.links.write().entry(table).or_default(), side);
        self.fire_after(event, snapshots)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Observer dispatch
    // ═══════════════════════════════════════════════════════════════════════

    fn observers(&self) -> Vec<Arc<dyn MutationObserver>> {
        self.inner.observers.read().clone()
    }

    fn fire_before(&self, event: &MutationEvent) -> Result<Vec<DependentSnapshot>> {
        self.observers()
            .iter()
            .map(|observer| {
                observer.before_change(self, event).map_err(|e| {
                    StorageError::observer(format!(
                        "before-change hook failed for {}",
                        event.record.reference()
                    ))
                    .with_boxed_source(e)
                })
            })
            .collect()
    }

    fn fire_after(&self, event: &MutationEvent, snapshots: Vec<DependentSnapshot>) -> Result<()> {
        for (observer, snapshot) in self.observers().iter().zip(snapshots) {
            observer.after_change(self, event, snapshot).map_err(|e| {
                StorageError::observer(format!(
                    "after-change hook failed for {}",
                    event.record.reference()
                ))
                .with_boxed_source(e)
            })?;
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Query helpers
    // ═══════════════════════════════════════════════════════════════════════

    /// Concrete type names that are `record_type` or one of its descendants
    fn concrete_types(&self, record_type: &str) -> Vec<String> {
        self.record_types()
            .into_iter()
            .filter(|name| self.is_subtype(name, record_type))
            .collect()
    }

    fn rows_of(&self, record_type: &str) -> Vec<Record> {
        let concrete = self.concrete_types(record_type);
        let rows = self.inner.rows.read();
        let mut records: Vec<Record> = concrete
            .iter()
            .filter_map(|name| rows.get(name))
            .flat_map(|rows| rows.values().cloned())
            .collect();
        records.sort_by_key(|r| r.id);
        records
    }

    fn linked(&self, table: &str, owner: RecordId, owner_first: bool) -> Vec<RecordId> {
        self.inner
            .links
            .read()
            .get(table)
            .map(|pairs| {
                pairs
                    .iter()
                    .filter_map(|(left, right)| match owner_first {
                        true if *left == owner => Some(*right),
                        false if *right == owner => Some(*left),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Follow `segments` from `record`; true if `target` is among the records reached
    fn reaches(&self, record: &Record, segments: &[String], target: &RecordRef) -> Result<bool> {
        let mut frontier = vec![record.clone()];
        for segment in segments {
            let mut next = Vec::new();
            for current in &frontier {
                match self.read(current, segment)? {
                    Some(Attr::Record(related)) => next.push(related),
                    Some(Attr::Related(set)) => next.extend(self.fetch_all(&set)?),
                    _ => {}
                }
            }
            if next.is_empty() {
                return Ok(false);
            }
            frontier = next;
        }
        Ok(frontier
            .iter()
            .any(|r| r.id == target.id && self.is_subtype(&r.record_type, &target.record_type)))
    }
}

/// Which column of a link table holds the record whose relation changes
#[derive(Debug, Clone, Copy)]
struct LinkSide {
    owner: RecordId,
    owner_first: bool,
}

impl LinkSide {
    fn pair(&self, other: RecordId) -> (RecordId, RecordId) {
        if self.owner_first {
            (self.owner, other)
        } else {
            (other, self.owner)
        }
    }

    fn owns(&self, pair: &(RecordId, RecordId)) -> bool {
        if self.owner_first {
            pair.0 == self.owner
        } else {
            pair.1 == self.owner
        }
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStore for MemoryRecordStore {
    fn record_type(&self, name: &str) -> Option<RecordTypeMeta> {
        self.inner.types.read().get(name).cloned()
    }

    fn record_types(&self) -> Vec<String> {
        self.inner.types.read().keys().cloned().collect()
    }

    fn get(&self, record_type: &str, id: RecordId) -> Result<Option<Record>> {
        let concrete = self.concrete_types(record_type);
        let rows = self.inner.rows.read();
        Ok(concrete
            .iter()
            .filter_map(|name| rows.get(name))
            .find_map(|rows| rows.get(&id).cloned()))
    }

    fn get_many(&self, record_type: &str, ids: &[RecordId]) -> Result<Vec<Record>> {
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.get(record_type, *id)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn query(&self, record_type: &str, query: &RecordQuery) -> Result<Vec<Record>> {
        if self.record_type(record_type).is_none() {
            return Err(StorageError::record_type_not_found(record_type));
        }

        let segments = query.related.as_ref().map(|filter| filter.segments());
        let mut matched = Vec::new();
        for record in self.rows_of(record_type) {
            if let Some(ids) = &query.ids {
                if !ids.contains(&record.id) {
                    continue;
                }
            }
            if query.since.is_some() || query.until.is_some() {
                let stamp = query
                    .date_field
                    .as_deref()
                    .and_then(|field| record.get(field))
                    .and_then(Value::as_datetime);
                let Some(stamp) = stamp else { continue };
                if query.since.is_some_and(|since| stamp < since) {
                    continue;
                }
                if query.until.is_some_and(|until| stamp > until) {
                    continue;
                }
            }
            if let (Some(filter), Some(segments)) = (&query.related, &segments) {
                if !self.reaches(&record, segments, &filter.target)? {
                    continue;
                }
            }
            matched.push(record);
            if query.limit.is_some_and(|limit| matched.len() >= limit) {
                break;
            }
        }
        Ok(matched)
    }

    fn read(&self, record: &Record, attribute: &str) -> Result<Option<Attr>> {
        if attribute == "pk" || attribute == "id" {
            return Ok(Some(Attr::Value(Value::from(record.id))));
        }

        if let Some(meta) = self.lookup_attribute(&record.record_type, attribute) {
            let attr = match &meta.kind {
                AttributeKind::ForeignKey { target } => {
                    let related = match record.get(attribute).and_then(Value::as_int) {
                        Some(id) => self.get(target, RecordId(id))?,
                        None => None,
                    };
                    related.map(Attr::Record).unwrap_or(Attr::Value(Value::Null))
                }
                kind if kind.is_to_many() => Attr::Related(RelatedSet {
                    owner: record.reference(),
                    attribute: attribute.to_string(),
                    target: kind.related_type().unwrap_or_default().to_string(),
                }),
                _ => Attr::Value(record.get(attribute).cloned().unwrap_or(Value::Null)),
            };
            return Ok(Some(attr));
        }

        if let Some(method) = self.lookup_method(&record.record_type, attribute) {
            return Ok(Some(Attr::Method(method)));
        }

        Ok(record.get(attribute).cloned().map(Attr::Value))
    }

    fn fetch_all(&self, related: &RelatedSet) -> Result<Vec<Record>> {
        let owner = &related.owner;
        let meta = self
            .lookup_attribute(&owner.record_type, &related.attribute)
            .ok_or_else(|| StorageError::attribute_not_found(&owner.record_type, &related.attribute))?;

        match meta.kind {
            AttributeKind::ManyToMany { target, table } => {
                let ids = self.linked(&table, owner.id, true);
                self.get_many(&target, &ids)
            }
            AttributeKind::ReverseManyToMany { source, table } => {
                let ids = self.linked(&table, owner.id, false);
                self.get_many(&source, &ids)
            }
            AttributeKind::ReverseForeignKey { source, field } => Ok(self
                .rows_of(&source)
                .into_iter()
                .filter(|r| r.get(&field).and_then(Value::as_int) == Some(owner.id.0))
                .collect()),
            _ => Err(StorageError::config(format!(
                "'{}' on {} is not a to-many relation",
                related.attribute, owner.record_type
            ))),
        }
    }

    fn invoke(&self, record: &Record, method: &Method) -> Result<Attr> {
        method.call(record, self)
    }
}
